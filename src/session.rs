use std::time::Duration;

use anyhow::anyhow;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use reqwest::Client;
use scraper::Html;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Load bound for search result pages.
pub const RESULTS_TIMEOUT: Duration = Duration::from_secs(10);
/// Load bound for detail pages, which render noticeably slower.
pub const DETAIL_TIMEOUT: Duration = Duration::from_secs(12);

struct Profile {
    name: &'static str,
    user_agent: &'static str,
    accept_language: &'static str,
}

// Ordered constructor attempts: the first profile that builds wins.
const PROFILES: &[Profile] = &[
    Profile {
        name: "firefox",
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
        accept_language: "ru-RU,ru;q=0.9,en-US;q=0.5",
    },
    Profile {
        name: "chrome",
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                     Chrome/124.0.0.0 Safari/537.36",
        accept_language: "ru-RU,ru;q=0.9",
    },
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out loading {url}")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },
}

impl FetchError {
    fn classify(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            FetchError::Timeout { url: url.to_string() }
        } else {
            FetchError::Http { url: url.to_string(), source }
        }
    }
}

/// A fetched page. Holds raw HTML only; `scraper::Html` is not Send, so
/// parsing happens in synchronous helpers and never crosses an await.
pub struct Page {
    pub url: String,
    pub html: String,
}

impl Page {
    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }
}

/// Cookie-carrying fetch session shared by the whole run.
pub struct Session {
    client: Client,
    pub profile: &'static str,
}

impl Session {
    /// Try client profiles in order and keep the first one that builds.
    pub fn launch() -> anyhow::Result<Self> {
        let mut last_err = None;
        for profile in PROFILES {
            match build_client(profile) {
                Ok(client) => {
                    info!(profile = profile.name, "fetch session ready");
                    return Ok(Session { client, profile: profile.name });
                }
                Err(e) => {
                    warn!(profile = profile.name, error = %e, "client profile failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(anyhow!("no usable client profile: {}", e)),
            None => Err(anyhow!("no client profiles configured")),
        }
    }

    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<Page, FetchError> {
        debug!(%url, "fetching");
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::classify(url, e))?;
        let html = response
            .text()
            .await
            .map_err(|e| FetchError::classify(url, e))?;
        Ok(Page { url: url.to_string(), html })
    }
}

fn build_client(profile: &Profile) -> reqwest::Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(profile.accept_language));
    Client::builder()
        .cookie_store(true)
        .user_agent(profile.user_agent)
        .default_headers(headers)
        .timeout(DETAIL_TIMEOUT)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_prefers_first_profile() {
        let session = Session::launch().unwrap();
        assert_eq!(session.profile, "firefox");
    }

    #[test]
    fn timeout_error_names_the_url() {
        let err = FetchError::Timeout { url: "https://cian.ru/cat.php?p=1".into() };
        assert!(err.to_string().contains("cat.php"));
    }
}
