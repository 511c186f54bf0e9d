use std::collections::BTreeSet;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use scraper::Html;
use tracing::{info, warn};

use crate::config::{DealType, BASE_URL};
use crate::extract::css;
use crate::session::{FetchError, Session, RESULTS_TIMEOUT};

const SEARCH_URL: &str = "https://cian.ru/cat.php";
const PAGE_DELAY: Duration = Duration::from_millis(600);

// Fragments the interstitial page shows when the session is flagged.
const BLOCK_KEYWORDS: &[&str] = &["робот", "captcha", "подтвердите"];

static RENT_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/rent/commercial/(\d+)").unwrap());
static SALE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/sale/commercial/(\d+)").unwrap());

fn link_re(deal: DealType) -> &'static Regex {
    match deal {
        DealType::Rent => &RENT_LINK_RE,
        DealType::Sale => &SALE_LINK_RE,
    }
}

fn canonical_url(deal: DealType, offer_id: &str) -> String {
    format!("{}/{}/commercial/{}/", BASE_URL, deal.as_str(), offer_id)
}

/// Results page URL with the site's exact query parameter set.
pub fn search_page_url(region_id: u32, deal: DealType, page: u32) -> String {
    Url::parse_with_params(
        SEARCH_URL,
        [
            ("deal_type", deal.as_str().to_string()),
            ("engine_version", "2".to_string()),
            ("offer_type", "offices".to_string()),
            ("office_type[0]", "1".to_string()),
            ("p", page.to_string()),
            ("region", region_id.to_string()),
        ],
    )
    .expect("static search url")
    .to_string()
}

/// Extract offer links with two redundant strategies: every anchor in the
/// document, then anchors scoped to article cards. Hits are unioned and
/// canonicalized, so markup drift in either place still yields links.
pub fn listing_links(html: &str, deal: DealType) -> BTreeSet<String> {
    let doc = Html::parse_document(html);
    let re = link_re(deal);
    let mut links = BTreeSet::new();

    for selector in ["a[href]", "article a[href]"] {
        for anchor in doc.select(&css(selector)) {
            let Some(href) = anchor.value().attr("href") else { continue };
            if let Some(caps) = re.captures(href) {
                links.insert(canonical_url(deal, &caps[1]));
            }
        }
    }

    links
}

/// Anti-bot interstitial heuristic over the raw page source.
pub fn looks_blocked(html: &str) -> bool {
    let lower = html.to_lowercase();
    BLOCK_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Walk result pages and return every discovered detail URL, sorted.
pub async fn collect_links(
    session: &Session,
    region_id: u32,
    deal: DealType,
    page_cap: Option<u32>,
) -> BTreeSet<String> {
    collect_pages(deal, page_cap, PAGE_DELAY, |page| {
        let url = search_page_url(region_id, deal, page);
        async move { session.fetch(&url, RESULTS_TIMEOUT).await.map(|p| p.html) }
    })
    .await
}

/// Pagination loop. Stops on the page cap, on an empty page, on the first
/// page that adds nothing new, or on a fetch failure (partial set kept).
async fn collect_pages<F, Fut>(
    deal: DealType,
    page_cap: Option<u32>,
    delay: Duration,
    mut fetch_page: F,
) -> BTreeSet<String>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    let mut all = BTreeSet::new();
    let mut page = 1u32;

    loop {
        if let Some(cap) = page_cap {
            if page > cap {
                info!(cap, "page cap reached");
                break;
            }
        }

        let html = match fetch_page(page).await {
            Ok(html) => html,
            Err(FetchError::Timeout { .. }) => {
                warn!(page, "results page timed out, keeping partial set");
                break;
            }
            Err(e) => {
                warn!(page, error = %e, "results page failed, keeping partial set");
                break;
            }
        };

        let found = listing_links(&html, deal);
        if found.is_empty() {
            if looks_blocked(&html) {
                warn!(page, "no listings and anti-bot markers present, likely blocked");
            } else {
                info!(page, "no listings found, stopping");
            }
            break;
        }

        let before = all.len();
        let found_count = found.len();
        all.extend(found);
        let new = all.len() - before;
        info!(page, found = found_count, new, total = all.len(), "results page parsed");

        if new == 0 {
            info!(page, "no new links, stopping");
            break;
        }

        page += 1;
        tokio::time::sleep(delay).await;
    }

    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const PAGE_WITH_TWO: &str = r##"
        <html><body>
          <article><a href="/rent/commercial/111111/?position=1">Офис, 40 м²</a></article>
          <div><a href="https://cian.ru/rent/commercial/222222/">Офис, 55 м²</a></div>
          <a href="/sale/commercial/999999/">продажа рядом</a>
          <a href="/rent/flat/555/">не коммерция</a>
        </body></html>"##;

    #[test]
    fn links_are_canonicalized_and_unioned() {
        let links = listing_links(PAGE_WITH_TWO, DealType::Rent);
        assert_eq!(links.len(), 2);
        assert!(links.contains("https://cian.ru/rent/commercial/111111/"));
        assert!(links.contains("https://cian.ru/rent/commercial/222222/"));
    }

    #[test]
    fn deal_type_filters_links() {
        let links = listing_links(PAGE_WITH_TWO, DealType::Sale);
        assert_eq!(links.len(), 1);
        assert!(links.contains("https://cian.ru/sale/commercial/999999/"));
    }

    #[test]
    fn results_fixture_deduplicates_across_strategies() {
        let html = std::fs::read_to_string("tests/fixtures/results_rent.html").unwrap();
        let links = listing_links(&html, DealType::Rent);
        assert_eq!(links.len(), 2);
        assert!(links.contains("https://cian.ru/rent/commercial/311111111/"));
        assert!(links.contains("https://cian.ru/rent/commercial/322222222/"));
    }

    #[test]
    fn search_url_carries_expected_params() {
        let url = search_page_url(4743, DealType::Sale, 3);
        assert!(url.starts_with("https://cian.ru/cat.php?"));
        assert!(url.contains("deal_type=sale"));
        assert!(url.contains("engine_version=2"));
        assert!(url.contains("offer_type=offices"));
        assert!(url.contains("office_type%5B0%5D=1"));
        assert!(url.contains("p=3"));
        assert!(url.contains("region=4743"));
    }

    #[test]
    fn blocked_heuristic() {
        assert!(looks_blocked("<html>Подтвердите, что вы не робот</html>"));
        assert!(looks_blocked("<html><title>Captcha</title></html>"));
        assert!(!looks_blocked("<html>Аренда офисов</html>"));
    }

    #[tokio::test]
    async fn stops_after_page_without_new_links() {
        let calls = Cell::new(0u32);
        let links = collect_pages(DealType::Rent, None, Duration::ZERO, |page| {
            calls.set(calls.get() + 1);
            // page 2 repeats page 1: nothing new, page 3 must never be requested
            let html = match page {
                1 | 2 => PAGE_WITH_TWO.to_string(),
                _ => panic!("page {page} should not be fetched"),
            };
            async move { Ok(html) }
        })
        .await;
        assert_eq!(links.len(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn empty_page_stops_immediately() {
        let calls = Cell::new(0u32);
        let links = collect_pages(DealType::Rent, None, Duration::ZERO, |_| {
            calls.set(calls.get() + 1);
            async { Ok("<html><body>ничего</body></html>".to_string()) }
        })
        .await;
        assert!(links.is_empty());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn timeout_keeps_partial_set() {
        let links = collect_pages(DealType::Rent, None, Duration::ZERO, |page| {
            let result = match page {
                1 => Ok(PAGE_WITH_TWO.to_string()),
                _ => Err(FetchError::Timeout { url: "page 2".into() }),
            };
            async move { result }
        })
        .await;
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn respects_page_cap() {
        // every page yields a fresh link, so only the cap can stop the walk
        let links = collect_pages(DealType::Rent, Some(3), Duration::ZERO, |page| {
            let html = format!(r#"<a href="/rent/commercial/{page}00/">x</a>"#);
            async move { Ok(html) }
        })
        .await;
        assert_eq!(links.len(), 3);
    }
}
