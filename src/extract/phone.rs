use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::config::BASE_URL;
use crate::session::{Page, Session, DETAIL_TIMEOUT};

use super::{css, page_text};

const REVEAL_LABEL: &str = "Показать телефон";
const REVEAL_SETTLE: Duration = Duration::from_millis(500);

const REVEAL_ATTR_SELECTORS: &[&str] = &[
    "[data-testid*='phone']",
    "button[class*='phone']",
    "button[class*='Phone']",
];

const MODAL_SELECTORS: &[&str] = &[
    "div[role='dialog']",
    "div[class*='modal']",
    "div[class*='Modal']",
    "div[class*='popup']",
    "div[class*='Popup']",
];

// Phone shapes seen in modals and page text, loosest first-party format last.
static PHONE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\+7(?:[\s\-()]*\d){10}",
        r"8(?:[\s\-()]*\d){10}",
        r"\+?7[\s\-()]*\d{3}[\s\-()]*\d{3}[\s\-()]*\d{2}[\s\-()]*\d{2}",
        r"\+7\s*\d{3}\s*\d{3}[\s\-]*\d{2}[\s\-]*\d{2}",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static OFFER_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/commercial/(\d+)").unwrap());

struct RevealControl {
    offer_id: Option<String>,
}

struct DetailScan {
    control: Option<RevealControl>,
    tel_links: Vec<String>,
    body_text: String,
}

/// Reveal and extract the listing phone. Every failure path degrades to None;
/// a listing without a reachable phone is still worth keeping.
pub async fn reveal_phone(session: &Session, page: &Page) -> Option<String> {
    let scan = scan_detail(page);

    let control = match scan.control {
        Some(control) => control,
        None => {
            debug!(url = %page.url, "no phone reveal control, skipping");
            return None;
        }
    };

    // Activation: issue the request the control triggers instead of clicking
    // it, which sidesteps overlay hit-testing entirely.
    let offer_id = control.offer_id.or_else(|| offer_id_from_url(&page.url));
    let fragment = match offer_id {
        Some(id) => fetch_fragment(session, &id).await,
        None => {
            debug!(url = %page.url, "reveal control without resolvable offer id");
            None
        }
    };
    tokio::time::sleep(REVEAL_SETTLE).await;

    if let Some(body) = fragment.as_deref() {
        if let Some(phone) = phone_from_json(body) {
            return Some(phone);
        }
        if let Some(phone) = phone_from_fragment(body) {
            return Some(phone);
        }
    }

    scan.tel_links
        .iter()
        .find_map(|raw| validate_phone(raw))
        .or_else(|| phone_from_text(&scan.body_text))
}

/// One synchronous parse of the detail page for everything the reveal flow
/// needs later, so no document is held across an await.
fn scan_detail(page: &Page) -> DetailScan {
    let doc = page.document();
    let control = find_reveal_control(&doc);
    let tel_links = doc
        .select(&css("a[href^='tel:']"))
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| href.strip_prefix("tel:"))
        .filter_map(|raw| raw.split('?').next())
        .map(str::to_string)
        .collect();
    let body_text = page_text(&doc);
    DetailScan { control, tel_links, body_text }
}

/// Labeled buttons first, then any element with the label as direct text,
/// then attribute fallbacks.
fn find_reveal_control(doc: &Html) -> Option<RevealControl> {
    for button in doc.select(&css("button")) {
        if button.text().collect::<String>().contains(REVEAL_LABEL) {
            return Some(control_from(button));
        }
    }
    for element in doc.select(&css("body *")) {
        let direct: String = element
            .children()
            .filter_map(|node| node.value().as_text().map(|t| t.text.to_string()))
            .collect();
        if direct.contains(REVEAL_LABEL) {
            return Some(control_from(element));
        }
    }
    for raw in REVEAL_ATTR_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else { continue };
        if let Some(element) = doc.select(&selector).next() {
            return Some(control_from(element));
        }
    }
    None
}

fn control_from(element: ElementRef<'_>) -> RevealControl {
    let offer_id = element
        .value()
        .attr("data-offer-id")
        .or_else(|| element.value().attr("data-id"))
        .map(str::to_string);
    RevealControl { offer_id }
}

fn offer_id_from_url(url: &str) -> Option<String> {
    OFFER_ID_RE.captures(url).map(|caps| caps[1].to_string())
}

fn reveal_url(offer_id: &str) -> String {
    format!("{}/ajax/offer-phones?offerId={}", BASE_URL, offer_id)
}

async fn fetch_fragment(session: &Session, offer_id: &str) -> Option<String> {
    match session.fetch(&reveal_url(offer_id), DETAIL_TIMEOUT).await {
        Ok(page) => Some(page.html),
        Err(e) => {
            debug!(offer_id, error = %e, "phone reveal request failed");
            None
        }
    }
}

/// JSON reveal responses carry the number under a phone-named key, either
/// directly or nested one level down.
fn phone_from_json(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    phone_in_value(&value)
}

fn phone_in_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, v)| {
            if key.to_lowercase().contains("phone") {
                any_valid_phone(v)
            } else {
                phone_in_value(v)
            }
        }),
        Value::Array(items) => items.iter().find_map(phone_in_value),
        _ => None,
    }
}

fn any_valid_phone(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => validate_phone(s),
        Value::Number(n) => validate_phone(&n.to_string()),
        Value::Object(map) => map.values().find_map(any_valid_phone),
        Value::Array(items) => items.iter().find_map(any_valid_phone),
        _ => None,
    }
}

/// HTML reveal responses: dialog/modal containers first, tel: anchors next,
/// the whole fragment text as the last pass.
fn phone_from_fragment(body: &str) -> Option<String> {
    let fragment = Html::parse_fragment(body);

    for raw in MODAL_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else { continue };
        for container in fragment.select(&selector) {
            let text = container.text().collect::<Vec<_>>().join(" ");
            if let Some(phone) = phone_from_text(&text) {
                return Some(phone);
            }
        }
    }

    for anchor in fragment.select(&css("a[href^='tel:']")) {
        let raw = anchor.value().attr("href").and_then(|h| h.strip_prefix("tel:"));
        if let Some(phone) = raw
            .and_then(|r| r.split('?').next())
            .and_then(validate_phone)
        {
            return Some(phone);
        }
    }

    phone_from_text(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

fn phone_from_text(text: &str) -> Option<String> {
    PHONE_RES
        .iter()
        .find_map(|re| re.find_iter(text).find_map(|m| validate_phone(m.as_str())))
}

/// Normalize a candidate to +7XXXXXXXXXX, rejecting anything that does not
/// look like a Russian number: 10-11 digits, at most one leading plus, and
/// a valid prefix.
pub fn validate_phone(raw: &str) -> Option<String> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return None;
    }

    let digits: String = candidate.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 10 || digits.len() > 11 {
        return None;
    }

    let plus_count = candidate.matches('+').count();
    if plus_count > 1 {
        return None;
    }
    if plus_count == 1 && !candidate.starts_with('+') {
        return None;
    }

    if candidate.starts_with("+7") || (plus_count == 0 && digits.len() == 11 && digits.starts_with('7')) {
        if digits.len() == 11 && digits.starts_with('7') {
            return Some(format!("+7{}", &digits[1..]));
        }
        return None;
    }

    if candidate.starts_with('8') && digits.len() == 11 {
        return Some(format!("+7{}", &digits[1..]));
    }

    if digits.len() == 10 && matches!(digits.as_bytes()[0], b'9' | b'3' | b'4' | b'5' | b'8') {
        return Some(format!("+7{}", digits));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_formatted_mobile() {
        assert_eq!(validate_phone("+7 (912) 345-67-89").as_deref(), Some("+79123456789"));
    }

    #[test]
    fn normalizes_eight_prefix() {
        assert_eq!(validate_phone("89123456789").as_deref(), Some("+79123456789"));
    }

    #[test]
    fn rejects_short_numbers() {
        assert_eq!(validate_phone("12345"), None);
    }

    #[test]
    fn prefix_rules() {
        assert_eq!(validate_phone("79123456789").as_deref(), Some("+79123456789"));
        assert_eq!(validate_phone("9123456789").as_deref(), Some("+79123456789"));
        assert_eq!(validate_phone("++79123456789"), None);
        assert_eq!(validate_phone("tel+79123456789"), None);
        assert_eq!(validate_phone("1234567890"), None);
        assert_eq!(validate_phone("+7912345678"), None);
    }

    #[test]
    fn phone_in_free_text() {
        let text = "Показ по записи, звоните +7 (912) 345-67-89 с 9 до 18";
        assert_eq!(phone_from_text(text).as_deref(), Some("+79123456789"));
    }

    #[test]
    fn ignores_invalid_candidates_in_text() {
        assert_eq!(phone_from_text("дом 8, строение 12"), None);
    }

    #[test]
    fn json_payload_with_nested_number() {
        let body = r#"{"phones":[{"countryCode":"+7","number":"9123456789"}]}"#;
        assert_eq!(phone_from_json(body).as_deref(), Some("+79123456789"));
    }

    #[test]
    fn json_without_phones_is_none() {
        assert_eq!(phone_from_json(r#"{"status":"ok"}"#), None);
        assert_eq!(phone_from_json("not json"), None);
    }

    #[test]
    fn modal_fragment_text() {
        let html = std::fs::read_to_string("tests/fixtures/phones_fragment.html").unwrap();
        assert_eq!(phone_from_fragment(&html).as_deref(), Some("+74951234567"));
    }

    #[test]
    fn fragment_tel_anchor() {
        let body = r#"<div><a href="tel:+79031234567?call">позвонить</a></div>"#;
        assert_eq!(phone_from_fragment(body).as_deref(), Some("+79031234567"));
    }

    #[test]
    fn reveal_control_carries_offer_id() {
        let html = std::fs::read_to_string("tests/fixtures/detail_sale.html").unwrap();
        let doc = Html::parse_document(&html);
        let control = find_reveal_control(&doc).unwrap();
        assert_eq!(control.offer_id.as_deref(), Some("318238233"));
    }

    #[test]
    fn pages_without_control_are_skipped() {
        let html = std::fs::read_to_string("tests/fixtures/detail_sparse.html").unwrap();
        let doc = Html::parse_document(&html);
        assert!(find_reveal_control(&doc).is_none());
    }

    #[test]
    fn offer_id_from_detail_url() {
        assert_eq!(
            offer_id_from_url("https://cian.ru/rent/commercial/318238233/").as_deref(),
            Some("318238233")
        );
        assert_eq!(offer_id_from_url("https://cian.ru/about/"), None);
    }
}
