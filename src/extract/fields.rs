use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::config::DealType;
use crate::record::{Floor, Price};

use super::{css, squash_ws};

pub const CATEGORY_OFFICE: &str = "Офис";
pub const CATEGORY_FREE_PURPOSE: &str = "Свобод. назнач.";

// Selector cascades as the site serves them; order matters, the first
// selector with non-empty text wins. Sale and rent pages use different
// markup generations, hence the separate tables.
const SALE_PRICE: &[&str] = &[
    "[data-testid='price-amount']",
    "[itemprop='price']",
    "[data-mark='MainPrice']",
    "span[class*='Price']",
    "[class*='price']",
];
const SALE_ADDRESS: &[&str] = &[
    "[data-testid='address']",
    "[data-name='Address']",
    "[itemprop='address']",
    "[class*='address']",
];
const SALE_TITLE: &[&str] = &[
    "h1[data-name='OfferTitle']",
    "h1[data-testid='object-title']",
    "h1",
];

const RENT_PRICE: &[&str] = &[
    "[data-testid='price-amount']",
    "[class*='price-value']",
    "[class*='MainPrice']",
    "span[class*='price']",
    "[itemprop='price']",
];
const RENT_ADDRESS: &[&str] = &[
    "[data-testid='address']",
    "[class*='address']",
    "[data-name='Address']",
    "[itemprop='address']",
];
const RENT_TITLE: &[&str] = &[
    "h1[data-testid='object-title']",
    "h1[data-name='OfferTitle']",
    "h1",
];

static AREA_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d\s]+[.,]?\d*)\s*м²").unwrap());
static AREA_LABELED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Площадь[:\s]*([\d\s]+[.,]?\d*)\s*м²").unwrap());
static FLOOR_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+)\s*из\s*(\d+)").unwrap());
static FLOOR_LABELED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Этаж\s+(-?\d+)\s+из\s+(\d+)").unwrap());
static MAP_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s*На карте.*$").unwrap());

fn price_selectors(deal: DealType) -> &'static [&'static str] {
    match deal {
        DealType::Rent => RENT_PRICE,
        DealType::Sale => SALE_PRICE,
    }
}

fn address_selectors(deal: DealType) -> &'static [&'static str] {
    match deal {
        DealType::Rent => RENT_ADDRESS,
        DealType::Sale => SALE_ADDRESS,
    }
}

fn title_selectors(deal: DealType) -> &'static [&'static str] {
    match deal {
        DealType::Rent => RENT_TITLE,
        DealType::Sale => SALE_TITLE,
    }
}

/// Walk a selector cascade and return the first non-empty text.
pub(crate) fn first_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else { continue };
        for element in doc.select(&selector) {
            let text = squash_ws(&element.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

pub fn price(doc: &Html, deal: DealType) -> Option<Price> {
    first_text(doc, price_selectors(deal)).and_then(|t| Price::parse(&t))
}

pub fn address(doc: &Html, deal: DealType) -> Option<String> {
    let raw = first_text(doc, address_selectors(deal))?;
    let cleaned = clean_address(&raw);
    (!cleaned.is_empty()).then_some(cleaned)
}

pub fn title(doc: &Html, deal: DealType) -> Option<String> {
    first_text(doc, title_selectors(deal))
}

/// "Офис" when the title says so, the free-purpose default otherwise.
pub fn category(title: Option<&str>) -> &'static str {
    match title {
        Some(t) if t.to_lowercase().contains("офис") => CATEGORY_OFFICE,
        _ => CATEGORY_FREE_PURPOSE,
    }
}

/// Drop the trailing map-widget caption the address element carries.
pub fn clean_address(raw: &str) -> String {
    squash_ws(&MAP_SUFFIX_RE.replace(raw, ""))
}

/// Structural pass over the summary blocks first, then labeled and bare
/// regex passes over the whole page text.
pub fn area(doc: &Html, page_text: &str) -> Option<f64> {
    labeled_block_text(doc, "Площадь", &["div", "li", "span"])
        .and_then(|block| area_value(&block))
        .or_else(|| AREA_LABELED_RE.captures(page_text).and_then(|c| parse_amount(&c[1])))
        .or_else(|| AREA_VALUE_RE.captures(page_text).and_then(|c| parse_amount(&c[1])))
}

pub fn floor(doc: &Html, page_text: &str) -> Option<Floor> {
    labeled_block_text(doc, "Этаж", &["div", "li"])
        .and_then(|block| floor_pair(&block))
        .or_else(|| FLOOR_LABELED_RE.captures(page_text).and_then(|c| floor_from(&c)))
}

fn area_value(block: &str) -> Option<f64> {
    AREA_VALUE_RE.captures(block).and_then(|c| parse_amount(&c[1]))
}

fn floor_pair(block: &str) -> Option<Floor> {
    FLOOR_PAIR_RE.captures(block).and_then(|c| floor_from(&c))
}

fn floor_from(caps: &regex::Captures<'_>) -> Option<Floor> {
    let current = caps[1].parse().ok()?;
    let total = caps[2].parse().ok()?;
    Some(Floor { current, total })
}

/// "75,3" / "1 200" -> f64; zero counts as a miss.
fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    cleaned.replace(',', ".").parse::<f64>().ok().filter(|v| *v > 0.0)
}

/// Text of the nearest block ancestor of an element whose direct text carries
/// the label; mirrors how the site nests its "Площадь"/"Этаж" summary rows.
fn labeled_block_text(doc: &Html, label: &str, block_tags: &[&str]) -> Option<String> {
    for element in doc.select(&css("body *")) {
        let direct: String = element
            .children()
            .filter_map(|node| node.value().as_text().map(|t| t.text.to_string()))
            .collect();
        if !direct.contains(label) {
            continue;
        }
        let block = element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| block_tags.contains(&a.value().name()));
        if let Some(block) = block {
            return Some(squash_ws(&block.text().collect::<Vec<_>>().join(" ")));
        }
    }
    None
}
