pub mod fields;
pub mod phone;

use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::DealType;
use crate::record::ListingRecord;
use crate::session::{FetchError, Page, Session, DETAIL_TIMEOUT};

/// Parse a fixed selector; call sites pass literals only.
pub(crate) fn css(selector: &str) -> Selector {
    Selector::parse(selector).expect("valid css selector")
}

pub(crate) fn squash_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible-ish text of the whole page, for regex fallbacks.
pub(crate) fn page_text(doc: &Html) -> String {
    let text = match doc.select(&css("body")).next() {
        Some(body) => body.text().collect::<Vec<_>>().join(" "),
        None => doc.root_element().text().collect::<Vec<_>>().join(" "),
    };
    squash_ws(&text)
}

/// Assemble a record from an already fetched detail page. Field misses stay
/// None/empty; they never fail the record.
pub fn listing_record(page: &Page, deal: DealType) -> ListingRecord {
    let doc = page.document();
    let text = page_text(&doc);

    let title = fields::title(&doc, deal);
    let price = fields::price(&doc, deal);
    let address = fields::address(&doc, deal).unwrap_or_default();
    let area = fields::area(&doc, &text);
    let floor = fields::floor(&doc, &text);
    let category = fields::category(title.as_deref()).to_string();

    if price.is_none() {
        debug!(url = %page.url, "price not found");
    }
    if address.is_empty() {
        debug!(url = %page.url, "address not found");
    }

    ListingRecord {
        url: page.url.clone(),
        address,
        price,
        category,
        area,
        floor,
        phone: None,
    }
}

/// Fetch one detail page and harvest the full record, phone included.
/// A page-level failure skips the listing.
pub async fn harvest(session: &Session, url: &str, deal: DealType) -> Option<ListingRecord> {
    let page = match session.fetch(url, DETAIL_TIMEOUT).await {
        Ok(page) => page,
        Err(e @ FetchError::Timeout { .. }) => {
            warn!(%url, error = %e, "detail page timed out, skipping");
            return None;
        }
        Err(e) => {
            warn!(%url, error = %e, "detail page failed, skipping");
            return None;
        }
    };

    let mut record = listing_record(&page, deal);
    record.phone = phone::reveal_phone(session, &page).await;
    Some(record)
}
