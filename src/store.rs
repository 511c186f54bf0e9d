use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::record::{ListingRecord, Price};

/// Store columns in row order. The downstream bot reads cells by these
/// exact Russian names, so they are part of the data contract.
pub const COLUMNS: [&str; 8] = [
    "Ссылка",
    "Адрес",
    "Цена",
    "Тип помещения",
    "Площадь",
    "Этаж",
    "Этажей в доме",
    "Телефон",
];

pub const BATCH_SIZE: usize = 10;

// Excel wants the BOM; the readers below tolerate it.
const BOM: &[u8] = b"\xef\xbb\xbf";

/// Link column of an existing store, for skipping already-saved listings.
/// A missing file is an empty set, malformed rows are skipped.
pub fn load_existing_links(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading store {}", path.display()))?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(raw.as_bytes());
    let link_idx = reader.headers()?.iter().position(|h| h == "Ссылка");
    let Some(link_idx) = link_idx else {
        warn!(path = %path.display(), "store has no link column, treating as empty");
        return Ok(HashSet::new());
    };

    let mut links = HashSet::new();
    for row in reader.records() {
        let Ok(row) = row else { continue };
        if let Some(cell) = row.get(link_idx) {
            let cell = cell.trim();
            if !cell.is_empty() {
                links.insert(cell.to_string());
            }
        }
    }
    Ok(links)
}

/// Accumulates records and appends them to the store in batches. The file is
/// created on the first flush; the header (and BOM) is written only then, so
/// appending to an existing store never duplicates it.
pub struct BatchWriter {
    path: PathBuf,
    pending: Vec<ListingRecord>,
    written: usize,
}

impl BatchWriter {
    pub fn new(path: &Path) -> Self {
        BatchWriter { path: path.to_path_buf(), pending: Vec::new(), written: 0 }
    }

    /// Queue one record, flushing when the batch fills up.
    pub fn push(&mut self, record: ListingRecord) -> Result<()> {
        self.pending.push(record);
        if self.pending.len() >= BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Append everything pending to the store.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }

        let fresh = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening store {}", self.path.display()))?;
        if fresh {
            file.write_all(BOM)?;
        }

        let mut writer = csv::Writer::from_writer(file);
        if fresh {
            writer.write_record(COLUMNS)?;
        }
        for record in &self.pending {
            writer.write_record(row_cells(record))?;
        }
        writer.flush()?;

        info!(rows = self.pending.len(), path = %self.path.display(), "batch flushed");
        self.written += self.pending.len();
        self.pending.clear();
        Ok(())
    }

    /// Flush the tail batch and report how many rows this writer appended.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        Ok(self.written)
    }
}

fn row_cells(record: &ListingRecord) -> [String; 8] {
    let (floor, floor_total) = match record.floor {
        Some(f) => (f.current.to_string(), f.total.to_string()),
        None => (String::new(), String::new()),
    };
    [
        record.url.clone(),
        record.address.clone(),
        record.price.map(|p| p.to_string()).unwrap_or_default(),
        record.category.clone(),
        record.area.map(format_amount).unwrap_or_default(),
        floor,
        floor_total,
        record.phone.clone().unwrap_or_default(),
    ]
}

/// Whole-number floats collapse to plain integers in the store ("75", not
/// "75.0"); fractional values keep their decimals.
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// One row read back from the store. Numeric cells that fail to parse come
/// back as None; consumers must tolerate that (and range prices) anyway.
#[derive(Debug, Clone)]
pub struct StoredListing {
    pub url: String,
    pub address: String,
    pub price: Option<Price>,
    pub category: String,
    pub area: Option<f64>,
    pub floor: Option<i32>,
    pub floor_total: Option<i32>,
    pub phone: Option<String>,
}

struct ColumnIndex {
    url: Option<usize>,
    address: Option<usize>,
    price: Option<usize>,
    category: Option<usize>,
    area: Option<usize>,
    floor: Option<usize>,
    floor_total: Option<usize>,
    phone: Option<usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name);
        ColumnIndex {
            url: find("Ссылка"),
            address: find("Адрес"),
            price: find("Цена"),
            category: find("Тип помещения"),
            area: find("Площадь"),
            floor: find("Этаж"),
            floor_total: find("Этажей в доме"),
            phone: find("Телефон"),
        }
    }
}

/// Lenient read of the whole store: BOM-tolerant, missing columns become
/// empty, rows without a link are dropped, bad rows are skipped.
pub fn read_all(path: &Path) -> Result<Vec<StoredListing>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading store {}", path.display()))?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(raw.as_bytes());
    let cols = ColumnIndex::from_headers(&reader.headers()?.clone());

    let mut listings = Vec::new();
    for row in reader.records() {
        let Ok(row) = row else { continue };
        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or("").trim();

        let url = cell(cols.url).to_string();
        if url.is_empty() {
            continue;
        }
        let phone = cell(cols.phone);
        listings.push(StoredListing {
            url,
            address: cell(cols.address).to_string(),
            price: parse_price_cell(cell(cols.price)),
            category: cell(cols.category).to_string(),
            area: parse_area_cell(cell(cols.area)),
            floor: cell(cols.floor).parse().ok(),
            floor_total: cell(cols.floor_total).parse().ok(),
            phone: (!phone.is_empty()).then(|| phone.to_string()),
        });
    }
    Ok(listings)
}

fn parse_price_cell(cell: &str) -> Option<Price> {
    if cell.is_empty() {
        return None;
    }
    Price::parse(cell)
}

fn parse_area_cell(cell: &str) -> Option<f64> {
    if cell.is_empty() {
        return None;
    }
    let cleaned: String = cell
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.trim_end_matches("м²").parse().ok()
}

/// Exact-match store filter, the contract the downstream bot applies. A row
/// missing a filtered field fails that filter; a range price satisfies a
/// bound only when the whole range does.
#[derive(Debug, Default, Clone, Copy)]
pub struct Filter {
    pub min_area: Option<f64>,
    pub max_area: Option<f64>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub floor: Option<i32>,
}

impl Filter {
    pub fn matches(&self, listing: &StoredListing) -> bool {
        if let Some(min) = self.min_area {
            if !listing.area.is_some_and(|a| a >= min) {
                return false;
            }
        }
        if let Some(max) = self.max_area {
            if !listing.area.is_some_and(|a| a <= max) {
                return false;
            }
        }

        if self.min_price.is_some() || self.max_price.is_some() {
            let Some(price) = listing.price else { return false };
            let (low, high) = match price {
                Price::Single(v) => (v, v),
                Price::Range { min, max } => (min, max),
            };
            if self.min_price.is_some_and(|bound| low < bound) {
                return false;
            }
            if self.max_price.is_some_and(|bound| high > bound) {
                return false;
            }
        }

        if let Some(wanted) = self.floor {
            if listing.floor != Some(wanted) {
                return false;
            }
        }
        true
    }
}
