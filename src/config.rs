use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::ValueEnum;

pub const BASE_URL: &str = "https://cian.ru";

/// Deal side of the listings to harvest; appears in URLs and the store name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DealType {
    Rent,
    Sale,
}

impl DealType {
    pub fn as_str(self) -> &'static str {
        match self {
            DealType::Rent => "rent",
            DealType::Sale => "sale",
        }
    }
}

impl fmt::Display for DealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test walks a capped number of result pages, full walks until exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Test,
    Full,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Test => "test",
            RunMode::Full => "full",
        })
    }
}

pub struct Region {
    pub key: &'static str,
    pub name: &'static str,
    pub id: u32,
}

pub const REGIONS: &[Region] = &[
    Region { key: "moscow", name: "Москва", id: 1 },
    Region { key: "spb", name: "Санкт-Петербург", id: 2 },
    Region { key: "ekaterinburg", name: "Екатеринбург", id: 4743 },
    Region { key: "chelyabinsk", name: "Челябинск", id: 5048 },
];

pub fn resolve_region(city: &str) -> Result<&'static Region> {
    let key = city.trim().to_lowercase();
    match REGIONS.iter().find(|r| r.key == key) {
        Some(region) => Ok(region),
        None => {
            let known: Vec<&str> = REGIONS.iter().map(|r| r.key).collect();
            bail!("unknown city '{}' (known: {})", city, known.join(", "))
        }
    }
}

/// Resolved settings for one harvest run.
pub struct RunConfig {
    pub region: &'static Region,
    pub deal: DealType,
    pub page_cap: Option<u32>,
    pub data_dir: PathBuf,
}

impl RunConfig {
    pub fn resolve(
        city: &str,
        deal: DealType,
        mode: RunMode,
        pages: u32,
        data_dir: PathBuf,
    ) -> Result<Self> {
        let region = resolve_region(city)?;
        let page_cap = match mode {
            RunMode::Test => Some(pages.max(1)),
            RunMode::Full => None,
        };
        Ok(RunConfig { region, deal, page_cap, data_dir })
    }

    /// Store file for this run: `<data_dir>/<city>_cian_<deal>.csv`.
    pub fn store_path(&self) -> PathBuf {
        store_path(&self.data_dir, self.region.key, self.deal)
    }
}

pub fn store_path(data_dir: &Path, city_key: &str, deal: DealType) -> PathBuf {
    data_dir.join(format!("{}_cian_{}.csv", city_key, deal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_lookup_is_case_insensitive() {
        assert_eq!(resolve_region(" Moscow ").unwrap().id, 1);
        assert_eq!(resolve_region("ekaterinburg").unwrap().id, 4743);
    }

    #[test]
    fn unknown_city_is_rejected() {
        assert!(resolve_region("kazan").is_err());
    }

    #[test]
    fn store_path_follows_naming_scheme() {
        let cfg = RunConfig::resolve("spb", DealType::Sale, RunMode::Full, 2, PathBuf::from("data"))
            .unwrap();
        assert_eq!(cfg.store_path(), PathBuf::from("data/spb_cian_sale.csv"));
    }

    #[test]
    fn test_mode_caps_pages() {
        let cfg = RunConfig::resolve("moscow", DealType::Rent, RunMode::Test, 0, PathBuf::new())
            .unwrap();
        assert_eq!(cfg.page_cap, Some(1));
        let cfg = RunConfig::resolve("moscow", DealType::Rent, RunMode::Full, 5, PathBuf::new())
            .unwrap();
        assert_eq!(cfg.page_cap, None);
    }
}
