use std::fmt;

/// Price as shown on a detail page. Ranges survive as ranges; collapsing
/// "50000 - 70000" into one number would corrupt the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Price {
    Single(i64),
    Range { min: i64, max: i64 },
}

impl Price {
    /// Parse a raw price string: "123 456 ₽" -> Single, "50000-70000 руб" -> Range.
    pub fn parse(text: &str) -> Option<Price> {
        let sep = if text.contains('–') {
            Some('–')
        } else if text.contains('-') {
            Some('-')
        } else {
            None
        };

        if let Some(sep) = sep {
            let parts: Vec<&str> = text.split(sep).collect();
            if let [left, right] = parts[..] {
                if let (Ok(min), Ok(max)) = (digits(left).parse(), digits(right).parse()) {
                    return Some(Price::Range { min, max });
                }
            }
        }

        digits(text).parse().ok().map(Price::Single)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Single(value) => write!(f, "{}", value),
            Price::Range { min, max } => write!(f, "{} - {}", min, max),
        }
    }
}

/// Floor pair from "3 из 9"; `current` can be negative for basement levels.
/// Set atomically or not at all, so one half never appears without the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Floor {
    pub current: i32,
    pub total: i32,
}

/// One harvested advertisement, in store column order.
#[derive(Debug, Clone)]
pub struct ListingRecord {
    pub url: String,
    pub address: String,
    pub price: Option<Price>,
    pub category: String,
    pub area: Option<f64>,
    pub floor: Option<Floor>,
    pub phone: Option<String>,
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_price_with_grouping() {
        assert_eq!(Price::parse("123 456 ₽"), Some(Price::Single(123_456)));
    }

    #[test]
    fn range_is_preserved() {
        let price = Price::parse("50000-70000 руб").unwrap();
        assert_eq!(price, Price::Range { min: 50_000, max: 70_000 });
        assert_eq!(price.to_string(), "50000 - 70000");
    }

    #[test]
    fn range_with_en_dash() {
        assert_eq!(
            Price::parse("50 000 – 70 000 ₽/мес"),
            Some(Price::Range { min: 50_000, max: 70_000 })
        );
    }

    #[test]
    fn nbsp_grouping() {
        assert_eq!(Price::parse("1\u{a0}200\u{a0}000 ₽"), Some(Price::Single(1_200_000)));
    }

    #[test]
    fn no_digits_is_none() {
        assert_eq!(Price::parse("цена договорная"), None);
    }

    #[test]
    fn malformed_range_falls_back_to_single() {
        // dash present but one side has no digits: whole text is digit-stripped
        assert_eq!(Price::parse("от - 70000"), Some(Price::Single(70_000)));
    }
}
