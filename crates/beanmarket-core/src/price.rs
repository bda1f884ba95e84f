//! Structured prices
//!
//! Listings arrive with prices formatted for display (`"€45.00"`). They are
//! parsed once at ingestion into minor units plus a currency code; nothing
//! downstream re-parses strings.

use core::cmp::Ordering;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::DataError;

// ----------------------------------------------------------------------------
// Currency
// ----------------------------------------------------------------------------

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Gbp,
}

impl Currency {
    /// Display symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Eur => "€",
            Currency::Usd => "$",
            Currency::Gbp => "£",
        }
    }

    /// Three-letter code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
        }
    }

    fn from_symbol(c: char) -> Option<Self> {
        match c {
            '€' => Some(Currency::Eur),
            '$' => Some(Currency::Usd),
            '£' => Some(Currency::Gbp),
            _ => None,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "EUR" => Some(Currency::Eur),
            "USD" => Some(Currency::Usd),
            "GBP" => Some(Currency::Gbp),
            _ => None,
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::Eur
    }
}

// ----------------------------------------------------------------------------
// Price
// ----------------------------------------------------------------------------

/// Amount in minor units (cents) with its currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub amount_minor: i64,
    pub currency: Currency,
}

impl Price {
    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    /// Price from whole major units, e.g. `Price::major(45, Currency::Eur)` is €45.00
    pub fn major(amount: i64, currency: Currency) -> Self {
        Self::new(amount.saturating_mul(100), currency)
    }

    /// Amount as a float in major units, for threshold comparisons
    pub fn as_major(&self) -> f64 {
        self.amount_minor as f64 / 100.0
    }

    /// Parse a display price such as `"€45.00"`, `"45,50 EUR"` or `"$1,200.00"`
    ///
    /// A missing currency marker defaults to EUR, the marketplace's
    /// settlement currency.
    pub fn parse(raw: &str) -> Result<Self, DataError> {
        let invalid = || DataError::InvalidPrice {
            raw: raw.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let mut currency = None;
        let mut rest = trimmed;

        if let Some(first) = rest.chars().next() {
            if let Some(c) = Currency::from_symbol(first) {
                currency = Some(c);
                rest = rest[first.len_utf8()..].trim_start();
            }
        }
        if currency.is_none() {
            if let Some(last) = rest.chars().last() {
                if let Some(c) = Currency::from_symbol(last) {
                    currency = Some(c);
                    rest = rest[..rest.len() - last.len_utf8()].trim_end();
                }
            }
        }
        if currency.is_none() && rest.len() > 3 && rest.is_char_boundary(3) {
            let (head, tail) = rest.split_at(3);
            if let Some(c) = Currency::from_code(head) {
                currency = Some(c);
                rest = tail.trim_start();
            }
        }
        if currency.is_none() && rest.len() > 3 && rest.is_char_boundary(rest.len() - 3) {
            let (body, code) = rest.split_at(rest.len() - 3);
            if let Some(c) = Currency::from_code(code) {
                currency = Some(c);
                rest = body.trim_end();
            }
        }

        let amount_minor = parse_minor_units(rest).ok_or_else(invalid)?;
        Ok(Self::new(amount_minor, currency.unwrap_or_default()))
    }

    /// Fail-soft parse: unparsable input yields `None` and a warning
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match Self::parse(raw) {
            Ok(price) => Some(price),
            Err(err) => {
                tracing::warn!("Treating price as missing: {}", err);
                None
            }
        }
    }
}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by amount; currencies are not converted
impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        self.amount_minor
            .cmp(&other.amount_minor)
            .then(self.currency.cmp(&other.currency))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        write!(
            f,
            "{}{}{}.{:02}",
            sign,
            self.currency.symbol(),
            abs / 100,
            abs % 100
        )
    }
}

/// Parse a bare decimal amount into minor units.
///
/// Accepts `.` or `,` as the decimal separator (at most two fractional
/// digits) and the other one as a thousands separator.
fn parse_minor_units(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if body.is_empty() {
        return None;
    }

    let decimal_pos = body.rfind(['.', ',']).filter(|&pos| {
        let frac_len = body.len() - pos - 1;
        (1..=2).contains(&frac_len)
    });

    let (int_part, frac_part) = match decimal_pos {
        Some(pos) => (&body[..pos], &body[pos + 1..]),
        None => (body, ""),
    };

    // The thousands separator must differ from the decimal separator
    if let Some(pos) = decimal_pos {
        let separator = body[pos..].chars().next()?;
        if int_part.contains(separator) {
            return None;
        }
    }

    let int_digits: String = int_part.chars().filter(|c| *c != ',' && *c != '.').collect();
    if int_digits.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_digits.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let major: i64 = if int_digits.is_empty() {
        0
    } else {
        int_digits.parse().ok()?
    };
    let minor: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse().ok()?,
    };

    let total = major.checked_mul(100)?.checked_add(minor)?;
    Some(if negative { -total } else { total })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
