//! Validation of raw fetched field maps into [`MarketSnapshot`]s.
//!
//! Upstream pages label values the way the exchange shows them
//! ("Last Traded Price", "52 Week High/Low", ...). Values are strings with
//! thousands separators and occasional trailing annotations such as
//! `"1,234.50 (1.25%)"`; only the leading number is kept. Ranges are
//! written `high-low` or `high/low`.

use std::collections::BTreeMap;

use crate::{MarketSnapshot, UtcDateTime, ValidationError};

/// Field label to raw value, as returned by a fetch adapter.
pub type RawFieldMap = BTreeMap<String, String>;

const LAST_TRADED_PRICE: &[&str] = &["Last Traded Price"];
const PREVIOUS_CLOSE: &[&str] = &["Previous Day Close Price", "Previous Close"];
const OPEN_PRICE: &[&str] = &["Open Price"];
const CLOSE_PRICE: &[&str] = &["Close Price", "Close Price*"];
const TOTAL_TRADED_QUANTITY: &[&str] = &["Total Traded Quantity"];
const TOTAL_TRADES: &[&str] = &["Total Trades"];
const DAY_RANGE: &[&str] = &["High Price - Low Price"];
const WEEK_52_RANGE: &[&str] = &["52 Week High - 52 Week Low"];
const TOTAL_LISTED_SHARES: &[&str] = &["Total Listed Shares"];
const TOTAL_PAID_UP_VALUE: &[&str] = &["Total Paid up Value", "Total Paid-up Value"];
const MARKET_CAPITALIZATION: &[&str] = &["Market Capitalization"];
const INSTRUMENT_TYPE: &[&str] = &["Instrument Type"];
const LISTING_DATE: &[&str] = &["Listing Date"];

/// Normalize labels the way the scraper reports them: trimmed, `/` as ` - `.
pub fn normalize_labels(raw: RawFieldMap) -> RawFieldMap {
    raw.into_iter()
        .map(|(label, value)| (normalize_label(&label), value))
        .collect()
}

fn normalize_label(label: &str) -> String {
    label
        .split('/')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" - ")
}

/// Coerce and validate a raw field map into a snapshot stamped `updated_at`.
pub fn snapshot_from_fields(
    raw: &RawFieldMap,
    updated_at: UtcDateTime,
) -> Result<MarketSnapshot, ValidationError> {
    let fields = Fields(raw);
    let (high_price, low_price) = fields.required_range("high_price/low_price", DAY_RANGE)?;
    let (week_52_high, week_52_low) = fields
        .optional_range("week_52_high/week_52_low", WEEK_52_RANGE)?
        .unzip();

    let snapshot = MarketSnapshot {
        last_traded_price: fields.required_number("last_traded_price", LAST_TRADED_PRICE)?,
        previous_close: fields.required_number("previous_close", PREVIOUS_CLOSE)?,
        open_price: fields.required_number("open_price", OPEN_PRICE)?,
        close_price: fields.required_number("close_price", CLOSE_PRICE)?,
        total_traded_quantity: fields
            .required_count("total_traded_quantity", TOTAL_TRADED_QUANTITY)?,
        total_trades: fields.required_count("total_trades", TOTAL_TRADES)?,
        high_price,
        low_price,
        week_52_high,
        week_52_low,
        total_listed_shares: fields.optional_count("total_listed_shares", TOTAL_LISTED_SHARES)?,
        total_paid_up_value: fields.optional_number("total_paid_up_value", TOTAL_PAID_UP_VALUE)?,
        market_capitalization: fields
            .optional_number("market_capitalization", MARKET_CAPITALIZATION)?,
        instrument_type: fields.optional_text(INSTRUMENT_TYPE),
        listing_date: fields.optional_text(LISTING_DATE),
        updated_at,
    };
    snapshot.validate()?;
    Ok(snapshot)
}

struct Fields<'a>(&'a RawFieldMap);

impl Fields<'_> {
    fn lookup(&self, labels: &[&str]) -> Option<&str> {
        labels
            .iter()
            .find_map(|label| self.0.get(*label))
            .map(|value| value.trim())
            .filter(|value| !is_placeholder(value))
    }

    fn required(&self, field: &'static str, labels: &[&str]) -> Result<&str, ValidationError> {
        self.lookup(labels)
            .ok_or(ValidationError::MissingField { field })
    }

    fn required_number(&self, field: &'static str, labels: &[&str]) -> Result<f64, ValidationError> {
        parse_number(field, self.required(field, labels)?)
    }

    fn optional_number(
        &self,
        field: &'static str,
        labels: &[&str],
    ) -> Result<Option<f64>, ValidationError> {
        self.lookup(labels)
            .map(|value| parse_number(field, value))
            .transpose()
    }

    fn required_count(&self, field: &'static str, labels: &[&str]) -> Result<u64, ValidationError> {
        parse_count(field, self.required(field, labels)?)
    }

    fn optional_count(
        &self,
        field: &'static str,
        labels: &[&str],
    ) -> Result<Option<u64>, ValidationError> {
        self.lookup(labels)
            .map(|value| parse_count(field, value))
            .transpose()
    }

    fn required_range(
        &self,
        field: &'static str,
        labels: &[&str],
    ) -> Result<(f64, f64), ValidationError> {
        parse_range(field, self.required(field, labels)?)
    }

    fn optional_range(
        &self,
        field: &'static str,
        labels: &[&str],
    ) -> Result<Option<(f64, f64)>, ValidationError> {
        self.lookup(labels)
            .map(|value| parse_range(field, value))
            .transpose()
    }

    fn optional_text(&self, labels: &[&str]) -> Option<String> {
        self.lookup(labels).map(str::to_owned)
    }
}

/// Parse `"1,210.00-1,175.50"` or `"1,210.00 / 1,175.50"` as `(1210.0, 1175.5)`.
fn parse_range(field: &'static str, raw: &str) -> Result<(f64, f64), ValidationError> {
    let invalid = || ValidationError::InvalidRange {
        field,
        value: raw.to_owned(),
    };
    let (high, low) = raw.split_once(['-', '/']).ok_or_else(invalid)?;
    if is_placeholder(high.trim()) || is_placeholder(low.trim()) {
        return Err(invalid());
    }
    Ok((parse_number(field, high)?, parse_number(field, low)?))
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty() || value == "-" || value.eq_ignore_ascii_case("n/a")
}

/// Parse `"1,234.50 (1.25%)"` as `1234.5`.
fn parse_number(field: &'static str, raw: &str) -> Result<f64, ValidationError> {
    let cleaned = raw.replace(',', "");
    let token = cleaned.split_whitespace().next().unwrap_or_default();
    let value = token
        .parse::<f64>()
        .map_err(|_| ValidationError::InvalidNumber {
            field,
            value: raw.to_owned(),
        })?;
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(value)
}

fn parse_count(field: &'static str, raw: &str) -> Result<u64, ValidationError> {
    let value = parse_number(field, raw)?;
    if value.fract() != 0.0 || value > u64::MAX as f64 {
        return Err(ValidationError::InvalidNumber {
            field,
            value: raw.to_owned(),
        });
    }
    Ok(value as u64)
}

#[cfg(test)]
pub(crate) fn sample_fields(last_traded_price: &str) -> RawFieldMap {
    [
        ("Instrument Type", "Equity"),
        ("Listing Date", "2004-07-12"),
        ("Last Traded Price", last_traded_price),
        ("Total Traded Quantity", "48,213"),
        ("Total Trades", "912"),
        ("Previous Day Close Price", "1,180.25"),
        ("High Price - Low Price", "1,210.00-1,175.50"),
        ("52 Week High - 52 Week Low", "1,420.00 - 980.00"),
        ("Open Price", "1,190.00"),
        ("Close Price*", "1,201.10"),
        ("Total Listed Shares", "270,585,862"),
        ("Total Paid up Value", "27,058,586,200.00"),
        ("Market Capitalization", "325,000,000,000.55"),
    ]
    .into_iter()
    .map(|(label, value)| (label.to_owned(), value.to_owned()))
    .collect()
}
