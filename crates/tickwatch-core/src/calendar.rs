//! Trading-calendar predicate.
//!
//! The market is open on configured weekdays inside a half-open
//! `open <= t < close` window, evaluated in market-local time. Holidays are
//! not modelled.

use serde::{Deserialize, Serialize};
use time::macros::{format_description, offset, time};
use time::{Time, UtcOffset, Weekday};

use crate::{UtcDateTime, ValidationError};

/// Weekly trading window at a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingCalendar {
    /// Indexed by `Weekday::number_days_from_monday`.
    weekdays: [bool; 7],
    open: Time,
    close: Time,
    offset: UtcOffset,
}

impl TradingCalendar {
    pub fn new(
        weekdays: impl IntoIterator<Item = Weekday>,
        open: Time,
        close: Time,
        offset: UtcOffset,
    ) -> Result<Self, ValidationError> {
        if open >= close {
            return Err(ValidationError::EmptyTradingWindow {
                open: open.to_string(),
                close: close.to_string(),
            });
        }
        let mut days = [false; 7];
        for weekday in weekdays {
            days[usize::from(weekday.number_days_from_monday())] = true;
        }
        Ok(Self {
            weekdays: days,
            open,
            close,
            offset,
        })
    }

    /// Nepal Stock Exchange hours: Sunday to Thursday, 11:00-15:00 NPT.
    pub fn nepse() -> Self {
        Self {
            weekdays: weekday_mask(&[
                Weekday::Sunday,
                Weekday::Monday,
                Weekday::Tuesday,
                Weekday::Wednesday,
                Weekday::Thursday,
            ]),
            open: time!(11:00),
            close: time!(15:00),
            offset: offset!(+05:45),
        }
    }

    pub fn is_open(&self, at: UtcDateTime) -> bool {
        let local = at.to_offset(self.offset);
        let day = usize::from(local.weekday().number_days_from_monday());
        self.weekdays[day] && self.open <= local.time() && local.time() < self.close
    }

    pub const fn offset(&self) -> UtcOffset {
        self.offset
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::nepse()
    }
}

fn weekday_mask(days: &[Weekday]) -> [bool; 7] {
    let mut mask = [false; 7];
    for day in days {
        mask[usize::from(day.number_days_from_monday())] = true;
    }
    mask
}

/// Serializable calendar settings, e.g.
/// `{"weekdays":["sun","mon"],"open":"11:00","close":"15:00","utc_offset":"+05:45"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub weekdays: Vec<String>,
    pub open: String,
    pub close: String,
    pub utc_offset: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            weekdays: ["sun", "mon", "tue", "wed", "thu"]
                .into_iter()
                .map(String::from)
                .collect(),
            open: String::from("11:00"),
            close: String::from("15:00"),
            utc_offset: String::from("+05:45"),
        }
    }
}

impl CalendarConfig {
    pub fn build(&self) -> Result<TradingCalendar, ValidationError> {
        let weekdays = self
            .weekdays
            .iter()
            .map(|value| parse_weekday(value))
            .collect::<Result<Vec<_>, _>>()?;
        TradingCalendar::new(
            weekdays,
            parse_time(&self.open)?,
            parse_time(&self.close)?,
            parse_offset(&self.utc_offset)?,
        )
    }
}

fn parse_weekday(value: &str) -> Result<Weekday, ValidationError> {
    let weekday = match value.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Weekday::Monday,
        "tue" | "tuesday" => Weekday::Tuesday,
        "wed" | "wednesday" => Weekday::Wednesday,
        "thu" | "thursday" => Weekday::Thursday,
        "fri" | "friday" => Weekday::Friday,
        "sat" | "saturday" => Weekday::Saturday,
        "sun" | "sunday" => Weekday::Sunday,
        _ => {
            return Err(ValidationError::InvalidWeekday {
                value: value.to_owned(),
            })
        }
    };
    Ok(weekday)
}

fn parse_time(value: &str) -> Result<Time, ValidationError> {
    Time::parse(value.trim(), format_description!("[hour]:[minute]")).map_err(|_| {
        ValidationError::InvalidTradingTime {
            value: value.to_owned(),
        }
    })
}

fn parse_offset(value: &str) -> Result<UtcOffset, ValidationError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(
        trimmed,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|_| ValidationError::InvalidUtcOffset {
        value: value.to_owned(),
    })
}
