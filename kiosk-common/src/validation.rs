//! Admission rules for raw kiosk records.
//!
//! Checks run in a fixed order and stop at the first failure, so the reason attached to a
//! rejected record is always the earliest rule it broke. The current instant is an
//! argument: validating the same record against the same `now` always gives the same answer.
use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::record::{fields, RawRecord};

/// The highest zero-based site index installed in the museum.
pub const MAX_SITE: u8 = 5;
/// `val` sent by a kiosk when the visitor pressed an assistance button.
pub const ASSISTANCE_VALUE: i64 = -1;
pub const MAX_RATING: i64 = 4;
/// Assistance `type` codes: 0 is a general request, 1 an emergency.
pub const MAX_ASSISTANCE_TYPE: u64 = 1;

const OPENING_SECS: u32 = 9 * 60 * 60;
const CLOSING_SECS: u32 = 18 * 60 * 60;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("timestamp missing")]
    TimestampMissing,
    #[error("invalid timestamp format")]
    InvalidTimestamp,
    #[error("timestamp in the future")]
    FutureTimestamp,
    #[error("outside operating hours")]
    OutsideOperatingHours,
    #[error("site out of range")]
    SiteOutOfRange,
    #[error("value out of range")]
    ValueOutOfRange,
    #[error("missing or invalid assistance type")]
    InvalidAssistanceType,
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl ValidationError {
    /// A stable label for the `reason` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            ValidationError::TimestampMissing => "timestamp_missing",
            ValidationError::InvalidTimestamp => "invalid_timestamp",
            ValidationError::FutureTimestamp => "future_timestamp",
            ValidationError::OutsideOperatingHours => "outside_operating_hours",
            ValidationError::SiteOutOfRange => "site_out_of_range",
            ValidationError::ValueOutOfRange => "value_out_of_range",
            ValidationError::InvalidAssistanceType => "invalid_assistance_type",
            ValidationError::MissingField(_) => "missing_field",
        }
    }
}

/// The `val`/`type` pair of an admitted record. An assistance press always carries its
/// type; a rating never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KioskValue {
    Assistance { request_type: u8 },
    Rating(u8),
}

/// A record that passed every admission rule. Only `validate` can build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRecord {
    occurred_at: NaiveDateTime,
    site: u8,
    value: KioskValue,
}

impl ValidatedRecord {
    /// Wall-clock time of the press, as written by the kiosk.
    pub fn occurred_at(&self) -> NaiveDateTime {
        self.occurred_at
    }

    /// Zero-based site index, at most `MAX_SITE`.
    pub fn site(&self) -> u8 {
        self.site
    }

    pub fn value(&self) -> KioskValue {
        self.value
    }
}

struct EventTimestamp {
    wall_clock: NaiveDateTime,
    instant: DateTime<Utc>,
}

pub fn validate(raw: &RawRecord, now: DateTime<Utc>) -> Result<ValidatedRecord, ValidationError> {
    let at = match raw.get(fields::AT) {
        None | Some(Value::Null) => return Err(ValidationError::TimestampMissing),
        Some(at) => at,
    };

    let timestamp = at
        .as_str()
        .and_then(parse_timestamp)
        .ok_or(ValidationError::InvalidTimestamp)?;

    if timestamp.instant > now {
        return Err(ValidationError::FutureTimestamp);
    }

    if !within_operating_hours(timestamp.wall_clock.time()) {
        return Err(ValidationError::OutsideOperatingHours);
    }

    let site = parse_site(required(raw, fields::SITE)?)?;
    let value = parse_value(raw)?;

    Ok(ValidatedRecord {
        occurred_at: timestamp.wall_clock,
        site,
        value,
    })
}

fn required<'a>(raw: &'a RawRecord, field: &'static str) -> Result<&'a Value, ValidationError> {
    match raw.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(value) => Ok(value),
    }
}

/// Accepts ISO-8601 dates and date-times, with or without an offset. Timestamps without an
/// offset are taken to be UTC when comparing against the current instant.
fn parse_timestamp(at: &str) -> Option<EventTimestamp> {
    // `%:z` only reads numeric offsets.
    let zulu = at.strip_suffix('Z').map(|rest| format!("{rest}+00:00"));
    let offset_input = zulu.as_deref().unwrap_or(at);

    let with_offset = DateTime::parse_from_rfc3339(at).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|format| DateTime::parse_from_str(offset_input, format).ok())
    });
    if let Some(parsed) = with_offset {
        return Some(EventTimestamp {
            wall_clock: parsed.naive_local(),
            instant: parsed.with_timezone(&Utc),
        });
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(at, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(at, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })?;

    Some(EventTimestamp {
        wall_clock: naive,
        instant: naive.and_utc(),
    })
}

/// Kiosks only report between 09:00:00 and 18:00:00 inclusive.
fn within_operating_hours(time: NaiveTime) -> bool {
    let secs = time.num_seconds_from_midnight();
    match secs.cmp(&CLOSING_SECS) {
        Ordering::Less => secs >= OPENING_SECS,
        Ordering::Equal => time.nanosecond() == 0,
        Ordering::Greater => false,
    }
}

fn parse_site(site: &Value) -> Result<u8, ValidationError> {
    let index = match site {
        Value::String(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<u8>().ok()
        }
        Value::Number(number) => number.as_u64().and_then(|n| u8::try_from(n).ok()),
        _ => None,
    };

    index
        .filter(|index| *index <= MAX_SITE)
        .ok_or(ValidationError::SiteOutOfRange)
}

fn parse_value(raw: &RawRecord) -> Result<KioskValue, ValidationError> {
    let val = required(raw, fields::VAL)?
        .as_i64()
        .filter(|val| (ASSISTANCE_VALUE..=MAX_RATING).contains(val))
        .ok_or(ValidationError::ValueOutOfRange)?;

    if val == ASSISTANCE_VALUE {
        let request_type = raw
            .get(fields::TYPE)
            .and_then(Value::as_u64)
            .filter(|request_type| *request_type <= MAX_ASSISTANCE_TYPE)
            .and_then(|request_type| u8::try_from(request_type).ok())
            .ok_or(ValidationError::InvalidAssistanceType)?;
        return Ok(KioskValue::Assistance { request_type });
    }

    u8::try_from(val)
        .map(KioskValue::Rating)
        .map_err(|_| ValidationError::ValueOutOfRange)
}
