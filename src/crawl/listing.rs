//! Directory listing line parser
//!
//! Understands Unix `ls -l` style lines (owner and optional group columns,
//! `HH:MM` or year timestamps) and MS-DOS/IIS style lines.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use thiserror::Error;

static RE_UNIX: OnceLock<Regex> = OnceLock::new();
static RE_DOS: OnceLock<Regex> = OnceLock::new();

/// Why a listing line was skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("unrecognized listing line: {0}")]
    Unrecognized(String),
    #[error("bad field in listing line: {0}")]
    BadField(String),
}

/// One parsed listing line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes, 0 for directories
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Parse one decoded listing line
///
/// Returns `Ok(None)` for `total N` summary lines.
pub fn parse_line(line: &str, now: DateTime<Utc>) -> Result<Option<ListingEntry>, ListingError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.starts_with("total") {
        return Ok(None);
    }

    let unix = RE_UNIX.get_or_init(|| {
        Regex::new(
            r"^([-dlbcps])\S{9}\S*\s+\d+\s+(?:\S+\s+){1,2}(\d+)\s+([A-Za-z]{3})\s+(\d{1,2})\s+(\d{1,2}:\d{2}|\d{4})\s(.+)$",
        )
        .expect("valid unix listing regex")
    });
    if let Some(caps) = unix.captures(line) {
        return parse_unix(&caps, now).map(Some);
    }

    let dos = RE_DOS.get_or_init(|| {
        Regex::new(r"^(\d{2})-(\d{2})-(\d{2,4})\s+(\d{1,2}):(\d{2})(AM|PM)\s+(<DIR>|\d+)\s+(.+)$")
            .expect("valid dos listing regex")
    });
    if let Some(caps) = dos.captures(line) {
        return parse_dos(&caps).map(Some);
    }

    Err(ListingError::Unrecognized(line.to_string()))
}

fn parse_unix(caps: &Captures<'_>, now: DateTime<Utc>) -> Result<ListingEntry, ListingError> {
    let is_dir = &caps[1] == "d";
    let mut name = caps[6].to_string();
    if &caps[1] == "l" {
        if let Some((link, _target)) = name.split_once(" -> ") {
            name = link.to_string();
        }
    }

    let size = if is_dir { 0 } else { number(&caps[2])? };
    let month = month_number(&caps[3]).ok_or_else(|| ListingError::BadField(caps[3].to_string()))?;
    let day: u32 = number(&caps[4])?;

    let modified = match caps[5].split_once(':') {
        Some((hour, minute)) => {
            let (hour, minute) = (number(hour)?, number(minute)?);
            // Recent files omit the year; a date ahead of now belongs to last year
            let this_year = timestamp(now.year(), month, day, hour, minute);
            match this_year {
                Some(t) if t > now + Duration::days(1) => {
                    timestamp(now.year() - 1, month, day, hour, minute)
                }
                other => other,
            }
        }
        None => timestamp(number(&caps[5])?, month, day, 0, 0),
    };

    Ok(ListingEntry {
        name,
        is_dir,
        size,
        modified,
    })
}

fn parse_dos(caps: &Captures<'_>) -> Result<ListingEntry, ListingError> {
    let month = number(&caps[1])?;
    let day = number(&caps[2])?;
    let year: i32 = number(&caps[3])?;
    let year = match caps[3].len() {
        2 if year < 70 => 2000 + year,
        2 => 1900 + year,
        _ => year,
    };
    let mut hour: u32 = number(&caps[4])?;
    let minute = number(&caps[5])?;
    match &caps[6] {
        "PM" if hour < 12 => hour += 12,
        "AM" if hour == 12 => hour = 0,
        _ => {}
    }

    let is_dir = &caps[7] == "<DIR>";
    Ok(ListingEntry {
        name: caps[8].to_string(),
        is_dir,
        size: if is_dir { 0 } else { number(&caps[7])? },
        modified: timestamp(year, month, day, hour, minute),
    })
}

fn number<T: std::str::FromStr>(field: &str) -> Result<T, ListingError> {
    field
        .parse()
        .map_err(|_| ListingError::BadField(field.to_string()))
}

fn timestamp(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .map(|naive: NaiveDateTime| naive.and_utc())
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let name = name.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == name).map(|i| i as u32 + 1)
}
