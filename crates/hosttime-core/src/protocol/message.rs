//! Sync-trigger classification and the `HOSTTIME` reply.
//!
//! Reply wire format (one line, ASCII):
//! ```text
//! HOSTTIME YYYY-MM-DD HH:MM:SS\n
//! ```

use std::fmt;

use chrono::{Datelike, NaiveDateTime, Timelike};
use thiserror::Error;

/// The exact line a device prints to request the host time.
pub const GETTIME_TOKEN: &str = "GETTIME";

/// Prefix of the device's RTC status line; also answered with the host time.
pub const RTC_PREFIX: &str = "RTC:";

/// Prefix of the host's reply, including the separating space.
pub const HOSTTIME_PREFIX: &str = "HOSTTIME ";

/// `chrono` format of the reply timestamp: `YYYY-MM-DD HH:MM:SS`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Length of a formatted timestamp in bytes.
pub const TIMESTAMP_LEN: usize = 19;

/// Earliest year the device firmware accepts when setting its RTC.
pub const MIN_ACCEPTED_YEAR: i32 = 2020;

/// Errors that can occur while reading a `HOSTTIME` reply.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The line does not start with `HOSTTIME`.
    #[error("not a HOSTTIME reply: {0:?}")]
    MissingPrefix(String),

    /// The timestamp after the prefix is shorter than `YYYY-MM-DD HH:MM:SS`.
    #[error("timestamp too short: need {TIMESTAMP_LEN} bytes, got {0}")]
    TimestampTooShort(usize),

    /// The timestamp does not match `YYYY-MM-DD HH:MM:SS` or is not a real date.
    #[error("malformed timestamp {text:?}: {reason}")]
    MalformedTimestamp { text: String, reason: String },

    /// The year is before [`MIN_ACCEPTED_YEAR`].
    #[error("timestamp year {0} is before {MIN_ACCEPTED_YEAR}")]
    YearOutOfRange(i32),
}

/// Returns `true` when `line` asks for the host time.
///
/// A line is a request when it is exactly `GETTIME` or starts with `RTC:`.
/// Whether a request is actually answered also depends on the session's sync
/// state; that check belongs to the session, not to this function.
///
/// # Examples
///
/// ```rust
/// use hosttime_core::is_sync_trigger;
///
/// assert!(is_sync_trigger("GETTIME"));
/// assert!(is_sync_trigger("RTC: 2000-01-01 00:00:00"));
/// assert!(!is_sync_trigger("GETTIME please"));
/// ```
pub fn is_sync_trigger(line: &str) -> bool {
    line == GETTIME_TOKEN || line.starts_with(RTC_PREFIX)
}

/// Formats `time` as `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(time: NaiveDateTime) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// The host's one-shot time reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTimeReply {
    pub timestamp: NaiveDateTime,
}

impl HostTimeReply {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        // The wire format has no sub-second field.
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self { timestamp }
    }

    /// Encodes the reply as it goes on the wire, including the trailing `\n`.
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }

    /// Parses a reply, enforcing at least the checks the device firmware makes
    /// before setting its RTC.
    ///
    /// Surrounding whitespace is ignored.  The text after `HOSTTIME` must hold a
    /// `YYYY-MM-DD HH:MM:SS` timestamp (anything after its 19 bytes is
    /// ignored) with a year no earlier than [`MIN_ACCEPTED_YEAR`].
    ///
    /// This is stricter than the firmware.  The firmware only range-checks the
    /// year, the month (1-12) and the day (1-31), so it takes `2024-02-30` or an
    /// hour of `25`.  Here the timestamp must be a real calendar date and time.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the prefix is missing, the timestamp is
    /// short or malformed, or the year is out of range.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hosttime_core::HostTimeReply;
    ///
    /// let reply = HostTimeReply::parse("HOSTTIME 2024-01-01 00:00:00\n").unwrap();
    /// assert_eq!(reply.to_string(), "HOSTTIME 2024-01-01 00:00:00");
    /// ```
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let body = line
            .strip_prefix(HOSTTIME_PREFIX.trim_end())
            .ok_or_else(|| ProtocolError::MissingPrefix(line.to_string()))?
            .trim();

        if body.len() < TIMESTAMP_LEN {
            return Err(ProtocolError::TimestampTooShort(body.len()));
        }
        if !body.is_char_boundary(TIMESTAMP_LEN) {
            return Err(ProtocolError::MalformedTimestamp {
                text: body.to_string(),
                reason: "timestamp is not ASCII".to_string(),
            });
        }
        let text = &body[..TIMESTAMP_LEN];

        let timestamp = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map_err(|e| {
            ProtocolError::MalformedTimestamp {
                text: text.to_string(),
                reason: e.to_string(),
            }
        })?;

        if timestamp.year() < MIN_ACCEPTED_YEAR {
            return Err(ProtocolError::YearOutOfRange(timestamp.year()));
        }

        Ok(Self { timestamp })
    }
}

impl fmt::Display for HostTimeReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{HOSTTIME_PREFIX}{}", format_timestamp(self.timestamp))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
