//! Tag timing arithmetic
//!
//! Converts the wall-clock time a tag was recorded at into an offset into
//! the recording, and renders that offset for the two export targets:
//!
//! - link timestamps (`1h2m3s`) used in `?t=` deep-link query parameters
//! - subtitle timestamps (`01:02:03`) used in SRT cue timings
//!
//! Offsets are signed milliseconds. A tag recorded before the
//! delay-compensated start of the stream has a negative offset; it is kept
//! and rendered with a leading `-` rather than clamped.

use chrono::{DateTime, Utc};

/// Milliseconds between `session_start` and `event_time`, minus the
/// stream delay compensation.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use streamtags::timing::elapsed_ms;
///
/// let start = Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap();
/// let tagged = start + Duration::seconds(100);
/// assert_eq!(elapsed_ms(tagged, start, 15), 85_000);
/// ```
pub fn elapsed_ms(event_time: DateTime<Utc>, session_start: DateTime<Utc>, delay_seconds: u32) -> i64 {
    (event_time - session_start).num_milliseconds() - i64::from(delay_seconds) * 1000
}

/// Whole hours, minutes and seconds of an offset, with its sign split out.
///
/// Sub-second remainders are truncated toward zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetParts {
    pub negative: bool,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl OffsetParts {
    pub fn from_ms(offset_ms: i64) -> Self {
        let total_seconds = offset_ms.unsigned_abs() / 1000;
        Self {
            negative: offset_ms < 0 && total_seconds > 0,
            hours: total_seconds / 3600,
            minutes: (total_seconds % 3600) / 60,
            seconds: total_seconds % 60,
        }
    }

    /// Total whole seconds, signed.
    pub fn total_seconds(&self) -> i64 {
        let total = (self.hours * 3600 + self.minutes * 60 + self.seconds) as i64;
        if self.negative {
            -total
        } else {
            total
        }
    }

    fn sign(&self) -> &'static str {
        if self.negative {
            "-"
        } else {
            ""
        }
    }
}

/// Renders an offset as `HhMmSs` with no padding, for deep-link timestamps.
///
/// # Examples
///
/// ```
/// use streamtags::timing::format_link_timestamp;
///
/// assert_eq!(format_link_timestamp(85_000), "0h1m25s");
/// assert_eq!(format_link_timestamp(3_723_000), "1h2m3s");
/// ```
pub fn format_link_timestamp(offset_ms: i64) -> String {
    let parts = OffsetParts::from_ms(offset_ms);
    format!(
        "{}{}h{}m{}s",
        parts.sign(),
        parts.hours,
        parts.minutes,
        parts.seconds
    )
}

/// Renders an offset as `HH:MM:SS`, zero-padded, for subtitle cues.
///
/// Hours are padded to two digits but never truncated, so a 100-hour
/// offset renders as `100:00:00`.
///
/// # Examples
///
/// ```
/// use streamtags::timing::format_subtitle_timestamp;
///
/// assert_eq!(format_subtitle_timestamp(85_000), "00:01:25");
/// ```
pub fn format_subtitle_timestamp(offset_ms: i64) -> String {
    let parts = OffsetParts::from_ms(offset_ms);
    format!(
        "{}{:02}:{:02}:{:02}",
        parts.sign(),
        parts.hours,
        parts.minutes,
        parts.seconds
    )
}
