use super::{SampleGenerator, Schedule};
use crate::types::Sample;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};

/// Default `sys://time` format
pub const DEFAULT_CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `sys://time` - the current local time as text
#[derive(Debug, Clone)]
pub struct ClockGenerator {
    schedule: Schedule,
    format: String,
}

impl ClockGenerator {
    /// An invalid `strftime` format falls back to [`DEFAULT_CLOCK_FORMAT`]
    pub fn new(format: impl Into<String>, interval_secs: f64) -> Self {
        let mut format = format.into();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            tracing::warn!(
                "Invalid clock format '{}', using '{}'",
                format,
                DEFAULT_CLOCK_FORMAT
            );
            format = DEFAULT_CLOCK_FORMAT.to_string();
        }
        Self {
            schedule: Schedule::every_secs(interval_secs),
            format,
        }
    }
}

impl Default for ClockGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_FORMAT, 1.0)
    }
}

impl SampleGenerator for ClockGenerator {
    fn schedule(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn generate_samples(&mut self, now: DateTime<Utc>) -> Option<Sample> {
        let text = now.with_timezone(&Local).format(&self.format).to_string();
        Some(Sample::new(text, now))
    }
}
