use super::{SampleGenerator, Schedule};
use crate::types::{PvValue, Sample};
use chrono::{DateTime, Utc};

/// Emits its value once, on the first step after registration.
///
/// A constant without a value never emits; the engine uses that as the safe
/// fallback for unknown `sim://` functions.
#[derive(Debug, Clone)]
pub struct ConstantGenerator {
    schedule: Schedule,
}

impl ConstantGenerator {
    pub fn new(value: impl Into<PvValue>) -> Self {
        Self {
            schedule: Schedule::once(Some(value.into())),
        }
    }

    /// Generator that never produces a sample
    pub fn empty() -> Self {
        Self {
            schedule: Schedule::once(None),
        }
    }
}

impl SampleGenerator for ConstantGenerator {
    fn schedule(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn generate_samples(&mut self, _now: DateTime<Utc>) -> Option<Sample> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_constant_emits_once() {
        let mut gen = ConstantGenerator::new(42.0);
        let now = Utc::now();
        let sample = gen.step(Duration::ZERO, now).unwrap();
        assert_eq!(sample.value, PvValue::Number(42.0));
        assert!(gen.step(Duration::from_secs(1), now).is_none());
        assert!(gen.step(Duration::from_secs(100), now).is_none());
    }

    #[test]
    fn test_empty_constant_never_emits() {
        let mut gen = ConstantGenerator::empty();
        let now = Utc::now();
        assert!(gen.step(Duration::ZERO, now).is_none());
        assert!(gen.step(Duration::from_secs(5), now).is_none());
    }
}
