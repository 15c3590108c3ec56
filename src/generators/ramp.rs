use super::{SampleGenerator, Schedule};
use crate::types::{Limits, Sample};
use chrono::{DateTime, Utc};

/// `sim://ramp(min, max, step, interval)`
///
/// The running value starts one step before the boundary so the first
/// emission is the boundary itself. Exceeding `max` wraps to `min`, and
/// underflowing `min` (negative step) wraps to `max`.
#[derive(Debug, Clone)]
pub struct RampGenerator {
    schedule: Schedule,
    min: f64,
    max: f64,
    step: f64,
    current: f64,
}

impl RampGenerator {
    pub fn new(min: f64, max: f64, step: f64, interval_secs: f64) -> Self {
        let current = if step >= 0.0 { min - step } else { max - step };
        Self {
            schedule: Schedule::every_secs(interval_secs),
            min,
            max,
            step,
            current,
        }
    }

    fn advance(&mut self) -> f64 {
        self.current += self.step;
        if self.current > self.max {
            self.current = self.min;
        } else if self.current < self.min {
            self.current = self.max;
        }
        self.current
    }
}

impl SampleGenerator for RampGenerator {
    fn schedule(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn generate_samples(&mut self, now: DateTime<Utc>) -> Option<Sample> {
        Some(Sample::new(self.advance(), now))
    }

    fn limits(&self) -> Option<Limits> {
        Some(Limits::display(self.min, self.max))
    }
}
