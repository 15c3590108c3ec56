use super::{SampleGenerator, Schedule};
use crate::types::{Limits, Sample};
use chrono::{DateTime, Utc};
use std::f64::consts::PI;

/// `sim://sine(min, max, samplesPerCycle, interval)`
#[derive(Debug, Clone)]
pub struct SineGenerator {
    schedule: Schedule,
    min: f64,
    max: f64,
    samples_per_cycle: f64,
    counter: f64,
}

impl SineGenerator {
    pub fn new(min: f64, max: f64, samples_per_cycle: f64, interval_secs: f64) -> Self {
        Self {
            schedule: Schedule::every_secs(interval_secs),
            min,
            max,
            samples_per_cycle,
            counter: 0.0,
        }
    }

    fn value_at(&self, k: f64) -> f64 {
        let half_range = (self.max - self.min) / 2.0;
        let mid = (self.max + self.min) / 2.0;
        (k * 2.0 * PI / self.samples_per_cycle).sin() * half_range + mid
    }
}

impl SampleGenerator for SineGenerator {
    fn schedule(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn generate_samples(&mut self, now: DateTime<Utc>) -> Option<Sample> {
        let value = self.value_at(self.counter);
        self.counter += 1.0;
        Some(Sample::new(value, now))
    }

    /// Thresholds at 10/20/80/90% of the range; informational only.
    fn limits(&self) -> Option<Limits> {
        let range = self.max - self.min;
        Some(Limits {
            lower_display: Some(self.min),
            lower_alarm: Some(self.min + range * 0.1),
            lower_warning: Some(self.min + range * 0.2),
            upper_warning: Some(self.min + range * 0.8),
            upper_alarm: Some(self.min + range * 0.9),
            upper_display: Some(self.max),
        })
    }
}
