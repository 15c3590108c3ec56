use super::{SampleGenerator, Schedule};
use crate::types::{Limits, Sample};
use chrono::{DateTime, Utc};

/// Small xorshift64 generator; deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    pub fn new(seed: u64) -> Self {
        // xorshift is stuck at zero forever
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    /// Uniform sample in `[0, 1]`
    pub fn next_f64(&mut self) -> f64 {
        let mut s = self.state;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.state = s;
        (s as f64) / (u64::MAX as f64)
    }

    /// Uniform sample in `[min, max]`
    pub fn uniform(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }
}

/// `sim://noise(min, max, interval)`
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    schedule: Schedule,
    min: f64,
    max: f64,
    rng: XorShiftRng,
}

impl NoiseGenerator {
    pub fn new(min: f64, max: f64, interval_secs: f64, seed: u64) -> Self {
        Self {
            schedule: Schedule::every_secs(interval_secs),
            min,
            max,
            rng: XorShiftRng::new(seed),
        }
    }
}

impl SampleGenerator for NoiseGenerator {
    fn schedule(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn generate_samples(&mut self, now: DateTime<Utc>) -> Option<Sample> {
        Some(Sample::new(self.rng.uniform(self.min, self.max), now))
    }

    fn limits(&self) -> Option<Limits> {
        Some(Limits::display(self.min, self.max))
    }
}

/// `sim://gaussianNoise(avg, stddev, interval)`
#[derive(Debug, Clone)]
pub struct GaussianNoiseGenerator {
    schedule: Schedule,
    average: f64,
    std_dev: f64,
    rng: XorShiftRng,
}

impl GaussianNoiseGenerator {
    pub fn new(average: f64, std_dev: f64, interval_secs: f64, seed: u64) -> Self {
        Self {
            schedule: Schedule::every_secs(interval_secs),
            average,
            std_dev,
            rng: XorShiftRng::new(seed),
        }
    }

    /// Standard normal draw (polar Box-Muller with rejection)
    fn standard_normal(&mut self) -> f64 {
        loop {
            let u = self.rng.uniform(-1.0, 1.0);
            let v = self.rng.uniform(-1.0, 1.0);
            let s = u * u + v * v;
            if s > 0.0 && s < 1.0 {
                return u * (-2.0 * s.ln() / s).sqrt();
            }
        }
    }
}

impl SampleGenerator for GaussianNoiseGenerator {
    fn schedule(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn generate_samples(&mut self, now: DateTime<Utc>) -> Option<Sample> {
        let z = self.standard_normal();
        Some(Sample::new(self.average + z * self.std_dev, now))
    }

    fn limits(&self) -> Option<Limits> {
        Some(Limits::display(
            self.average - 4.0 * self.std_dev,
            self.average + 4.0 * self.std_dev,
        ))
    }
}
