//! Time-driven sample generators backing simulated PVs.
//!
//! Every generator owns a [`Schedule`] (update interval plus the clock time of
//! its last emission) and a kind-specific [`SampleGenerator::generate_samples`].
//! The engine calls [`SampleGenerator::step`] once per tick with the external
//! clock; the schedule decides whether anything is emitted.
//!
//! # Kinds
//!
//! - [`ConstantGenerator`] - one sample at registration, never again
//! - [`NoiseGenerator`] - `uniform(min, max)` each interval
//! - [`GaussianNoiseGenerator`] - `avg + z * stddev` each interval
//! - [`RampGenerator`] - running value stepped and wrapped within `[min, max]`
//! - [`SineGenerator`] - `samplesPerCycle`-point sine between `min` and `max`
//! - [`ClockGenerator`] - formatted wall-clock string (`sys://time`)
//!
//! Only `noise`, `gaussianNoise`, `ramp` and `sine` accept argument lists
//! parsed from the PV name; missing arguments fall back to the defaults below.

mod clock;
mod constant;
mod noise;
mod ramp;
mod sine;

pub use clock::{ClockGenerator, DEFAULT_CLOCK_FORMAT};
pub use constant::ConstantGenerator;
pub use noise::{GaussianNoiseGenerator, NoiseGenerator, XorShiftRng};
pub use ramp::RampGenerator;
pub use sine::SineGenerator;

use crate::pv::SimFunction;
use crate::types::{Limits, PvValue, Sample};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Defaults for `sim://noise(min, max, interval)`
pub const NOISE_DEFAULTS: [f64; 3] = [-5.0, 5.0, 1.0];
/// Defaults for `sim://gaussianNoise(avg, stddev, interval)`
pub const GAUSSIAN_DEFAULTS: [f64; 3] = [0.0, 1.0, 0.1];
/// Defaults for `sim://ramp(min, max, step, interval)`
pub const RAMP_DEFAULTS: [f64; 4] = [-5.0, 5.0, 1.0, 1.0];
/// Defaults for `sim://sine(min, max, samplesPerCycle, interval)`
pub const SINE_DEFAULTS: [f64; 4] = [-5.0, 5.0, 10.0, 1.0];

/// Emission schedule shared by all generator kinds
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// `None` means "emit once, immediately, never again"
    interval: Option<Duration>,
    /// Value emitted unconditionally on the first step
    initial: Option<PvValue>,
    last_emit: Option<Duration>,
}

/// What a schedule decided for one tick
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Emit the configured initial value
    Initial(PvValue),
    /// Delegate to the kind-specific generator
    Generate,
    /// Nothing due
    Idle,
}

impl Schedule {
    /// Periodic schedule. Non-positive, non-finite or unrepresentable
    /// intervals never repeat.
    pub fn every_secs(interval_secs: f64) -> Self {
        let interval = if interval_secs.is_finite() && interval_secs > 0.0 {
            match Duration::try_from_secs_f64(interval_secs) {
                Ok(interval) => Some(interval),
                Err(err) => {
                    tracing::warn!(
                        "Update interval {}s is out of range ({}), emitting once",
                        interval_secs,
                        err
                    );
                    None
                }
            }
        } else {
            None
        };
        Self {
            interval,
            initial: None,
            last_emit: None,
        }
    }

    /// Single emission of `value` on the first step
    pub fn once(value: Option<PvValue>) -> Self {
        Self {
            interval: None,
            initial: value,
            last_emit: None,
        }
    }

    pub fn with_initial(mut self, value: PvValue) -> Self {
        self.initial = Some(value);
        self
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn poll(&mut self, clock: Duration) -> Tick {
        let Some(last) = self.last_emit else {
            self.last_emit = Some(clock);
            if let Some(value) = self.initial.take() {
                return Tick::Initial(value);
            }
            return if self.interval.is_some() {
                Tick::Generate
            } else {
                Tick::Idle
            };
        };

        match self.interval {
            Some(interval) if clock.saturating_sub(last) >= interval => {
                self.last_emit = Some(clock);
                Tick::Generate
            }
            _ => Tick::Idle,
        }
    }
}

/// A time-driven producer of PV samples
pub trait SampleGenerator: Send {
    fn schedule(&mut self) -> &mut Schedule;

    /// Produce the kind-specific sample for an interval that just elapsed
    fn generate_samples(&mut self, now: DateTime<Utc>) -> Option<Sample>;

    /// Limits the backing PV should advertise
    fn limits(&self) -> Option<Limits> {
        None
    }

    /// Advance to `clock`, returning the sample to apply if one is due
    fn step(&mut self, clock: Duration, now: DateTime<Utc>) -> Option<Sample> {
        match self.schedule().poll(clock) {
            Tick::Initial(value) => Some(Sample::new(value, now)),
            Tick::Generate => self.generate_samples(now),
            Tick::Idle => None,
        }
    }
}

/// Resolve textual arguments against defaults.
///
/// Missing or unparsable arguments fall back to the default at the same
/// position; surplus arguments are ignored.
pub fn parse_args<const N: usize>(function: &str, args: Option<&[String]>, defaults: [f64; N]) -> [f64; N] {
    let mut values = defaults;
    let Some(args) = args else {
        return values;
    };
    if args.len() > N {
        tracing::warn!(
            "sim://{} takes at most {} arguments, ignoring {}",
            function,
            N,
            args.len() - N
        );
    }
    for (slot, arg) in values.iter_mut().zip(args.iter()) {
        match arg.parse::<f64>() {
            Ok(v) => *slot = v,
            Err(_) => {
                tracing::warn!(
                    "sim://{}: cannot parse argument '{}', using default {}",
                    function,
                    arg,
                    slot
                );
            }
        }
    }
    values
}

/// Build the generator for a `sim://` function name
pub fn from_sim(
    function: SimFunction,
    name: &str,
    args: Option<&[String]>,
    seed: u64,
) -> Box<dyn SampleGenerator> {
    match function {
        SimFunction::Noise => {
            let [min, max, interval] = parse_args(name, args, NOISE_DEFAULTS);
            Box::new(NoiseGenerator::new(min, max, interval, seed))
        }
        SimFunction::GaussianNoise => {
            let [avg, stddev, interval] = parse_args(name, args, GAUSSIAN_DEFAULTS);
            Box::new(GaussianNoiseGenerator::new(avg, stddev, interval, seed))
        }
        SimFunction::Ramp => {
            let [min, max, step, interval] = parse_args(name, args, RAMP_DEFAULTS);
            Box::new(RampGenerator::new(min, max, step, interval))
        }
        SimFunction::Sine => {
            let [min, max, samples, interval] = parse_args(name, args, SINE_DEFAULTS);
            Box::new(SineGenerator::new(min, max, samples, interval))
        }
    }
}
