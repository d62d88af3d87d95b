use std::fmt;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::log::CsvRecord;
use crate::config::{Bounds, CountBounds, GeneratorConfig, SimulatorConfig};
use crate::telemetry::distance::{analog_to_voltage, voltage_to_distance, DISTANCE_SCHEMA_VERSION};
use crate::error::ConfigError;
use crate::telemetry::reading::{BATTERY_PLACES, FITNESS_SCHEMA_VERSION, WEIGHT_PLACES};
use crate::telemetry::{DecimalText, DistanceSample, SensorReading};
use crate::util::round_to;

/// Produces one sample per tick.
pub trait SampleModel: Send + 'static {
    type Sample: Serialize + CsvRecord + fmt::Debug + Send + Sync + 'static;

    fn next_sample(&mut self, now: DateTime<Utc>) -> Self::Sample;

    /// Called each time the generator enters `Collecting`.
    fn on_start(&mut self) {}
}

/// Uniform draws inside fixed bounds, one weight-stack reading per tick.
///
/// Decimals are drawn as whole steps of their output precision, so a rendered
/// value never rounds past a bound.
pub struct FitnessModel<R = StdRng> {
    uid: String,
    locations: Vec<String>,
    battery_steps: (i64, i64),
    weight_steps: (i64, i64),
    rep_count: CountBounds,
    rng: R,
}

impl FitnessModel<StdRng> {
    pub fn from_config(config: &GeneratorConfig, uid: String) -> Result<Self, ConfigError> {
        FitnessModel::with_rng(config, uid, StdRng::from_entropy())
    }
}

impl<R: Rng + Send + 'static> FitnessModel<R> {
    pub fn with_rng(config: &GeneratorConfig, uid: String, rng: R) -> Result<Self, ConfigError> {
        if config.rep_count.min > config.rep_count.max {
            return Err(ConfigError::Invalid(
                "generator.rep_count min must not exceed max".to_string(),
            ));
        }

        Ok(FitnessModel {
            uid,
            locations: config.locations.clone(),
            battery_steps: steps("generator.battery_voltage", config.battery_voltage, BATTERY_PLACES)?,
            weight_steps: steps("generator.weight", config.weight, WEIGHT_PLACES)?,
            rep_count: config.rep_count,
            rng,
        })
    }
}

fn steps(name: &str, bounds: Bounds, places: usize) -> Result<(i64, i64), ConfigError> {
    bounds.steps(places).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "{} bounds [{}, {}] hold no value with {} decimals",
            name, bounds.min, bounds.max, places
        ))
    })
}

impl<R: Rng + Send + 'static> SampleModel for FitnessModel<R> {
    type Sample = SensorReading;

    fn next_sample(&mut self, now: DateTime<Utc>) -> SensorReading {
        let battery = self.rng.gen_range(self.battery_steps.0..=self.battery_steps.1);
        let weight = self.rng.gen_range(self.weight_steps.0..=self.weight_steps.1);
        let rep_count = self.rng.gen_range(self.rep_count.min..=self.rep_count.max);

        SensorReading {
            schema_version: FITNESS_SCHEMA_VERSION,
            uid: self.uid.clone(),
            timestamp: now,
            loc: self.locations.choose(&mut self.rng).cloned(),
            battery_voltage: DecimalText::from_steps(battery, BATTERY_PLACES),
            weight: DecimalText::from_steps(weight, WEIGHT_PLACES),
            rep_count,
        }
    }
}

/// Noisy ADC samples around a slowly drifting baseline.
pub struct DistanceModel<R = StdRng> {
    base_value: f64,
    noise_range: f64,
    drift_step: f64,
    drift_limit: f64,
    trend: f64,
    rng: R,
}

impl DistanceModel<StdRng> {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        DistanceModel::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng + Send + 'static> DistanceModel<R> {
    pub fn with_rng(config: &SimulatorConfig, rng: R) -> Self {
        DistanceModel {
            base_value: config.base_value,
            noise_range: config.noise_range,
            drift_step: config.drift_step,
            drift_limit: config.drift_limit,
            trend: 0.0,
            rng,
        }
    }

    pub fn trend(&self) -> f64 {
        self.trend
    }
}

impl<R: Rng + Send + 'static> SampleModel for DistanceModel<R> {
    type Sample = DistanceSample;

    fn next_sample(&mut self, _now: DateTime<Utc>) -> DistanceSample {
        self.trend += (self.rng.gen::<f64>() - 0.5) * self.drift_step;
        if self.trend.abs() > self.drift_limit {
            // bounce back towards the centre
            self.trend *= -0.9;
        }

        let base = self.base_value + self.trend;
        let noise = self.rng.gen::<f64>() * self.noise_range * 2.0 - self.noise_range;
        let analog_value = (base + noise).floor() as i32;
        let voltage = analog_to_voltage(analog_value);

        DistanceSample {
            schema_version: DISTANCE_SCHEMA_VERSION,
            analog_value,
            voltage: round_to(voltage, 3),
            distance: round_to(voltage_to_distance(voltage), 3),
        }
    }

    fn on_start(&mut self) {
        self.trend = 0.0;
    }
}
