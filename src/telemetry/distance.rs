use serde::{Deserialize, Serialize};

pub const DISTANCE_SCHEMA_VERSION: u32 = 2;

const ADC_MAX: f64 = 4095.0;
const ADC_REFERENCE_VOLTS: f64 = 3.3;

fn distance_schema() -> u32 {
    DISTANCE_SCHEMA_VERSION
}

/// High-rate proximity sample. Not interchangeable with `SensorReading`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistanceSample {
    #[serde(default = "distance_schema")]
    pub schema_version: u32,
    pub analog_value: i32,
    pub voltage: f64,
    pub distance: f64,
}

pub fn analog_to_voltage(analog_value: i32) -> f64 {
    analog_value as f64 * (ADC_REFERENCE_VOLTS / ADC_MAX)
}

/// Piecewise-linear fit of the IR proximity sensor's voltage curve, in cm.
pub fn voltage_to_distance(voltage: f64) -> f64 {
    if voltage >= 1.023 {
        (voltage - 3.354) / -0.042
    } else {
        (voltage - 1.416) / -0.007
    }
}
