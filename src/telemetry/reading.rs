use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::decimal::DecimalText;
use super::iso_millis;
use crate::error::ReadingError;

pub const FITNESS_SCHEMA_VERSION: u32 = 1;

/// Decimals carried by generated readings.
pub const BATTERY_PLACES: usize = 2;
pub const WEIGHT_PLACES: usize = 1;

fn fitness_schema() -> u32 {
    FITNESS_SCHEMA_VERSION
}

/// One observation from a weight-stack sensor, as carried on the data topic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SensorReading {
    #[serde(default = "fitness_schema")]
    pub schema_version: u32,
    pub uid: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    pub battery_voltage: DecimalText,
    pub weight: DecimalText,
    pub rep_count: u32,
}

impl SensorReading {
    pub fn from_json(payload: &[u8]) -> Result<Self, ReadingError> {
        let reading: SensorReading = serde_json::from_slice(payload)?;
        if reading.schema_version != FITNESS_SCHEMA_VERSION {
            return Err(ReadingError::UnsupportedSchema(reading.schema_version));
        }
        Ok(reading)
    }
}

/// A persisted reading: every field of the message plus the calendar date.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    pub battery_voltage: DecimalText,
    pub weight: DecimalText,
    pub rep_count: u32,
    pub date: NaiveDate,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl From<SensorReading> for StoredReading {
    fn from(reading: SensorReading) -> Self {
        StoredReading {
            date: reading.timestamp.date_naive(),
            uid: reading.uid,
            loc: reading.loc,
            battery_voltage: reading.battery_voltage,
            weight: reading.weight,
            rep_count: reading.rep_count,
            timestamp: reading.timestamp,
        }
    }
}
