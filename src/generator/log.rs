use std::borrow::Cow;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::LogError;
use crate::telemetry::{DistanceSample, SensorReading};

/// A sample that can be written as one CSV line.
pub trait CsvRecord {
    const HEADER: &'static [&'static str];

    fn fields(&self) -> Vec<String>;
}

impl CsvRecord for SensorReading {
    const HEADER: &'static [&'static str] =
        &["uid", "timestamp", "loc", "battery_voltage", "weight", "rep_count"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.uid.clone(),
            self.timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            self.loc.clone().unwrap_or_default(),
            self.battery_voltage.to_string(),
            self.weight.to_string(),
            self.rep_count.to_string(),
        ]
    }
}

impl CsvRecord for DistanceSample {
    const HEADER: &'static [&'static str] = &["analog_value", "voltage", "distance"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.analog_value.to_string(),
            self.voltage.to_string(),
            self.distance.to_string(),
        ]
    }
}

/// Append-only CSV file of everything the generator produced.
pub struct ReadingLog<T> {
    path: PathBuf,
    _record: PhantomData<fn(&T)>,
}

impl<T: CsvRecord> ReadingLog<T> {
    /// Opens the log, writing the header if the file is missing or empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let empty = match fs::metadata(&path).await {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        let log = ReadingLog {
            path,
            _record: PhantomData,
        };
        if empty {
            info!("Creating reading log {}", log.path.display());
            log.write_line(&T::HEADER.join(",")).await?;
        }
        Ok(log)
    }

    pub async fn append(&self, record: &T) -> Result<(), LogError> {
        let line = record
            .fields()
            .iter()
            .map(|f| escape(f))
            .collect::<Vec<_>>()
            .join(",");
        self.write_line(&line).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&self, line: &str) -> Result<(), LogError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
