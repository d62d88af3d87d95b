use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A decimal measurement that keeps the textual form it arrived in.
///
/// Publishers send these either as JSON strings (`"72.5"`) or numbers (`72.5`);
/// both are accepted, and the value is always written back out as a string.
#[derive(Debug, Clone, PartialEq)]
pub struct DecimalText {
    text: String,
    value: f64,
}

impl DecimalText {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let value: f64 = text.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            value,
        })
    }

    /// Renders `value` with exactly `places` decimals, like `Number.toFixed`.
    pub fn fixed(value: f64, places: usize) -> Self {
        let text = crate::util::to_fixed(value, places);
        let value = text.parse().unwrap_or(value);
        Self { text, value }
    }

    /// `steps * 10^-places`, rendered with `places` decimals.
    pub fn from_steps(steps: i64, places: usize) -> Self {
        DecimalText::fixed(steps as f64 / 10f64.powi(places as i32), places)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for DecimalText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for DecimalText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for DecimalText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => DecimalText::parse(&text)
                .ok_or_else(|| de::Error::custom(format!("not a decimal: {:?}", text))),
            Raw::Number(value) if value.is_finite() => Ok(DecimalText {
                text: value.to_string(),
                value,
            }),
            Raw::Number(value) => Err(de::Error::custom(format!("not a finite decimal: {}", value))),
        }
    }
}
