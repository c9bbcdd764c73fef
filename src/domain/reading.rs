use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit a temperature value is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single validated temperature sample.
///
/// The value is always finite and the unit always explicit. Readings are
/// immutable; conversions return a new reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    value: f64,
    unit: TemperatureUnit,
}

impl Temperature {
    /// Build a reading, rejecting NaN and infinities.
    pub fn new(value: f64, unit: TemperatureUnit) -> Option<Self> {
        value.is_finite().then_some(Self { value, unit })
    }

    pub fn celsius(value: f64) -> Option<Self> {
        Self::new(value, TemperatureUnit::Celsius)
    }

    pub fn fahrenheit(value: f64) -> Option<Self> {
        Self::new(value, TemperatureUnit::Fahrenheit)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    pub fn to_fahrenheit(&self) -> Self {
        match self.unit {
            TemperatureUnit::Fahrenheit => *self,
            TemperatureUnit::Celsius => Self {
                value: self.value * 9.0 / 5.0 + 32.0,
                unit: TemperatureUnit::Fahrenheit,
            },
        }
    }

    pub fn to_celsius(&self) -> Self {
        match self.unit {
            TemperatureUnit::Celsius => *self,
            TemperatureUnit::Fahrenheit => Self {
                value: (self.value - 32.0) * 5.0 / 9.0,
                unit: TemperatureUnit::Celsius,
            },
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.unit)
    }
}
