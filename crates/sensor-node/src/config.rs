use std::path::Path;

use color_eyre::eyre::Context;
use color_eyre::{Result, Section};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Config {
    /// Seconds between the start of two logging cycles.
    pub interval_secs: u64,
    pub sensors: Vec<SensorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SensorConfig {
    pub kind: SensorKind,
    #[serde(default = "one")]
    pub measurements_to_average: u8,
    #[serde(default)]
    pub retries: u8,
    /// Sensors with the same group share a power switch.
    #[serde(default)]
    pub power_group: Option<String>,
    #[serde(default)]
    pub variables: Vec<VariableOverride>,
}

fn one() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) enum SensorKind {
    Simulated {
        name: String,
        seed: u64,
        #[serde(default)]
        warm_up_ms: u64,
        #[serde(default)]
        stabilization_ms: u64,
        #[serde(default)]
        measurement_ms: u64,
        #[serde(default)]
        failure_probability: f64,
        values: Vec<SimulatedValue>,
    },
    AtlasEzo {
        bus: String,
        kind: AtlasKind,
        #[serde(default)]
        address: Option<u8>,
    },
    RainCounter {
        bus: String,
        #[serde(default)]
        address: Option<u8>,
        #[serde(default)]
        mm_per_tip: Option<f32>,
    },
    Processor,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SimulatedValue {
    pub quantity: Quantity,
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) enum Quantity {
    Temperature,
    Conductivity,
    Depth,
    Pressure,
    Humidity,
}

impl From<Quantity> for drivers::Quantity {
    fn from(q: Quantity) -> Self {
        match q {
            Quantity::Temperature => Self::Temperature,
            Quantity::Conductivity => Self::Conductivity,
            Quantity::Depth => Self::Depth,
            Quantity::Pressure => Self::Pressure,
            Quantity::Humidity => Self::Humidity,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) enum AtlasKind {
    DissolvedOxygen,
    Ph,
    Conductivity,
    Orp,
    Rtd,
    Co2,
}

impl From<AtlasKind> for drivers::AtlasKind {
    fn from(kind: AtlasKind) -> Self {
        match kind {
            AtlasKind::DissolvedOxygen => Self::DissolvedOxygen,
            AtlasKind::Ph => Self::Ph,
            AtlasKind::Conductivity => Self::Conductivity,
            AtlasKind::Orp => Self::Orp,
            AtlasKind::Rtd => Self::Rtd,
            AtlasKind::Co2 => Self::Co2,
        }
    }
}

/// Replaces the code of, or adds a UUID to, one of a sensor's values.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VariableOverride {
    pub index: usize,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl Config {
    pub(crate) fn parse(text: &str) -> Result<Self> {
        ron::from_str(text).wrap_err("Could not deserialize config")
    }

    pub(crate) async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .wrap_err("Could not read config")
            .with_note(|| format!("path: {}", path.display()))?;
        Self::parse(&text).with_note(|| format!("path: {}", path.display()))
    }
}
