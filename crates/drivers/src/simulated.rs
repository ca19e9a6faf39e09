use std::borrow::Cow;
use std::ops::Range;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sensor_base::{Error, Instant, Sensor, SensorCore, Timing, VariableSpec};

/// What a simulated value stands for, decides its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Conductivity,
    Depth,
    Pressure,
    Humidity,
}

impl Quantity {
    const fn spec(self, index: usize) -> VariableSpec {
        match self {
            Self::Temperature => {
                VariableSpec::new(index, "temperature", "degreeCelsius", 2, "SimTemp")
            }
            Self::Conductivity => VariableSpec::new(
                index,
                "specificConductance",
                "microsiemenPerCentimeter",
                1,
                "SimCond",
            ),
            Self::Depth => VariableSpec::new(index, "waterDepth", "millimeter", 1, "SimDepth"),
            Self::Pressure => {
                VariableSpec::new(index, "pressureGauge", "millibar", 3, "SimPress")
            }
            Self::Humidity => {
                VariableSpec::new(index, "relativeHumidity", "percent", 1, "SimRH")
            }
        }
    }
}

/// A sensor without hardware: timing as configured, values drawn uniformly
/// from a range per value and failures at a fixed probability. Seeded, so a
/// run can be repeated exactly.
pub struct SimulatedSensor {
    core: SensorCore,
    specs: Vec<VariableSpec>,
    ranges: Vec<Range<f32>>,
    failure_probability: f64,
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(name: impl Into<Cow<'static, str>>, timing: Timing, seed: u64) -> Self {
        Self {
            core: SensorCore::new(name, 0, timing),
            specs: Vec::new(),
            ranges: Vec::new(),
            failure_probability: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Adds a value, an empty range always produces its start.
    #[must_use]
    pub fn with_value(mut self, quantity: Quantity, range: Range<f32>) -> Self {
        self.specs.push(quantity.spec(self.specs.len()));
        self.ranges.push(range);
        self.rebuild_core();
        self
    }

    #[must_use]
    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    /// Must come after the last [`SimulatedSensor::with_value`].
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(SensorCore) -> SensorCore) -> Self {
        self.core = f(self.core);
        self
    }

    fn rebuild_core(&mut self) {
        let old = &self.core;
        let mut core = SensorCore::new(old.name().to_owned(), self.specs.len(), old.timing())
            .with_measurements_to_average(old.measurements_to_average())
            .with_retries(old.allowed_retries());
        if let Some(pin) = old.power_pin() {
            core = core.with_power(pin.clone());
        }
        self.core = core;
    }
}

impl Sensor for SimulatedSensor {
    fn core(&self) -> &SensorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    fn location(&self) -> String {
        "simulated".to_owned()
    }

    fn variable_specs(&self) -> &[VariableSpec] {
        &self.specs
    }

    fn collect(&mut self, _now: Instant) -> Result<Vec<Option<f32>>, Error> {
        if self.rng.random_bool(self.failure_probability) {
            return Err(Error::NoResponse);
        }
        let values = self
            .ranges
            .iter()
            .map(|range| {
                if range.is_empty() {
                    Some(range.start)
                } else {
                    Some(self.rng.random_range(range.clone()))
                }
            })
            .collect();
        Ok(values)
    }
}
