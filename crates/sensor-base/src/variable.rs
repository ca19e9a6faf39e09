use std::borrow::Cow;
use std::fmt;

use crate::sensor::BAD_VALUE;
use crate::variable_array::SensorId;

/// Metadata a driver publishes for each value it measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableSpec {
    /// Position of the value in the sensor's result.
    pub index: usize,
    /// ODM2 controlled vocabulary variable name.
    pub name: &'static str,
    /// ODM2 controlled vocabulary unit name.
    pub unit: &'static str,
    /// Number of decimals the value is reported with.
    pub resolution: u8,
    pub code: &'static str,
}

impl VariableSpec {
    #[must_use]
    pub const fn new(
        index: usize,
        name: &'static str,
        unit: &'static str,
        resolution: u8,
        code: &'static str,
    ) -> Self {
        Self {
            index,
            name,
            unit,
            resolution,
            code,
        }
    }
}

pub type Calculation = Box<dyn Fn(&Lookup<'_>) -> Option<f32>>;

pub(crate) enum Source {
    Sensor { sensor: SensorId, index: usize },
    Calculated(Calculation),
}

/// Current values of the other variables, by code, for calculations.
pub struct Lookup<'a>(pub(crate) &'a [Variable]);

impl Lookup<'_> {
    #[must_use]
    pub fn get(&self, code: &str) -> Option<f32> {
        self.0
            .iter()
            .find(|var| var.code() == code)
            .and_then(Variable::value)
    }
}

pub struct Variable {
    name: Cow<'static, str>,
    unit: Cow<'static, str>,
    resolution: u8,
    default_code: Cow<'static, str>,
    custom_code: Option<String>,
    uuid: Option<String>,
    pub(crate) source: Source,
    pub(crate) value: Option<f32>,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Sensor { sensor, index } => format!("{sensor:?}[{index}]"),
            Source::Calculated(_) => "calculated".to_owned(),
        };
        f.debug_struct("Variable")
            .field("code", &self.code())
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("source", &source)
            .field("value", &self.value)
            .finish()
    }
}

impl Variable {
    #[must_use]
    pub fn from_sensor(sensor: SensorId, spec: &VariableSpec) -> Self {
        Self {
            name: Cow::Borrowed(spec.name),
            unit: Cow::Borrowed(spec.unit),
            resolution: spec.resolution,
            default_code: Cow::Borrowed(spec.code),
            custom_code: None,
            uuid: None,
            source: Source::Sensor {
                sensor,
                index: spec.index,
            },
            value: None,
        }
    }

    /// A variable computed from other variables after every update. The
    /// calculation gets `None` for codes whose value is missing.
    pub fn calculated(
        name: impl Into<Cow<'static, str>>,
        unit: impl Into<Cow<'static, str>>,
        resolution: u8,
        code: impl Into<Cow<'static, str>>,
        calculation: impl Fn(&Lookup<'_>) -> Option<f32> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            resolution,
            default_code: code.into(),
            custom_code: None,
            uuid: None,
            source: Source::Calculated(Box::new(calculation)),
            value: None,
        }
    }

    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.custom_code = Some(code.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn code(&self) -> &str {
        self.custom_code.as_deref().unwrap_or(&self.default_code)
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }

    pub fn is_calculated(&self) -> bool {
        matches!(self.source, Source::Calculated(_))
    }

    /// The sensor and value index feeding this variable.
    pub fn parent(&self) -> Option<(SensorId, usize)> {
        match self.source {
            Source::Sensor { sensor, index } => Some((sensor, index)),
            Source::Calculated(_) => None,
        }
    }

    /// Rounded to the resolution, a missing value renders as `-9999`.
    pub fn value_string(&self) -> String {
        match self.value {
            Some(v) => format!("{v:.prec$}", prec = usize::from(self.resolution)),
            None => format!("{BAD_VALUE:.0}"),
        }
    }

    pub(crate) fn on_sensor_update(&mut self, values: &[Option<f32>]) {
        if let Source::Sensor { index, .. } = self.source {
            self.value = values.get(index).copied().flatten();
        }
    }
}
