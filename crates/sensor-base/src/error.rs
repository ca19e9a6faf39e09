pub type ErrorString = heapless::String<200>;

// Device and bus errors come in many types, some only implement Debug. They
// are flattened into a fixed size string so `Error` stays Clone + PartialEq.
pub fn make_error_string(e: impl core::fmt::Debug) -> ErrorString {
    use core::fmt::Write;

    let mut s = ErrorString::new();
    core::write!(s, "{e:?}").ok();
    s
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Sensor does not have power")]
    NotPowered,
    #[error("Sensor is not awake/active")]
    NotAwake,
    #[error("No measurement was started")]
    NotMeasuring,
    #[error("Could not switch power: {0}")]
    PowerSwitch(ErrorString),
    #[error("Communication with sensor failed: {0}")]
    Bus(ErrorString),
    #[error("Sensor did not respond")]
    NoResponse,
    #[error("Sensor reported a failure: {0}")]
    Device(ErrorString),
    #[error("Could not understand sensor response: {0}")]
    Parse(ErrorString),
    #[error("Sensor setup failed: {0}")]
    Setup(ErrorString),
    #[error("Sensor has {available} values, there is no value {index}")]
    NoSuchValue { index: usize, available: usize },
    #[error("There is no sensor with id {0}")]
    UnknownSensor(usize),
}

impl Error {
    pub fn bus(e: impl core::fmt::Debug) -> Self {
        Self::Bus(make_error_string(e))
    }

    pub fn parse(e: impl core::fmt::Debug) -> Self {
        Self::Parse(make_error_string(e))
    }

    pub fn device(e: impl core::fmt::Debug) -> Self {
        Self::Device(make_error_string(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_errors_do_not_overflow() {
        let long = "x".repeat(500);
        let s = make_error_string(&long);
        assert!(s.is_empty() || s.starts_with('"'));
        assert!(s.len() <= 200);
    }
}
