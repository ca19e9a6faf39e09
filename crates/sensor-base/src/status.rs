use core::fmt;

bitflags::bitflags! {
    /// Which lifecycle stages were attempted and which succeeded.
    ///
    /// The layout matches the status byte used by data loggers in the field,
    /// so the raw `bits()` can be stored or transmitted as is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        /// Setup completed successfully.
        const SETUP = 1 << 0;
        /// An attempt was made to power the sensor.
        const POWER_ATTEMPTED = 1 << 1;
        /// The sensor has power.
        const POWERED = 1 << 2;
        /// An attempt was made to wake/activate the sensor.
        const WAKE_ATTEMPTED = 1 << 3;
        /// The sensor is awake and actively measuring.
        const AWAKE = 1 << 4;
        /// An attempt was made to start a measurement.
        const MEASUREMENT_ATTEMPTED = 1 << 5;
        /// A measurement was started successfully.
        const MEASUREMENT_STARTED = 1 << 6;
        /// Some error occurred.
        const ERROR = 1 << 7;
    }
}

impl Status {
    /// Bits that survive cutting the power.
    pub const KEPT_WITHOUT_POWER: Self = Self::SETUP.union(Self::ERROR);
    /// Bits cleared by putting a sensor to sleep.
    pub const ACTIVATION: Self = Self::WAKE_ATTEMPTED
        .union(Self::AWAKE)
        .union(Self::MEASUREMENT);
    /// Bits cleared once a measurement result has been collected.
    pub const MEASUREMENT: Self =
        Self::MEASUREMENT_ATTEMPTED.union(Self::MEASUREMENT_STARTED);
    pub const POWER: Self = Self::POWER_ATTEMPTED.union(Self::POWERED);

    #[must_use]
    pub const fn new() -> Self {
        Self::empty()
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0b{:08b}", self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_logger_layout() {
        assert_eq!(Status::SETUP.bits(), 0b0000_0001);
        assert_eq!(Status::POWER.bits(), 0b0000_0110);
        assert_eq!(Status::ACTIVATION.bits(), 0b0111_1000);
        assert_eq!(Status::MEASUREMENT.bits(), 0b0110_0000);
        assert_eq!(Status::ERROR.bits(), 0b1000_0000);
    }

    #[test]
    fn power_down_mask_keeps_setup_and_error() {
        let mut status = Status::all();
        status &= Status::KEPT_WITHOUT_POWER;
        assert_eq!(status, Status::SETUP | Status::ERROR);
    }

    #[test]
    fn displays_as_binary() {
        let status = Status::SETUP | Status::POWER | Status::ERROR;
        assert_eq!(status.to_string(), "0b10000111");
    }
}
