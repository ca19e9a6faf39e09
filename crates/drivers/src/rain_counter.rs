use embedded_hal::i2c::I2c;
use sensor_base::{Error, Instant, Sensor, SensorCore, Timing, VariableSpec};

use crate::bus::i2c_err;

pub const DEFAULT_ADDRESS: u8 = 0x08;
/// Rain in mm per tip of a typical tipping bucket.
pub const DEFAULT_RAIN_PER_TIP: f32 = 0.2;

const SPECS: [VariableSpec; 2] = [
    VariableSpec::new(0, "precipitation", "millimeter", 2, "RainCounterI2CVol"),
    VariableSpec::new(1, "precipitation", "event", 0, "RainCounterI2CTips"),
];

/// Tipping bucket counter behind an I2C slave that reports, and resets,
/// the number of tips since the last read.
pub struct RainCounter<I2C> {
    core: SensorCore,
    i2c: I2C,
    address: u8,
    rain_per_tip: f32,
}

impl<I2C: I2c> RainCounter<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS, DEFAULT_RAIN_PER_TIP)
    }

    pub fn with_address(i2c: I2C, address: u8, rain_per_tip: f32) -> Self {
        Self {
            core: SensorCore::new("RainCounterI2C", SPECS.len(), Timing::NONE),
            i2c,
            address,
            rain_per_tip,
        }
    }

    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(SensorCore) -> SensorCore) -> Self {
        self.core = f(self.core);
        self
    }
}

impl<I2C: I2c> Sensor for RainCounter<I2C> {
    fn core(&self) -> &SensorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    fn location(&self) -> String {
        format!("I2C_0x{:02x}", self.address)
    }

    fn variable_specs(&self) -> &[VariableSpec] {
        &SPECS
    }

    fn collect(&mut self, _now: Instant) -> Result<Vec<Option<f32>>, Error> {
        let mut buf = [0u8; 2];
        self.i2c.read(self.address, &mut buf).map_err(i2c_err)?;
        let tips = u16::from_le_bytes(buf);
        tracing::debug!("rain counter at {} saw {tips} tips", self.location());
        let tips = f32::from(tips);
        Ok(vec![Some(tips * self.rain_per_tip), Some(tips)])
    }
}

#[cfg(test)]
mod tests {
    use sensor_base::ManualClock;

    use super::*;
    use crate::bus::mock::MockI2c;

    #[test]
    fn tips_are_little_endian() {
        let i2c = MockI2c::new(DEFAULT_ADDRESS).respond(&[0x2c, 0x01]);
        let mut counter = RainCounter::new(i2c);
        counter.update(&ManualClock::starting_at(0)).unwrap();

        let values = counter.core().values();
        assert_eq!(values[1], Some(300.0));
        let rain = values[0].unwrap();
        assert!((rain - 60.0).abs() < 1e-3, "{rain}");
    }

    #[test]
    fn missing_counter_gives_no_values() {
        let mut counter = RainCounter::new(MockI2c::new(0x09));
        counter.update(&ManualClock::starting_at(0)).unwrap();
        assert_eq!(counter.core().values(), &[None, None]);
    }
}
