use sensor_base::{Error, Instant, Sensor, SensorCore, Timing, VariableSpec};
use tracing::warn;

const SPECS: [VariableSpec; 3] = [
    VariableSpec::new(0, "batteryVoltage", "volt", 3, "Battery"),
    VariableSpec::new(1, "freeSRAM", "Bit", 0, "FreeRam"),
    VariableSpec::new(2, "sequenceNumber", "dimensionless", 0, "SampNum"),
];

pub trait BatteryMonitor {
    fn battery_voltage(&mut self) -> Result<f32, Error>;
}

pub trait MemoryMonitor {
    /// Free memory in bytes.
    fn free_memory(&mut self) -> Result<u64, Error>;
}

/// Health of the logger itself: supply voltage, free memory and a counter
/// that goes up by one for every measurement.
pub struct ProcessorStats<B, M> {
    core: SensorCore,
    battery: B,
    memory: M,
    board: String,
    sample_number: u32,
}

impl<B: BatteryMonitor, M: MemoryMonitor> ProcessorStats<B, M> {
    pub fn new(board: impl Into<String>, battery: B, memory: M) -> Self {
        Self {
            core: SensorCore::new("ProcessorStats", SPECS.len(), Timing::NONE),
            battery,
            memory,
            board: board.into(),
            sample_number: 0,
        }
    }

    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(SensorCore) -> SensorCore) -> Self {
        self.core = f(self.core);
        self
    }
}

impl<B: BatteryMonitor, M: MemoryMonitor> Sensor for ProcessorStats<B, M> {
    fn core(&self) -> &SensorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    fn location(&self) -> String {
        self.board.clone()
    }

    fn variable_specs(&self) -> &[VariableSpec] {
        &SPECS
    }

    #[allow(clippy::cast_precision_loss)]
    fn collect(&mut self, _now: Instant) -> Result<Vec<Option<f32>>, Error> {
        self.sample_number = self.sample_number.wrapping_add(1);

        let battery = self
            .battery
            .battery_voltage()
            .inspect_err(|e| warn!("could not read battery voltage: {e}"))
            .ok();
        let free = self
            .memory
            .free_memory()
            .inspect_err(|e| warn!("could not read free memory: {e}"))
            .ok()
            .map(|bytes| bytes as f32);

        Ok(vec![battery, free, Some(self.sample_number as f32)])
    }
}

#[cfg(test)]
mod tests {
    use sensor_base::ManualClock;

    use super::*;

    struct Fixed(f32);
    impl BatteryMonitor for Fixed {
        fn battery_voltage(&mut self) -> Result<f32, Error> {
            Ok(self.0)
        }
    }

    struct NoMeminfo;
    impl MemoryMonitor for NoMeminfo {
        fn free_memory(&mut self) -> Result<u64, Error> {
            Err(Error::NoResponse)
        }
    }

    #[test]
    fn sample_number_counts_measurements() {
        let clock = ManualClock::starting_at(0);
        let mut stats = ProcessorStats::new("host", Fixed(3.7), NoMeminfo)
            .configure(|core| core.with_measurements_to_average(3));

        stats.update(&clock).unwrap();
        // averaged over samples 1, 2 and 3
        assert_eq!(stats.core().values(), &[Some(3.7), None, Some(2.0)]);

        stats.update(&clock).unwrap();
        assert_eq!(stats.core().values()[2], Some(5.0));
    }
}
