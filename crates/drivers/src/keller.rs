use embedded_io::{Read, Write};
use sensor_base::{Error, Instant, Sensor, SensorCore, Timing, VariableSpec};
use tracing::debug;

use crate::modbus::Master;

/// Pressure of the first channel, in bar.
const REG_P1: u16 = 0x0100;
/// Temperature of the pressure sensor, in °C.
const REG_TOB1: u16 = 0x0102;

const GRAVITY: f32 = 9.80665;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KellerModel {
    Acculevel,
    Nanolevel,
}

const ACCULEVEL_SPECS: [VariableSpec; 3] = [
    VariableSpec::new(0, "pressureGauge", "millibar", 5, "kellerAccuPress"),
    VariableSpec::new(1, "temperature", "degreeCelsius", 2, "kellerAccuTemp"),
    VariableSpec::new(2, "gaugeHeight", "meter", 4, "kellerAccuHeight"),
];
const NANOLEVEL_SPECS: [VariableSpec; 3] = [
    VariableSpec::new(0, "pressureGauge", "millibar", 5, "kellerNanoPress"),
    VariableSpec::new(1, "temperature", "degreeCelsius", 2, "kellerNanoTemp"),
    VariableSpec::new(2, "gaugeHeight", "meter", 4, "kellerNanoHeight"),
];

impl KellerModel {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Acculevel => "KellerAcculevel",
            Self::Nanolevel => "KellerNanolevel",
        }
    }

    #[must_use]
    pub const fn specs(self) -> &'static [VariableSpec] {
        match self {
            Self::Acculevel => &ACCULEVEL_SPECS,
            Self::Nanolevel => &NANOLEVEL_SPECS,
        }
    }
}

/// Density of fresh water in kg/m³ at `celsius`.
#[must_use]
pub fn water_density(celsius: f32) -> f32 {
    let t = celsius;
    1000.0 * (1.0 - (t + 288.9414) / (508_929.2 * (t + 68.129_63)) * (t - 3.9863).powi(2))
}

/// Height of a water column exerting `bar` at `celsius`, in meters.
#[must_use]
pub fn water_height(bar: f32, celsius: f32) -> f32 {
    bar * 1e5 / (water_density(celsius) * GRAVITY)
}

/// Keller level transmitters speaking Modbus RTU.
pub struct Keller<S> {
    core: SensorCore,
    model: KellerModel,
    modbus: Master<S>,
    address: u8,
}

impl<S: Read + Write> Keller<S> {
    pub fn new(model: KellerModel, port: S, address: u8) -> Self {
        Self {
            core: SensorCore::new(
                model.name(),
                model.specs().len(),
                Timing::from_millis(500, 5_000, 1_500),
            ),
            model,
            modbus: Master::new(port),
            address,
        }
    }

    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(SensorCore) -> SensorCore) -> Self {
        self.core = f(self.core);
        self
    }
}

impl<S: Read + Write> Sensor for Keller<S> {
    fn core(&self) -> &SensorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    fn location(&self) -> String {
        format!("modbus_0x{:02x}", self.address)
    }

    fn variable_specs(&self) -> &[VariableSpec] {
        self.model.specs()
    }

    fn collect(&mut self, _now: Instant) -> Result<Vec<Option<f32>>, Error> {
        let bar = self.modbus.read_f32(self.address, REG_P1)?;
        let celsius = self.modbus.read_f32(self.address, REG_TOB1)?;
        debug!("{}: {bar} bar at {celsius} °C", self.location());

        let bar = sensor_base::verified(Some(bar));
        let celsius = sensor_base::verified(Some(celsius));
        let height = bar.zip(celsius).map(|(b, c)| water_height(b, c));
        Ok(vec![bar.map(|b| b * 1000.0), celsius, height])
    }
}

#[cfg(test)]
mod tests {
    use sensor_base::ManualClock;

    use super::*;
    use crate::bus::mock::MockSerial;
    use crate::modbus::response_frame;

    #[test]
    fn density_peaks_near_four_degrees() {
        assert!((water_density(3.9863) - 1000.0).abs() < 1e-3);
        assert!(water_density(20.0) < water_density(4.0));
        assert!((water_density(20.0) - 998.2).abs() < 0.1);
    }

    #[test]
    fn reads_pressure_temperature_and_height() {
        logger::setup_for_tests();
        let port = MockSerial::default()
            .reply(&response_frame(1, &0.1f32.to_be_bytes()))
            .reply(&response_frame(1, &4.0f32.to_be_bytes()));
        let mut keller = Keller::new(KellerModel::Acculevel, port, 1);
        let clock = ManualClock::starting_at(0);

        keller.update(&clock).unwrap();

        let values = keller.core().values();
        assert!((values[0].unwrap() - 100.0).abs() < 1e-3);
        assert_eq!(values[1], Some(4.0));
        // 0.1 bar is close to a meter of water
        assert!((values[2].unwrap() - 1.0197).abs() < 1e-3);
        assert_eq!(keller.location(), "modbus_0x01");
    }

    #[test]
    fn silent_transmitter_fails_the_measurement() {
        let mut keller = Keller::new(KellerModel::Nanolevel, MockSerial::default(), 1);
        let now = Instant::from_millis(0);
        keller.power_up(now).unwrap();
        keller.wake(now).unwrap();
        keller.start_single_measurement(now).unwrap();
        assert_eq!(keller.add_single_measurement_result(now), Err(Error::NoResponse));
    }
}
