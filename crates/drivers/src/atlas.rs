//! Atlas Scientific EZO circuits in I2C mode.
//!
//! A reading is requested with `r`. After the measurement time the circuit
//! answers with a status byte followed by comma separated ASCII values.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use sensor_base::{Error, Instant, Sensor, SensorCore, Status, Timing, VariableSpec};
use tracing::{debug, warn};

use crate::bus::i2c_err;

/// Longest answer an EZO circuit gives in I2C mode.
const RESPONSE_LEN: usize = 40;
/// Circuits report values far below zero when the probe is disconnected.
const LOWEST_VALID: f32 = -1020.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ResponseCode {
    Success = 1,
    Failed = 2,
    Pending = 254,
    NoData = 255,
}

impl ResponseCode {
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Success,
            2 => Self::Failed,
            254 => Self::Pending,
            255 => Self::NoData,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasKind {
    DissolvedOxygen,
    Ph,
    Conductivity,
    Orp,
    Rtd,
    Co2,
}

const DO_SPECS: [VariableSpec; 2] = [
    VariableSpec::new(0, "oxygenDissolved", "milligramPerLiter", 2, "AtlasDOmgL"),
    VariableSpec::new(
        1,
        "oxygenDissolvedPercentOfSaturation",
        "percent",
        1,
        "AtlasDOpct",
    ),
];
const PH_SPECS: [VariableSpec; 1] = [VariableSpec::new(0, "pH", "pH", 3, "AtlaspH")];
const EC_SPECS: [VariableSpec; 4] = [
    VariableSpec::new(
        0,
        "electricalConductivity",
        "microsiemenPerCentimeter",
        3,
        "AtlasCond",
    ),
    VariableSpec::new(1, "solidsTotalDissolved", "partPerMillion", 3, "AtlasTDS"),
    VariableSpec::new(2, "salinity", "practicalSalinityUnit", 3, "AtlasSal"),
    VariableSpec::new(3, "specificGravity", "dimensionless", 3, "AtlasSpecGravity"),
];
const ORP_SPECS: [VariableSpec; 1] = [VariableSpec::new(0, "ORP", "millivolt", 1, "AtlasORP")];
const RTD_SPECS: [VariableSpec; 1] =
    [VariableSpec::new(0, "temperature", "degreeCelsius", 3, "AtlasTemp")];
const CO2_SPECS: [VariableSpec; 2] = [
    VariableSpec::new(0, "carbonDioxide", "partPerMillion", 1, "AtlasCO2ppm"),
    VariableSpec::new(1, "temperature", "degreeCelsius", 0, "AtlasCO2Temp"),
];

impl AtlasKind {
    #[must_use]
    pub const fn default_address(self) -> u8 {
        match self {
            Self::DissolvedOxygen => 0x61,
            Self::Orp => 0x62,
            Self::Ph => 0x63,
            Self::Conductivity => 0x64,
            Self::Rtd => 0x66,
            Self::Co2 => 0x69,
        }
    }

    #[must_use]
    pub const fn timing(self) -> Timing {
        match self {
            Self::DissolvedOxygen | Self::Conductivity => Timing::from_millis(745, 0, 600),
            Self::Ph => Timing::from_millis(850, 0, 1660),
            Self::Orp => Timing::from_millis(0, 0, 900),
            Self::Rtd => Timing::from_millis(740, 0, 650),
            Self::Co2 => Timing::from_millis(850, 10_000, 900),
        }
    }

    #[must_use]
    pub const fn specs(self) -> &'static [VariableSpec] {
        match self {
            Self::DissolvedOxygen => &DO_SPECS,
            Self::Ph => &PH_SPECS,
            Self::Conductivity => &EC_SPECS,
            Self::Orp => &ORP_SPECS,
            Self::Rtd => &RTD_SPECS,
            Self::Co2 => &CO2_SPECS,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DissolvedOxygen => "AtlasScientificDO",
            Self::Ph => "AtlasScientificpH",
            Self::Conductivity => "AtlasScientificEC",
            Self::Orp => "AtlasScientificORP",
            Self::Rtd => "AtlasScientificRTD",
            Self::Co2 => "AtlasScientificCO2",
        }
    }

    /// Commands making the circuit report every value we expect. Out of
    /// the box some circuits only report their primary value.
    fn enable_outputs(self) -> &'static [&'static str] {
        match self {
            Self::DissolvedOxygen => &["O,mg,1", "O,%,1"],
            Self::Conductivity => &["O,EC,1", "O,TDS,1", "O,S,1", "O,SG,1"],
            Self::Co2 => &["O,t,1"],
            Self::Ph | Self::Orp | Self::Rtd => &[],
        }
    }
}

pub struct AtlasEzo<I2C, D> {
    core: SensorCore,
    kind: AtlasKind,
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C: I2c, D: DelayNs> AtlasEzo<I2C, D> {
    pub fn new(kind: AtlasKind, i2c: I2C, delay: D) -> Self {
        Self::with_address(kind, i2c, delay, kind.default_address())
    }

    pub fn with_address(kind: AtlasKind, i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            core: SensorCore::new(kind.name(), kind.specs().len(), kind.timing()),
            kind,
            i2c,
            delay,
            address,
        }
    }

    /// Replace the core, to attach a power pin or change the averaging.
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(SensorCore) -> SensorCore) -> Self {
        self.core = f(self.core);
        self
    }

    pub fn kind(&self) -> AtlasKind {
        self.kind
    }

    fn command(&mut self, command: &str) -> Result<(), Error> {
        debug!("sending {command:?} to {}", self.location());
        self.i2c
            .write(self.address, command.as_bytes())
            .map_err(i2c_err)
    }

    /// Status byte of the last command, after giving the circuit time to
    /// process it.
    fn command_status(&mut self) -> Result<ResponseCode, Error> {
        self.delay.delay_ms(300);
        let mut code = [0u8];
        self.i2c.read(self.address, &mut code).map_err(i2c_err)?;
        ResponseCode::from_byte(code[0]).ok_or_else(|| Error::device(code[0]))
    }

    fn parse_response(&self, response: &[u8]) -> Result<Vec<Option<f32>>, Error> {
        let Some((&code, payload)) = response.split_first() else {
            return Err(Error::NoResponse);
        };
        match ResponseCode::from_byte(code) {
            Some(ResponseCode::Success) => (),
            Some(ResponseCode::Failed) => return Err(Error::device("request failed")),
            Some(ResponseCode::Pending) => return Err(Error::device("still processing")),
            Some(ResponseCode::NoData) => return Err(Error::NoResponse),
            None => return Err(Error::device(code)),
        }

        let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
        let text = core::str::from_utf8(&payload[..end]).map_err(Error::parse)?;
        let mut values: Vec<_> = text
            .split(',')
            .map(|field| {
                let value = field.trim().parse::<f32>();
                if value.is_err() {
                    warn!("{}: could not parse {field:?}", self.location());
                }
                value.ok().filter(|v| *v >= LOWEST_VALID)
            })
            .collect();
        values.resize(self.core.num_values(), None);
        Ok(values)
    }
}

impl<I2C: I2c, D: DelayNs> Sensor for AtlasEzo<I2C, D> {
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
        self.kind.specs()
    }

    fn setup(&mut self, _now: Instant) -> Result<(), Error> {
        for command in self.kind.enable_outputs() {
            let status = self
                .command(command)
                .and_then(|()| self.command_status());
            match status {
                Ok(ResponseCode::Success) => (),
                Ok(code) => {
                    self.core.setup_failed();
                    return Err(Error::Setup(sensor_base::make_error_string((
                        command, code,
                    ))));
                }
                Err(e) => {
                    self.core.setup_failed();
                    return Err(Error::Setup(sensor_base::make_error_string(e)));
                }
            }
        }
        self.core.mark_setup();
        Ok(())
    }

    fn start_single_measurement(&mut self, now: Instant) -> Result<(), Error> {
        self.core.start_measurement(now)?;
        if let Err(e) = self.command("r") {
            self.core.measurement_failed_to_start();
            return Err(e);
        }
        Ok(())
    }

    fn collect(&mut self, _now: Instant) -> Result<Vec<Option<f32>>, Error> {
        let mut response = [0u8; RESPONSE_LEN];
        self.i2c
            .read(self.address, &mut response)
            .map_err(i2c_err)?;
        let values = self.parse_response(&response)?;
        debug!("{} read {values:?}", self.location());
        Ok(values)
    }

    /// The circuit wakes on any command, it is only put to sleep if it is
    /// active. If that fails it stays active.
    fn sleep(&mut self, _now: Instant) -> Result<(), Error> {
        if self.core.status().contains(Status::AWAKE) {
            self.command("Sleep")?;
        }
        self.core.sleep();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sensor_base::{ManualClock, VariableArray};

    use super::*;
    use crate::bus::mock::{MockI2c, NoDelay};

    fn reading(text: &str) -> Vec<u8> {
        let mut bytes = vec![1];
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        bytes
    }

    #[test]
    fn conductivity_reports_all_four_values() {
        logger::setup_for_tests();
        let i2c = MockI2c::new(0x64).respond(&reading("1413.21,763.1,0.70,1.000"));
        let mut ezo = AtlasEzo::new(AtlasKind::Conductivity, i2c, NoDelay);
        let clock = ManualClock::starting_at(0);

        ezo.update(&clock).unwrap();

        assert_eq!(
            ezo.core().values(),
            &[Some(1413.21), Some(763.1), Some(0.70), Some(1.000)]
        );
        assert_eq!(ezo.i2c.written(), ["r", "Sleep"]);
        assert_eq!(ezo.location(), "I2C_0x64");
    }

    #[test]
    fn setup_enables_outputs() {
        let i2c = MockI2c::new(0x61).respond(&[1]).respond(&[1]);
        let mut ezo = AtlasEzo::new(AtlasKind::DissolvedOxygen, i2c, NoDelay);
        ezo.setup(Instant::from_millis(0)).unwrap();
        assert_eq!(ezo.i2c.written(), ["O,mg,1", "O,%,1"]);
        assert!(ezo.core().status().contains(Status::SETUP));
    }

    #[test]
    fn rejected_setup_command_marks_error() {
        let i2c = MockI2c::new(0x69).respond(&[2]);
        let mut ezo = AtlasEzo::new(AtlasKind::Co2, i2c, NoDelay);
        assert!(matches!(
            ezo.setup(Instant::from_millis(0)),
            Err(Error::Setup(_))
        ));
        assert!(ezo.core().status().contains(Status::ERROR));
        assert!(!ezo.core().status().contains(Status::SETUP));
    }

    #[test]
    fn disconnected_probe_values_are_bad() {
        let ezo = AtlasEzo::new(AtlasKind::DissolvedOxygen, MockI2c::new(0x61), NoDelay);
        let values = ezo.parse_response(&reading("-1023.0,8.5")).unwrap();
        assert_eq!(values, vec![None, Some(8.5)]);
    }

    #[test]
    fn response_codes_are_errors() {
        let ezo = AtlasEzo::new(AtlasKind::Ph, MockI2c::new(0x63), NoDelay);
        assert_eq!(ezo.parse_response(&[255, 0]), Err(Error::NoResponse));
        assert!(matches!(
            ezo.parse_response(&[254, 0]),
            Err(Error::Device(_))
        ));
        assert!(matches!(ezo.parse_response(&[2, 0]), Err(Error::Device(_))));
    }

    #[test]
    fn failing_sensor_does_not_stop_the_cycle() {
        let clock = ManualClock::starting_at(0);
        let broken = MockI2c::new(0x00); // nothing answers at 0x62
        let working = MockI2c::new(0x66).respond(&reading("21.125"));

        let mut array = VariableArray::new();
        let orp = array.add_sensor(AtlasEzo::new(AtlasKind::Orp, broken, NoDelay));
        let rtd = array.add_sensor(AtlasEzo::new(AtlasKind::Rtd, working, NoDelay));
        array.add_all_variables(orp).unwrap();
        array.add_all_variables(rtd).unwrap();

        let report = array.complete_update(&clock);

        assert!(!report.is_success());
        assert!(report.failures.iter().all(|f| f.sensor == orp));
        let values: Vec<_> = array.values().map(|(_, v)| v).collect();
        assert_eq!(values, vec![None, Some(21.125)]);
    }
}
