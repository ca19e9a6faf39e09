//! SDI-12 sensors behind a transparent adapter: commands are written as
//! ASCII, answers come back terminated by `\r\n`. Break and marking are
//! the adapter's job.

use std::borrow::Cow;

use embedded_hal::delay::DelayNs;
use embedded_io::{Read, Write};
use sensor_base::{make_error_string, Error, Instant, Sensor, SensorCore, Timing, VariableSpec};
use tracing::{debug, instrument, trace, warn};

use crate::bus::{io_err, read_line};

const ACK_ATTEMPTS: usize = 5;

type Line = heapless::Vec<u8, 96>;

/// Identification a sensor sends in answer to `aI!`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sdi12Info {
    pub sdi12_version: String,
    pub vendor: String,
    pub model: String,
    pub sensor_version: String,
    pub serial_number: String,
}

impl Sdi12Info {
    /// Parses `allccccccccmmmmmmvvvxxx…`: address, protocol version, vendor,
    /// model, sensor version and an optional serial number.
    pub fn parse(response: &str) -> Result<Self, Error> {
        let field = |range: core::ops::Range<usize>| {
            response
                .get(range)
                .map(|s| s.trim().to_owned())
                .ok_or_else(|| Error::parse(response))
        };
        Ok(Self {
            sdi12_version: field(1..3)?,
            vendor: field(3..11)?,
            model: field(11..17)?,
            sensor_version: field(17..20)?,
            serial_number: response.get(20..).unwrap_or_default().trim().to_owned(),
        })
    }
}

/// Splits `a+1.23-4.5+6` into values. Every value starts with its sign, a
/// sign right after an exponent marker (`+1.2e-3`) belongs to the value.
#[must_use]
pub fn parse_values(response: &str) -> Vec<Option<f32>> {
    let mut values = Vec::new();
    let mut start = None;
    let mut prev = None;
    for (i, c) in response.char_indices() {
        let exponent = matches!(prev, Some('e' | 'E'));
        prev = Some(c);
        if (c == '+' || c == '-') && !exponent {
            if let Some(s) = start {
                values.push(parse_value(&response[s..i]));
            }
            start = Some(i);
        }
    }
    if let Some(s) = start {
        values.push(parse_value(&response[s..]));
    }
    values
}

fn parse_value(text: &str) -> Option<f32> {
    let value = text.parse::<f32>();
    if value.is_err() {
        warn!("could not parse SDI-12 value {text:?}");
    }
    sensor_base::verified(value.ok())
}

static CTD_SPECS: [VariableSpec; 3] = [
    VariableSpec::new(0, "waterDepth", "millimeter", 1, "CTDdepth"),
    VariableSpec::new(1, "temperature", "degreeCelsius", 2, "CTDtemp"),
    VariableSpec::new(
        2,
        "specificConductance",
        "microsiemenPerCentimeter",
        1,
        "CTDcond",
    ),
];
static FIVE_TM_SPECS: [VariableSpec; 3] = [
    VariableSpec::new(0, "permittivity", "faradPerMeter", 5, "SoilEa"),
    VariableSpec::new(1, "temperature", "degreeCelsius", 2, "SoilTemp"),
    VariableSpec::new(2, "volumetricWaterContent", "percent", 3, "SoilVWC"),
];
static ES2_SPECS: [VariableSpec; 2] = [
    VariableSpec::new(
        0,
        "specificConductance",
        "microsiemenPerCentimeter",
        1,
        "ES2Cond",
    ),
    VariableSpec::new(1, "temperature", "degreeCelsius", 2, "ES2Temp"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Generic,
    DecagonCtd,
    FiveTm,
    Es2,
}

/// Volumetric water content in percent from the apparent dielectric
/// permittivity (Topp et al., 1980).
#[must_use]
pub fn topp_vwc(ea: f32) -> f32 {
    100.0 * (4.3e-6 * ea.powi(3) - 5.5e-4 * ea.powi(2) + 2.92e-2 * ea - 5.3e-2)
}

pub struct Sdi12Sensor<S, D> {
    core: SensorCore,
    kind: Kind,
    specs: Cow<'static, [VariableSpec]>,
    port: S,
    delay: D,
    address: char,
    info: Option<Sdi12Info>,
}

impl<S: Read + Write, D: DelayNs> Sdi12Sensor<S, D> {
    /// Any sensor supporting `aC!` and `aD0!`, reporting the values in
    /// `specs` in index order.
    pub fn generic(
        name: impl Into<Cow<'static, str>>,
        timing: Timing,
        specs: impl Into<Cow<'static, [VariableSpec]>>,
        port: S,
        delay: D,
        address: char,
    ) -> Self {
        let specs = specs.into();
        Self {
            core: SensorCore::new(name, specs.len(), timing),
            kind: Kind::Generic,
            specs,
            port,
            delay,
            address,
            info: None,
        }
    }

    /// Decagon (METER) CTD-10: depth, temperature and conductivity.
    pub fn decagon_ctd(port: S, delay: D, address: char) -> Self {
        let mut sensor = Self::generic(
            "DecagonCTD",
            Timing::from_millis(500, 0, 500),
            &CTD_SPECS[..],
            port,
            delay,
            address,
        );
        sensor.kind = Kind::DecagonCtd;
        sensor
    }

    /// Decagon 5TM soil moisture probe. The water content is derived from
    /// the permittivity.
    pub fn five_tm(port: S, delay: D, address: char) -> Self {
        let mut sensor = Self::generic(
            "Decagon5TM",
            Timing::from_millis(200, 0, 200),
            &FIVE_TM_SPECS[..],
            port,
            delay,
            address,
        );
        sensor.kind = Kind::FiveTm;
        sensor
    }

    /// Decagon ES-2 conductivity and temperature.
    pub fn es2(port: S, delay: D, address: char) -> Self {
        let mut sensor = Self::generic(
            "DecagonES2",
            Timing::from_millis(250, 0, 250),
            &ES2_SPECS[..],
            port,
            delay,
            address,
        );
        sensor.kind = Kind::Es2;
        sensor
    }

    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(SensorCore) -> SensorCore) -> Self {
        self.core = f(self.core);
        self
    }

    /// Known after a successful setup.
    pub fn info(&self) -> Option<&Sdi12Info> {
        self.info.as_ref()
    }

    #[instrument(level = "trace", skip(self))]
    fn query(&mut self, command: &str) -> Result<String, Error> {
        let mut frame: heapless::String<8> = heapless::String::new();
        frame.push(self.address).ok();
        frame.push_str(command).map_err(|()| Error::parse(command))?;
        self.port.write_all(frame.as_bytes()).map_err(io_err)?;
        self.port.flush().map_err(io_err)?;

        let mut line = Line::new();
        if !read_line(&mut self.port, b'\n', &mut line)? {
            trace!("no answer");
            return Ok(String::new());
        }
        let answer = core::str::from_utf8(&line)
            .map_err(Error::parse)?
            .trim_end_matches('\r')
            .to_owned();
        trace!("answer: {answer:?}");
        Ok(answer)
    }

    /// `a!`, the sensor answers with just its address.
    fn acknowledged(&mut self) -> Result<bool, Error> {
        for attempt in 1..=ACK_ATTEMPTS {
            let answer = self.query("!")?;
            if answer.starts_with(self.address) {
                return Ok(true);
            }
            debug!("{}: no acknowledgement, attempt {attempt}", self.location());
            self.delay.delay_ms(30);
        }
        Ok(false)
    }

    fn post_process(&self, mut values: Vec<Option<f32>>) -> Vec<Option<f32>> {
        values.resize(self.core.num_values(), None);
        if self.kind == Kind::FiveTm {
            let ea = values[0].filter(|ea| (0.0..=350.0).contains(ea));
            values[0] = ea;
            values[2] = ea.map(topp_vwc);
        }
        values
    }
}

impl<S: Read + Write, D: DelayNs> Sensor for Sdi12Sensor<S, D> {
    fn core(&self) -> &SensorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    fn location(&self) -> String {
        format!("SDI12-{}", self.address)
    }

    fn variable_specs(&self) -> &[VariableSpec] {
        &self.specs
    }

    fn setup(&mut self, _now: Instant) -> Result<(), Error> {
        let info = match self.acknowledged() {
            Ok(true) => self.query("I!").and_then(|answer| Sdi12Info::parse(&answer)),
            Ok(false) => Err(Error::NoResponse),
            Err(e) => Err(e),
        };
        match info {
            Ok(info) => {
                debug!(
                    "{}: {} {} version {} serial {}",
                    self.location(),
                    info.vendor,
                    info.model,
                    info.sensor_version,
                    info.serial_number
                );
                self.info = Some(info);
                self.core.mark_setup();
                Ok(())
            }
            Err(e) => {
                self.core.setup_failed();
                Err(Error::Setup(make_error_string(e)))
            }
        }
    }

    fn wake(&mut self, now: Instant) -> Result<(), Error> {
        self.core.wake(now)?;
        match self.acknowledged() {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.core.wake_failed();
                Err(Error::NoResponse)
            }
            Err(e) => {
                self.core.wake_failed();
                Err(e)
            }
        }
    }

    fn start_single_measurement(&mut self, now: Instant) -> Result<(), Error> {
        self.core.start_measurement(now)?;
        match self.query("C!") {
            Ok(answer) if !answer.is_empty() => {
                // atttnn: seconds until ready and number of values
                trace!("{}: measurement started: {answer}", self.location());
                Ok(())
            }
            Ok(_) => {
                self.core.measurement_failed_to_start();
                Err(Error::NoResponse)
            }
            Err(e) => {
                self.core.measurement_failed_to_start();
                Err(e)
            }
        }
    }

    fn collect(&mut self, _now: Instant) -> Result<Vec<Option<f32>>, Error> {
        let answer = self.query("D0!")?;
        let Some(values) = answer.strip_prefix(self.address) else {
            return Err(Error::NoResponse);
        };
        Ok(self.post_process(parse_values(values)))
    }
}

#[cfg(test)]
mod tests {
    use sensor_base::{Clock, ManualClock, Status};

    use super::*;
    use crate::bus::mock::{MockSerial, NoDelay};

    #[test]
    fn values_split_on_sign() {
        assert_eq!(
            parse_values("+1.23-4.5+6"),
            vec![Some(1.23), Some(-4.5), Some(6.0)]
        );
        assert_eq!(parse_values("+1-9999+abc"), vec![Some(1.0), None, None]);
        assert!(parse_values("").is_empty());
    }

    #[test]
    fn exponent_signs_stay_with_their_value() {
        assert_eq!(
            parse_values("0+1.2e-3-4E+2+5"),
            vec![Some(1.2e-3), Some(-400.0), Some(5.0)]
        );
    }

    #[test]
    fn info_fields() {
        let info = Sdi12Info::parse("113DECAGON CTD-10400 S/N12345").unwrap();
        assert_eq!(info.sdi12_version, "13");
        assert_eq!(info.vendor, "DECAGON");
        assert_eq!(info.model, "CTD-10");
        assert_eq!(info.sensor_version, "400");
        assert_eq!(info.serial_number, "S/N12345");
        assert!(Sdi12Info::parse("113DEC").is_err());
    }

    #[test]
    fn ctd_cycle() {
        logger::setup_for_tests();
        let port = MockSerial::default()
            .reply(b"1\r\n")
            .reply(b"113DECAGON CTD-10400\r\n")
            .reply(b"1\r\n")
            .reply(b"10013\r\n")
            .reply(b"1+123.4+18.25+301\r\n");
        let mut ctd = Sdi12Sensor::decagon_ctd(port, NoDelay, '1');
        let clock = ManualClock::starting_at(0);

        ctd.setup(clock.now()).unwrap();
        assert_eq!(ctd.info().unwrap().model, "CTD-10");
        ctd.update(&clock).unwrap();

        assert_eq!(
            ctd.core().values(),
            &[Some(123.4), Some(18.25), Some(301.0)]
        );
        assert_eq!(ctd.port.commands(), "1!1I!1!1C!1D0!");
    }

    #[test]
    fn five_tm_derives_water_content() {
        let port = MockSerial::default().reply(b"3+25.0+21.5\r\n");
        let mut soil = Sdi12Sensor::five_tm(port, NoDelay, '3');
        let values = soil.collect(Instant::from_millis(0)).unwrap();
        assert_eq!(values[0], Some(25.0));
        assert_eq!(values[1], Some(21.5));
        let vwc = values[2].unwrap();
        assert!((vwc - topp_vwc(25.0)).abs() < 1e-4);
        assert!((30.0..50.0).contains(&vwc), "{vwc}");
    }

    #[test]
    fn silent_sensor_fails_setup_and_wake() {
        let mut es2 = Sdi12Sensor::es2(MockSerial::default(), NoDelay, '0');
        let now = Instant::from_millis(0);
        assert!(matches!(es2.setup(now), Err(Error::Setup(_))));
        assert_eq!(es2.port.commands(), "0!".repeat(ACK_ATTEMPTS));

        es2.power_up(now).unwrap();
        assert_eq!(es2.wake(now), Err(Error::NoResponse));
        assert!(!es2.core().status().contains(Status::AWAKE));
        assert!(es2.core().status().contains(Status::ERROR));
    }

    #[test]
    fn empty_start_answer_fails_to_start() {
        let port = MockSerial::default().reply(b"0\r\n");
        let mut es2 = Sdi12Sensor::es2(port, NoDelay, '0');
        let now = Instant::from_millis(0);
        es2.power_up(now).unwrap();
        es2.wake(now).unwrap();
        assert_eq!(es2.start_single_measurement(now), Err(Error::NoResponse));
        assert!(!es2.core().status().contains(Status::MEASUREMENT_STARTED));
    }
}
