use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_io::Read;
use sensor_base::{make_error_string, Error, Instant, Sensor, SensorCore, Timing, VariableSpec};
use tracing::{debug, warn};

use crate::bus::read_line;

/// Lines the sonar prints after power up, before the first range.
const HEADER_LINES: usize = 6;
const MAX_ATTEMPTS: usize = 25;

const SPECS: [VariableSpec; 1] = [VariableSpec::new(0, "distance", "millimeter", 0, "SonarRange")];

/// Out of range, too close or an echo the sonar itself flags as unreliable.
fn suspicious(range_mm: u32) -> bool {
    range_mm <= 300 || matches!(range_mm, 500 | 4999 | 9999)
}

/// Pin type for a sonar without a trigger line, it ranges continuously.
pub struct NoTrigger;

impl embedded_hal::digital::ErrorType for NoTrigger {
    type Error = core::convert::Infallible;
}

impl OutputPin for NoTrigger {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// MaxBotix HRXL MaxSonar reporting ranges as `R<mm>\r` over TTL serial.
pub struct MaxBotixSonar<S, P, D> {
    core: SensorCore,
    port: S,
    trigger: Option<P>,
    delay: D,
    label: String,
}

impl<S: Read, D: DelayNs> MaxBotixSonar<S, NoTrigger, D> {
    pub fn new(port: S, delay: D, label: impl Into<String>) -> Self {
        MaxBotixSonar::with_trigger(port, None, delay, label)
    }
}

impl<S: Read, P: OutputPin, D: DelayNs> MaxBotixSonar<S, P, D> {
    pub fn with_trigger(
        port: S,
        trigger: Option<P>,
        delay: D,
        label: impl Into<String>,
    ) -> Self {
        Self {
            core: SensorCore::new(
                "MaxBotixMaxSonar",
                SPECS.len(),
                Timing::from_millis(160, 0, 166),
            ),
            port,
            trigger,
            delay,
            label: label.into(),
        }
    }

    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(SensorCore) -> SensorCore) -> Self {
        self.core = f(self.core);
        self
    }

    fn trigger(&mut self) -> Result<(), Error> {
        let Some(pin) = &mut self.trigger else {
            return Ok(());
        };
        pin.set_high().map_err(|e| Error::Bus(make_error_string(e)))?;
        self.delay.delay_us(30);
        pin.set_low().map_err(|e| Error::Bus(make_error_string(e)))
    }
}

impl<S: Read, P: OutputPin, D: DelayNs> Sensor for MaxBotixSonar<S, P, D> {
    fn core(&self) -> &SensorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    fn location(&self) -> String {
        format!("sonarSerial_{}", self.label)
    }

    fn variable_specs(&self) -> &[VariableSpec] {
        &SPECS
    }

    fn wake(&mut self, now: Instant) -> Result<(), Error> {
        self.core.wake(now)?;
        let mut line: heapless::Vec<u8, 64> = heapless::Vec::new();
        for _ in 0..HEADER_LINES {
            match read_line(&mut self.port, b'\r', &mut line) {
                Ok(true) => debug!("{}: {}", self.location(), String::from_utf8_lossy(&line)),
                Ok(false) => break,
                Err(e) => {
                    self.core.wake_failed();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn collect(&mut self, _now: Instant) -> Result<Vec<Option<f32>>, Error> {
        let mut line: heapless::Vec<u8, 16> = heapless::Vec::new();
        for attempt in 1..=MAX_ATTEMPTS {
            self.trigger()?;
            if !read_line(&mut self.port, b'\r', &mut line)? {
                debug!("{}: no range, attempt {attempt}", self.location());
                continue;
            }
            let range = line
                .strip_prefix(b"R")
                .and_then(|digits| core::str::from_utf8(digits).ok())
                .and_then(|digits| digits.trim().parse::<u32>().ok());
            match range {
                #[allow(clippy::cast_precision_loss)] // ranges are at most 5 digits
                Some(mm) if !suspicious(mm) => return Ok(vec![Some(mm as f32)]),
                Some(mm) => debug!("{}: suspicious range {mm}", self.location()),
                None => warn!(
                    "{}: could not parse {:?}",
                    self.location(),
                    String::from_utf8_lossy(&line)
                ),
            }
        }
        Ok(vec![None])
    }
}

#[cfg(test)]
mod tests {
    use sensor_base::ManualClock;

    use super::*;
    use crate::bus::mock::{MockSerial, NoDelay};

    #[test]
    fn wake_discards_header_then_ranges() {
        let header = b"HRXL-MaxSonar-WRL\rPN:MB7386\rCopyright 2011-2013\r\
            MaxBotix Inc.\rRoHS 1.8b090  0713\rTempI\r";
        let port = MockSerial::default()
            .preload(header)
            .preload(b"R0000\rR9999\rR1234\r");
        let mut sonar = MaxBotixSonar::new(port, NoDelay, "1");

        sonar.update(&ManualClock::starting_at(0)).unwrap();

        assert_eq!(sonar.core().values(), &[Some(1234.0)]);
        assert_eq!(sonar.location(), "sonarSerial_1");
    }

    #[test]
    fn gives_up_after_too_many_attempts() {
        let mut port = MockSerial::default();
        for _ in 0..MAX_ATTEMPTS {
            port = port.preload(b"R0500\r");
        }
        port = port.preload(b"R2000\r");
        let mut sonar = MaxBotixSonar::new(port, NoDelay, "1");
        let values = sonar.collect(Instant::from_millis(0)).unwrap();
        assert_eq!(values, vec![None]);
        assert_eq!(sonar.port.rx.len(), b"R2000\r".len());
    }

    #[test]
    fn suspicious_ranges() {
        for mm in [0, 300, 500, 4999, 9999] {
            assert!(suspicious(mm), "{mm}");
        }
        assert!(!suspicious(301));
        assert!(!suspicious(5000));
    }
}
