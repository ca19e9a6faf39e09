use std::borrow::Cow;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::clock::{Clock, Instant};
use crate::error::{make_error_string, Error};
use crate::power::PowerPin;
use crate::status::Status;
use crate::variable::VariableSpec;

/// Value some sensors send and many loggers store to mean "no data".
pub const BAD_VALUE: f32 = -9999.0;

/// `None`, NaN and [`BAD_VALUE`] are all treated as a failed reading.
#[must_use]
pub fn verified(value: Option<f32>) -> Option<f32> {
    value.filter(|v| !v.is_nan() && *v != BAD_VALUE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timing {
    /// Time after power-up before the sensor can be woken.
    pub warm_up: Duration,
    /// Time after waking before readings are stable.
    pub stabilization: Duration,
    /// Time between requesting and collecting a reading.
    pub measurement: Duration,
}

impl Timing {
    pub const NONE: Self = Self::from_millis(0, 0, 0);

    #[must_use]
    pub const fn from_millis(warm_up: u64, stabilization: u64, measurement: u64) -> Self {
        Self {
            warm_up: Duration::from_millis(warm_up),
            stabilization: Duration::from_millis(stabilization),
            measurement: Duration::from_millis(measurement),
        }
    }
}

/// Where a sensor is in its lifecycle, derived from the status bits and
/// the timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unpowered,
    WarmingUp,
    WarmedUp,
    Stabilizing,
    Stable,
    Measuring,
    MeasurementComplete,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f32,
    good: u16,
}

/// State every sensor carries: status bits, timestamps and the running
/// averages. Drivers embed one and expose it through [`Sensor::core`].
#[derive(Debug)]
pub struct SensorCore {
    name: Cow<'static, str>,
    num_values: usize,
    timing: Timing,
    power: Option<PowerPin>,
    measurements_to_average: u8,
    allowed_retries: u8,

    status: Status,
    powered_at: Option<Instant>,
    activated_at: Option<Instant>,
    requested_at: Option<Instant>,

    accumulators: Vec<Accumulator>,
    averaged: Vec<Option<f32>>,
    measurements_completed: u8,
    retries_made: u8,
}

fn elapsed_over(since: Option<Instant>, now: Instant, limit: Duration) -> bool {
    since.is_none_or(|t| now.duration_since(t) > limit)
}

fn remaining(since: Option<Instant>, now: Instant, limit: Duration) -> Option<Duration> {
    let since = since?;
    let elapsed = now.duration_since(since);
    (elapsed <= limit).then(|| limit - elapsed + Duration::from_millis(1))
}

impl SensorCore {
    pub fn new(name: impl Into<Cow<'static, str>>, num_values: usize, timing: Timing) -> Self {
        Self {
            name: name.into(),
            num_values,
            timing,
            power: None,
            measurements_to_average: 1,
            allowed_retries: 0,
            status: Status::new(),
            powered_at: None,
            activated_at: None,
            requested_at: None,
            accumulators: vec![Accumulator::default(); num_values],
            averaged: vec![None; num_values],
            measurements_completed: 0,
            retries_made: 0,
        }
    }

    #[must_use]
    pub fn with_power(mut self, pin: PowerPin) -> Self {
        self.power = Some(pin);
        self
    }

    #[must_use]
    pub fn with_measurements_to_average(mut self, n: u8) -> Self {
        self.set_measurements_to_average(n);
        self
    }

    #[must_use]
    pub fn with_retries(mut self, allowed: u8) -> Self {
        self.allowed_retries = allowed;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_values(&self) -> usize {
        self.num_values
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn power_pin(&self) -> Option<&PowerPin> {
        self.power.as_ref()
    }

    pub fn measurements_to_average(&self) -> u8 {
        self.measurements_to_average
    }

    /// Zero is raised to one, a sensor always takes at least one reading.
    pub fn set_measurements_to_average(&mut self, n: u8) {
        self.measurements_to_average = n.max(1);
    }

    pub fn allowed_retries(&self) -> u8 {
        self.allowed_retries
    }

    pub fn measurements_completed(&self) -> u8 {
        self.measurements_completed
    }

    pub fn measurements_remaining(&self) -> u8 {
        self.measurements_to_average
            .saturating_sub(self.measurements_completed)
    }

    /// Averaged values from the last completed update.
    pub fn values(&self) -> &[Option<f32>] {
        &self.averaged
    }

    pub fn set(&mut self, flags: Status) {
        self.status.insert(flags);
    }

    pub fn clear(&mut self, flags: Status) {
        self.status.remove(flags);
    }

    pub fn mark_setup(&mut self) {
        self.status.insert(Status::SETUP);
    }

    pub fn setup_failed(&mut self) {
        self.status.remove(Status::SETUP);
        self.status.insert(Status::ERROR);
    }

    pub fn power_up(&mut self, now: Instant) -> Result<(), Error> {
        self.status.insert(Status::POWER_ATTEMPTED);
        if let Some(pin) = &self.power {
            let was_on = pin.is_on().and_then(|on| {
                if !on {
                    pin.set_on(true)?;
                }
                Ok(on)
            });
            match was_on {
                Ok(false) => self.powered_at = Some(now),
                Ok(true) => {
                    self.powered_at.get_or_insert(now);
                }
                Err(e) => {
                    self.status.remove(Status::POWERED);
                    self.status.insert(Status::ERROR);
                    return Err(Error::PowerSwitch(e));
                }
            }
        }
        self.status.insert(Status::POWERED);
        Ok(())
    }

    /// Without a power pin the sensor is never really switched off, then
    /// nothing changes.
    pub fn power_down(&mut self) -> Result<(), Error> {
        let Some(pin) = &self.power else {
            return Ok(());
        };
        if let Err(e) = pin.set_on(false) {
            self.status.insert(Status::ERROR);
            return Err(Error::PowerSwitch(e));
        }
        self.lost_power();
        Ok(())
    }

    fn lost_power(&mut self) {
        self.powered_at = None;
        self.activated_at = None;
        self.requested_at = None;
        self.status &= Status::KEPT_WITHOUT_POWER;
    }

    /// Syncs the status bits with the actual state of the power switch.
    pub fn check_power_on(&mut self, now: Instant) -> Result<bool, Error> {
        if let Some(pin) = &self.power {
            let on = pin.is_on().map_err(Error::PowerSwitch)?;
            if !on {
                self.lost_power();
                return Ok(false);
            }
            self.powered_at.get_or_insert(now);
        }
        self.status.insert(Status::POWER);
        Ok(true)
    }

    pub fn is_warmed_up(&self, now: Instant) -> bool {
        !self.status.contains(Status::POWERED)
            || elapsed_over(self.powered_at, now, self.timing.warm_up)
    }

    pub fn warm_up_remaining(&self, now: Instant) -> Option<Duration> {
        if !self.status.contains(Status::POWERED) {
            return None;
        }
        remaining(self.powered_at, now, self.timing.warm_up)
    }

    pub fn wake(&mut self, now: Instant) -> Result<(), Error> {
        self.status.insert(Status::WAKE_ATTEMPTED);
        if !self.status.contains(Status::POWERED) {
            self.activated_at = None;
            self.status.remove(Status::AWAKE);
            return Err(Error::NotPowered);
        }
        self.activated_at = Some(now);
        self.status.insert(Status::AWAKE);
        Ok(())
    }

    /// For drivers whose wake command failed after [`SensorCore::wake`]
    /// succeeded.
    pub fn wake_failed(&mut self) {
        self.activated_at = None;
        self.status.remove(Status::AWAKE);
        self.status.insert(Status::ERROR);
    }

    pub fn is_stable(&self, now: Instant) -> bool {
        !self.status.contains(Status::AWAKE)
            || elapsed_over(self.activated_at, now, self.timing.stabilization)
    }

    pub fn stabilization_remaining(&self, now: Instant) -> Option<Duration> {
        if !self.status.contains(Status::AWAKE) {
            return None;
        }
        remaining(self.activated_at, now, self.timing.stabilization)
    }

    pub fn start_measurement(&mut self, now: Instant) -> Result<(), Error> {
        self.status.insert(Status::MEASUREMENT_ATTEMPTED);
        if !self.status.contains(Status::AWAKE) {
            self.status.remove(Status::MEASUREMENT_STARTED);
            return Err(Error::NotAwake);
        }
        self.requested_at = Some(now);
        self.status.insert(Status::MEASUREMENT_STARTED);
        Ok(())
    }

    pub fn measurement_failed_to_start(&mut self) {
        self.requested_at = None;
        self.status.remove(Status::MEASUREMENT_STARTED);
        self.status.insert(Status::ERROR);
    }

    pub fn is_measurement_complete(&self, now: Instant) -> bool {
        !self.status.contains(Status::MEASUREMENT_STARTED)
            || elapsed_over(self.requested_at, now, self.timing.measurement)
    }

    pub fn measurement_remaining(&self, now: Instant) -> Option<Duration> {
        if !self.status.contains(Status::MEASUREMENT_STARTED) {
            return None;
        }
        remaining(self.requested_at, now, self.timing.measurement)
    }

    pub fn sleep(&mut self) {
        self.activated_at = None;
        self.requested_at = None;
        self.status.remove(Status::ACTIVATION);
    }

    /// Adds one value to the running sum if it passes [`verified`]. Returns
    /// whether it was used.
    pub fn verify_and_add(&mut self, index: usize, value: Option<f32>) -> bool {
        let Some(acc) = self.accumulators.get_mut(index) else {
            warn!("value index {index} out of range for {}", self.name);
            return false;
        };
        match verified(value) {
            Some(v) => {
                acc.sum += v;
                acc.good += 1;
                true
            }
            None => false,
        }
    }

    pub fn record(&mut self, values: &[Option<f32>]) {
        for (index, value) in values.iter().copied().enumerate() {
            self.verify_and_add(index, value);
        }
    }

    /// Counts a finished attempt. A failed attempt is retried as long as the
    /// allowed retries are not used up, it then counts as completed.
    pub fn finish_measurement(&mut self, success: bool) {
        self.requested_at = None;
        self.status.remove(Status::MEASUREMENT);
        if success || self.retries_made >= self.allowed_retries {
            self.measurements_completed = self.measurements_completed.saturating_add(1);
            self.retries_made = 0;
        } else {
            self.retries_made += 1;
            debug!(
                "{}: retrying measurement ({}/{})",
                self.name, self.retries_made, self.allowed_retries
            );
        }
    }

    pub fn clear_values(&mut self) {
        self.accumulators.fill(Accumulator::default());
        self.averaged.fill(None);
        self.measurements_completed = 0;
        self.retries_made = 0;
    }

    pub fn average(&mut self) {
        for (avg, acc) in self.averaged.iter_mut().zip(&self.accumulators) {
            *avg = (acc.good > 0).then(|| acc.sum / f32::from(acc.good));
        }
    }

    pub fn phase(&self, now: Instant) -> Phase {
        if !self.status.contains(Status::POWERED) {
            Phase::Unpowered
        } else if !self.status.contains(Status::AWAKE) {
            if self.is_warmed_up(now) {
                Phase::WarmedUp
            } else {
                Phase::WarmingUp
            }
        } else if !self.status.contains(Status::MEASUREMENT_STARTED) {
            if self.is_stable(now) {
                Phase::Stable
            } else {
                Phase::Stabilizing
            }
        } else if self.is_measurement_complete(now) {
            Phase::MeasurementComplete
        } else {
            Phase::Measuring
        }
    }
}

/// Wait until `remaining` reports nothing left.
pub(crate) fn wait_for(clock: &dyn Clock, remaining: impl Fn(Instant) -> Option<Duration>) {
    while let Some(left) = remaining(clock.now()) {
        trace!("waiting {left:?}");
        clock.wait(left);
    }
}

/// A physical measuring device. The lifecycle methods have default
/// implementations operating on the [`SensorCore`]; drivers override the
/// ones where they need to talk to the hardware and call the core version
/// first.
pub trait Sensor {
    fn core(&self) -> &SensorCore;
    fn core_mut(&mut self) -> &mut SensorCore;

    /// Where the sensor is attached, for example `I2C_0x61`.
    fn location(&self) -> String;

    fn variable_specs(&self) -> &[VariableSpec];

    fn name_and_location(&self) -> String {
        format!("{} at {}", self.core().name(), self.location())
    }

    fn setup(&mut self, _now: Instant) -> Result<(), Error> {
        self.core_mut().mark_setup();
        Ok(())
    }

    fn power_up(&mut self, now: Instant) -> Result<(), Error> {
        self.core_mut().power_up(now)
    }

    fn power_down(&mut self) -> Result<(), Error> {
        self.core_mut().power_down()
    }

    fn wake(&mut self, now: Instant) -> Result<(), Error> {
        self.core_mut().wake(now)
    }

    fn sleep(&mut self, _now: Instant) -> Result<(), Error> {
        self.core_mut().sleep();
        Ok(())
    }

    fn start_single_measurement(&mut self, now: Instant) -> Result<(), Error> {
        self.core_mut().start_measurement(now)
    }

    /// Read the result of a started measurement. Values that are missing
    /// or bad are `None`, the order follows [`Sensor::variable_specs`].
    fn collect(&mut self, now: Instant) -> Result<Vec<Option<f32>>, Error>;

    fn add_single_measurement_result(&mut self, now: Instant) -> Result<(), Error> {
        let result = if self.core().status().contains(Status::MEASUREMENT_STARTED) {
            self.collect(now)
        } else {
            Err(Error::NotMeasuring)
        };

        let core = self.core_mut();
        if let Ok(values) = &result {
            core.record(values);
        }
        core.finish_measurement(result.is_ok());
        result.map(|_| ())
    }

    /// Takes a complete averaged reading from just this sensor, then returns
    /// it to the power and activity state it was in before.
    fn update(&mut self, clock: &dyn Clock) -> Result<(), Error> {
        let was_on = self.core_mut().check_power_on(clock.now())?;
        if !was_on {
            self.power_up(clock.now())?;
        }

        let was_active = self.core().status().contains(Status::AWAKE);
        if !was_active {
            wait_for(clock, |now| self.core().warm_up_remaining(now));
            if let Err(e) = self.wake(clock.now()) {
                if !was_on {
                    self.power_down()?;
                }
                return Err(e);
            }
        }

        self.core_mut().clear_values();
        wait_for(clock, |now| self.core().stabilization_remaining(now));

        while self.core().measurements_remaining() > 0 {
            if let Err(e) = self.start_single_measurement(clock.now()) {
                warn!("{}: could not start measurement: {e}", self.name_and_location());
            }
            wait_for(clock, |now| self.core().measurement_remaining(now));
            match self.add_single_measurement_result(clock.now()) {
                Ok(()) | Err(Error::NotMeasuring) => (),
                Err(e) => warn!("{}: measurement failed: {e}", self.name_and_location()),
            }
        }
        self.core_mut().average();
        debug!(
            "{} values: {:?}",
            self.name_and_location(),
            self.core().values()
        );

        if !was_active {
            self.sleep(clock.now())?;
        }
        if !was_on {
            self.power_down()?;
        }
        Ok(())
    }
}

/// Parse helper for drivers receiving ASCII numbers.
pub fn parse_value(text: &str) -> Result<f32, Error> {
    text.trim()
        .parse::<f32>()
        .map_err(|e| Error::Parse(make_error_string((text, e))))
}
