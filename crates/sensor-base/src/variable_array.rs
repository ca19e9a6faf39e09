use std::fmt;
use std::io;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, Instant};
use crate::error::Error;
use crate::sensor::Sensor;
use crate::status::Status;
use crate::variable::{Lookup, Source, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    PowerUp,
    Wake,
    StartMeasurement,
    Result,
    Sleep,
    PowerDown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Stage::Setup => "setup",
            Stage::PowerUp => "power up",
            Stage::Wake => "wake",
            Stage::StartMeasurement => "start measurement",
            Stage::Result => "measurement result",
            Stage::Sleep => "sleep",
            Stage::PowerDown => "power down",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub sensor: SensorId,
    pub sensor_name: String,
    pub stage: Stage,
    pub error: Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed to {}: {}", self.sensor_name, self.stage, self.error)
    }
}

/// Everything that went wrong during a batch operation. A failing sensor
/// never stops the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub failures: Vec<Failure>,
}

impl UpdateReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn check(&mut self, id: SensorId, sensor: &dyn Sensor, stage: Stage, res: Result<(), Error>) {
        if let Err(error) = res {
            let sensor_name = sensor.name_and_location();
            warn!("{sensor_name} failed to {stage}: {error}");
            self.failures.push(Failure {
                sensor: id,
                sensor_name,
                stage,
                error,
            });
        }
    }

    fn merge(&mut self, other: UpdateReport) {
        self.failures.extend(other.failures);
    }
}

/// Where a sensor is within [`VariableArray::complete_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Measuring,
    Done,
    PoweredDown,
}

/// Owns the sensors and the variables fed by them. Drives them through
/// their lifecycle together, so that one sensor can warm up while another
/// is measuring.
#[derive(Default)]
pub struct VariableArray {
    sensors: Vec<Box<dyn Sensor>>,
    variables: Vec<Variable>,
}

impl fmt::Debug for VariableArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sensors: Vec<_> = self.sensors.iter().map(|s| s.name_and_location()).collect();
        f.debug_struct("VariableArray")
            .field("sensors", &sensors)
            .field("variables", &self.variables)
            .finish()
    }
}

impl VariableArray {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sensor(&mut self, sensor: impl Sensor + 'static) -> SensorId {
        self.add_boxed_sensor(Box::new(sensor))
    }

    pub fn add_boxed_sensor(&mut self, sensor: Box<dyn Sensor>) -> SensorId {
        self.sensors.push(sensor);
        SensorId(self.sensors.len() - 1)
    }

    pub fn add_variable(&mut self, variable: Variable) -> Result<VariableId, Error> {
        if let Some((id, index)) = variable.parent() {
            let sensor = self.sensor(id)?;
            let available = sensor.core().num_values();
            if index >= available {
                return Err(Error::NoSuchValue { index, available });
            }
        }
        self.variables.push(variable);
        Ok(VariableId(self.variables.len() - 1))
    }

    /// Adds a variable for every value the sensor measures.
    pub fn add_all_variables(&mut self, id: SensorId) -> Result<Vec<VariableId>, Error> {
        let specs = self.sensor(id)?.variable_specs().to_vec();
        specs
            .iter()
            .map(|spec| self.add_variable(Variable::from_sensor(id, spec)))
            .collect()
    }

    pub fn sensor(&self, id: SensorId) -> Result<&dyn Sensor, Error> {
        self.sensors
            .get(id.0)
            .map(|s| s.as_ref())
            .ok_or(Error::UnknownSensor(id.0))
    }

    pub fn sensor_mut(&mut self, id: SensorId) -> Result<&mut (dyn Sensor + 'static), Error> {
        self.sensors
            .get_mut(id.0)
            .map(|s| s.as_mut())
            .ok_or(Error::UnknownSensor(id.0))
    }

    pub fn variable(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.0)
    }

    pub fn variable_mut(&mut self, id: VariableId) -> Option<&mut Variable> {
        self.variables.get_mut(id.0)
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn calculated_variable_count(&self) -> usize {
        self.variables.iter().filter(|v| v.is_calculated()).count()
    }

    pub fn max_measurements_to_average(&self) -> u8 {
        self.sensors
            .iter()
            .map(|s| s.core().measurements_to_average())
            .max()
            .unwrap_or(0)
    }

    fn ids(&self) -> impl Iterator<Item = SensorId> {
        (0..self.sensors.len()).map(SensorId)
    }

    /// Sets up every sensor not set up yet. A sensor only gets one attempt.
    #[instrument(skip_all)]
    pub fn setup_sensors(&mut self, clock: &dyn Clock) -> UpdateReport {
        let mut report = UpdateReport::default();
        let mut pending: Vec<_> = self
            .ids()
            .filter(|id| !self.sensors[id.0].core().status().contains(Status::SETUP))
            .collect();

        while !pending.is_empty() {
            let now = clock.now();
            let before = pending.len();
            pending.retain(|&id| {
                let sensor = &mut self.sensors[id.0];
                if !sensor.core().is_warmed_up(now) {
                    return true;
                }
                let res = sensor.setup(now);
                report.check(id, sensor.as_ref(), Stage::Setup, res);
                false
            });
            if pending.len() == before {
                let deadline = pending
                    .iter()
                    .filter_map(|id| self.sensors[id.0].core().warm_up_remaining(now))
                    .min();
                wait_for_deadline(clock, now, deadline);
            }
        }
        report
    }

    pub fn sensors_power_up(&mut self, now: Instant) -> UpdateReport {
        let mut report = UpdateReport::default();
        for (id, sensor) in self.sensors.iter_mut().enumerate() {
            let res = sensor.power_up(now);
            report.check(SensorId(id), sensor.as_ref(), Stage::PowerUp, res);
        }
        report
    }

    /// Wakes every sensor that was not woken yet, each as soon as it is warmed
    /// up.
    #[instrument(skip_all)]
    pub fn sensors_wake(&mut self, clock: &dyn Clock) -> UpdateReport {
        let mut report = UpdateReport::default();
        let mut pending: Vec<_> = self
            .ids()
            .filter(|id| {
                !self.sensors[id.0]
                    .core()
                    .status()
                    .contains(Status::WAKE_ATTEMPTED)
            })
            .collect();

        while !pending.is_empty() {
            let now = clock.now();
            let before = pending.len();
            pending.retain(|&id| {
                let sensor = &mut self.sensors[id.0];
                if !sensor.core().is_warmed_up(now) {
                    return true;
                }
                let res = sensor.wake(now);
                report.check(id, sensor.as_ref(), Stage::Wake, res);
                false
            });
            if pending.len() == before {
                let deadline = pending
                    .iter()
                    .filter_map(|id| self.sensors[id.0].core().warm_up_remaining(now))
                    .min();
                wait_for_deadline(clock, now, deadline);
            }
        }
        report
    }

    pub fn sensors_sleep(&mut self, now: Instant) -> UpdateReport {
        let mut report = UpdateReport::default();
        for (id, sensor) in self.sensors.iter_mut().enumerate() {
            let res = sensor.sleep(now);
            report.check(SensorId(id), sensor.as_ref(), Stage::Sleep, res);
        }
        report
    }

    pub fn sensors_power_down(&mut self) -> UpdateReport {
        let mut report = UpdateReport::default();
        for (id, sensor) in self.sensors.iter_mut().enumerate() {
            let res = sensor.power_down();
            report.check(SensorId(id), sensor.as_ref(), Stage::PowerDown, res);
        }
        report
    }

    /// Measures all sensors that are already awake, the caller handles power
    /// and waking. Sensors that are not awake end up without values.
    #[instrument(skip_all)]
    pub fn update_all_sensors(&mut self, clock: &dyn Clock) -> UpdateReport {
        let mut report = UpdateReport::default();
        for sensor in &mut self.sensors {
            sensor.core_mut().clear_values();
        }
        let mut pending: Vec<_> = self
            .ids()
            .filter(|id| self.sensors[id.0].core().status().contains(Status::AWAKE))
            .collect();

        while !pending.is_empty() {
            let now = clock.now();
            let mut progress = false;
            pending.retain(|&id| {
                let sensor = self.sensors[id.0].as_mut();
                progress |= measure_step(id, sensor, now, &mut report);
                sensor.core().measurements_remaining() > 0
            });
            if !progress {
                let deadline = pending
                    .iter()
                    .filter_map(|id| next_deadline(self.sensors[id.0].as_ref(), now))
                    .min();
                wait_for_deadline(clock, now, deadline);
            }
        }

        self.publish();
        report
    }

    /// One full logging cycle: power up, wake, measure, sleep and power down
    /// every sensor, then average and publish. A power switch is only turned
    /// off once every sensor sharing it is done.
    #[instrument(skip_all)]
    pub fn complete_update(&mut self, clock: &dyn Clock) -> UpdateReport {
        let mut report = UpdateReport::default();
        for sensor in &mut self.sensors {
            sensor.core_mut().clear_values();
        }
        report.merge(self.sensors_power_up(clock.now()));

        let mut progress_of = vec![Progress::Measuring; self.sensors.len()];
        while progress_of.iter().any(|p| *p != Progress::PoweredDown) {
            let now = clock.now();
            let mut progress = false;

            for (i, state) in progress_of.iter_mut().enumerate() {
                if *state != Progress::Measuring {
                    continue;
                }
                let id = SensorId(i);
                let sensor = self.sensors[i].as_mut();
                let status = sensor.core().status();

                if !status.contains(Status::WAKE_ATTEMPTED) {
                    if sensor.core().is_warmed_up(now) {
                        let res = sensor.wake(now);
                        report.check(id, sensor, Stage::Wake, res);
                        progress = true;
                    }
                    continue;
                }

                if status.contains(Status::AWAKE) {
                    progress |= measure_step(id, sensor, now, &mut report);
                    if sensor.core().measurements_remaining() > 0 {
                        continue;
                    }
                    let res = sensor.sleep(now);
                    report.check(id, sensor, Stage::Sleep, res);
                } else {
                    debug!(
                        "{} did not wake, skipping its measurements",
                        sensor.name_and_location()
                    );
                    // without a power pin nothing else clears the wake
                    // attempt, the next cycle must try again
                    sensor.core_mut().sleep();
                }
                *state = Progress::Done;
                progress = true;
            }

            for i in 0..self.sensors.len() {
                if progress_of[i] != Progress::Done || !self.power_group_done(i, &progress_of) {
                    continue;
                }
                let sensor = self.sensors[i].as_mut();
                let res = sensor.power_down();
                report.check(SensorId(i), sensor, Stage::PowerDown, res);
                progress_of[i] = Progress::PoweredDown;
                progress = true;
            }

            if !progress {
                let deadline = self
                    .sensors
                    .iter()
                    .zip(&progress_of)
                    .filter(|(_, p)| **p == Progress::Measuring)
                    .filter_map(|(s, _)| next_deadline(s.as_ref(), now))
                    .min();
                wait_for_deadline(clock, now, deadline);
            }
        }

        self.publish();
        report
    }

    fn power_group_done(&self, i: usize, progress_of: &[Progress]) -> bool {
        let Some(pin) = self.sensors[i].core().power_pin() else {
            return true;
        };
        self.sensors
            .iter()
            .zip(progress_of)
            .filter(|(s, _)| {
                s.core()
                    .power_pin()
                    .is_some_and(|other| other.shares_switch_with(pin))
            })
            .all(|(_, p)| *p != Progress::Measuring)
    }

    /// Runs the standalone update of one sensor, then refreshes the
    /// variables it feeds and all calculated variables.
    pub fn update_sensor(&mut self, id: SensorId, clock: &dyn Clock) -> Result<(), Error> {
        self.sensor_mut(id)?.update(clock)?;
        self.publish();
        Ok(())
    }

    fn publish(&mut self) {
        for sensor in &mut self.sensors {
            sensor.core_mut().average();
        }
        for var in &mut self.variables {
            if let Source::Sensor { sensor, .. } = var.source {
                let values = self.sensors[sensor.0].core().values();
                var.on_sensor_update(values);
            }
        }
        for i in 0..self.variables.len() {
            let value = match &self.variables[i].source {
                Source::Calculated(calculation) => calculation(&Lookup(&self.variables)),
                Source::Sensor { .. } => continue,
            };
            self.variables[i].value = value;
        }
    }

    /// Current value of every variable, in the order they were added.
    pub fn values(&self) -> impl Iterator<Item = (&Variable, Option<f32>)> {
        self.variables.iter().map(|v| (v, v.value()))
    }

    pub fn print_sensor_data(&self, mut out: impl io::Write) -> io::Result<()> {
        for var in &self.variables {
            match var.parent() {
                Some((sensor, _)) => {
                    let sensor = &self.sensors[sensor.0];
                    writeln!(
                        out,
                        "{} reports {} is {} {}",
                        sensor.name_and_location(),
                        var.name(),
                        var.value_string(),
                        var.unit()
                    )?;
                }
                None => writeln!(
                    out,
                    "{} is calculated to be {} {}",
                    var.name(),
                    var.value_string(),
                    var.unit()
                )?,
            }
        }
        Ok(())
    }

    pub fn log_sensor_data(&self) {
        for (var, _) in self.values() {
            info!(code = var.code(), "{} = {} {}", var.name(), var.value_string(), var.unit());
        }
    }
}

/// Starts or collects a measurement if the sensor is ready for it. Returns
/// whether anything happened.
fn measure_step(id: SensorId, sensor: &mut dyn Sensor, now: Instant, report: &mut UpdateReport) -> bool {
    let core = sensor.core();
    if core.measurements_remaining() == 0 {
        return false;
    }

    if !core.status().contains(Status::MEASUREMENT_ATTEMPTED) {
        if !core.is_stable(now) {
            return false;
        }
        let res = sensor.start_single_measurement(now);
        report.check(id, sensor, Stage::StartMeasurement, res);
        return true;
    }

    if !core.is_measurement_complete(now) {
        return false;
    }
    match sensor.add_single_measurement_result(now) {
        // the failed start was already reported
        Err(Error::NotMeasuring) => (),
        res => report.check(id, sensor, Stage::Result, res),
    }
    true
}

fn next_deadline(sensor: &dyn Sensor, now: Instant) -> Option<Duration> {
    let core = sensor.core();
    let status = core.status();
    if !status.contains(Status::WAKE_ATTEMPTED) {
        core.warm_up_remaining(now)
    } else if !status.contains(Status::MEASUREMENT_ATTEMPTED) {
        core.stabilization_remaining(now)
    } else {
        core.measurement_remaining(now)
    }
}

fn wait_for_deadline(clock: &dyn Clock, now: Instant, remaining: Option<Duration>) {
    let period = remaining.unwrap_or(Duration::from_millis(1));
    clock.wait_until(now + period);
}
