use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::eyre::{eyre, Context};
use color_eyre::{Result, Section};
use drivers::{AtlasEzo, ProcessorStats, RainCounter, SimulatedSensor};
use linux_embedded_hal::{Delay, I2cdev};
use sensor_base::{
    Failure, PowerPin, Sensor, SensorCore, SimulatedSwitch, SystemClock, Timing, Variable,
    VariableArray,
};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::config::{Config, SensorConfig, SensorKind};
use crate::host;

#[derive(Debug, Clone)]
pub(crate) struct Value {
    pub code: String,
    pub uuid: Option<String>,
    pub name: String,
    pub unit: String,
    pub value: String,
}

#[derive(Debug)]
pub(crate) enum Message {
    Record { cycle: u64, values: Vec<Value> },
    Failures { cycle: u64, failures: Vec<Failure> },
    SetupFailed(Vec<Failure>),
}

fn open_bus(path: &str) -> Result<I2cdev> {
    I2cdev::new(path)
        .wrap_err("Could not open i2c bus")
        .with_note(|| format!("path: {path}"))
}

fn build_sensor(
    config: &SensorConfig,
    power: Option<PowerPin>,
) -> Result<Box<dyn Sensor>> {
    let configure = |core: SensorCore| {
        let core = core
            .with_measurements_to_average(config.measurements_to_average)
            .with_retries(config.retries);
        match power {
            Some(pin) => core.with_power(pin),
            None => core,
        }
    };

    let sensor: Box<dyn Sensor> = match &config.kind {
        SensorKind::Simulated {
            name,
            seed,
            warm_up_ms,
            stabilization_ms,
            measurement_ms,
            failure_probability,
            values,
        } => {
            let timing = Timing::from_millis(*warm_up_ms, *stabilization_ms, *measurement_ms);
            let sensor = values
                .iter()
                .fold(SimulatedSensor::new(name.clone(), timing, *seed), |s, v| {
                    s.with_value(v.quantity.into(), v.min..v.max)
                })
                .with_failure_probability(*failure_probability)
                .configure(configure);
            Box::new(sensor)
        }
        SensorKind::AtlasEzo { bus, kind, address } => {
            let kind = drivers::AtlasKind::from(*kind);
            let address = address.unwrap_or(kind.default_address());
            let sensor =
                AtlasEzo::with_address(kind, open_bus(bus)?, Delay, address).configure(configure);
            Box::new(sensor)
        }
        SensorKind::RainCounter {
            bus,
            address,
            mm_per_tip,
        } => {
            let sensor = RainCounter::with_address(
                open_bus(bus)?,
                address.unwrap_or(drivers::rain_counter::DEFAULT_ADDRESS),
                mm_per_tip.unwrap_or(drivers::rain_counter::DEFAULT_RAIN_PER_TIP),
            )
            .configure(configure);
            Box::new(sensor)
        }
        SensorKind::Processor => Box::new(
            ProcessorStats::new("host", host::SysfsBattery::new(), host::MemInfo)
                .configure(configure),
        ),
    };
    Ok(sensor)
}

/// Every power group gets one simulated switch, shared by its sensors.
pub(crate) fn build_array(config: &Config) -> Result<VariableArray> {
    let mut groups: HashMap<&str, PowerPin> = HashMap::new();
    let mut array = VariableArray::new();

    for (i, sensor_config) in config.sensors.iter().enumerate() {
        let power = sensor_config.power_group.as_deref().map(|group| {
            groups
                .entry(group)
                .or_insert_with(|| PowerPin::new(group, SimulatedSwitch::new()))
                .clone()
        });
        let sensor = build_sensor(sensor_config, power)
            .wrap_err_with(|| format!("Could not create sensor {i}"))?;
        let specs = sensor.variable_specs().to_vec();
        let id = array.add_boxed_sensor(sensor);

        for spec in &specs {
            let mut variable = Variable::from_sensor(id, spec);
            for over in sensor_config.variables.iter().filter(|o| o.index == spec.index) {
                if let Some(code) = &over.code {
                    variable = variable.with_code(code.clone());
                }
                if let Some(uuid) = &over.uuid {
                    variable = variable.with_uuid(uuid.clone());
                }
            }
            array.add_variable(variable)?;
        }
        if let Some(bad) = sensor_config
            .variables
            .iter()
            .find(|o| o.index >= specs.len())
        {
            return Err(eyre!("Sensor {i} has no value {}", bad.index))
                .with_note(|| format!("it has {} values", specs.len()));
        }
    }
    info!(
        "created {} sensors with {} variables",
        array.sensor_count(),
        array.variable_count()
    );
    Ok(array)
}

fn record(array: &VariableArray) -> Vec<Value> {
    array
        .values()
        .map(|(var, _)| Value {
            code: var.code().to_owned(),
            uuid: var.uuid().map(str::to_owned),
            name: var.name().to_owned(),
            unit: var.unit().to_owned(),
            value: var.value_string(),
        })
        .collect()
}

/// Runs the logging cycles on a dedicated thread, the sensors are not
/// `Send` so they are created there too.
pub(crate) fn start(
    config: Config,
    interval: Duration,
    cycles: Option<u64>,
    tx: Sender<Message>,
) -> thread::JoinHandle<Result<()>> {
    thread::spawn(move || {
        let mut array = build_array(&config)?;
        let clock = SystemClock::new();

        let report = array.setup_sensors(&clock);
        if !report.is_success() && tx.blocking_send(Message::SetupFailed(report.failures)).is_err() {
            return Ok(());
        }

        for cycle in 1.. {
            if cycles.is_some_and(|max| cycle > max) {
                break;
            }
            let started = Instant::now();
            let report = array.complete_update(&clock);
            debug!("cycle {cycle} took {:?}", started.elapsed());

            let values = record(&array);
            if tx.blocking_send(Message::Record { cycle, values }).is_err() {
                break;
            }
            if !report.is_success()
                && tx
                    .blocking_send(Message::Failures {
                        cycle,
                        failures: report.failures,
                    })
                    .is_err()
            {
                break;
            }

            if cycles.is_some_and(|max| cycle >= max) {
                break;
            }
            match interval.checked_sub(started.elapsed()) {
                Some(left) => thread::sleep(left),
                None => warn!("cycle {cycle} took longer than the logging interval"),
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_share_one_switch() {
        let config = Config::parse(include_str!("../config.ron")).unwrap();
        let array = build_array(&config).unwrap();

        let pin = |i| {
            array
                .sensor(sensor_base::SensorId(i))
                .unwrap()
                .core()
                .power_pin()
                .cloned()
        };
        let (ctd, air, processor) = (pin(0).unwrap(), pin(1).unwrap(), pin(2));
        assert!(ctd.shares_switch_with(&air));
        assert_eq!(ctd.label(), "pin 22");
        assert!(processor.is_none());

        let codes: Vec<_> = array.values().map(|(v, _)| v.code().to_owned()).collect();
        assert_eq!(codes[1], "WaterTemp");
        assert_eq!(
            array.values().nth(1).unwrap().0.uuid(),
            Some("12345678-abcd-1234-ef00-1234567890ab")
        );
    }

    #[test]
    fn override_of_missing_value_is_rejected() {
        let config = Config::parse(
            "(interval_secs: 1, sensors: [(kind: Processor, variables: [(index: 5)])])",
        )
        .unwrap();
        assert!(build_array(&config).is_err());
    }

    #[test]
    fn runs_the_requested_cycles() {
        let config = Config::parse(
            r#"(interval_secs: 0, sensors: [(
                kind: Simulated(name: "Sim", seed: 1, measurement_ms: 5, values: [
                    (quantity: Temperature, min: 1.0, max: 2.0),
                ]),
            )])"#,
        )
        .unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        let handle = start(config, Duration::ZERO, Some(2), tx);
        handle.join().unwrap().unwrap();

        let mut records = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Record { cycle, values } = msg {
                records.push((cycle, values));
            }
        }
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].0, 2);
        assert_eq!(records[0].1[0].code, "SimTemp");
    }
}
