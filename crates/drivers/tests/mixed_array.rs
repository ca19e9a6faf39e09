use drivers::{BatteryMonitor, MemoryMonitor, ProcessorStats, Quantity, SimulatedSensor};
use sensor_base::{
    Error, ManualClock, PowerPin, SimulatedSwitch, Stage, Status, Timing, Variable, VariableArray,
};

struct Battery;
impl BatteryMonitor for Battery {
    fn battery_voltage(&mut self) -> Result<f32, Error> {
        Ok(12.6)
    }
}

struct Memory;
impl MemoryMonitor for Memory {
    fn free_memory(&mut self) -> Result<u64, Error> {
        Ok(1 << 20)
    }
}

#[test]
fn several_cycles_with_a_shared_power_switch() {
    logger::setup_for_tests();
    let clock = ManualClock::starting_at(0);
    let switch = SimulatedSwitch::new();
    let probe = switch.probe();
    let pin = PowerPin::new("pin 22", switch);

    let water = SimulatedSensor::new("Water", Timing::from_millis(500, 100, 200), 1)
        .with_value(Quantity::Temperature, 4.0..6.0)
        .with_value(Quantity::Conductivity, 200.0..220.0)
        .configure(|core| core.with_power(pin.clone()).with_measurements_to_average(5));
    let air = SimulatedSensor::new("Air", Timing::from_millis(50, 0, 1_000), 2)
        .with_value(Quantity::Humidity, 60.0..70.0)
        .configure(|core| core.with_power(pin.clone()));

    let mut array = VariableArray::new();
    let water = array.add_sensor(water);
    let air = array.add_sensor(air);
    let stats = array.add_sensor(ProcessorStats::new("host", Battery, Memory));
    for id in [water, air, stats] {
        array.add_all_variables(id).unwrap();
    }
    array
        .add_variable(Variable::calculated(
            "temperature",
            "degreeFahrenheit",
            2,
            "SimTempF",
            |vars| vars.get("SimTemp").map(|c| c * 1.8 + 32.0),
        ))
        .unwrap();
    assert_eq!(array.max_measurements_to_average(), 5);

    for cycle in 1..=3u8 {
        let report = array.complete_update(&clock);
        assert!(report.is_success(), "{report:?}");
        assert!(!probe.on());

        let values: Vec<_> = array.values().map(|(var, v)| (var.code(), v)).collect();
        let get = |code: &str| {
            values
                .iter()
                .find(|(c, _)| *c == code)
                .and_then(|(_, v)| *v)
                .unwrap()
        };
        assert!((4.0..6.0).contains(&get("SimTemp")));
        assert!((60.0..70.0).contains(&get("SimRH")));
        assert_eq!(get("SampNum"), f32::from(cycle));
        assert_eq!(get("Battery"), 12.6);
        let fahrenheit = get("SimTempF");
        assert!((fahrenheit - (get("SimTemp") * 1.8 + 32.0)).abs() < 1e-4);
    }
}

#[test]
fn failures_are_reported_per_sensor() {
    let clock = ManualClock::starting_at(0);
    let flaky = SimulatedSensor::new("Flaky", Timing::NONE, 9)
        .with_value(Quantity::Pressure, 1000.0..1010.0)
        .with_failure_probability(1.0)
        .configure(|core| core.with_measurements_to_average(2).with_retries(1));

    let mut array = VariableArray::new();
    let id = array.add_sensor(flaky);
    array.add_all_variables(id).unwrap();

    let report = array.complete_update(&clock);

    // two measurements, each tried twice
    assert_eq!(report.failures.len(), 4);
    assert!(report
        .failures
        .iter()
        .all(|f| f.stage == Stage::Result && f.error == Error::NoResponse));
    assert_eq!(array.values().next().unwrap().1, None);
    let status = array.sensor(id).unwrap().core().status();
    assert!(!status.contains(Status::AWAKE));
}
