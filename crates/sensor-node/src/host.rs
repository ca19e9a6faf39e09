//! Battery and memory readings from the Linux kernel.

use std::fs;
use std::path::PathBuf;

use drivers::{BatteryMonitor, MemoryMonitor};
use sensor_base::Error;

/// First power supply reporting a voltage under `/sys/class/power_supply`.
pub(crate) struct SysfsBattery {
    root: PathBuf,
}

impl SysfsBattery {
    pub(crate) fn new() -> Self {
        Self {
            root: PathBuf::from("/sys/class/power_supply"),
        }
    }
}

impl BatteryMonitor for SysfsBattery {
    fn battery_voltage(&mut self) -> Result<f32, Error> {
        let supplies = fs::read_dir(&self.root).map_err(Error::device)?;
        for supply in supplies.flatten() {
            let Ok(text) = fs::read_to_string(supply.path().join("voltage_now")) else {
                continue;
            };
            let microvolt: f32 = sensor_base::parse_value(&text)?;
            return Ok(microvolt / 1e6);
        }
        Err(Error::device("no power supply reports a voltage"))
    }
}

pub(crate) struct MemInfo;

impl MemoryMonitor for MemInfo {
    fn free_memory(&mut self) -> Result<u64, Error> {
        let text = fs::read_to_string("/proc/meminfo").map_err(Error::device)?;
        mem_available(&text)
    }
}

fn mem_available(meminfo: &str) -> Result<u64, Error> {
    let line = meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .ok_or_else(|| Error::parse("MemAvailable missing"))?;
    let kib: u64 = line
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .map_err(Error::parse)?;
    Ok(kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo() {
        let meminfo = "MemTotal:       16318412 kB\n\
                       MemFree:         1234567 kB\n\
                       MemAvailable:    8000000 kB\n";
        assert_eq!(mem_available(meminfo), Ok(8_192_000_000));
        assert!(mem_available("MemTotal: 1 kB").is_err());
    }
}
