//! Drivers for individual sensors. All of them are generic over the
//! `embedded-hal` and `embedded-io` traits, so they run on anything from a
//! Linux single board computer to a test mock.

pub mod atlas;
pub mod bus;
pub mod keller;
pub mod maxbotix;
pub mod modbus;
pub mod processor;
pub mod rain_counter;
pub mod sdi12;
pub mod simulated;

pub use atlas::{AtlasEzo, AtlasKind};
pub use keller::{Keller, KellerModel};
pub use maxbotix::MaxBotixSonar;
pub use processor::{BatteryMonitor, MemoryMonitor, ProcessorStats};
pub use rain_counter::RainCounter;
pub use sdi12::{Sdi12Info, Sdi12Sensor};
pub use simulated::{Quantity, SimulatedSensor};
