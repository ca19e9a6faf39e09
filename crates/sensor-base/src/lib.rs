//! Lifecycle of environmental sensors: power, warm-up, wake, measure,
//! sleep and power down, with averaging over several readings.

pub mod clock;
pub mod error;
pub mod power;
pub mod sensor;
pub mod status;
pub mod variable;
pub mod variable_array;

pub use clock::{Clock, Instant, ManualClock, SystemClock};
pub use error::{make_error_string, Error, ErrorString};
pub use power::{PowerPin, PowerSwitch, SimulatedSwitch};
pub use sensor::{parse_value, verified, Phase, Sensor, SensorCore, Timing, BAD_VALUE};
pub use status::Status;
pub use variable::{Lookup, Variable, VariableSpec};
pub use variable_array::{Failure, SensorId, Stage, UpdateReport, VariableArray, VariableId};
