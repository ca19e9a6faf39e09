mod subscriber;

pub use subscriber::{setup, setup_for_tests, LogOptions};
