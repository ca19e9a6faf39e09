use tracing_error::ErrorLayer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// What to log besides the readings and failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Report how long every batch operation (`complete_update`,
    /// `setup_sensors`, ...) took once it finishes.
    pub cycle_timing: bool,
    /// Log every lifecycle step of every sensor.
    pub lifecycle: bool,
}

impl LogOptions {
    /// Directives used when `RUST_LOG` is not set.
    fn default_directives(self) -> String {
        let mut directives = String::from("info");
        if self.lifecycle {
            directives.push_str(",sensor_base=debug,drivers=debug");
        }
        directives
    }

    fn span_events(self) -> FmtSpan {
        if self.cycle_timing {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

fn env_filter(options: LogOptions) -> EnvFilter {
    EnvFilter::builder()
        .with_regex(true)
        .try_from_env()
        .unwrap_or_else(|_| EnvFilter::builder().parse_lossy(options.default_directives()))
}

/// Logs to stderr, filtered by `RUST_LOG`. Without it the filter follows
/// `options`. Timestamps count from startup, which lines up with the
/// millisecond clock the sensors run on.
///
/// Useful filters:
///
/// - per poll timing, including every wait of a logging cycle:
///   `RUST_LOG=sensor_base::variable_array=trace`
/// - everything a single driver does:
///   `RUST_LOG=drivers::sdi12=trace,info`
///
/// for full docs see: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html
pub fn setup(options: LogOptions) {
    let fmt = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::uptime())
        .with_target(true)
        .with_span_events(options.span_events());

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(fmt.with_filter(env_filter(options)))
        .init();
    tracing::info!(?options, "logging to stderr");
}

/// Installs the test writer once per test binary, later calls do nothing.
/// Lifecycle logging is on unless `RUST_LOG` says otherwise.
pub fn setup_for_tests() {
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        color_eyre::install().unwrap();
        let options = LogOptions {
            cycle_timing: true,
            lifecycle: true,
        };

        let test_subscriber = fmt::layer()
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_span_events(options.span_events())
            .with_filter(env_filter(options));
        tracing_subscriber::registry()
            .with(test_subscriber)
            .with(ErrorLayer::default())
            .init();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_adds_sensor_crates() {
        let quiet = LogOptions::default();
        assert_eq!(quiet.default_directives(), "info");
        assert_eq!(quiet.span_events(), FmtSpan::NONE);

        let verbose = LogOptions {
            cycle_timing: true,
            lifecycle: true,
        };
        let filter: EnvFilter = verbose.default_directives().parse().unwrap();
        assert!(filter.to_string().contains("sensor_base=debug"));
        assert_eq!(verbose.span_events(), FmtSpan::CLOSE);
    }
}
