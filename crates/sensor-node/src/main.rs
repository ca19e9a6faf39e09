use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod config;
mod host;
mod sampling;

use config::Config;
use sampling::Message;

#[derive(Parser)]
#[command(name = "sensor node")]
#[command(version = "1.0")]
#[command(about = "powers, wakes and reads the configured sensors every logging interval")]
struct Cli {
    /// ron file describing the sensors
    #[arg(short, long, default_value = "config.ron")]
    config: PathBuf,

    /// stop after this many logging cycles, runs forever if not set
    #[arg(long)]
    cycles: Option<u64>,

    /// seconds between logging cycles, overrides the config
    #[arg(short, long)]
    interval: Option<u64>,

    /// log how long each logging cycle took
    #[arg(long)]
    cycle_timing: bool,

    /// log every power, wake, measure and sleep step
    #[arg(short, long)]
    verbose: bool,
}

const fn non_zero(n: u32) -> NonZeroU32 {
    match NonZeroU32::new(n) {
        Some(n) => n,
        None => NonZeroU32::MIN,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logger::setup(logger::LogOptions {
        cycle_timing: cli.cycle_timing,
        lifecycle: cli.verbose,
    });

    let config = Config::load(&cli.config).await?;
    let interval = Duration::from_secs(cli.interval.unwrap_or(config.interval_secs));
    info!(
        "logging {} sensors every {interval:?}",
        config.sensors.len()
    );

    let (tx, mut rx) = mpsc::channel(100);
    let sampler = sampling::start(config, interval, cli.cycles, tx);

    let quota = Quota::per_hour(non_zero(4)).allow_burst(non_zero(20));
    let limiter = RateLimiter::direct(quota);
    while let Some(msg) = rx.recv().await {
        handle(msg, &limiter);
    }

    sampler
        .join()
        .map_err(|_| eyre!("sampling thread panicked"))?
}

fn handle(msg: Message, limiter: &DefaultDirectRateLimiter) {
    match msg {
        Message::Record { cycle, values } => {
            for v in values {
                let uuid = v.uuid.as_deref().unwrap_or("-");
                info!(
                    cycle,
                    uuid,
                    "{} ({}, {}): {}",
                    v.code,
                    v.name,
                    v.unit,
                    v.value
                );
            }
        }
        Message::Failures { cycle, failures } => {
            if limiter.check().is_err() {
                return;
            }
            for failure in failures {
                warn!(cycle, "{failure}");
            }
        }
        Message::SetupFailed(failures) => {
            for failure in failures {
                error!("{failure}");
            }
        }
    }
}
