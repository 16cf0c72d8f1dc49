use std::{
    collections::BTreeMap,
    fs,
    net::SocketAddr,
    num::NonZeroU64,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::Deserialize;
use stepwise::{
    Clock, SystemClock,
    config::{PauseSettings, Settings, StepConfig},
    export::Exporter,
    meter::{Snapshot, StepCounter, StepDistributionSummary, StepTimer},
    pause::{ClockDriftPauseDetector, PauseDetector, no_pause_detector},
};
use tokio::{
    runtime::Builder,
    signal,
    task::{self, JoinSet},
    time::{self, Duration, Instant, MissedTickBehavior, sleep},
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to deserialize stepwise config: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("Invalid step configuration: {0}")]
    Config(#[from] stepwise::config::Error),
    #[error("Parsing Prometheus address failed: {0}")]
    PrometheusAddr(#[from] std::net::AddrParseError),
    #[error("Failed to install Prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Latency range is empty: min {min} > max {max}")]
    LatencyRange { min: u64, max: u64 },
    #[error("At least one worker is required")]
    NoWorkers,
    #[error("Failed to stop the pause detector: {0}")]
    Join(#[from] task::JoinError),
}

fn default_workers() -> u16 {
    4
}

fn default_summary_scale() -> f64 {
    1.0
}

/// Simulated request latency, milliseconds.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
struct LatencyConfig {
    min_millis: u64,
    max_millis: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            min_millis: 1,
            max_millis: 250,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
struct Config {
    /// Seed for the simulated workload.
    #[serde(default)]
    seed: u64,
    #[serde(default = "default_workers")]
    workers: u16,
    #[serde(default)]
    latency: LatencyConfig,
    #[serde(default = "default_summary_scale")]
    summary_scale: f64,
    #[serde(default)]
    step: StepConfig,
    /// Labels attached to every published series.
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 0,
            workers: default_workers(),
            latency: LatencyConfig::default(),
            summary_scale: default_summary_scale(),
            step: StepConfig::default(),
            labels: BTreeMap::new(),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(version, about = "Drive step meters with a simulated workload", long_about = None)]
struct Args {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// address to bind the prometheus exporter to
    #[clap(long)]
    prometheus_addr: Option<String>,
    /// the time, in seconds, to run the workload for
    #[clap(long, default_value_t = 30)]
    experiment_duration_seconds: u32,
}

fn get_config(path: Option<&Path>) -> Result<Config, Error> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

struct Meters<C = SystemClock> {
    timer: Arc<StepTimer<C>>,
    summary: StepDistributionSummary<C>,
    counter: StepCounter<C>,
}

/// What one publication put out.
#[derive(Debug, Clone, Copy)]
struct Report {
    requests: f64,
    latency: Snapshot,
    payload: Snapshot,
}

impl<C> Meters<C>
where
    C: Clock + Clone,
{
    fn new(clock: C, settings: &Settings, summary_scale: f64) -> Result<Self, Error> {
        Ok(Self {
            timer: Arc::new(StepTimer::new(clock.clone(), settings)),
            summary: StepDistributionSummary::new(clock.clone(), settings, summary_scale)?,
            counter: StepCounter::new(clock, settings.step_millis),
        })
    }

    fn close_step(&self) {
        self.timer.close_step();
        self.summary.close_step();
        self.counter.close_step();
    }

    fn report(&self, exporter: &Exporter) -> Report {
        let latency = exporter.publish_timer("stepwise_request_latency", self.timer.as_ref());
        let payload = exporter.publish_summary("stepwise_payload_bytes", &self.summary);
        let requests = exporter.publish_counter("stepwise_requests", &self.counter);
        let report = Report {
            requests,
            latency,
            payload,
        };
        report.log();
        report
    }
}

impl Report {
    fn log(&self) {
        info!(
            requests = self.requests,
            latency_count = self.latency.count,
            latency_mean = self.latency.mean,
            latency_max = self.latency.max,
            payload_mean = self.payload.mean,
            payload_max = self.payload.max,
            "step closed"
        );
    }
}

/// Publishes every step once, one millisecond after it closes.
struct Reporter<C = SystemClock> {
    meters: Arc<Meters<C>>,
    exporter: Exporter,
    clock: C,
    step_millis: u64,
    /// Index of the step open at the last publication.
    published: u64,
}

impl<C> Reporter<C>
where
    C: Clock + Clone,
{
    fn new(meters: Arc<Meters<C>>, exporter: Exporter, clock: C, step_millis: NonZeroU64) -> Self {
        let step_millis = step_millis.get();
        let published = clock.wall_time() / step_millis;
        Self {
            meters,
            exporter,
            clock,
            step_millis,
            published,
        }
    }

    fn step_index(&self) -> u64 {
        self.clock.wall_time() / self.step_millis
    }

    /// Time from now until one millisecond past the next step boundary.
    fn until_next_step(&self) -> Duration {
        let wall = self.clock.wall_time();
        Duration::from_millis(self.step_millis - wall % self.step_millis + 1)
    }

    fn report(&mut self) -> Report {
        self.published = self.step_index();
        self.meters.report(&self.exporter)
    }

    /// Publish the last completed step if it never was, then the partial
    /// step still open.
    fn close(&mut self) -> Vec<Report> {
        let mut reports = Vec::with_capacity(2);
        if self.step_index() > self.published {
            reports.push(self.report());
        }
        self.meters.close_step();
        reports.push(self.meters.report(&self.exporter));
        reports
    }
}

async fn work(meters: Arc<Meters>, latency: LatencyConfig, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    loop {
        let millis = rng.random_range(latency.min_millis..=latency.max_millis);
        meters
            .timer
            .record_duration(Duration::from_millis(millis));
        meters
            .summary
            .record(f64::from(rng.random_range(64u32..=4096)));
        meters.counter.increment();
        sleep(Duration::from_millis(rng.random_range(1..=10))).await;
    }
}

async fn inner_main(
    config: Config,
    experiment_duration: Duration,
    prometheus_addr: Option<SocketAddr>,
) -> Result<(), Error> {
    let settings = config.step.validate()?;
    if config.latency.min_millis > config.latency.max_millis {
        return Err(Error::LatencyRange {
            min: config.latency.min_millis,
            max: config.latency.max_millis,
        });
    }
    if config.workers == 0 {
        return Err(Error::NoWorkers);
    }

    if let Some(addr) = prometheus_addr {
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (k, v) in &config.labels {
            builder = builder.add_global_label(k, v);
        }
        builder.install()?;
        info!(%addr, "prometheus exporter listening");
    }
    let exporter = Exporter::new(config.labels.into_iter().collect());

    let clock = SystemClock::default();
    let meters = Arc::new(Meters::new(clock.clone(), &settings, config.summary_scale)?);
    let detector: Arc<dyn PauseDetector> = match settings.pause {
        PauseSettings::None => no_pause_detector(),
        PauseSettings::ClockDrift {
            sleep_interval,
            pause_threshold,
        } => Arc::new(ClockDriftPauseDetector::spawn(
            clock.clone(),
            sleep_interval,
            pause_threshold,
        )?),
    };
    meters.timer.watch_pauses(detector.as_ref());
    debug!(?detector, "pause detection configured");

    let mut workers = JoinSet::new();
    for worker in 0..config.workers {
        workers.spawn(work(
            Arc::clone(&meters),
            config.latency,
            config.seed.wrapping_add(u64::from(worker)),
        ));
    }

    info!(
        step_millis = settings.step_millis.get(),
        workers = config.workers,
        "running workload"
    );
    let mut reporter = Reporter::new(meters, exporter, clock, settings.step_millis);
    let mut interval = time::interval_at(
        Instant::now() + reporter.until_next_step(),
        Duration::from_millis(settings.step_millis.get()),
    );
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let experiment = sleep(experiment_duration);
    tokio::pin!(experiment);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                reporter.report();
            },
            _ = signal::ctrl_c() => {
                info!("received ctrl-c");
                break;
            },
            () = &mut experiment => {
                info!("experiment duration exceeded, shutting down");
                break;
            }
        }
    }

    workers.shutdown().await;
    reporter.close();
    // Dropping the detector joins its thread.
    task::spawn_blocking(move || drop(detector)).await?;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting stepwise {version} run.");

    let args = Args::parse();
    let config = get_config(args.config_path.as_deref())?;
    let prometheus_addr = args
        .prometheus_addr
        .as_deref()
        .map(str::parse::<SocketAddr>)
        .transpose()?;
    let experiment_duration = Duration::from_secs(args.experiment_duration_seconds.into());

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, experiment_duration, prometheus_addr));
    info!("Bye. :)");
    res
}
