//! relaypool - demo pipeline
//!
//! Runs an exchange relay into a gated fire aggregator and a report sink, and
//! reads the reports until the gates close or the process is interrupted.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, trace};

use relaypool::config::PipelineConfig;
use relaypool::metadata::{DataDescription, DataType};
use relaypool::{
    Aggregator, Config, Delivery, ExchangeVector, FireVector, Pulled, Relay, Signal, Sink,
    SinkBuffer, Subscription, Termination, VERSION,
};

/// How often the report reader checks for a shutdown request
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relaypool.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    relaypool::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        "Starting relaypool"
    );

    if config.metrics.enabled {
        relaypool::metrics::init_metrics(&config.metrics)?;
        relaypool::metrics::start_api_server(config.metrics.api_addr)?;
        info!(
            bind_addr = %config.metrics.bind_addr,
            api_addr = %config.metrics.api_addr,
            "Metrics endpoints started"
        );
    }

    let pipeline = Pipeline::build(&config.pipeline).context("Failed to build pipeline")?;
    info!(
        buffers = config.pipeline.buffers,
        gates = config.pipeline.gates,
        steps = config.pipeline.steps,
        "Pipeline built"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let mut run = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || pipeline.run(&stop)
    });

    let report = tokio::select! {
        result = &mut run => result?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining pipeline...");
            stop.store(true, Ordering::Relaxed);
            run.await?
        }
    }?;

    info!(
        steps = report.steps,
        fired = report.fired,
        sink = ?report.sink,
        fire = ?report.fire,
        exchange = ?report.exchange,
        "Pipeline stopped"
    );
    Ok(())
}

/// What the reader saw and how the stages ended
#[derive(Debug, Default)]
struct RunReport {
    steps: u64,
    fired: u64,
    sink: Option<Termination>,
    fire: Option<Termination>,
    exchange: Option<Termination>,
}

/// Exchange relay and gate relays feeding a fire aggregator and a sink
///
/// Fields drop downstream first, so a partially started pipeline unwinds.
struct Pipeline {
    reports: Subscription<Delivery<SinkBuffer>>,
    sink: Sink<FireVector>,
    fire: Aggregator<ExchangeVector, FireVector>,
    gates: Vec<Relay<Signal>>,
    exchange: Relay<ExchangeVector>,
}

impl Pipeline {
    fn build(config: &PipelineConfig) -> relaypool::Result<Self> {
        let size = config.vector_size;
        let period = config.firing_period;

        let exchange = Relay::new(
            "exchange",
            config.buffers,
            move || ExchangeVector::new(size),
            move |step, vector: &mut ExchangeVector| {
                vector.clear();
                let offset = (step % period as u64) as usize;
                for i in (offset..vector.len()).step_by(period) {
                    vector.set(i);
                }
            },
        )?;

        let gates = (0..config.gates)
            .map(|i| {
                let window = config.clone();
                Relay::new(
                    format!("gate-{i}"),
                    config.buffers,
                    Signal::default,
                    move |step, signal: &mut Signal| signal.status = window.gate_open(step),
                )
            })
            .collect::<relaypool::Result<Vec<_>>>()?;

        let mut fire_step = 0;
        let fire = Aggregator::new(
            "fire",
            config.buffers,
            move || FireVector::new(size),
            exchange.subscribe(),
            gates.iter().map(Relay::subscribe).collect(),
            move |source: &ExchangeVector, out: &mut FireVector| {
                out.set_fire_bits(source.words());
                out.step = fire_step;
                fire_step += 1;
            },
        )?;

        let sink = Sink::new(
            "report",
            DataDescription::new(DataType::Bit, size),
            config.buffers,
            fire.subscribe(),
            gates.iter().map(Relay::subscribe).collect(),
            |fire: &FireVector, out: &mut SinkBuffer| {
                out.write_words(fire.words());
                out.step = fire.step;
            },
        )?;
        let reports = sink.subscribe();

        Ok(Self {
            reports,
            sink,
            fire,
            gates,
            exchange,
        })
    }

    /// Start every stage and read reports until the pipeline ends
    fn run(mut self, stop: &AtomicBool) -> relaypool::Result<RunReport> {
        self.exchange.start()?;
        for gate in &mut self.gates {
            gate.start()?;
        }
        self.fire.start()?;
        self.sink.start()?;

        let mut report = RunReport::default();
        loop {
            match self.reports.pull_timeout(POLL_INTERVAL) {
                Pulled::Ready(delivery) => {
                    let collected = delivery.read();
                    report.steps += 1;
                    report.fired += u64::from(collected.count_ones());
                    trace!(step = collected.step, fired = collected.count_ones(), "Report");
                }
                Pulled::Gone => break,
                Pulled::TimedOut => {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
        }

        // Dropping the reader lets the stages wind down from the bottom
        drop(self.reports);
        report.sink = self.sink.join();
        report.fire = self.fire.join();
        for gate in &mut self.gates {
            gate.join();
        }
        report.exchange = self.exchange.join();
        Ok(report)
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
