use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use qnsd::collaborators::StaticQualityMonitor;
use qnsd::engine_daemon;
use qnsd_events::{SessionType, SlotId};
use std::sync::Arc;
use tokio::signal::unix::{self, SignalKind};
use tracing::{info, warn};

const SYSLOG_IDENTIFIER: &str = "qnsd";

#[derive(Parser, Debug)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the qualified-network selection engine.
    #[command(name = "engine")]
    Engine {
        /// SIM slot to serve.
        #[arg(long, default_value_t = 0)]
        slot: u8,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let tel_flusher = qnsd_telemetry::TelemetryConfig::new()
        .with_journald(SYSLOG_IDENTIFIER)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Engine { slot } => engine(slot),
    };

    tel_flusher.flush_blocking();

    result
}

fn engine(slot: u8) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        // the platform sampling loops feed these; the engine only reads
        let wifi_monitor = Arc::new(StaticQualityMonitor::new());
        let cellular_monitor = Arc::new(StaticQualityMonitor::new());

        let engine = engine_daemon::program()
            .slot(SlotId(slot))
            .sessions(vec![
                SessionType::Ims,
                SessionType::Emergency,
                SessionType::Mms,
                SessionType::Xcap,
                SessionType::Cbs,
            ])
            .wifi_monitor(wifi_monitor)
            .cellular_monitor(cellular_monitor)
            .run()
            .await?;

        let mut sigterm = unix::signal(SignalKind::terminate())?;
        let mut sigint = unix::signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => warn!("received SIGTERM"),
            _ = sigint.recv()  => warn!("received SIGINT"),
        }

        info!("closing evaluators and exiting gracefully");

        engine.close_all();
        for handle in engine.tasks {
            handle.abort();
        }

        Ok(())
    })
}
