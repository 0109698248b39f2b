//! Send Controller - replays a transport scenario
//!
//! Builds a send-side transport coordinator, feeds it the events of a TOML
//! scenario in order and prints what the transport ends up with.

use clap::Parser;
use rtp::{
    BitrateConstraints, BitrateConstraintsMask, NetworkRoute, SentPacket, SystemClock,
    TransportSendCoordinator,
};
use rtp_cli::{display_summary, format_bandwidth, Config, CoordinatorSummary, ScenarioEvent};
use rtp_congestion::{NetworkChangedObserver, TargetTransferRate};
use rtp_io::TracingEventLog;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "send-controller")]
#[command(about = "Replay a send-side transport scenario", long_about = None)]
struct Args {
    /// Scenario file (TOML); the built-in example is used if absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the example scenario to this path and exit
    #[arg(long)]
    write_example: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Logs every target the congestion controller hands out
struct TargetLogger;

impl NetworkChangedObserver for TargetLogger {
    fn on_network_changed(&self, update: TargetTransferRate) {
        tracing::info!(
            "Target rate {} (loss {}/255, rtt {}ms)",
            format_bandwidth(update.target_bitrate_bps as u64),
            update.fraction_loss,
            update.rtt_ms
        );
    }
}

fn replay(coordinator: &TransportSendCoordinator, events: &[ScenarioEvent]) {
    for (index, event) in events.iter().enumerate() {
        tracing::debug!(index, ?event, "Replaying event");
        match event {
            ScenarioEvent::Sdp {
                min_bps,
                start_bps,
                max_bps,
            } => {
                coordinator.set_sdp_bitrate_parameters(BitrateConstraints::new(
                    *min_bps, *start_bps, *max_bps,
                ));
            }
            ScenarioEvent::Client {
                min_bps,
                start_bps,
                max_bps,
            } => {
                coordinator.set_client_bitrate_preferences(BitrateConstraintsMask {
                    min_bitrate_bps: *min_bps,
                    start_bitrate_bps: *start_bps,
                    max_bitrate_bps: *max_bps,
                });
            }
            ScenarioEvent::Route {
                transport,
                connected,
                local_network_id,
                remote_network_id,
                packet_overhead,
            } => {
                let route = if *connected {
                    NetworkRoute::connected(*local_network_id, *remote_network_id)
                } else {
                    NetworkRoute::disconnected()
                };
                let route = route.with_packet_overhead(*packet_overhead);
                coordinator.on_network_route_changed(transport, &route);
            }
            ScenarioEvent::Availability { available } => {
                coordinator.on_network_availability(*available);
            }
            ScenarioEvent::SentPacket {
                packet_id,
                send_time_ms,
            } => {
                coordinator.on_sent_packet(&SentPacket::new(*packet_id, *send_time_ms));
            }
            ScenarioEvent::Remb { bitrate_bps } => {
                coordinator
                    .bandwidth_observer()
                    .on_received_estimated_bitrate(*bitrate_bps);
            }
            ScenarioEvent::Wait { ms } => thread::sleep(Duration::from_millis(*ms)),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &args.write_example {
        Config::example().to_file(path)?;
        println!("Example scenario written to {}", path.display());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading scenario from {}", path.display());
            Config::from_file(path)?
        }
        None => {
            tracing::info!("No scenario given, using the built-in example");
            Config::example()
        }
    };

    tracing::info!("Send controller starting...");

    let mut coordinator = TransportSendCoordinator::new(
        Arc::new(SystemClock::new()),
        Arc::new(TracingEventLog),
        config.bitrate.into(),
    )?;
    coordinator.set_pacing_factor(config.pacer.pacing_factor);
    coordinator.set_queue_time_limit(config.pacer.queue_time_limit_ms);
    coordinator.set_keep_alive_config(config.keepalive.into());
    coordinator.register_network_observer(Arc::new(TargetLogger));

    replay(&coordinator, &config.events);

    let summary = CoordinatorSummary::capture(&coordinator);
    coordinator.shutdown();
    display_summary(&summary);

    tracing::info!("Send controller finished");
    Ok(())
}
