//! Stream Bridge Demo
//!
//! Runs the bridge against simulated loopback hardware: a tone generator
//! feeds the transmit path and the same samples come back on the receive
//! path.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdr_stream_bridge::{
    component::BridgePorts,
    config::BridgeConfig,
    constants::*,
    hardware::{
        sim::{SimBlock, SimDevice},
        Sample,
    },
    port::{InputPacket, InputQueue, OutputQueue, PrecisionTime, StreamSri},
    BridgeComponent, BridgeEvents, Direction, LifecycleHooks, ShutdownSignal,
};

/// Stream id the generator announces upstream
const TONE_STREAM: &str = "tone";

/// Logs every notification
struct LogEvents;

impl BridgeEvents for LogEvents {
    fn on_block_identity(&self, component_id: &str, block_ids: &[String]) {
        tracing::info!("{} manages blocks {:?}", component_id, block_ids);
    }

    fn on_incoming_connection(&self, component_id: &str, stream_id: &str) {
        tracing::info!("{}: new incoming stream {}", component_id, stream_id);
    }

    fn on_removed_incoming_connection(&self, component_id: &str, stream_id: &str) {
        tracing::info!("{}: incoming stream {} removed", component_id, stream_id);
    }
}

/// Feed packets of a complex tone into the input queue until `running` clears
fn spawn_tone(
    input: Arc<InputQueue>,
    running: Arc<AtomicBool>,
    tone_hz: f64,
    sample_rate: f64,
    packet_len: usize,
) -> Result<thread::JoinHandle<u64>> {
    let handle = thread::Builder::new().name("tone".into()).spawn(move || {
        let step = 2.0 * std::f64::consts::PI * tone_hz / sample_rate;
        let mut phase = 0.0f64;
        let mut sent = 0u64;

        while running.load(Ordering::Relaxed) {
            let payload: Vec<Sample> = (0..packet_len)
                .map(|_| {
                    let sample = Sample::new((phase.cos() * 8000.0) as i16, (phase.sin() * 8000.0) as i16);
                    phase = (phase + step) % (2.0 * std::f64::consts::PI);
                    sample
                })
                .collect();

            let packet = InputPacket::new(TONE_STREAM, payload, PrecisionTime::now());
            if input.push_timeout(packet, Duration::from_millis(100)) {
                sent += 1;
            }
        }

        // Close the burst on the way out
        input.push_timeout(InputPacket::end_of_stream(TONE_STREAM), Duration::from_millis(100));
        sent
    })?;
    Ok(handle)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SDR stream bridge");

    // Config path from args, otherwise the platform default
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = BridgeConfig::load_or_default(path.as_deref()).context("Failed to load configuration")?;

    let spp = config.sim.spp.unwrap_or(config.stream.default_spp);
    let mut block = SimBlock::new(&config.block_id);
    if let Some(spp) = config.sim.spp {
        block = block.with_spp(spp);
    }
    let device = Arc::new(SimDevice::new(block, config.sim.fifo_depth, config.rx.sample_rate));

    let input = Arc::new(InputQueue::new(PACKET_QUEUE_CAPACITY));
    let output = Arc::new(OutputQueue::new(PACKET_QUEUE_CAPACITY));
    let shutdown = ShutdownSignal::new();

    let mut component = BridgeComponent::new(
        config.clone(),
        device.clone(),
        BridgePorts {
            input: input.clone(),
            output: output.clone(),
        },
        Arc::new(LogEvents),
        shutdown.clone(),
    )?;

    component.announce_upstream_sri(StreamSri::new(TONE_STREAM, config.rx.sample_rate));
    component.on_enable(Direction::Tx)?;
    component.on_enable(Direction::Rx)?;
    component.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let generator = spawn_tone(input.clone(), running.clone(), config.sim.tone_hz, config.rx.sample_rate, spp)?;

    tracing::info!(
        "Bridge running on {} (spp {}, {:.0} Hz tone) - press Ctrl+C to stop",
        config.block_id,
        spp,
        config.sim.tone_hz
    );

    let deadline = config.sim.run_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut received = 0u64;
    let mut last_stats = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                }
                tracing::info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }

        while let Some(packet) = output.try_pop() {
            received += packet.payload.len() as u64;
        }

        if last_stats.elapsed() >= Duration::from_secs(1) {
            let stats = component.stats();
            let out = output.stats();
            tracing::info!(
                "Stats: tx {} packets / {} samples, rx {} packets / {} samples, {} overflows, {} timeouts, fifo {}, output queue {:.0}% full",
                stats.tx_packets,
                stats.tx_samples,
                stats.rx_packets,
                stats.rx_samples,
                stats.rx_overflows,
                stats.rx_timeouts,
                device.buffered(),
                out.fill_level() * 100.0
            );
            last_stats = Instant::now();
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::info!("Run time elapsed");
            break;
        }
    }

    running.store(false, Ordering::Relaxed);
    match generator.join() {
        Ok(sent) => tracing::info!("Generator sent {} packets", sent),
        Err(_) => tracing::warn!("Generator thread panicked"),
    }

    component.release();
    shutdown.wait();

    tracing::info!("Received {} samples in total", received);
    Ok(())
}
