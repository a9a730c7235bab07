use std::collections::HashMap;
use std::time::Duration;

use cadence_core::{config::CadenceConfig, Envelope, MessageBus, MessageKind};
use cadence_timer::{Expired, Repeat, TimerEngine, TimerHandle, TimerId};
use clap::Parser;
use tracing::{info, warn};

/// Drive a timer engine with one periodic timer and a stream of one-shot
/// timers until interrupted.
#[derive(Debug, Parser)]
#[command(name = "cadence-demo", version)]
struct Cli {
    /// Path to cadence.toml (defaults to ~/.cadence/cadence.toml).
    #[arg(long, env = "CADENCE_CONFIG")]
    config: Option<String>,

    /// Interval of the periodic timer, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    period_ms: u64,

    /// Timeout of each one-shot timer; a new one is armed at this cadence.
    #[arg(long, default_value_t = 1000)]
    oneshot_ms: u64,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,
}

/// Correlation payload carried through every expiration.
#[derive(Debug, Clone)]
struct Job {
    label: &'static str,
    seq: u64,
}

#[derive(Debug, Default)]
struct Stats {
    periodic: u64,
    oneshot: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_demo=info,cadence_timer=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = CadenceConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    let bus: MessageBus<Expired<Job>> = MessageBus::new(&config.bus);
    let mut mailbox = bus.register()?;
    let engine = TimerEngine::init(&bus, &config.timer)?;
    let listener = mailbox.id();
    info!(%listener, "demo listener registered");

    let periodic = engine.create(
        listener,
        Repeat::Periodic,
        Duration::from_millis(cli.period_ms),
        Job {
            label: "periodic",
            seq: 0,
        },
    )?;

    let stop = async {
        match cli.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("failed to listen for Ctrl-C: {e}");
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(stop);

    let mut arm = tokio::time::interval(Duration::from_millis(cli.oneshot_ms.max(1)));
    let mut pending: HashMap<TimerId, TimerHandle> = HashMap::new();
    let mut stats = Stats::default();
    let mut seq = 0;

    loop {
        tokio::select! {
            _ = &mut stop => {
                info!("stop requested");
                break;
            }
            _ = arm.tick() => {
                seq += 1;
                let handle = engine.create(
                    listener,
                    Repeat::Once,
                    Duration::from_millis(cli.oneshot_ms),
                    Job { label: "oneshot", seq },
                )?;
                pending.insert(handle.id(), handle);
            }
            Some(envelope) = mailbox.recv() => {
                on_expired(&engine, &mut pending, &mut stats, envelope);
            }
        }
    }

    engine.destroy(periodic);
    let cancelled = pending
        .into_values()
        .filter_map(|handle| engine.destroy(handle))
        .count();
    info!(
        periodic = stats.periodic,
        oneshot = stats.oneshot,
        cancelled,
        "demo finished"
    );

    tokio::task::spawn_blocking(move || engine.shutdown()).await??;
    bus.close();
    Ok(())
}

fn on_expired(
    engine: &TimerEngine<Job>,
    pending: &mut HashMap<TimerId, TimerHandle>,
    stats: &mut Stats,
    envelope: Envelope<Expired<Job>>,
) {
    if envelope.kind != MessageKind::TIMER_EXPIRE {
        warn!(kind = %envelope.kind, "unexpected message");
        return;
    }

    let expired = envelope.body;
    info!(
        timer_id = expired.timer,
        label = expired.payload.label,
        seq = expired.payload.seq,
        deadline = expired.deadline,
        "timer expired"
    );

    match expired.repeat {
        Repeat::Periodic => stats.periodic += 1,
        Repeat::Once => {
            stats.oneshot += 1;
            // Fired one-shots are retired by the engine; release the handle.
            if let Some(handle) = pending.remove(&expired.timer) {
                engine.destroy(handle);
            }
        }
    }
}
