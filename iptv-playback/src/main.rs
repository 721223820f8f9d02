//! IPTV playback core (iptv-playback) - composition root
//!
//! Builds the single LeaseManager, ScheduleCache and PlaybackCoordinator
//! from configuration and drives a scripted session against simulated
//! collaborators: two surfaces contend for the stream, the user forces a
//! takeover, the engine recovers from transient failures, and the
//! now/next schedule is served from cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use iptv_common::config::CoreConfig;
use iptv_common::events::PlaybackEvent;
use iptv_common::{Clock, SystemClock};
use iptv_playback::playback::{LeaseManager, MediaSource, PlaybackCoordinator, PlayResult};
use iptv_playback::schedule::{CacheConfig, ScheduleCache};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod simulated;

use simulated::{FlakyEngine, InMemorySchedule};

/// Command-line arguments for iptv-playback
#[derive(Parser, Debug)]
#[command(name = "iptv-playback")]
#[command(about = "Playback session control core for the IPTV client")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "IPTV_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, env = "IPTV_LOG_LEVEL")]
    log_level: Option<String>,

    /// Number of opens the simulated engine fails before succeeding
    #[arg(long, default_value = "2")]
    engine_failures: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = CoreConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("iptv_playback={level},iptv_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        max_retry_attempts = config.playback.max_retry_attempts,
        base_retry_delay_ms = config.playback.base_retry_delay_ms,
        release_cooldown_ms = config.playback.release_cooldown_ms,
        cache_ttl_ms = config.schedule_cache.ttl_ms,
        cache_max_entries = config.schedule_cache.max_entries,
        "Starting IPTV playback core"
    );

    // Single-instance components, shared by reference
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leases = Arc::new(LeaseManager::new(Arc::clone(&clock)));
    let engine = Arc::new(FlakyEngine::new(args.engine_failures));
    let coordinator = PlaybackCoordinator::new(
        Arc::clone(&leases),
        engine,
        Arc::clone(&clock),
        &config.playback,
    );
    let schedule = ScheduleCache::new(
        Arc::new(InMemorySchedule::new(clock.now(), &["news", "sports", "movies"])),
        Arc::clone(&clock),
        CacheConfig::from(&config.schedule_cache),
    );

    let mut events = coordinator.subscribe();
    let channel = MediaSource::named("http://iptv.invalid/live/news.ts", "News");

    // Full screen player starts; picture-in-picture contends
    let first = coordinator.request_play("player", channel.clone());
    info!(?first, "Full screen player requested playback");
    let second = coordinator.request_play("pip", channel.clone());
    info!(?second, "Picture-in-picture requested playback");

    if second == PlayResult::DeniedByLease {
        info!("User confirmed takeover for picture-in-picture");
        coordinator.force_play("pip", channel.clone());
    }
    await_outcome(&mut events, "pip").await?;

    let (now, next) = schedule.get_current_and_next("news", "account-1").await;
    info!(
        now = now.as_ref().map(|item| item.title.as_str()).unwrap_or("-"),
        next = next.as_ref().map(|item| item.title.as_str()).unwrap_or("-"),
        "Now/next for News"
    );
    // Second lookup is served from cache
    schedule.get_current("news", "account-1").await;
    let guide = schedule
        .get_current_batch(&["sports".to_string(), "movies".to_string()], "account-1")
        .await;
    info!(channels = guide.len(), stats = ?schedule.stats(), "Schedule cache warmed");

    coordinator.stop_all("pip");
    let after_stop = coordinator.request_play("player", channel);
    info!(
        ?after_stop,
        cooldown_remaining_ms = leases.cooldown_remaining_ms(),
        "Immediate re-open after stop"
    );

    info!("Session complete");
    Ok(())
}

/// Wait for the open sequence of `owner_id` to start or fail
async fn await_outcome(
    events: &mut broadcast::Receiver<PlaybackEvent>,
    owner_id: &str,
) -> Result<()> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event.owner_id() == owner_id && event.is_terminal() => {
                    return Ok(event);
                }
                Ok(event) => info!(?event, "Playback event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event receiver lagged");
                }
                Err(e) => return Err(e),
            }
        }
    };

    let outcome = tokio::time::timeout(Duration::from_secs(120), wait)
        .await
        .context("Timed out waiting for playback outcome")?
        .context("Event bus closed")?;
    info!(?outcome, "Playback outcome");
    Ok(())
}
