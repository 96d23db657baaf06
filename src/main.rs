//! Headless attendee client wiring config, storage, the event API, the push channel and shake input.
//!
//! Acceleration samples are read from stdin as JSON lines (`{"x":..,"y":..,"z":..}`).
//! `{"say":"..."}` posts a message to the live wall and `quit` ends the session.

use std::{
    io::{self, BufRead},
    path::Path,
    sync::Arc,
    thread,
};

use anyhow::{Context, bail};
use live_shake::{
    clock::{SharedClock, SystemClock},
    config::{AppConfig, StorageConfig},
    dao::{
        file::FileScope,
        keys,
        storage::{DurableStore, Scope},
    },
    dto::round::ActivityId,
    services::{
        api_client::HttpGameApi,
        countdown::Countdown,
        game_session::GameSession,
        motion::{ChannelMotionSensor, MotionDetector, MotionFeed, MotionSample, PermissionPolicy},
        transport::{ConnectParams, DuplexTransport},
        ws_connector::WsConnector,
    },
    state::round_machine::RoundStateMachine,
};
use serde::Deserialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let clock = SystemClock::shared();
    let store = open_store(&config.storage);

    let token = config
        .token
        .clone()
        .or_else(|| store.get::<String>(Scope::Session, keys::TOKEN));
    if let Some(token) = &token {
        store.set(Scope::Session, keys::TOKEN, token);
    }
    let Some(activity_id) = config
        .activity_id
        .clone()
        .or_else(|| store.get::<ActivityId>(Scope::Persistent, keys::ACTIVITY_ID))
    else {
        bail!("no activity id configured; set LIVE_SHAKE_ACTIVITY_ID");
    };
    store.set(Scope::Persistent, keys::ACTIVITY_ID, &activity_id);

    let api = HttpGameApi::new(&config.api.base_url, token.clone(), config.api.timeout)
        .context("building HTTP client")?;
    let join_allowed = check_in(&api, &activity_id).await;
    report_winnings(&api, &activity_id).await;

    let (sensor, feed) = ChannelMotionSensor::new(PermissionPolicy::NotRequired);
    let motion = MotionDetector::new(Arc::new(sensor), config.motion);
    let mut session = GameSession::new(
        activity_id.clone(),
        RoundStateMachine::new(store.clone(), clock.clone()),
        motion,
        Countdown::new(clock.clone()),
        Arc::new(api.clone()),
    );
    if let Some(period) = config.poll_interval {
        session = session.with_poll_interval(period);
    }
    session.set_join_allowed(join_allowed);

    let transport = DuplexTransport::new(config.push.transport.clone(), Arc::new(WsConnector));
    session.attach(&transport);
    transport
        .connect(
            &config.push.endpoint,
            &ConnectParams {
                token,
                activity_id: Some(activity_id.to_string()),
            },
        )
        .context("opening push channel")?;

    let shutdown = CancellationToken::new();
    let input = spawn_stdin_reader(feed, clock, api.clone(), activity_id.clone(), shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    session.run(shutdown.clone()).await;
    transport.close();
    shutdown.cancel();

    if let Ok(InputEnd::Quit) = input.await {
        if let Err(err) = store.end_session() {
            warn!(error = %err, "failed to clear session storage");
        }
    }
    report_winnings(&api, &activity_id).await;
    Ok(())
}

/// Build the durable store, falling back to memory when the scope files cannot be opened.
fn open_store(config: &StorageConfig) -> DurableStore {
    let Some(dir) = &config.dir else {
        info!("no storage directory configured; state will not survive restarts");
        return DurableStore::in_memory(config.prefix.as_str());
    };

    match open_file_scopes(dir) {
        Ok((persistent, session)) => {
            info!(dir = %dir.display(), "using file storage");
            DurableStore::new(config.prefix.as_str(), Arc::new(persistent), Arc::new(session))
        }
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "file storage unavailable; using memory");
            DurableStore::in_memory(config.prefix.as_str())
        }
    }
}

fn open_file_scopes(dir: &Path) -> anyhow::Result<(FileScope, FileScope)> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let persistent = FileScope::open(dir.join("persistent.json"))?;
    let session = FileScope::open(dir.join("session.json"))?;
    Ok((persistent, session))
}

/// Check in when the activity asks for it and report whether the attendee may join rounds.
///
/// Backend failures are logged and do not keep the attendee out.
async fn check_in(api: &HttpGameApi, activity_id: &ActivityId) -> bool {
    let activity = match api.activity(activity_id).await {
        Ok(activity) => activity,
        Err(err) => {
            warn!(%activity_id, error = %err, "failed to load activity");
            return true;
        }
    };
    info!(
        %activity_id,
        title = %activity.title,
        ongoing = activity.is_ongoing(),
        danmaku = activity.danmaku_enabled(),
        "activity loaded"
    );
    if !activity.check_in_enabled() {
        return true;
    }

    match api.check_in_status(activity_id).await {
        Ok(status) if status.checked_in => {
            info!(at = ?status.check_in_time, audit = ?status.status, "already checked in");
            if status.status.is_some() {
                return status.can_join();
            }
        }
        Ok(_) => match api.check_in(activity_id).await {
            Ok(()) => info!(%activity_id, "checked in"),
            Err(err) => {
                warn!(%activity_id, error = %err, "check-in failed");
                return false;
            }
        },
        Err(err) => {
            warn!(%activity_id, error = %err, "failed to read check-in status");
            return true;
        }
    }

    match api.audit_status().await {
        Ok(audit) if audit.status.is_approved() => true,
        Ok(audit) => {
            warn!(status = ?audit.status, reason = ?audit.reason, "registration not approved; rounds will be skipped");
            false
        }
        Err(err) => {
            warn!(error = %err, "failed to read review status");
            true
        }
    }
}

/// Log the prizes won so far in this activity.
async fn report_winnings(api: &HttpGameApi, activity_id: &ActivityId) {
    let winnings = match api.my_winnings(activity_id).await {
        Ok(winnings) => winnings,
        Err(err) => {
            warn!(%activity_id, error = %err, "failed to load winnings");
            return;
        }
    };
    for winning in winnings {
        let winning = if winning.claim_code.is_none() {
            match api.winning_detail(&winning.id).await {
                Ok(detail) => detail,
                Err(err) => {
                    warn!(winner_id = %winning.id, error = %err, "failed to load prize details");
                    winning
                }
            }
        } else {
            winning
        };
        info!(
            winner_id = %winning.id,
            round = ?winning.round_name,
            prize = %winning.prize_name,
            level = ?winning.prize_level,
            claim_code = ?winning.claim_code,
            claimed = winning.is_claimed(),
            "prize won"
        );
    }
}

/// How the stdin reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputEnd {
    Quit,
    Eof,
    Cancelled,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputLine {
    Sample { x: f64, y: f64, z: f64 },
    Say { say: String },
}

fn spawn_stdin_reader(
    feed: MotionFeed,
    clock: SharedClock,
    api: HttpGameApi,
    activity_id: ActivityId,
    shutdown: CancellationToken,
) -> JoinHandle<InputEnd> {
    // A blocking read on a plain thread does not hold the runtime open at exit.
    let (tx, mut lines) = mpsc::unbounded_channel::<String>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "stdin closed with an error");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => return InputEnd::Cancelled,
                line = lines.recv() => line,
            };
            let Some(line) = line else {
                return InputEnd::Eof;
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" {
                shutdown.cancel();
                return InputEnd::Quit;
            }

            match serde_json::from_str::<InputLine>(line) {
                Ok(InputLine::Sample { x, y, z }) => {
                    feed.push(MotionSample {
                        x,
                        y,
                        z,
                        at_ms: clock.now_ms(),
                    });
                }
                Ok(InputLine::Say { say }) => {
                    if let Err(err) = api.send_danmaku(&activity_id, &say).await {
                        warn!(error = %err, "message not posted");
                    }
                }
                Err(err) => warn!(error = %err, "ignoring unrecognised input line"),
            }
        }
    })
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,live_shake=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
