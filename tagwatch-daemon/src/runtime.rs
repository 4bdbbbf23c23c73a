use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use tagwatch_core::{config, registry, Account, AccountName};
use tagwatch_poller::{
    pipeline, AccountOutcome, CancelFlag, CycleOutcome, CycleReport, MarkerFileMigration,
    MigrationStatus, PollMode, PollScope,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{cache_dir, run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

pub type AccountCache = HashMap<AccountName, Account>;

/// Per-account last-successful-poll timestamps (Unix seconds).
pub type PollTimestamps = HashMap<String, u64>;

#[derive(Debug, Clone)]
enum PollTarget {
    All,
    Account(String),
}

impl PollTarget {
    fn scope(&self) -> PollScope {
        match self {
            PollTarget::All => PollScope::All,
            PollTarget::Account(name) => PollScope::Account(AccountName::from(name.as_str())),
        }
    }

    fn label(&self) -> String {
        match self {
            PollTarget::All => "all".to_string(),
            PollTarget::Account(name) => name.clone(),
        }
    }
}

struct PollJob {
    target: PollTarget,
    source: &'static str,
    respond_to: oneshot::Sender<Result<CycleSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub target: String,
    pub source: String,
    pub mode: PollMode,
    pub outcome: CycleOutcome,
    pub accounts: Vec<String>,
    pub failed: Vec<String>,
    pub over_threshold: Vec<String>,
    pub committed: usize,
    pub notified: usize,
    pub duration_ms: u128,
}

/// Broadcast shutdown that also abandons any in-flight cycle before its
/// next account.
#[derive(Clone)]
struct Shutdown {
    tx: broadcast::Sender<()>,
    cancel: CancelFlag,
}

impl Shutdown {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            cancel: CancelFlag::new(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    fn trigger(&self) {
        self.cancel.cancel();
        let _ = self.tx.send(());
    }
}

/// State shared by the processor and the socket server.
#[derive(Clone)]
struct DaemonState {
    home: PathBuf,
    mode: PollMode,
    poll_interval_secs: u64,
    started_at_unix: u64,
    accounts: Arc<RwLock<AccountCache>>,
    timestamps: Arc<RwLock<PollTimestamps>>,
    last_cycle: Arc<RwLock<Option<CycleSummary>>>,
}

impl DaemonState {
    fn new(home: PathBuf, mode: PollMode, poll_interval: Duration, accounts: AccountCache) -> Self {
        Self {
            home,
            mode,
            poll_interval_secs: poll_interval.as_secs(),
            started_at_unix: unix_seconds_now(),
            accounts: Arc::new(RwLock::new(accounts)),
            timestamps: Arc::new(RwLock::new(HashMap::new())),
            last_cycle: Arc::new(RwLock::new(None)),
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_at(&home)?;
    let mode = if config.fast_forward {
        PollMode::FastForward
    } else {
        PollMode::Notify
    };
    let period = config.poll_interval();
    let state = DaemonState::new(home.clone(), mode, period, load_account_cache(&home)?);
    tracing::info!(
        home = %home.display(),
        interval_secs = period.as_secs(),
        mode = ?mode,
        "tagwatch daemon starting",
    );

    let (poll_tx, poll_rx) = mpsc::channel::<PollJob>(64);
    let shutdown = Shutdown::new();

    let scheduler_handle = {
        let shutdown = shutdown.clone();
        let poll_tx = poll_tx.clone();
        tokio::spawn(async move {
            let result = scheduler_task(poll_tx, period, shutdown.subscribe()).await;
            shutdown.trigger();
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = poll_processor_task(
                state,
                shutdown.cancel.clone(),
                poll_rx,
                shutdown.subscribe(),
            )
            .await;
            shutdown.trigger();
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(state, poll_tx, shutdown.clone(), shutdown.subscribe()).await;
            shutdown.trigger();
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            shutdown.trigger();
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, processor_result, socket_result, signal_result) = tokio::join!(
        scheduler_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("poll_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("tagwatch daemon stopped");
    Ok(())
}

async fn scheduler_task(
    poll_tx: mpsc::Sender<PollJob>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue_poll(&poll_tx, PollTarget::All, "scheduler").await {
                    Ok(summary) => {
                        tracing::info!(
                            outcome = ?summary.outcome,
                            accounts = summary.accounts.len(),
                            committed = summary.committed,
                            notified = summary.notified,
                            failed = summary.failed.len(),
                            over_threshold = summary.over_threshold.len(),
                            duration_ms = summary.duration_ms,
                            "scheduled poll completed",
                        );
                    }
                    Err(DaemonError::ChannelClosed(channel)) => {
                        tracing::debug!(channel, "poll processor gone, stopping scheduler");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "scheduled poll failed");
                    }
                }
            }
        }
    }

    Ok(())
}

async fn poll_processor_task(
    state: DaemonState,
    cancel: CancelFlag,
    mut poll_rx: mpsc::Receiver<PollJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = poll_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let home = state.home.clone();
                let scope = job.target.scope();
                let mode = state.mode;
                let cycle_cancel = cancel.clone();
                let poll_result = tokio::task::spawn_blocking(move || {
                    pipeline::run(&home, scope, mode, &cycle_cancel)
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("poll task join error: {err}")))?;

                let outcome = match poll_result {
                    Ok(report) => {
                        {
                            let mut ts = state.timestamps.write().await;
                            record_timestamps(&mut ts, &report, unix_seconds_now());
                        }
                        let summary =
                            build_cycle_summary(&job.target, job.source, &report, started.elapsed());
                        *state.last_cycle.write().await = Some(summary.clone());
                        if let Err(err) = refresh_accounts(&state).await {
                            tracing::warn!(error = %err, "account cache refresh after poll failed");
                        }
                        Ok(summary)
                    }
                    Err(err) => Err(err.to_string()),
                };

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    state: DaemonState,
    poll_tx: mpsc::Sender<PollJob>,
    shutdown: Shutdown,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening for control requests");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let poll_tx = poll_tx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, poll_tx, shutdown).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: DaemonState,
    poll_tx: mpsc::Sender<PollJob>,
    shutdown: Shutdown,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match &request {
            DaemonRequest::Status => DaemonResponse::ok(build_status_payload(&state).await),
            DaemonRequest::Poll { account } => {
                let target = match account {
                    Some(account) => PollTarget::Account(account.clone()),
                    None => PollTarget::All,
                };
                match enqueue_poll(&poll_tx, target, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            DaemonRequest::Stop => {
                shutdown.trigger();
                DaemonResponse::ok(json!({ "stopping": true }))
            }
        };

        write_response(&mut writer, &response).await?;
        if request == DaemonRequest::Stop {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(state: &DaemonState) -> Value {
    let accounts: Vec<(String, String, usize)> = {
        let cache = state.accounts.read().await;
        let mut v: Vec<&Account> = cache.values().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v.into_iter()
            .map(|a| (a.name.0.clone(), a.registry.clone(), a.repositories.len()))
            .collect()
    };
    let ts_snapshot: PollTimestamps = state.timestamps.read().await.clone();
    let last_cycle = state.last_cycle.read().await.clone();

    let accounts: Vec<Value> = accounts
        .into_iter()
        .map(|(name, registry, repositories)| {
            let last_poll = ts_snapshot.get(&name).copied().unwrap_or(0);
            json!({
                "name": name,
                "registry": registry,
                "repositories": repositories,
                "last_poll_at_unix": last_poll,
            })
        })
        .collect();

    let last_poll_at_unix = ts_snapshot.values().copied().max().unwrap_or(0);

    json!({
        "running": true,
        "started_at_unix": state.started_at_unix,
        "last_poll_at_unix": last_poll_at_unix,
        "poll_interval_secs": state.poll_interval_secs,
        "mode": state.mode,
        "migration_in_progress": MarkerFileMigration::at(&state.home).is_running(),
        "last_cycle": last_cycle,
        "accounts": accounts,
        "socket": socket_path(&state.home).display().to_string(),
    })
}

async fn enqueue_poll(
    poll_tx: &mpsc::Sender<PollJob>,
    target: PollTarget,
    source: &'static str,
) -> Result<CycleSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    poll_tx
        .send(PollJob {
            target,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("poll queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("poll response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn refresh_accounts(state: &DaemonState) -> Result<(), DaemonError> {
    let home = state.home.clone();
    let refreshed = tokio::task::spawn_blocking(move || load_account_cache(&home))
        .await
        .map_err(|err| DaemonError::Protocol(format!("account refresh join error: {err}")))??;
    *state.accounts.write().await = refreshed;
    Ok(())
}

/// Stamp every account the cycle reached without failing.
fn record_timestamps(timestamps: &mut PollTimestamps, report: &CycleReport, now: u64) {
    for result in &report.accounts {
        if !matches!(result.outcome, AccountOutcome::Failed { .. }) {
            timestamps.insert(result.account.0.clone(), now);
        }
    }
}

fn build_cycle_summary(
    target: &PollTarget,
    source: &'static str,
    report: &CycleReport,
    duration: Duration,
) -> CycleSummary {
    let mut failed = Vec::new();
    let mut over_threshold = Vec::new();
    for result in &report.accounts {
        match result.outcome {
            AccountOutcome::Failed { .. } => failed.push(result.account.0.clone()),
            AccountOutcome::OverThreshold { .. } => over_threshold.push(result.account.0.clone()),
            AccountOutcome::Committed { .. } | AccountOutcome::DryRun { .. } => {}
        }
    }
    let totals = report.totals();

    CycleSummary {
        target: target.label(),
        source: source.to_string(),
        mode: report.mode,
        outcome: report.outcome,
        accounts: report
            .accounts
            .iter()
            .map(|r| r.account.0.clone())
            .collect(),
        failed,
        over_threshold,
        committed: totals.committed,
        notified: totals.notifications.sent,
        duration_ms: duration.as_millis(),
    }
}

fn load_account_cache(home: &Path) -> Result<AccountCache, DaemonError> {
    Ok(registry::list_accounts_at(home)?
        .into_iter()
        .map(|account| (account.name.clone(), account))
        .collect())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    registry::accounts_dir_at(home)?;
    for dir in [cache_dir(home), run_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
