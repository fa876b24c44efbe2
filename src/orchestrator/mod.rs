//! The Stream Orchestrator (spec §4.6): ties the Source Watcher, Log
//! Fetcher, and Merge Engine together behind a single unified output
//! channel, applying mode/since/until/grep and reconciling the boundary
//! between historical ("past") and follow ("future") records.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::error::{ConfigError, EngineError, StreamReadError};
use crate::fetcher::{grep, BackwardOptions, Follow, ForwardOptions, LogFetcher};
use crate::merge;
use crate::path::{self, ParsedSourcePath};
use crate::source::{FacetFilters, LogRecord, LogSource};
use crate::watcher::{SourceEvent, SourceWatcher};

/// Tokio's `mpsc` has no true zero-capacity channel; `1` is the closest
/// rendezvous-like equivalent to the design's unbuffered internal
/// channels, and still gives producers real backpressure.
const INTERNAL_CHANNEL_CAPACITY: usize = 1;
const OUTPUT_CHANNEL_CAPACITY: usize = 1;
const PHASE_B_DRAIN_BUDGET: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Head,
    Tail,
    All,
}

/// Orchestrator configuration (spec §4.6 table).
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: Vec<String>,
    pub default_namespace: String,
    pub allowed_namespaces: Option<Vec<String>>,
    pub filters: FacetFilters,
    pub mode: Mode,
    pub max_num: usize,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub follow: bool,
    pub grep: Option<String>,
}

type ErrorSlot = Arc<Mutex<Option<StreamReadError>>>;

/// Ties the Source Watcher, Log Fetcher, and Merge Engine into a single
/// output channel of ordered [`LogRecord`]s.
pub struct Orchestrator<C: ClusterClient> {
    cluster: C,
    parsed_paths: Vec<ParsedSourcePath>,
    config: Config,
    grep: Option<Arc<Regex>>,
    cancel: CancellationToken,
    error: ErrorSlot,
}

impl<C: ClusterClient> Orchestrator<C> {
    /// Validates `config`, parses its source paths, and compiles its grep
    /// pattern. Does not touch the cluster; call [`Self::start`] for that.
    pub fn new(cluster: C, mut config: Config) -> Result<Self, EngineError> {
        if config.follow && config.mode == Mode::Head {
            return Err(ConfigError::FollowWithHead.into());
        }
        if config.follow {
            if let Some(until) = config.until {
                if until < Utc::now() {
                    info!(%until, "until already elapsed, disabling follow");
                    config.follow = false;
                }
            }
        }

        let parsed_paths = config
            .paths
            .iter()
            .map(|raw| path::parse(raw, &config.default_namespace, config.allowed_namespaces.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        let grep = config
            .grep
            .as_deref()
            .map(grep::compile)
            .transpose()
            .map_err(|err| ConfigError::InvalidGrepPattern(err.to_string()))?
            .map(Arc::new);

        Ok(Self {
            cluster,
            parsed_paths,
            config,
            grep,
            cancel: CancellationToken::new(),
            error: Arc::new(Mutex::new(None)),
        })
    }

    fn forward_opts(&self, follow: Follow) -> ForwardOptions {
        ForwardOptions {
            start_time: self.config.since,
            stop_time: self.config.until,
            grep: self.grep.clone(),
            follow,
        }
    }

    fn backward_opts(&self) -> BackwardOptions {
        BackwardOptions {
            start_time: self.config.since,
            stop_time: self.config.until,
            grep: self.grep.clone(),
            batch_size_hint: 10,
        }
    }

    /// Runs the startup sequence (spec §4.6 "Start") and returns the
    /// unified output channel.
    pub async fn start(&self) -> Result<mpsc::Receiver<LogRecord>, EngineError> {
        let watcher = SourceWatcher::new(self.cluster.clone(), self.parsed_paths.clone(), self.config.filters.clone());
        let source_events = watcher.subscribe();

        watcher.start(self.cancel.clone()).await?;
        let cohort = watcher.current_sources().await;
        info!(count = cohort.len(), "past cohort snapshotted");

        let fetcher = LogFetcher::new(self.cluster.clone());
        let reverse = self.config.mode == Mode::Tail;

        let mut past_inputs = Vec::new();
        for source in &cohort {
            // `stream_forward`/`stream_backward` already turn a not-found
            // pod into an immediately-closed, sentinel-free stream (spec
            // §8 scenario 6), so a genuine `Err` here is always some
            // other cluster-access problem worth failing `start` over.
            let rx = match self.config.mode {
                Mode::Tail => fetcher.stream_backward(self.cancel.clone(), source.clone(), self.backward_opts()).await?,
                Mode::Head | Mode::All => {
                    fetcher.stream_forward(self.cancel.clone(), source.clone(), self.forward_opts(Follow::No)).await?
                }
            };
            past_inputs.push(rx);
        }
        let past_merged = merge::merge(self.cancel.clone(), reverse, past_inputs);

        let (past_out_tx, past_out_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        tokio::spawn(past_forwarder(
            past_merged,
            self.config.mode,
            self.config.max_num,
            past_out_tx,
            Arc::clone(&self.error),
            self.cancel.clone(),
        ));

        let (future_tx, future_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        if self.config.follow {
            for source in &cohort {
                let rx = fetcher
                    .stream_forward(self.cancel.clone(), source.clone(), self.forward_opts(Follow::FromEnd))
                    .await?;
                tokio::spawn(future_forwarder(rx, future_tx.clone(), Arc::clone(&self.error), self.cancel.clone()));
            }

            tokio::spawn(dynamic_sources(
                source_events,
                cohort.into_iter().collect::<HashSet<_>>(),
                fetcher,
                self.forward_opts(Follow::Default),
                future_tx.clone(),
                Arc::clone(&self.error),
                self.cancel.clone(),
            ));
        }
        drop(future_tx);

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::spawn(reconcile(past_out_rx, future_rx, out_tx, self.cancel.clone()));

        Ok(out_rx)
    }

    /// The first terminal error recorded by a past or future forwarder, if
    /// any. Meaningful only after the output channel has closed.
    pub fn err(&self) -> Option<StreamReadError> {
        self.error.lock().unwrap().clone()
    }

    /// Cancels the root context, which stops every informer and fetcher
    /// and closes the output channel. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn send_or_cancel(tx: &mpsc::Sender<LogRecord>, record: LogRecord, cancel: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(()),
        result = tx.send(record) => result.map_err(|_| ()),
    }
}

fn set_error_once(slot: &ErrorSlot, err: Option<StreamReadError>) {
    let Some(err) = err else { return };
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(err);
    }
}

/// Drains the merged past stream, applying the mode's count cap and, for
/// `tail`, buffering in memory and re-emitting in ascending order (spec
/// §4.6 "Past forwarder").
async fn past_forwarder(
    mut past_rx: mpsc::Receiver<LogRecord>,
    mode: Mode,
    max_num: usize,
    out_tx: mpsc::Sender<LogRecord>,
    error: ErrorSlot,
    cancel: CancellationToken,
) {
    if mode == Mode::Tail {
        let mut buffer = Vec::new();
        while let Some(record) = recv_or_cancel(&mut past_rx, &cancel).await {
            if record.is_sentinel() {
                set_error_once(&error, record.err);
                break;
            }
            buffer.push(record);
            if buffer.len() >= max_num {
                break;
            }
        }
        for record in buffer.into_iter().rev() {
            if send_or_cancel(&out_tx, record, &cancel).await.is_err() {
                return;
            }
        }
        return;
    }

    let cap = (mode == Mode::Head).then_some(max_num);
    let mut emitted = 0usize;
    while let Some(record) = recv_or_cancel(&mut past_rx, &cancel).await {
        if record.is_sentinel() {
            set_error_once(&error, record.err);
            break;
        }
        if send_or_cancel(&out_tx, record, &cancel).await.is_err() {
            return;
        }
        emitted += 1;
        if cap.is_some_and(|cap| emitted >= cap) {
            break;
        }
    }
}

async fn recv_or_cancel(rx: &mut mpsc::Receiver<LogRecord>, cancel: &CancellationToken) -> Option<LogRecord> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        record = rx.recv() => record,
    }
}

/// Forwards one source's forward-from-end stream into the shared future
/// channel until it closes, or a terminal sentinel arrives (spec §4.6
/// "Future forwarder").
async fn future_forwarder(mut rx: mpsc::Receiver<LogRecord>, tx: mpsc::Sender<LogRecord>, error: ErrorSlot, cancel: CancellationToken) {
    while let Some(record) = recv_or_cancel(&mut rx, &cancel).await {
        if record.is_sentinel() {
            set_error_once(&error, record.err);
            cancel.cancel();
            return;
        }
        if send_or_cancel(&tx, record, &cancel).await.is_err() {
            return;
        }
    }
}

/// Watches ADDED/DELETED events for sources that appear after the initial
/// cohort was snapshotted, starting a follow-from-default future forwarder
/// for each genuinely new one (spec §4.6 "Dynamic sources during follow").
/// The initial replay of the cohort's own ADDED events (queued on the
/// broadcast channel before `start` returned) is filtered out by `known`.
async fn dynamic_sources<C: ClusterClient>(
    mut events: broadcast::Receiver<SourceEvent>,
    mut known: HashSet<LogSource>,
    fetcher: LogFetcher<C>,
    future_opts: ForwardOptions,
    future_tx: mpsc::Sender<LogRecord>,
    error: ErrorSlot,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(SourceEvent::Added(source)) => {
                if known.insert(source.clone()) {
                    match fetcher.stream_forward(cancel.clone(), source.clone(), future_opts.clone()).await {
                        Ok(rx) => {
                            tokio::spawn(future_forwarder(rx, future_tx.clone(), Arc::clone(&error), cancel.clone()));
                        }
                        Err(err) => warn!(%source, %err, "failed to open future stream for newly added source"),
                    }
                }
            }
            Ok(SourceEvent::Deleted(source)) => {
                known.remove(&source);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "dynamic source watcher lagged, some ADDED/DELETED events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Merges the past and future channels into `out_tx` without duplicating
/// the boundary record (spec §4.6 "Reconciler", phases A-D).
async fn reconcile(mut past_rx: mpsc::Receiver<LogRecord>, mut future_rx: mpsc::Receiver<LogRecord>, out_tx: mpsc::Sender<LogRecord>, cancel: CancellationToken) {
    let mut last_ts: HashMap<LogSource, DateTime<Utc>> = HashMap::new();
    let mut buffer: Vec<LogRecord> = Vec::new();
    let mut future_closed = false;

    // Phase A: past is authoritative; future arrivals are buffered since
    // we don't yet know each source's final past timestamp.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            past = past_rx.recv() => {
                match past {
                    Some(record) => {
                        last_ts.insert(record.source.clone(), record.timestamp);
                        if send_or_cancel(&out_tx, record, &cancel).await.is_err() { return; }
                    }
                    None => break,
                }
            }
            future = future_rx.recv(), if !future_closed => {
                match future {
                    Some(record) => buffer.push(record),
                    None => future_closed = true,
                }
            }
        }
    }

    // Phase B: briefly drain whatever future records are already queued.
    if !future_closed {
        let deadline = tokio::time::Instant::now() + PHASE_B_DRAIN_BUDGET;
        loop {
            match future_rx.try_recv() {
                Ok(record) => buffer.push(record),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    future_closed = true;
                    break;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
        }
    }

    // Phase C: sorted, deduped emission of the buffer.
    buffer.sort_by_key(|record| record.timestamp);
    for record in buffer {
        if let Some(last) = last_ts.get(&record.source).copied() {
            if record.timestamp < last {
                continue;
            }
            if record.timestamp == last {
                last_ts.remove(&record.source);
                continue;
            }
        }
        if send_or_cancel(&out_tx, record, &cancel).await.is_err() {
            return;
        }
    }

    // Phase D: stream anything further directly, no more dedup needed.
    if !future_closed {
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => return,
                record = future_rx.recv() => record,
            };
            match record {
                Some(record) => {
                    if send_or_cancel(&out_tx, record, &cancel).await.is_err() {
                        return;
                    }
                }
                None => break,
            }
        }
    }
}
