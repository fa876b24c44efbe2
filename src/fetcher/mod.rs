//! The Log Fetcher (spec §4.4): per-source forward and backward log
//! streams, built on top of the [`cluster`](crate::cluster) byte-stream
//! primitive.

pub mod grep;
pub mod parse;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::{ByteStream, ClusterClient, PodLogOptions};
use crate::error::{StreamOpenError, StreamReadError};
use crate::source::{LogRecord, LogSource};
use parse::LineScanner;

const FORWARD_CHANNEL_CAPACITY: usize = 256;
const BACKWARD_CHANNEL_CAPACITY: usize = 256;
const MIN_BATCH_SIZE: usize = 10;

/// How a forward stream should behave once it catches up to the live end
/// of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    /// Don't follow; close once the past replay is exhausted.
    No,
    /// Follow from wherever `start_time`/the underlying API's default
    /// picks up.
    Default,
    /// Follow starting only from the current end of the log, ignoring any
    /// history (used when a new source appears mid-`follow`).
    FromEnd,
}

#[derive(Debug, Clone)]
pub struct ForwardOptions {
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub grep: Option<Arc<Regex>>,
    pub follow: Follow,
    /// Preallocation hint for the line scanner's buffer; does not bound
    /// how large a single line may grow (see [`parse::MAX_BUFFER_SIZE`]).
    pub max_chunk_size: usize,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            start_time: None,
            stop_time: None,
            grep: None,
            follow: Follow::No,
            max_chunk_size: parse::INITIAL_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackwardOptions {
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub grep: Option<Arc<Regex>>,
    pub batch_size_hint: usize,
}

impl Default for BackwardOptions {
    fn default() -> Self {
        Self {
            start_time: None,
            stop_time: None,
            grep: None,
            batch_size_hint: MIN_BATCH_SIZE,
        }
    }
}

/// Turns a single [`LogSource`] into an ordered (or reverse-ordered)
/// channel of [`LogRecord`]s.
#[derive(Clone)]
pub struct LogFetcher<C: ClusterClient> {
    cluster: C,
}

impl<C: ClusterClient> LogFetcher<C> {
    pub fn new(cluster: C) -> Self {
        Self { cluster }
    }

    /// Chronological stream, optionally following. See spec §4.4.
    pub async fn stream_forward(
        &self,
        cancel: CancellationToken,
        source: LogSource,
        opts: ForwardOptions,
    ) -> Result<mpsc::Receiver<LogRecord>, StreamOpenError> {
        let pod_opts = match opts.follow {
            Follow::FromEnd => PodLogOptions {
                follow: true,
                tail_lines: Some(0),
                since_time: None,
                limit_bytes: None,
            },
            Follow::Default => PodLogOptions {
                follow: true,
                tail_lines: None,
                since_time: opts.start_time,
                limit_bytes: None,
            },
            Follow::No => PodLogOptions {
                follow: false,
                tail_lines: None,
                since_time: opts.start_time,
                limit_bytes: None,
            },
        };

        let byte_stream = match self.cluster.open_log_stream(&source, &pod_opts).await {
            Ok(stream) => stream,
            Err(StreamOpenError::NotFound) => {
                debug!(%source, "forward open: pod not found, treating as empty source");
                let (_tx, rx) = mpsc::channel(1);
                return Ok(rx);
            }
            Err(other) => return Err(other),
        };

        let (tx, rx) = mpsc::channel(FORWARD_CHANNEL_CAPACITY);
        tokio::spawn(run_forward(byte_stream, source, opts, tx, cancel));
        Ok(rx)
    }

    /// Reverse-chronological stream, batched tail-N with adaptive growth.
    /// See spec §4.4.
    pub async fn stream_backward(
        &self,
        cancel: CancellationToken,
        source: LogSource,
        opts: BackwardOptions,
    ) -> Result<mpsc::Receiver<LogRecord>, StreamOpenError> {
        let first_ts = match first_timestamp(&self.cluster, &source, opts.start_time).await {
            Ok(Some(ts)) => ts,
            Ok(None) => {
                debug!(%source, "backward open: log is empty, nothing to tail");
                let (_tx, rx) = mpsc::channel(1);
                return Ok(rx);
            }
            Err(StreamOpenError::NotFound) => {
                debug!(%source, "backward open: pod not found, treating as empty source");
                let (_tx, rx) = mpsc::channel(1);
                return Ok(rx);
            }
            Err(other) => return Err(other),
        };

        let (tx, rx) = mpsc::channel(BACKWARD_CHANNEL_CAPACITY);
        let cluster = self.cluster.clone();
        tokio::spawn(run_backward(cluster, source, opts, first_ts, tx, cancel));
        Ok(rx)
    }
}

/// Sends `record`, racing against cancellation. `Err` means the caller
/// should stop producing (either the consumer is gone or we were
/// cancelled); neither case emits a sentinel.
async fn send_or_stop(
    tx: &mpsc::Sender<LogRecord>,
    record: LogRecord,
    cancel: &CancellationToken,
) -> Result<(), ()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(()),
        result = tx.send(record) => result.map_err(|_| ()),
    }
}

async fn run_forward<S>(mut byte_stream: S, source: LogSource, opts: ForwardOptions, tx: mpsc::Sender<LogRecord>, cancel: CancellationToken)
where
    S: Stream<Item = std::io::Result<Vec<u8>>> + Unpin,
{
    let mut scanner = LineScanner::with_capacity_hint(opts.max_chunk_size);

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = byte_stream.next() => chunk,
        };

        let Some(chunk) = chunk else {
            return; // underlying source ended
        };

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = send_or_stop(
                    &tx,
                    LogRecord::sentinel(source.clone(), StreamReadError::Io(err.to_string())),
                    &cancel,
                )
                .await;
                return;
            }
        };

        let lines = match scanner.feed(&chunk) {
            Ok(lines) => lines,
            Err(err) => {
                let _ = send_or_stop(&tx, LogRecord::sentinel(source.clone(), err), &cancel).await;
                return;
            }
        };

        for line in lines {
            let Some((timestamp, message)) = parse::parse_line(&line) else {
                continue;
            };

            if let Some(stop) = opts.stop_time {
                if timestamp > stop {
                    return;
                }
            }
            if let Some(start) = opts.start_time {
                if timestamp < start {
                    continue;
                }
            }
            if let Some(grep) = &opts.grep {
                if !grep.is_match(&message) {
                    continue;
                }
            }

            let record = LogRecord::new(timestamp, message, source.clone());
            if send_or_stop(&tx, record, &cancel).await.is_err() {
                return;
            }
        }
    }
}

/// Peeks the first few dozen bytes of `source`'s log to find the first
/// timestamp at or after `start_time`. `Ok(None)` means the log is empty.
async fn first_timestamp<C: ClusterClient>(
    cluster: &C,
    source: &LogSource,
    start_time: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>, StreamOpenError> {
    let mut byte_stream = cluster.peek_log(source).await?;
    let mut scanner = LineScanner::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|err| StreamOpenError::Other(err.to_string()))?;
        match scanner.feed(&chunk) {
            Ok(lines) => {
                for line in lines {
                    if let Some((timestamp, _)) = parse::parse_line(&line) {
                        if start_time.is_none_or(|start| timestamp >= start) {
                            return Ok(Some(timestamp));
                        }
                    }
                }
            }
            Err(_) => return Ok(None),
        }
    }

    Ok(None)
}

enum BatchOutcome {
    /// Newly discovered records, ascending (oldest first), strictly older
    /// than the previous round's `last_batch_start_ts`.
    Records(Vec<LogRecord>),
    /// The log grew past our read window; the caller should widen it and
    /// retry.
    Grew,
    Empty,
}

async fn read_batch<S>(
    mut byte_stream: S,
    last_batch_start_ts: Option<DateTime<Utc>>,
    source: &LogSource,
    cancel: &CancellationToken,
) -> Result<BatchOutcome, StreamReadError>
where
    S: Stream<Item = std::io::Result<Vec<u8>>> + Unpin,
{
    let mut scanner = LineScanner::new();
    let mut records = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(BatchOutcome::Empty),
            chunk = byte_stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|err| StreamReadError::Io(err.to_string()))?;
        for line in scanner.feed(&chunk)? {
            if let Some((timestamp, message)) = parse::parse_line(&line) {
                records.push(LogRecord::new(timestamp, message, source.clone()));
            }
        }
    }

    if records.is_empty() {
        return Ok(BatchOutcome::Empty);
    }

    if let Some(last_start) = last_batch_start_ts {
        if records[0].timestamp >= last_start {
            return Ok(BatchOutcome::Grew);
        }
        // Keep only the genuinely-new prefix: everything strictly older
        // than the boundary we already emitted last round.
        let kept: Vec<LogRecord> = records.into_iter().take_while(|r| r.timestamp != last_start).collect();
        return Ok(BatchOutcome::Records(kept));
    }

    Ok(BatchOutcome::Records(records))
}

async fn run_backward<C: ClusterClient>(
    cluster: C,
    source: LogSource,
    opts: BackwardOptions,
    first_ts: DateTime<Utc>,
    tx: mpsc::Sender<LogRecord>,
    cancel: CancellationToken,
) {
    let mut batch_size = opts.batch_size_hint.max(MIN_BATCH_SIZE);
    let mut tail_lines = batch_size;
    let mut last_batch_start_ts: Option<DateTime<Utc>> = None;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let pod_opts = PodLogOptions {
            follow: false,
            tail_lines: Some(tail_lines as i64),
            since_time: None,
            limit_bytes: None,
        };

        let byte_stream = match cluster.open_log_stream(&source, &pod_opts).await {
            Ok(stream) => stream,
            Err(StreamOpenError::NotFound) => return,
            Err(StreamOpenError::Other(msg)) => {
                let _ = send_or_stop(&tx, LogRecord::sentinel(source.clone(), StreamReadError::Cluster(msg)), &cancel).await;
                return;
            }
        };

        let outcome = match read_batch(byte_stream, last_batch_start_ts, &source, &cancel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = send_or_stop(&tx, LogRecord::sentinel(source.clone(), err), &cancel).await;
                return;
            }
        };

        let batch = match outcome {
            BatchOutcome::Empty => return,
            BatchOutcome::Grew => {
                batch_size *= 2;
                tail_lines += batch_size;
                warn!(%source, new_batch_size = batch_size, "log grew past read window, widening");
                continue;
            }
            BatchOutcome::Records(batch) if batch.is_empty() => return,
            BatchOutcome::Records(batch) => batch,
        };

        let mut stopped_on_start_time = false;
        for record in batch.iter().rev() {
            if let Some(stop) = opts.stop_time {
                if record.timestamp > stop {
                    continue;
                }
            }
            if let Some(start) = opts.start_time {
                if record.timestamp < start {
                    stopped_on_start_time = true;
                    break;
                }
            }
            if let Some(grep) = &opts.grep {
                if !grep.is_match(&record.message) {
                    continue;
                }
            }
            if send_or_stop(&tx, record.clone(), &cancel).await.is_err() {
                return;
            }
        }

        let batch_start_ts = batch[0].timestamp;
        last_batch_start_ts = Some(batch_start_ts);

        if stopped_on_start_time || batch_start_ts <= first_ts {
            return;
        }

        tail_lines += batch_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClusterClient;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn source() -> LogSource {
        LogSource {
            namespace: "ns".into(),
            pod_name: "pod".into(),
            container_name: "c".into(),
            container_id: "cid".into(),
            metadata: Default::default(),
        }
    }

    fn line(secs: i64, message: &str) -> String {
        format!("{} {}\n", ts(secs).to_rfc3339_opts(chrono::SecondsFormat::Nanos, true), message)
    }

    #[tokio::test]
    async fn forward_emits_in_ascending_order_filtered_by_window() {
        let mut log = String::new();
        log.push_str(&line(0, "a"));
        log.push_str(&line(1, "b"));
        log.push_str(&line(2, "c"));

        let cluster = FakeClusterClient::new().with_log("ns", "pod", "c", log);
        let fetcher = LogFetcher::new(cluster);

        let mut rx = fetcher
            .stream_forward(
                CancellationToken::new(),
                source(),
                ForwardOptions {
                    start_time: Some(ts(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut messages = Vec::new();
        while let Some(record) = rx.recv().await {
            assert!(!record.is_sentinel());
            messages.push(record.message);
        }
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn forward_not_found_closes_without_sentinel() {
        let cluster = FakeClusterClient::new(); // no log registered => NotFound
        let fetcher = LogFetcher::new(cluster);

        let mut rx = fetcher
            .stream_forward(CancellationToken::new(), source(), ForwardOptions::default())
            .await
            .unwrap();

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn backward_not_found_closes_without_sentinel() {
        let cluster = FakeClusterClient::new(); // no log registered => NotFound
        let fetcher = LogFetcher::new(cluster);

        let mut rx = fetcher
            .stream_backward(CancellationToken::new(), source(), BackwardOptions::default())
            .await
            .unwrap();

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn backward_emits_in_descending_order() {
        let mut log = String::new();
        for i in 0..5 {
            log.push_str(&line(i, &format!("m{i}")));
        }
        let cluster = FakeClusterClient::new().with_log("ns", "pod", "c", log);
        let fetcher = LogFetcher::new(cluster);

        let mut rx = fetcher
            .stream_backward(CancellationToken::new(), source(), BackwardOptions::default())
            .await
            .unwrap();

        let mut messages = Vec::new();
        while let Some(record) = rx.recv().await {
            messages.push(record.message);
        }
        assert_eq!(messages, vec!["m4", "m3", "m2", "m1", "m0"]);
    }

    #[tokio::test]
    async fn backward_adaptive_growth_on_log_growth_between_batches() {
        // The real log keeps 28 lines (m0..m27) by the time streaming
        // starts, but each successive `tail -n` request in the fake sees
        // a different rotated window, forcing one `Grew` round before the
        // batch finally reaches all the way back to `m0`.
        let round1: String = (5..15).map(|i| line(i, &format!("m{i}"))).collect(); // tail=10 -> m5..m14
        let round2: String = (8..28).map(|i| line(i, &format!("m{i}"))).collect(); // tail=20 -> m8..m27 (Grew)
        let round3: String = (0..28).map(|i| line(i, &format!("m{i}"))).collect(); // tail=40 -> m0..m27

        let cluster = FakeClusterClient::new().with_growing_log(
            "ns",
            "pod",
            "c",
            line(0, "m0"), // firstTimestamp peek: oldest line is m0
            vec![round1, round2, round3],
        );
        let fetcher = LogFetcher::new(cluster);

        let mut rx = fetcher
            .stream_backward(
                CancellationToken::new(),
                source(),
                BackwardOptions {
                    batch_size_hint: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut messages = Vec::new();
        while let Some(record) = rx.recv().await {
            messages.push(record.message);
        }
        messages.reverse();
        let expected: Vec<String> = (0..15).map(|i| format!("m{i}")).collect();
        assert_eq!(messages, expected);
    }
}
