//! The N-way merge engine (spec §4.5): merges one ordered [`LogRecord`]
//! channel per source into a single ordered output channel using a binary
//! heap, allocated once per merge invocation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::source::LogRecord;

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

struct HeapEntry {
    timestamp: DateTime<Utc>,
    input_index: usize,
    record: LogRecord,
    reverse: bool,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.input_index == other.input_index
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// `BinaryHeap` pops the greatest element, so "greatest" here means
    /// "should come out of the merge next": the smaller timestamp when
    /// `reverse` is false, the larger one when `reverse` is true. Ties
    /// break on `input_index` (smaller index wins), giving the
    /// deterministic-but-arbitrary tie order the design calls for.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_time = if self.reverse {
            self.timestamp.cmp(&other.timestamp)
        } else {
            other.timestamp.cmp(&self.timestamp)
        };
        by_time.then_with(|| other.input_index.cmp(&self.input_index))
    }
}

/// Merges `inputs` into a single ordered channel. `reverse` selects the
/// comparator: forward (`false`) emits ascending by timestamp, `true`
/// emits descending. The merge task stops pulling inputs and closes the
/// output as soon as `cancel` fires.
pub fn merge(cancel: CancellationToken, reverse: bool, inputs: Vec<mpsc::Receiver<LogRecord>>) -> mpsc::Receiver<LogRecord> {
    let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    tokio::spawn(run_merge(inputs, reverse, tx, cancel));
    rx
}

async fn run_merge(mut inputs: Vec<mpsc::Receiver<LogRecord>>, reverse: bool, tx: mpsc::Sender<LogRecord>, cancel: CancellationToken) {
    let mut heap = BinaryHeap::with_capacity(inputs.len());

    for (input_index, rx) in inputs.iter_mut().enumerate() {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            received = rx.recv() => received,
        };
        if let Some(record) = received {
            heap.push(HeapEntry {
                timestamp: record.timestamp,
                input_index,
                record,
                reverse,
            });
        }
    }

    while let Some(entry) = heap.pop() {
        let HeapEntry { input_index, record, .. } = entry;

        let sent = tokio::select! {
            _ = cancel.cancelled() => false,
            result = tx.send(record) => result.is_ok(),
        };
        if !sent {
            return;
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = inputs[input_index].recv() => next,
        };
        if let Some(next) = next {
            heap.push(HeapEntry {
                timestamp: next.timestamp,
                input_index,
                record: next,
                reverse,
            });
        }
    }
}
