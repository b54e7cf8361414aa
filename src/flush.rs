use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use itertools::Itertools as _;

use crate::codec::format::Raw;
use crate::device::GpuDevice;
use crate::directory::RowId;
use crate::error::Result;
use crate::store::Store;

/// The mutation kind that produced a pending write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Add,
    Put,
    Delete,
}

/// One queued host-to-device payload write.
#[derive(Debug)]
pub struct PendingWrite {
    pub store: String,
    pub row_id: RowId,
    pub chunk_index: usize,
    pub offset: u64,
    pub bytes: Vec<u8>,
    pub op: WriteOp,
    pub key: Option<String>,
}

/// Batches mutations and flushes them to the device as grouped,
/// offset-ordered submissions. Readiness is false from the first
/// mutation until the end of the next timed flush.
pub struct FlushEngine {
    pending: Vec<PendingWrite>,
    debounce: Duration,
    deadline: Option<Instant>,
    ready: bool,
}

impl FlushEngine {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: Vec::new(),
            debounce,
            deadline: None,
            ready: true,
        }
    }

    /// Append a write in call order and restart the debounce window.
    pub fn enqueue(&mut self, write: PendingWrite) {
        self.pending.push(write);
        self.deadline = Some(Instant::now() + self.debounce);
        self.ready = false;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_for(&self, store: &str) -> usize {
        self.pending.iter().filter(|w| w.store == store).count()
    }

    /// True once the queue has drained through a timed flush and the
    /// sort rebuild that follows it.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Time left in the debounce window, or None when nothing is queued.
    pub fn time_until_due(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Mark the timed flush cycle complete.
    pub fn mark_ready(&mut self) {
        self.ready = true;
        self.deadline = None;
    }

    /// Discard queued writes for a store being dropped or cleared; their
    /// target buffers are about to be destroyed.
    pub fn discard_store(&mut self, store: &str) {
        self.pending.retain(|w| w.store != store);
    }

    /// Submit every queued write. Entries are grouped per target chunk
    /// and ordered by offset within each group to keep device-side
    /// scatter low. Failed entries are logged and retained for the next
    /// flush; everything else is committed behind one queue barrier.
    pub async fn flush(
        &mut self,
        device: &GpuDevice,
        stores: &BTreeMap<String, Store>,
    ) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let entries = order_for_submission(std::mem::take(&mut self.pending));
        let mut submitted = 0usize;
        let mut retained = Vec::new();

        let groups: Vec<((String, usize), Vec<PendingWrite>)> = entries
            .into_iter()
            .chunk_by(|entry| (entry.store.clone(), entry.chunk_index))
            .into_iter()
            .map(|(target, group)| (target, group.collect()))
            .collect();
        for ((store_name, chunk_index), group) in groups {
            // A store dropped after enqueue takes its queued writes with
            // it; anything left here is stale.
            let Some(store) = stores.get(&store_name) else {
                continue;
            };
            let buffer = &store.chunks.chunk(chunk_index).buffer;
            for entry in group {
                match device.checked_write(buffer, entry.offset, &entry.bytes).await {
                    Ok(()) => submitted += 1,
                    Err(e) => {
                        tracing::warn!(
                            store = %store_name,
                            row_id = entry.row_id,
                            key = entry.key.as_deref().unwrap_or("?"),
                            payload = %Raw::bytes(&entry.bytes),
                            error = %e,
                            "write failed, entry retained for retry"
                        );
                        retained.push(entry);
                    }
                }
            }
        }

        device.await_queue();

        tracing::debug!(
            submitted,
            retained = retained.len(),
            "flushed pending writes"
        );
        // Entries enqueued mid-flush do not exist: the host side is
        // single-threaded cooperative.
        self.pending = retained;
        Ok(())
    }
}

/// Stable-sort entries by (chunk handle, offset): each chunk's writes
/// become one ascending run while same-slot writes keep call order.
fn order_for_submission(mut entries: Vec<PendingWrite>) -> Vec<PendingWrite> {
    entries.sort_by(|a, b| {
        (&a.store, a.chunk_index, a.offset).cmp(&(&b.store, b.chunk_index, b.offset))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(store: &str, chunk_index: usize, offset: u64) -> PendingWrite {
        PendingWrite {
            store: store.to_string(),
            row_id: 1,
            chunk_index,
            offset,
            bytes: vec![0; 4],
            op: WriteOp::Put,
            key: Some("k".to_string()),
        }
    }

    #[test]
    fn test_enqueue_tracks_readiness_and_deadline() {
        let mut engine = FlushEngine::new(Duration::from_millis(250));
        assert!(engine.is_ready());
        assert!(engine.time_until_due().is_none());

        engine.enqueue(write("s", 0, 0));
        assert!(!engine.is_ready());
        assert!(engine.time_until_due().unwrap() <= Duration::from_millis(250));

        engine.mark_ready();
        assert!(engine.is_ready());
        assert!(engine.time_until_due().is_none());
    }

    #[test]
    fn test_submission_order_groups_by_chunk_then_offset() {
        let entries = vec![
            write("s", 1, 512),
            write("s", 0, 768),
            write("s", 1, 0),
            write("s", 0, 256),
        ];
        let ordered = order_for_submission(entries);

        let seen: Vec<_> = ordered.iter().map(|w| (w.chunk_index, w.offset)).collect();
        assert_eq!(seen, [(0, 256), (0, 768), (1, 0), (1, 512)]);
    }

    #[test]
    fn test_submission_order_keeps_same_slot_call_order() {
        let mut first = write("s", 0, 256);
        first.bytes = vec![1; 4];
        let mut second = write("s", 0, 256);
        second.bytes = vec![2; 4];

        let ordered = order_for_submission(vec![first, second]);
        assert_eq!(ordered[0].bytes, vec![1; 4]);
        assert_eq!(ordered[1].bytes, vec![2; 4]);
    }

    #[test]
    fn test_discard_store_drops_only_its_entries() {
        let mut engine = FlushEngine::new(Duration::from_millis(250));
        engine.enqueue(write("a", 0, 0));
        engine.enqueue(write("b", 0, 0));
        engine.enqueue(write("a", 0, 256));

        engine.discard_store("a");
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.pending_for("b"), 1);
    }
}
