//! Persistent queue: an on-disk, segment-file-based FIFO.
//!
//! Each queue directory holds a sequence of segment files named by a
//! zero-padded monotonic index (`00000000000000000000.seg`, ...). Entries
//! are serialized with `serde_json` and stored length-prefixed (`u32`
//! little-endian length + payload) as a self-describing byte buffer.
//! `segment_size` bounds how many entries live in one file, which in turn
//! bounds crash-recovery cost.

mod segment;

use crate::error::{PipelineError, Result};
use segment::{Segment, SegmentWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

struct QueueState {
    /// Indices of sealed segment files that still have unread entries,
    /// oldest first. The head of this list (or the active writer segment,
    /// if this list is empty) is the next segment to dequeue from.
    sealed: VecDeque<SealedSegment>,
    writer: SegmentWriter,
    next_index: u64,
    closed: bool,
}

struct SealedSegment {
    index: u64,
    reader: Segment,
}

/// A disk-backed FIFO queue of `T`.
pub struct PersistentQueue<T> {
    dir: PathBuf,
    name: String,
    segment_size: usize,
    state: Mutex<QueueState>,
    size: AtomicUsize,
    notify: Notify,
    _marker: std::marker::PhantomData<T>,
}

impl<T> PersistentQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Opens (creating if absent) the queue directory `dir/name`, scanning
    /// existing segment files and reconstructing head/tail pointers.
    /// Partial writes at the tail of the last segment are truncated.
    pub fn open(name: &str, dir: &Path, segment_size: usize) -> Result<Self> {
        let queue_dir = dir.join(name);
        std::fs::create_dir_all(&queue_dir).map_err(PipelineError::Enqueue)?;

        let mut indices = segment::list_segment_indices(&queue_dir).map_err(PipelineError::Enqueue)?;
        indices.sort_unstable();

        let mut sealed = VecDeque::new();
        let mut total = 0usize;
        let mut next_index = 0u64;

        for (pos, index) in indices.iter().enumerate() {
            let path = segment::segment_path(&queue_dir, *index);
            let is_last = pos + 1 == indices.len();
            let segment = Segment::open_and_recover(&path, is_last)?;
            total += segment.remaining();
            next_index = index + 1;
            if segment.remaining() > 0 || !is_last {
                sealed.push_back(SealedSegment {
                    index: *index,
                    reader: segment,
                });
            }
        }

        let writer = SegmentWriter::open(&queue_dir, next_index)?;

        Ok(PersistentQueue {
            dir: queue_dir,
            name: name.to_string(),
            segment_size,
            state: Mutex::new(QueueState {
                sealed,
                writer,
                next_index: next_index + 1,
                closed: false,
            }),
            size: AtomicUsize::new(total),
            notify: Notify::new(),
            _marker: std::marker::PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current entry count, across sealed segments and the active writer.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Appends `entry`, rolling to a new segment file when the active one
    /// reaches `segment_size`. Wakes any blocked dequeuer.
    pub fn enqueue(&self, entry: &T) -> Result<()> {
        let bytes = serde_json::to_vec(entry).map_err(PipelineError::Serialization)?;
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if state.closed {
            return Err(PipelineError::ProcessorClosed);
        }
        state.writer.append(&bytes).map_err(PipelineError::Enqueue)?;
        self.size.fetch_add(1, Ordering::SeqCst);

        if state.writer.count() >= self.segment_size {
            let sealed_index = state.writer.index();
            let next_index = state.next_index;
            let new_writer = SegmentWriter::open(&self.dir, next_index)?;
            let old_writer = std::mem::replace(&mut state.writer, new_writer);
            state.next_index += 1;

            let reader = old_writer.into_sealed();
            if reader.remaining() > 0 {
                state.sealed.push_back(SealedSegment {
                    index: sealed_index,
                    reader,
                });
            } else {
                let _ = std::fs::remove_file(segment::segment_path(&self.dir, sealed_index));
            }
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Non-blocking dequeue; returns `Ok(None)` when the queue is empty.
    pub fn dequeue(&self) -> Result<Option<T>> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        self.dequeue_locked(&mut state)
    }

    fn dequeue_locked(&self, state: &mut QueueState) -> Result<Option<T>> {
        loop {
            if let Some(front) = state.sealed.front_mut() {
                match front.reader.read_next().map_err(PipelineError::Enqueue)? {
                    Some(bytes) => {
                        self.size.fetch_sub(1, Ordering::SeqCst);
                        if front.reader.remaining() == 0 {
                            let index = front.index;
                            state.sealed.pop_front();
                            let _ = std::fs::remove_file(segment::segment_path(&self.dir, index));
                        }
                        return decode(&bytes).map(Some);
                    }
                    None => {
                        let index = front.index;
                        state.sealed.pop_front();
                        let _ = std::fs::remove_file(segment::segment_path(&self.dir, index));
                        continue;
                    }
                }
            }

            // No sealed segments left; try the active writer segment, which
            // is also readable for entries already flushed to disk.
            return match state.writer.read_next().map_err(PipelineError::Enqueue)? {
                Some(bytes) => {
                    self.size.fetch_sub(1, Ordering::SeqCst);
                    decode(&bytes).map(Some)
                }
                None => Ok(None),
            };
        }
    }

    /// Blocking dequeue: waits for an enqueue signal when the queue is
    /// empty. Returns `Ok(None)` once the queue is closed and drained.
    pub async fn dequeue_block(&self) -> Result<Option<T>> {
        loop {
            {
                let mut state = self.state.lock().expect("queue mutex poisoned");
                if let Some(entry) = self.dequeue_locked(&mut state)? {
                    return Ok(Some(entry));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Waits for the next enqueue (or close) signal without consuming an
    /// entry. Returns immediately if data is already present.
    pub async fn wait_for_data(&self) {
        if self.size() > 0 {
            return;
        }
        self.notify.notified().await;
    }

    /// Toggles batched-fsync ("turbo") mode: writes are not synced on every
    /// enqueue, trading a bounded durability window for throughput.
    pub fn turbo_on(&self) {
        self.state.lock().expect("queue mutex poisoned").writer.set_turbo(true);
    }

    /// Forces a sync of the active segment; used periodically in turbo mode.
    pub fn turbo_sync(&self) -> Result<()> {
        self.state
            .lock()
            .expect("queue mutex poisoned")
            .writer
            .sync()
            .map_err(PipelineError::Enqueue)
    }

    /// Flushes and releases file handles. Does not delete any data.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.closed = true;
        let _ = state.writer.sync();
        self.notify.notify_waiters();
    }

    /// Deletes the entire queue directory from disk. Only called when the
    /// caller's configuration explicitly opts into deleting on `Stop()`
    /// (default is to not delete; see DESIGN.md).
    pub fn delete_all(&self) -> Result<()> {
        self.close();
        std::fs::remove_dir_all(&self.dir).map_err(PipelineError::Enqueue)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|_| PipelineError::InvalidQueueEntry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fifo_order_preserved_across_enqueue_dequeue() {
        let dir = tempdir().unwrap();
        let queue: PersistentQueue<i32> = PersistentQueue::open("q", dir.path(), 10).unwrap();
        for i in 0..5 {
            queue.enqueue(&i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.dequeue().unwrap(), Some(i));
        }
        assert_eq!(queue.dequeue().unwrap(), None);
    }

    #[tokio::test]
    async fn size_tracks_enqueue_and_dequeue() {
        let dir = tempdir().unwrap();
        let queue: PersistentQueue<i32> = PersistentQueue::open("q", dir.path(), 10).unwrap();
        queue.enqueue(&1).unwrap();
        queue.enqueue(&2).unwrap();
        assert_eq!(queue.size(), 2);
        queue.dequeue().unwrap();
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test]
    async fn rolls_segments_when_segment_size_reached() {
        let dir = tempdir().unwrap();
        let queue: PersistentQueue<i32> = PersistentQueue::open("q", dir.path(), 2).unwrap();
        for i in 0..7 {
            queue.enqueue(&i).unwrap();
        }
        assert_eq!(queue.size(), 7);
        for i in 0..7 {
            assert_eq!(queue.dequeue().unwrap(), Some(i));
        }
    }

    #[tokio::test]
    async fn dequeue_keeps_up_across_a_segment_seal() {
        let dir = tempdir().unwrap();
        let queue: PersistentQueue<i32> = PersistentQueue::open("q", dir.path(), 2).unwrap();
        // Drain from the active segment before it seals, so the sealed
        // reader must start from where the writer's read cursor left off
        // rather than re-serving already-consumed entries.
        queue.enqueue(&0).unwrap();
        assert_eq!(queue.dequeue().unwrap(), Some(0));
        queue.enqueue(&1).unwrap();
        assert_eq!(queue.size(), 1);
        // This enqueue reaches segment_size and seals the segment.
        queue.enqueue(&2).unwrap();
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.dequeue().unwrap(), Some(1));
        assert_eq!(queue.dequeue().unwrap(), Some(2));
        assert_eq!(queue.dequeue().unwrap(), None);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn survives_reopen_crash_recovery() {
        let dir = tempdir().unwrap();
        {
            let queue: PersistentQueue<i32> = PersistentQueue::open("q", dir.path(), 3).unwrap();
            for i in 0..10 {
                queue.enqueue(&i).unwrap();
            }
            queue.close();
        }
        let queue: PersistentQueue<i32> = PersistentQueue::open("q", dir.path(), 3).unwrap();
        assert_eq!(queue.size(), 10);
        for i in 0..10 {
            assert_eq!(queue.dequeue().unwrap(), Some(i));
        }
    }

    #[tokio::test]
    async fn dequeue_block_wakes_on_enqueue() {
        let dir = tempdir().unwrap();
        let queue = std::sync::Arc::new(PersistentQueue::<i32>::open("q", dir.path(), 10).unwrap());
        let reader = queue.clone();
        let handle = tokio::spawn(async move { reader.dequeue_block().await.unwrap() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.enqueue(&42).unwrap();
        let value = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, Some(42));
    }

    #[tokio::test]
    async fn dequeue_block_returns_none_after_close() {
        let dir = tempdir().unwrap();
        let queue = std::sync::Arc::new(PersistentQueue::<i32>::open("q", dir.path(), 10).unwrap());
        let reader = queue.clone();
        let handle = tokio::spawn(async move { reader.dequeue_block().await.unwrap() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.close();
        let value = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, None);
    }
}
