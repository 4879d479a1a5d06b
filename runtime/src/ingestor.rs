//! Buffered batching of inbound messages.
//!
//! A [`BatchIngestor`] collects items and hands them to a [`BatchSink`] in
//! batches. A batch is cut when the buffer reaches `batch_size`, or
//! `flush_interval` after the first item buffered since the last flush,
//! whichever comes first.
//!
//! ```text
//! ingest ─► [buffer] ──(size reached)──► flush ─► spawn(sink.write(batch))
//!               │                          ▲
//!               └──(first item)─► timer ───┘
//! ```
//!
//! The buffer mutex is the only critical section: the batch is swapped out
//! under the lock and written on a spawned task, so slow storage never blocks
//! ingestion.

use crate::health::HealthCheck;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Batch cut thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Buffered items that trigger an immediate flush.
    pub batch_size: usize,
    /// Idle time after the first buffered item before a timed flush.
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            flush_interval: Duration::from_secs(10),
        }
    }
}

/// What happened to a batch handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every item was written.
    Persisted {
        /// Attempts used, the first one included.
        attempts: usize,
    },
    /// Writing failed on every attempt and the items were republished as
    /// compensation.
    Compensated {
        /// Attempts used.
        attempts: usize,
        /// Items successfully republished.
        republished: usize,
    },
    /// Writing failed on every attempt and the batch was only logged.
    Exhausted {
        /// Attempts used.
        attempts: usize,
    },
}

/// Destination of flushed batches.
///
/// Sinks report failures through [`BatchOutcome`] and never return errors:
/// whatever happens to a batch is handled (retried, compensated, logged)
/// inside the sink.
pub trait BatchSink<T>: Send + Sync {
    /// Write one batch.
    fn write(&self, batch: Vec<T>) -> Pin<Box<dyn Future<Output = BatchOutcome> + Send + '_>>;
}

struct Buffer<T> {
    items: Vec<T>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl<T> Buffer<T> {
    fn cut(&mut self) -> Vec<T> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        std::mem::take(&mut self.items)
    }
}

/// Mutex-guarded buffer with size and idle-time flush triggers.
///
/// Owned explicitly and shared as `Arc<BatchIngestor<T>>`; the idle timer
/// holds only a weak reference, so dropping the last `Arc` stops it.
pub struct BatchIngestor<T> {
    name: String,
    config: BatchConfig,
    sink: Arc<dyn BatchSink<T>>,
    buffer: Mutex<Buffer<T>>,
}

impl<T: Send + 'static> BatchIngestor<T> {
    /// Create an ingestor writing to `sink`.
    ///
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BatchConfig, sink: Arc<dyn BatchSink<T>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config: BatchConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            sink,
            buffer: Mutex::new(Buffer {
                items: Vec::new(),
                timer: None,
                generation: 0,
            }),
        })
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured thresholds.
    #[must_use]
    pub const fn config(&self) -> BatchConfig {
        self.config
    }

    /// Number of buffered items not yet handed to the sink.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().items.len()
    }

    /// Readiness diagnostics: buffered items and thresholds.
    #[must_use]
    pub fn health_check(&self) -> HealthCheck {
        HealthCheck::healthy(self.name.clone())
            .with_metadata("pending", self.pending())
            .with_metadata("batch_size", self.config.batch_size)
            .with_metadata("flush_interval_ms", self.config.flush_interval.as_millis())
    }

    /// Buffer one item.
    ///
    /// Returns the handle of the batch write when this item completed a
    /// batch. Otherwise the item waits for more items or the idle timer.
    pub fn ingest(self: &Arc<Self>, item: T) -> Option<JoinHandle<BatchOutcome>> {
        let batch = {
            let mut buffer = self.lock();
            buffer.items.push(item);

            if buffer.items.len() >= self.config.batch_size {
                Some(buffer.cut())
            } else {
                if buffer.timer.is_none() {
                    let generation = buffer.generation;
                    buffer.timer = Some(self.schedule_flush(generation));
                }
                None
            }
        };

        batch.map(|batch| {
            tracing::debug!(ingestor = %self.name, batch_size = batch.len(), "Batch size reached, flushing");
            self.spawn_write(batch)
        })
    }

    /// Hand whatever is buffered to the sink now.
    ///
    /// No-op on an empty buffer.
    pub fn flush(&self) -> Option<JoinHandle<BatchOutcome>> {
        let batch = {
            let mut buffer = self.lock();
            if buffer.items.is_empty() {
                return None;
            }
            buffer.cut()
        };
        tracing::debug!(ingestor = %self.name, batch_size = batch.len(), "Flushing buffer");
        Some(self.spawn_write(batch))
    }

    /// Flush and wait for that final batch to be written.
    ///
    /// Used on shutdown so buffered items are not stranded.
    pub async fn drain(&self) -> Option<BatchOutcome> {
        let handle = self.flush()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(ingestor = %self.name, error = %e, "Final batch write task failed");
                None
            },
        }
    }

    fn schedule_flush(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let ingestor: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.flush_interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(ingestor) = ingestor.upgrade() {
                ingestor.flush_on_timer(generation);
            }
        })
    }

    fn flush_on_timer(&self, generation: u64) {
        let batch = {
            let mut buffer = self.lock();
            // a size-triggered flush already took this batch
            if buffer.generation != generation || buffer.items.is_empty() {
                return;
            }
            // this task is the timer; finishing it is enough
            buffer.timer = None;
            buffer.cut()
        };
        tracing::debug!(ingestor = %self.name, batch_size = batch.len(), "Flush interval elapsed, flushing");
        // the timed write is not awaited by anyone
        drop(self.spawn_write(batch));
    }

    fn spawn_write(&self, batch: Vec<T>) -> JoinHandle<BatchOutcome> {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move { sink.write(batch).await })
    }

    fn lock(&self) -> MutexGuard<'_, Buffer<T>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for BatchIngestor<T> {
    fn drop(&mut self) {
        let buffer = self.buffer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = buffer.timer.take() {
            timer.abort();
        }
        if !buffer.items.is_empty() {
            tracing::warn!(
                ingestor = %self.name,
                pending = buffer.items.len(),
                "Ingestor dropped with buffered items"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// Sink that forwards every batch to a channel.
    struct ChannelSink(mpsc::UnboundedSender<Vec<u32>>);

    impl BatchSink<u32> for ChannelSink {
        fn write(&self, batch: Vec<u32>) -> Pin<Box<dyn Future<Output = BatchOutcome> + Send + '_>> {
            Box::pin(async move {
                self.0.send(batch).unwrap();
                BatchOutcome::Persisted { attempts: 1 }
            })
        }
    }

    fn ingestor(config: BatchConfig) -> (Arc<BatchIngestor<u32>>, mpsc::UnboundedReceiver<Vec<u32>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BatchIngestor::new("test", config, Arc::new(ChannelSink(tx))), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_without_timer() {
        let (ingestor, mut batches) = ingestor(BatchConfig::default());

        let mut handles = Vec::new();
        for n in 0..5 {
            handles.extend(ingestor.ingest(n));
        }

        assert_eq!(handles.len(), 1);
        assert_eq!(handles.pop().unwrap().await.unwrap(), BatchOutcome::Persisted { attempts: 1 });
        assert_eq!(batches.recv().await.unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(ingestor.pending(), 0);

        // the idle timer was cancelled with the size flush
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_flushes_after_interval() {
        let (ingestor, mut batches) = ingestor(BatchConfig::default());

        for n in 0..3 {
            assert!(ingestor.ingest(n).is_none());
        }

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert!(batches.try_recv().is_err());
        assert_eq!(ingestor.pending(), 3);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(batches.recv().await.unwrap(), vec![0, 1, 2]);
        assert_eq!(ingestor.pending(), 0);
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_starts_at_first_item_after_flush() {
        let (ingestor, mut batches) = ingestor(BatchConfig::default());

        ingestor.ingest(1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        // a later item does not push the deadline back
        ingestor.ingest(2);
        tokio::time::sleep(Duration::from_millis(4_100)).await;

        assert_eq!(batches.recv().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_on_empty_buffer_is_noop() {
        let (ingestor, mut batches) = ingestor(BatchConfig::default());
        assert!(ingestor.flush().is_none());
        assert!(ingestor.drain().await.is_none());
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_writes_buffered_items() {
        let (ingestor, mut batches) = ingestor(BatchConfig::default());
        ingestor.ingest(7);
        ingestor.ingest(8);

        let outcome = ingestor.drain().await;

        assert_eq!(outcome, Some(BatchOutcome::Persisted { attempts: 1 }));
        assert_eq!(batches.recv().await.unwrap(), vec![7, 8]);

        // the cancelled timer never fires a second, empty batch
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_reports_pending_items() {
        let (ingestor, _batches) = ingestor(BatchConfig::default());
        ingestor.ingest(1);

        let check = ingestor.health_check();
        assert_eq!(check.component, "test");
        assert!(check.metadata.contains(&("pending".to_string(), "1".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_thresholds_apply() {
        let (ingestor, mut batches) = ingestor(BatchConfig {
            batch_size: 2,
            flush_interval: Duration::from_secs(1),
        });

        ingestor.ingest(1);
        ingestor.ingest(2).unwrap().await.unwrap();
        ingestor.ingest(3);

        assert_eq!(batches.recv().await.unwrap(), vec![1, 2]);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(batches.recv().await.unwrap(), vec![3]);
    }
}
