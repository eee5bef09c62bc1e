//! Backpressure-aware async batch pipeline
//!
//! Decouples an asynchronously produced, possibly unbounded sequence of
//! batches from one or more consuming sinks. The pipeline pulls at most one
//! batch at a time — that single-batch window is the flow-control mechanism
//! bounding memory for unbounded sources — and delivers it to every
//! registered sink whose `can_receive` flag is up. A sink that reports
//! `can_receive() == false` is skipped for that batch only and re-checked on
//! the next one; it is never unregistered.
//!
//! Batches carry a strictly increasing ordinal assigned by their source and
//! an `is_last` flag; the run loop ends when the most recently pulled batch
//! is the last one, when the source is exhausted, or when the cancellation
//! token fires. Cancellation is cooperative: it is observed between batches
//! (and while waiting on the source), never mid-delivery, and completes the
//! run normally rather than as an error. Sink errors, by contrast, propagate
//! out of [`BatchPipeline::run`] uncaught — sinks are expected to handle
//! their own recoverable failures.

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// One unit of asynchronously produced work
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    /// Position in the source's production order, strictly increasing
    pub ordinal: u64,
    /// True only for the final batch of a bounded source
    pub is_last: bool,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn new(ordinal: u64, is_last: bool, items: Vec<T>) -> Self {
        Self {
            ordinal,
            is_last,
            items,
        }
    }
}

/// Asynchronous producer of batches
pub trait BatchSource<T>: Send {
    /// Await the next batch; `None` means the source is exhausted.
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<Batch<T>>>>;
}

/// Registered consumer with a mutable backpressure flag
pub trait BatchSink<T>: Send {
    /// Whether this sink can take the next batch. Checked per batch.
    fn can_receive(&self) -> bool;

    /// Consume one batch. Must not resolve until the batch is fully
    /// processed; the pipeline will not pull the next batch before then.
    fn receive<'a>(
        &'a mut self,
        batch: &'a Batch<T>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;

    /// Disposal notification so pipeline-scoped resources can be released.
    fn on_dispose(&mut self) {}
}

/// Source over an mpsc channel, the usual bridge from a producing task.
pub struct ChannelSource<T> {
    rx: mpsc::Receiver<Batch<T>>,
}

impl<T> ChannelSource<T> {
    pub fn new(rx: mpsc::Receiver<Batch<T>>) -> Self {
        Self { rx }
    }
}

impl<T: Send> BatchSource<T> for ChannelSource<T> {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<Batch<T>>>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }
}

/// Source over a pre-built list of batches.
pub struct VecSource<T> {
    batches: std::vec::IntoIter<Batch<T>>,
}

impl<T> VecSource<T> {
    pub fn new(batches: Vec<Batch<T>>) -> Self {
        Self {
            batches: batches.into_iter(),
        }
    }
}

impl<T: Send> BatchSource<T> for VecSource<T> {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<Batch<T>>>> {
        let next = self.batches.next();
        Box::pin(async move { Ok(next) })
    }
}

/// Pipeline driving one source into registered sinks
pub struct BatchPipeline<T> {
    source: Box<dyn BatchSource<T>>,
    sinks: Vec<Box<dyn BatchSink<T>>>,
    last_ordinal: Option<u64>,
}

impl<T: Send> BatchPipeline<T> {
    pub fn new(source: impl BatchSource<T> + 'static) -> Self {
        Self {
            source: Box::new(source),
            sinks: Vec::new(),
            last_ordinal: None,
        }
    }

    pub fn register_sink(&mut self, sink: Box<dyn BatchSink<T>>) {
        self.sinks.push(sink);
    }

    pub fn register_sinks(&mut self, sinks: impl IntoIterator<Item = Box<dyn BatchSink<T>>>) {
        self.sinks.extend(sinks);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Pull batches one at a time and deliver each to every receivable sink,
    /// in production order, until the last batch, source exhaustion, or
    /// cancellation. Cancellation completes the run normally after the
    /// in-flight batch has been fully delivered.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                debug!("pipeline cancelled before pull");
                return Ok(());
            }

            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("pipeline cancelled while awaiting source");
                    return Ok(());
                }
                next = self.source.next_batch() => match next? {
                    Some(batch) => batch,
                    None => {
                        debug!("source exhausted");
                        return Ok(());
                    }
                },
            };

            if let Some(prev) = self.last_ordinal {
                if batch.ordinal <= prev {
                    // The ordinal is assigned by the source; a regression
                    // means a broken producer, not a delivery problem.
                    warn!(prev, ordinal = batch.ordinal, "batch ordinal regressed");
                }
            }
            self.last_ordinal = Some(batch.ordinal);

            let is_last = batch.is_last;
            for sink in &mut self.sinks {
                if !sink.can_receive() {
                    debug!(ordinal = batch.ordinal, "sink backpressured, skipping batch");
                    continue;
                }
                sink.receive(&batch, cancel).await?;
            }

            if is_last {
                debug!(ordinal = batch.ordinal, "last batch delivered");
                return Ok(());
            }
        }
    }
}

impl<T> Drop for BatchPipeline<T> {
    fn drop(&mut self) {
        for sink in &mut self.sinks {
            sink.on_dispose();
        }
    }
}
