//! Background task harvesting the child's output.
//!
//! The reader owns the read end of the child's output pipe, which carries
//! both stdout and stderr in the order the child wrote them. It drives a
//! [`RecordSplitter`] and posts completed batches onto the bounded handoff
//! queue. Posting blocks while the queue is full, which in turn stalls the
//! child once its pipe buffer fills.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};

use super::decode::Utf8Decoder;
use super::splitter::{RecordSplitter, SplitEvent};
use super::types::{Batch, SeparatorSet};

/// Why the output reader stopped.
#[derive(Debug)]
pub enum ReaderExit {
    /// The child closed its output.
    Eof,
    /// Reading the child's output failed.
    Error(io::Error),
    /// The bridge dropped its end of the handoff queue.
    QueueClosed,
}

/// Counters reported when the output reader terminates.
#[derive(Debug)]
pub struct ReaderSummary {
    /// Tuples posted to the queue.
    pub tuples: u64,
    /// Batches posted to the queue.
    pub batches: u64,
    /// Characters read from the child.
    pub chars: u64,
    pub exit: ReaderExit,
}

pub(crate) struct OutputReader {
    splitter: RecordSplitter,
    decoder: Utf8Decoder,
    separators: watch::Receiver<SeparatorSet>,
    queue: mpsc::Sender<Batch>,
    current: Batch,
    chunk_size: usize,
    tuples: u64,
    batches: u64,
}

impl OutputReader {
    pub(crate) fn new(
        separators: watch::Receiver<SeparatorSet>,
        queue: mpsc::Sender<Batch>,
        chunk_size: usize,
    ) -> Self {
        let initial = separators.borrow().clone();
        Self {
            splitter: RecordSplitter::new(initial),
            decoder: Utf8Decoder::default(),
            separators,
            queue,
            current: Batch::new(),
            chunk_size: chunk_size.max(1),
            tuples: 0,
            batches: 0,
        }
    }

    /// Read until end of stream, a read failure, or the queue is dropped.
    pub(crate) async fn run<R>(mut self, mut output: R) -> ReaderSummary
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut text = String::new();

        let exit = loop {
            let n = match output.read(&mut buf).await {
                Ok(0) => break self.drain_at_eof().await,
                Ok(n) => n,
                Err(e) => {
                    // Partial records are dropped; only whole tuples are posted.
                    if let Err(exit) = self.post_current().await {
                        break exit;
                    }
                    break ReaderExit::Error(e);
                }
            };

            text.clear();
            self.decoder.decode(&buf[..n], &mut text);
            if let Err(exit) = self.consume(&text).await {
                break exit;
            }
        };

        let summary = ReaderSummary {
            tuples: self.tuples,
            batches: self.batches,
            chars: self.splitter.head_count(),
            exit,
        };
        tracing::debug!(
            tuples = summary.tuples,
            batches = summary.batches,
            chars = summary.chars,
            exit = ?summary.exit,
            "Output reader stopped"
        );
        summary
    }

    /// Feed decoded text to the splitter, posting a batch on every flush signal.
    async fn consume(&mut self, text: &str) -> Result<(), ReaderExit> {
        self.refresh_separators();
        for ch in text.chars() {
            match self.splitter.feed(ch) {
                Some(SplitEvent::Tuple(tuple)) => self.current.push(tuple),
                Some(SplitEvent::Flush) => self.post_current().await?,
                None => {}
            }
        }
        Ok(())
    }

    async fn drain_at_eof(&mut self) -> ReaderExit {
        let mut tail = String::new();
        self.decoder.finish(&mut tail);
        if let Err(exit) = self.consume(&tail).await {
            return exit;
        }
        if let Some(tuple) = self.splitter.finish() {
            self.current.push(tuple);
        }
        match self.post_current().await {
            Ok(()) => ReaderExit::Eof,
            Err(exit) => exit,
        }
    }

    /// Post the current batch if it holds any tuple.
    async fn post_current(&mut self) -> Result<(), ReaderExit> {
        if self.current.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.current);
        let len = batch.len() as u64;
        tracing::trace!(tuples = len, "Posting batch");
        if self.queue.send(batch).await.is_err() {
            return Err(ReaderExit::QueueClosed);
        }
        self.tuples += len;
        self.batches += 1;
        Ok(())
    }

    fn refresh_separators(&mut self) {
        if self.separators.has_changed().unwrap_or(false) {
            let separators = self.separators.borrow_and_update().clone();
            tracing::debug!(separators = %separators, "Separator set updated");
            self.splitter.set_separators(separators);
        }
    }
}
