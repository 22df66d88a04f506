//! Host pipeline adapter.
//!
//! A dataflow host drives each stage through the same three calls: prepare
//! once per node, operate once per input record, cleanup at the end.
//! [`StreamingOperation`] implements that contract on top of a [`Bridge`],
//! so the bridge itself stays free of host types.

use async_trait::async_trait;

use crate::bridge::{Bridge, BridgeError, TupleSink};
use crate::environment::Environment;

/// Output fields declared by a streaming operation.
pub const DECLARED_FIELDS: [&str; 2] = ["index", "line"];

/// Errors raised by a host operation.
#[derive(thiserror::Error, Debug)]
pub enum OperationError {
    /// The bridge failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Records are newline-framed on the child's stdin.
    #[error("Record contains a line break at byte {0}")]
    EmbeddedNewline(usize),
}

/// Contract a host pipeline uses to drive one stage.
#[async_trait]
pub trait Operation: Send {
    /// Acquire resources for this node.
    async fn prepare(&mut self, env: &dyn Environment) -> Result<(), OperationError>;

    /// Process one input record, emitting any resulting tuples.
    async fn operate(
        &mut self,
        record: &str,
        sink: &mut (dyn TupleSink + Send),
    ) -> Result<(), OperationError>;

    /// Release resources, emitting any remaining tuples.
    async fn cleanup(&mut self, sink: &mut (dyn TupleSink + Send)) -> Result<(), OperationError>;

    /// Number of input arguments the operation expects.
    fn num_parameters(&self) -> usize {
        0
    }

    /// Names of the fields in each emitted tuple.
    fn declared_fields(&self) -> &[&'static str];
}

/// Host operation backed by a subprocess bridge.
#[derive(Debug)]
pub struct StreamingOperation {
    bridge: Bridge,
    pace: bool,
}

impl StreamingOperation {
    /// Wrap a configured bridge. Pacing is on by default.
    #[must_use]
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge, pace: true }
    }

    /// Toggle pacing.
    ///
    /// When on, every `operate` waits for one batch from the child before
    /// returning. When off, it only collects batches that are already
    /// available.
    #[must_use]
    pub fn pace(mut self, pace: bool) -> Self {
        self.pace = pace;
        self
    }

    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge {
        &mut self.bridge
    }

    #[must_use]
    pub fn into_inner(self) -> Bridge {
        self.bridge
    }
}

#[async_trait]
impl Operation for StreamingOperation {
    async fn prepare(&mut self, env: &dyn Environment) -> Result<(), OperationError> {
        self.bridge.prepare(env)?;
        Ok(())
    }

    async fn operate(
        &mut self,
        record: &str,
        sink: &mut (dyn TupleSink + Send),
    ) -> Result<(), OperationError> {
        if let Some(pos) = record.find(['\n', '\r']) {
            return Err(OperationError::EmbeddedNewline(pos));
        }
        self.bridge.write(record).await?;
        if self.pace {
            self.bridge.flush_blocking(sink).await?;
        } else {
            self.bridge.flush_non_blocking(sink)?;
        }
        Ok(())
    }

    async fn cleanup(&mut self, sink: &mut (dyn TupleSink + Send)) -> Result<(), OperationError> {
        let delivered = self.bridge.finish(sink).await?;
        tracing::debug!(delivered, "Streaming operation cleaned up");
        Ok(())
    }

    fn declared_fields(&self) -> &[&'static str] {
        &DECLARED_FIELDS
    }
}
