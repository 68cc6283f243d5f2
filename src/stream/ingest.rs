use tracing::{debug, warn};

use super::StreamChunk;
use crate::error::{StoreError, StoreResult};
use crate::store::{NodePatch, NodeStatus, NodeStore};

/// What the caller should do after a chunk has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestStep {
    /// Keep reading.
    Continue,
    /// Node sealed as completed; usage should be recorded once.
    Completed {
        tokens_input: u64,
        tokens_output: u64,
        cost: f64,
    },
    /// Node sealed as failed.
    Failed { message: String },
    /// Node was already terminal (cancelled elsewhere); stop without writing.
    Halted { status: NodeStatus },
}

impl IngestStep {
    /// Whether the stream is over.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IngestStep::Continue)
    }
}

/// Applies a stream's chunks to the single node it was bound to.
///
/// Text is accumulated here and mirrored onto the node after every content
/// chunk, so observers see the partial result while `status` stays `processing`.
#[derive(Debug)]
pub struct StreamIngestor {
    node_id: String,
    accumulated: String,
    applied: usize,
}

impl StreamIngestor {
    /// Bind an ingestor to `node_id`.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            accumulated: String::new(),
            applied: 0,
        }
    }

    /// The node this ingestor writes to.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Text received so far.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Number of chunks applied.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Apply one chunk to the bound node.
    pub fn apply(&mut self, store: &mut NodeStore, chunk: StreamChunk) -> StoreResult<IngestStep> {
        if let Some(step) = self.prepare(store)? {
            return Ok(step);
        }
        self.applied += 1;

        match chunk {
            StreamChunk::Content { delta } => {
                self.accumulated.push_str(&delta);
                store.update(
                    &self.node_id,
                    NodePatch::new().content(self.accumulated.clone()),
                )?;
                debug!(
                    node_id = %self.node_id,
                    delta_len = delta.len(),
                    total_len = self.accumulated.len(),
                    "Content chunk applied"
                );
                Ok(IngestStep::Continue)
            }
            StreamChunk::Metadata { metadata } => {
                let mut structured = store
                    .resolve(&self.node_id)
                    .and_then(|n| n.structured_content.clone())
                    .unwrap_or_default();
                structured.merge_metadata(metadata);
                store.update(&self.node_id, NodePatch::new().structured_content(structured))?;
                Ok(IngestStep::Continue)
            }
            StreamChunk::Complete {
                tokens_used,
                tokens_input,
                cost,
            } => {
                let tokens_output = tokens_used.unwrap_or(0);
                let tokens_input = tokens_input.unwrap_or(0);
                let cost = sanitize_cost(&self.node_id, cost);

                store.update(
                    &self.node_id,
                    NodePatch::new()
                        .status(NodeStatus::Completed)
                        .content(self.accumulated.clone())
                        .tokens(tokens_input, tokens_output)
                        .cost(cost),
                )?;
                debug!(
                    node_id = %self.node_id,
                    tokens_output = tokens_output,
                    cost = cost,
                    chunks = self.applied,
                    "Stream completed"
                );
                Ok(IngestStep::Completed {
                    tokens_input,
                    tokens_output,
                    cost,
                })
            }
            StreamChunk::Error { error } => {
                let message = error.unwrap_or_else(|| "Provider reported an error".to_string());
                self.seal_failed(store, message)
            }
        }
    }

    /// Seal the node as failed after a transport error; partial text stays.
    pub fn fail(
        &mut self,
        store: &mut NodeStore,
        message: impl Into<String>,
    ) -> StoreResult<IngestStep> {
        if let Some(step) = self.prepare(store)? {
            return Ok(step);
        }
        self.seal_failed(store, message.into())
    }

    fn seal_failed(&mut self, store: &mut NodeStore, message: String) -> StoreResult<IngestStep> {
        warn!(node_id = %self.node_id, error = %message, "Stream failed");
        store.update(
            &self.node_id,
            NodePatch::new()
                .status(NodeStatus::Failed)
                .error_message(message.clone()),
        )?;
        Ok(IngestStep::Failed { message })
    }

    /// Stop on sealed nodes and move pending ones to processing.
    fn prepare(&self, store: &mut NodeStore) -> StoreResult<Option<IngestStep>> {
        let status = store
            .resolve(&self.node_id)
            .map(|n| n.status)
            .ok_or_else(|| StoreError::NotFound {
                node_id: self.node_id.clone(),
            })?;

        if status.is_terminal() {
            debug!(node_id = %self.node_id, status = %status, "Ignoring chunk for sealed node");
            return Ok(Some(IngestStep::Halted { status }));
        }
        if status == NodeStatus::Pending {
            store.update(&self.node_id, NodePatch::new().status(NodeStatus::Processing))?;
        }
        Ok(None)
    }
}

fn sanitize_cost(node_id: &str, cost: Option<f64>) -> f64 {
    match cost {
        Some(c) if c.is_finite() && c >= 0.0 => c,
        Some(c) => {
            warn!(node_id = %node_id, cost = c, "Provider reported an invalid cost; using 0");
            0.0
        }
        None => 0.0,
    }
}
