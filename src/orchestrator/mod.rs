//! Generation lifecycle: node creation, provider dispatch, ingestion and accounting.
//!
//! The orchestrator is the only writer of generation results. Every request it
//! accepts ends in exactly one sealed node, and usage is recorded for a node at
//! most once, on the completed path only.

mod types;

pub use types::{BranchEdits, Delivery, Regeneration};

use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{
    ContentReference, ContextBuilder, ContextSelection, MarkdownContextBuilder, PriorContentMode,
};
use crate::error::{AppError, AppResult, GenerationError, StoreError, StoreResult};
use crate::ledger::{LedgerSnapshot, UsageLedger, UsageLevel};
use crate::prompts::system_prompt;
use crate::provider::{GenerationConfig, GenerationRequest, ProviderTransport, SingleShotResponse};
use crate::store::{
    GenerationNode, NodePatch, NodeStatus, NodeStore, StoreEvent, StoreSnapshot,
    StructuredContent, SubscriptionId, SubscriptionKey,
};
use crate::stream::{decode_stream, IngestStep, StreamIngestor};

/// A node that has been created and marked in flight, ready for dispatch.
struct Dispatch {
    node_id: String,
    request: GenerationRequest,
    cancel_token: CancellationToken,
}

/// Façade over the node store, the usage ledger and a provider transport.
///
/// Cloning is cheap and every clone shares the same store and ledger.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<RwLock<NodeStore>>,
    ledger: Arc<RwLock<UsageLedger>>,
    transport: Arc<dyn ProviderTransport>,
    context_builder: Arc<dyn ContextBuilder>,
    cancel_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    /// Nodes whose outcome has reached the ledger.
    settled: Arc<Mutex<HashSet<String>>>,
}

impl Orchestrator {
    /// Create an orchestrator with an empty store and ledger.
    pub fn new(transport: Arc<dyn ProviderTransport>) -> Self {
        Self {
            store: Arc::new(RwLock::new(NodeStore::new())),
            ledger: Arc::new(RwLock::new(UsageLedger::new())),
            transport,
            context_builder: Arc::new(MarkdownContextBuilder),
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
            settled: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Use an existing store, e.g. one restored from a snapshot.
    pub fn with_store(mut self, store: NodeStore) -> Self {
        self.store = Arc::new(RwLock::new(store));
        self
    }

    /// Use an existing ledger, e.g. one with quotas configured.
    pub fn with_ledger(mut self, ledger: UsageLedger) -> Self {
        self.ledger = Arc::new(RwLock::new(ledger));
        self
    }

    /// Replace the context block serializer.
    pub fn with_context_builder(mut self, builder: Arc<dyn ContextBuilder>) -> Self {
        self.context_builder = builder;
        self
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Generate a node from one complete provider response.
    ///
    /// Returns the completed node, or `GenerationError` after the node has
    /// been sealed as failed or cancelled.
    pub async fn generate_once(&self, config: GenerationConfig) -> AppResult<GenerationNode> {
        let dispatch = self.dispatch_new(&config, false).await?;
        self.run_single_shot(dispatch).await
    }

    /// Generate a node from a chunk stream, mirroring partial text as it arrives.
    pub async fn generate_streaming(&self, config: GenerationConfig) -> AppResult<GenerationNode> {
        let dispatch = self.dispatch_new(&config, true).await?;
        self.run_streaming(dispatch).await
    }

    /// Start a streaming generation in the background.
    ///
    /// The node id is returned as soon as the node exists, so callers can
    /// [`cancel`](Self::cancel) before the stream finishes.
    pub async fn spawn_streaming(
        &self,
        config: GenerationConfig,
    ) -> AppResult<(String, JoinHandle<AppResult<GenerationNode>>)> {
        let dispatch = self.dispatch_new(&config, true).await?;
        let node_id = dispatch.node_id.clone();
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.run_streaming(dispatch).await });
        Ok((node_id, handle))
    }

    /// Fork `parent_id`, optionally sending the fork back to the provider.
    ///
    /// Without a regeneration request the new node stays `pending` holding the
    /// seed text. The parent is never modified apart from gaining a child.
    pub async fn branch_from(
        &self,
        parent_id: &str,
        edits: BranchEdits,
    ) -> AppResult<GenerationNode> {
        let BranchEdits {
            seed_content,
            regenerate,
        } = edits;

        let Some(regeneration) = regenerate else {
            let node = self.store.write().await.branch(parent_id, seed_content)?;
            info!(node_id = %node.id, parent_id = %parent_id, "Branch created");
            return Ok(node);
        };

        validate_prompt(&regeneration.prompt)?;

        let context = regeneration
            .context
            .clone()
            .unwrap_or_default()
            .with_prior_content(ContentReference {
                node_id: Some(parent_id.to_string()),
                title: "Current draft".to_string(),
                content: seed_content.clone(),
            });
        let context = if context.prior_content_mode == PriorContentMode::None {
            context.with_prior_content_mode(PriorContentMode::Full)
        } else {
            context
        };
        let streaming = regeneration.delivery == Delivery::Streaming;
        let context_data = serde_json::to_value(&context).map_err(|e| AppError::Internal {
            message: format!("Failed to serialize context selection: {}", e),
        })?;

        let cancel_token = CancellationToken::new();
        let request = {
            let mut store = self.store.write().await;
            let node = store.branch_with_context(parent_id, seed_content, context_data)?;
            let request = self.build_request(
                &node,
                &regeneration.prompt,
                Some(&context),
                None,
                None,
                streaming,
            );
            self.begin(&mut store, &node.id, &cancel_token).await?;
            request
        };

        info!(
            node_id = %request.node_id,
            parent_id = %parent_id,
            streaming = streaming,
            "Regenerating branch"
        );

        let dispatch = Dispatch {
            node_id: request.node_id.clone(),
            request,
            cancel_token,
        };
        if streaming {
            self.run_streaming(dispatch).await
        } else {
            self.run_single_shot(dispatch).await
        }
    }

    /// Cancel an in-flight generation.
    ///
    /// The node is sealed as `cancelled` with whatever text it holds before the
    /// transport is released. Returns `false` when there was nothing to cancel
    /// (already sealed, or never dispatched); calling it again is harmless.
    pub async fn cancel(&self, node_id: &str) -> AppResult<bool> {
        let token = self.cancel_tokens.read().await.get(node_id).cloned();

        let Some(token) = token else {
            if self.store.read().await.resolve(node_id).is_none() {
                return Err(StoreError::NotFound {
                    node_id: node_id.to_string(),
                }
                .into());
            }
            debug!(node_id = %node_id, "Nothing in flight to cancel");
            return Ok(false);
        };

        let sealed = {
            let mut store = self.store.write().await;
            match store.resolve(node_id).map(|n| n.status) {
                Some(NodeStatus::Processing) => {
                    store.update(node_id, NodePatch::new().status(NodeStatus::Cancelled))?;
                    true
                }
                _ => false,
            }
        };
        token.cancel();

        if sealed {
            info!(node_id = %node_id, "Generation cancelled");
            self.settle(node_id).await?;
        }
        Ok(sealed)
    }

    /// Tombstone a node. Its children stay queryable.
    pub async fn soft_delete(&self, node_id: &str) -> AppResult<()> {
        self.store.write().await.soft_delete(node_id)?;
        Ok(())
    }

    /// Set or clear the `selected` flag.
    pub async fn set_selected(&self, node_id: &str, selected: bool) -> AppResult<GenerationNode> {
        Ok(self.store.write().await.set_selected(node_id, selected)?)
    }

    /// Select one node among its siblings.
    pub async fn select_exclusive(&self, node_id: &str) -> AppResult<GenerationNode> {
        Ok(self.store.write().await.select_exclusive(node_id)?)
    }

    /// Set or clear the `visible` flag.
    pub async fn set_visible(&self, node_id: &str, visible: bool) -> AppResult<GenerationNode> {
        Ok(self.store.write().await.set_visible(node_id, visible)?)
    }

    /// Replace a node's structured content.
    pub async fn annotate(
        &self,
        node_id: &str,
        structured: StructuredContent,
    ) -> AppResult<GenerationNode> {
        Ok(self.store.write().await.annotate(node_id, structured)?)
    }

    // ------------------------------------------------------------------
    // Queries and subscriptions
    // ------------------------------------------------------------------

    /// Live node by id.
    pub async fn get(&self, node_id: &str) -> Option<GenerationNode> {
        self.store.read().await.get(node_id).cloned()
    }

    /// Live roots in creation order.
    pub async fn roots(&self) -> Vec<GenerationNode> {
        self.store.read().await.roots().into_iter().cloned().collect()
    }

    /// Live children of `node_id` in the parent's order.
    pub async fn children_of(&self, node_id: &str) -> Vec<GenerationNode> {
        self.store
            .read()
            .await
            .children_of(node_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Read-only access to the store for richer queries.
    ///
    /// Holding the guard blocks every generation; drop it promptly.
    pub async fn store(&self) -> RwLockReadGuard<'_, NodeStore> {
        self.store.read().await
    }

    /// Serializable copy of the whole tree.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.store.read().await.snapshot()
    }

    /// Observe store mutations.
    ///
    /// Observers run while the store is locked and must not call back into
    /// the orchestrator.
    pub async fn subscribe<F>(&self, key: SubscriptionKey, observer: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.store.write().await.subscribe(key, observer)
    }

    /// Remove an observer.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.write().await.unsubscribe(id)
    }

    /// Current ledger figures.
    pub async fn ledger_snapshot(&self) -> LedgerSnapshot {
        self.ledger.read().await.snapshot()
    }

    /// Quota band for `provider`.
    pub async fn usage_level(&self, provider: &str) -> UsageLevel {
        self.ledger.read().await.usage_level(provider)
    }

    /// The context block a request with `selection` would carry.
    pub fn preview_context(&self, selection: &ContextSelection) -> String {
        self.context_builder.build(selection)
    }

    /// Whether `node_id` still has a live cancellation handle.
    pub async fn is_in_flight(&self, node_id: &str) -> bool {
        self.cancel_tokens.read().await.contains_key(node_id)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Validate `config`, insert its node and mark it in flight.
    async fn dispatch_new(&self, config: &GenerationConfig, streaming: bool) -> AppResult<Dispatch> {
        validate_prompt(&config.prompt)?;

        let mut node = GenerationNode::new(
            config.node_type,
            config.mode,
            config.provider.clone(),
            config.model.clone(),
        );
        if let Some(parent_id) = &config.parent_id {
            node = node.with_parent(parent_id.clone());
        }
        if let Some(vertical) = &config.vertical {
            node = node.with_vertical(vertical.clone());
        }
        if let Some(context) = &config.context {
            let value = serde_json::to_value(context).map_err(|e| AppError::Internal {
                message: format!("Failed to serialize context selection: {}", e),
            })?;
            node = node.with_context_data(value);
        }

        let request = self.build_request(
            &node,
            &config.prompt,
            config.context.as_ref(),
            config.temperature,
            config.max_tokens,
            streaming,
        );

        let cancel_token = CancellationToken::new();
        {
            let mut store = self.store.write().await;
            store.insert(node)?;
            self.begin(&mut store, &request.node_id, &cancel_token).await?;
        }

        info!(
            node_id = %request.node_id,
            node_type = %request.node_type,
            provider = %request.provider,
            model = %request.model,
            streaming = streaming,
            "Generation dispatched"
        );

        Ok(Dispatch {
            node_id: request.node_id.clone(),
            request,
            cancel_token,
        })
    }

    /// Register the cancel handle and move the node to `processing`.
    async fn begin(
        &self,
        store: &mut NodeStore,
        node_id: &str,
        cancel_token: &CancellationToken,
    ) -> StoreResult<()> {
        self.cancel_tokens
            .write()
            .await
            .insert(node_id.to_string(), cancel_token.clone());
        if let Err(e) = store.update(node_id, NodePatch::new().status(NodeStatus::Processing)) {
            self.cancel_tokens.write().await.remove(node_id);
            return Err(e);
        }
        Ok(())
    }

    fn build_request(
        &self,
        node: &GenerationNode,
        prompt: &str,
        context: Option<&ContextSelection>,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
        stream: bool,
    ) -> GenerationRequest {
        GenerationRequest {
            node_id: node.id.clone(),
            provider: node.provider.clone(),
            model: node.model.clone(),
            node_type: node.node_type,
            mode: node.mode,
            system: system_prompt(node.node_type).to_string(),
            prompt: prompt.to_string(),
            context: context
                .map(|c| self.context_builder.build(c))
                .unwrap_or_default(),
            vertical: node.vertical.clone(),
            temperature,
            max_tokens,
            stream,
        }
    }

    async fn run_single_shot(&self, dispatch: Dispatch) -> AppResult<GenerationNode> {
        let Dispatch {
            node_id,
            request,
            cancel_token,
        } = dispatch;
        let start = Instant::now();

        let response = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => None,
            response = self.transport.generate(&request) => Some(response),
        };

        {
            let mut store = self.store.write().await;
            let sealed = store
                .resolve(&node_id)
                .map(|n| n.is_sealed())
                .ok_or_else(|| StoreError::NotFound {
                    node_id: node_id.clone(),
                })?;

            if !sealed {
                let patch = match response {
                    None => NodePatch::new().status(NodeStatus::Cancelled),
                    Some(Ok(response)) if response.success => completed_patch(&node_id, response),
                    Some(Ok(response)) => failed_patch(
                        response
                            .error
                            .unwrap_or_else(|| "Provider reported an unsuccessful generation".to_string()),
                    ),
                    Some(Err(e)) => failed_patch(e.to_string()),
                };
                store.update(&node_id, patch)?;
            }
        }

        debug!(
            node_id = %node_id,
            latency_ms = start.elapsed().as_millis(),
            "Single-shot response applied"
        );
        self.conclude(&node_id).await
    }

    async fn run_streaming(&self, dispatch: Dispatch) -> AppResult<GenerationNode> {
        let Dispatch {
            node_id,
            request,
            cancel_token,
        } = dispatch;
        let start = Instant::now();
        let mut ingestor = StreamIngestor::new(node_id.clone());

        let opened = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => None,
            opened = self.transport.open_stream(&request) => Some(opened),
        };

        let mut chunks = match opened {
            None => {
                self.seal_cancelled(&node_id).await?;
                return self.conclude(&node_id).await;
            }
            Some(Err(e)) => {
                ingestor.fail(&mut *self.store.write().await, e.to_string())?;
                return self.conclude(&node_id).await;
            }
            Some(Ok(bytes)) => decode_stream(bytes),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => None,
                next = chunks.next() => Some(next),
            };
            let Some(next) = next else {
                // Dropping the stream releases the connection.
                drop(chunks);
                self.seal_cancelled(&node_id).await?;
                break;
            };

            let step = {
                let mut store = self.store.write().await;
                match next {
                    Some(Ok(chunk)) => ingestor.apply(&mut store, chunk)?,
                    Some(Err(e)) => ingestor.fail(&mut store, e.to_string())?,
                    None => ingestor.fail(&mut store, "Stream ended before a completion record")?,
                }
            };

            if step.is_terminal() {
                if let IngestStep::Halted { status } = step {
                    debug!(node_id = %node_id, status = %status, "Stream halted on sealed node");
                }
                break;
            }
        }

        debug!(
            node_id = %node_id,
            chunks = ingestor.applied(),
            latency_ms = start.elapsed().as_millis(),
            "Stream finished"
        );
        self.conclude(&node_id).await
    }

    async fn seal_cancelled(&self, node_id: &str) -> StoreResult<()> {
        let mut store = self.store.write().await;
        if store.resolve(node_id).is_some_and(|n| !n.is_sealed()) {
            store.update(node_id, NodePatch::new().status(NodeStatus::Cancelled))?;
        }
        Ok(())
    }

    /// Release the cancel handle, settle the ledger and map the sealed node to a result.
    async fn conclude(&self, node_id: &str) -> AppResult<GenerationNode> {
        self.cancel_tokens.write().await.remove(node_id);
        let node = self.settle(node_id).await?;

        match node.status {
            NodeStatus::Completed => {
                info!(
                    node_id = %node.id,
                    provider = %node.provider,
                    tokens_output = node.tokens_output,
                    cost = node.cost,
                    "Generation completed"
                );
                Ok(node)
            }
            NodeStatus::Failed => Err(GenerationError::Failed {
                node_id: node.id.clone(),
                message: node.error_message.clone().unwrap_or_default(),
            }
            .into()),
            NodeStatus::Cancelled => Err(GenerationError::Cancelled { node_id: node.id }.into()),
            status => Err(AppError::Internal {
                message: format!("Generation {} ended while still {}", node.id, status),
            }),
        }
    }

    /// Record a sealed node's outcome, and its usage if completed, exactly once.
    async fn settle(&self, node_id: &str) -> AppResult<GenerationNode> {
        let node = self
            .store
            .read()
            .await
            .resolve(node_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                node_id: node_id.to_string(),
            })?;

        if !node.is_sealed() || !self.settled.lock().await.insert(node.id.clone()) {
            return Ok(node);
        }

        let mut ledger = self.ledger.write().await;
        let completed = node.status == NodeStatus::Completed;
        if completed {
            ledger.record_usage(
                &node.provider,
                node.tokens_input.saturating_add(node.tokens_output),
                node.cost,
            )?;
        } else if node.status == NodeStatus::Failed {
            warn!(
                node_id = %node.id,
                provider = %node.provider,
                error = node.error_message.as_deref().unwrap_or_default(),
                "Generation failed"
            );
        }
        ledger.record_outcome(completed);
        Ok(node)
    }
}

fn validate_prompt(prompt: &str) -> AppResult<()> {
    if prompt.trim().is_empty() {
        return Err(AppError::Validation {
            field: "prompt".to_string(),
            reason: "Prompt cannot be empty".to_string(),
        });
    }
    Ok(())
}

fn completed_patch(node_id: &str, response: SingleShotResponse) -> NodePatch {
    let cost = match response.cost {
        Some(c) if c.is_finite() && c >= 0.0 => c,
        Some(c) => {
            warn!(node_id = %node_id, cost = c, "Provider reported an invalid cost; using 0");
            0.0
        }
        None => 0.0,
    };

    let mut patch = NodePatch::new()
        .status(NodeStatus::Completed)
        .content(response.content.unwrap_or_default())
        .tokens(
            response.tokens_input.unwrap_or(0),
            response.tokens_used.unwrap_or(0),
        )
        .cost(cost);
    if let Some(model) = response.model {
        patch = patch.model(model);
    }
    patch
}

fn failed_patch(message: String) -> NodePatch {
    NodePatch::new()
        .status(NodeStatus::Failed)
        .error_message(message)
}
