//! # Generation Tree
//!
//! Core of a content-generation workstation: every model response becomes a
//! node in a branchable version tree, streamed output is ingested into its
//! node chunk by chunk, and token and cost usage is rolled up per provider.
//!
//! ## Features
//!
//! - **Node Store**: tree of generation nodes with soft delete, branching and change subscriptions
//! - **Streaming Ingestion**: `data: {json}` line decoding that survives arbitrary network splits
//! - **Usage Ledger**: per-provider token and cost totals with quota ratios
//! - **Context Builder**: deterministic context block from style guides, prior content and instructions
//! - **Orchestrator**: single-shot, streamed and branch generations with cancellation
//!
//! ## Architecture
//!
//! ```text
//! Caller → Orchestrator → ProviderTransport (HTTP)
//!               ↓                 ↓
//!          NodeStore  ←  StreamIngestor
//!               ↓
//!          UsageLedger
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use generation_tree::{Config, Orchestrator};
//! use generation_tree::provider::{GenerationConfig, HttpTransport};
//! use generation_tree::store::NodeType;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let transport = HttpTransport::new(&config.provider, config.request.clone())?;
//!     let orchestrator = Orchestrator::new(Arc::new(transport));
//!     let request = GenerationConfig::new(NodeType::Title, "openai", "gpt-4o-mini", "Rust at work");
//!     let node = orchestrator.generate_streaming(request).await?;
//!     println!("{}", node.content.unwrap_or_default());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration loaded from the environment.
pub mod config;
/// Context block assembly for provider requests.
pub mod context;
/// Error types and result aliases for the application.
pub mod error;
/// Per-provider token and cost accounting.
pub mod ledger;
/// Generation lifecycle and command interface.
pub mod orchestrator;
/// System instructions per artifact type.
pub mod prompts;
/// Provider transport contract and HTTP implementation.
pub mod provider;
/// Generation nodes and the tree that holds them.
pub mod store;
/// Stream line decoding and chunk ingestion.
pub mod stream;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::Orchestrator;
