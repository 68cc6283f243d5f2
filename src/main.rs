use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use generation_tree::{
    config::{Config, LogFormat},
    context::ContextSelection,
    ledger::UsageLedger,
    orchestrator::Orchestrator,
    provider::{GenerationConfig, HttpTransport},
    store::NodeType,
};

/// Run one generation against the configured gateway and print the result.
#[derive(Parser, Debug)]
#[command(name = "generation-tree", version, about)]
struct Args {
    /// The brief sent to the provider
    #[arg(long)]
    prompt: String,

    /// Artifact type: idea, title, synopsis, outline, full_content, social_post, image_prompt, analysis
    #[arg(long = "type", default_value = "idea")]
    node_type: NodeType,

    /// Stream the response instead of waiting for it in one piece
    #[arg(long)]
    stream: bool,

    /// Provider name (defaults to DEFAULT_PROVIDER)
    #[arg(long)]
    provider: Option<String>,

    /// Model name (defaults to DEFAULT_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Free-text instructions added to the context block
    #[arg(long)]
    instructions: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.provider.base_url,
        "Generation tree starting"
    );

    let transport = match HttpTransport::new(&config.provider, config.request.clone()) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "Failed to initialize provider transport");
            return Err(e.into());
        }
    };

    let orchestrator = Orchestrator::new(Arc::new(transport))
        .with_ledger(UsageLedger::with_limits(&config.usage.limits));

    let mut request = GenerationConfig::new(
        args.node_type,
        args.provider
            .unwrap_or_else(|| config.provider.default_provider.clone()),
        args.model
            .unwrap_or_else(|| config.provider.default_model.clone()),
        args.prompt,
    );
    if let Some(instructions) = args.instructions {
        request = request.with_context(ContextSelection::new().with_instructions(instructions));
    }

    let result = if args.stream {
        orchestrator.generate_streaming(request).await
    } else {
        orchestrator.generate_once(request).await
    };

    // Failed and cancelled nodes are still printed; the tree always holds the outcome.
    let node = match result {
        Ok(node) => Some(node),
        Err(generation_tree::AppError::Generation(e)) => {
            error!(node_id = %e.node_id(), error = %e, "Generation did not complete");
            orchestrator.store().await.resolve(e.node_id()).cloned()
        }
        Err(e) => {
            error!(error = %e, "Generation rejected");
            return Err(e.into());
        }
    };

    let output = serde_json::json!({
        "node": node,
        "ledger": orchestrator.ledger_snapshot().await,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    info!("Generation tree finished");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
