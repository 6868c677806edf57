//! Mailquiz - email quiz service
//!
//! Sends quiz questions by email, grades the replies with an LLM, and
//! adapts question selection to the results.

// Use the library crate for all modules
use mailquiz::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (INFO level by default, use RUST_LOG to override)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Run CLI
    cli::run().await
}
