//! Answer one question from the command line with the film desk orchestration.
//!
//! ```text
//! film-desk "What is the rental rate for the film Alien?"
//! ```
//!
//! Uses `DATABASE_URL` (sqlite) for the catalogue when set, otherwise the built-in
//! sample films. Uses OpenAI when `OPENAI_API_KEY` is set, otherwise a fixed offline
//! completion. Prints the outcome as JSON.

use std::sync::Arc;

use tower_handoff::completion::{Completion, FixedCompletion, OpenAICompletion};
use tower_handoff::lookup::{sample_films, DataLookup, InMemoryCatalog, SqliteCatalog};
use tower_handoff::{Orchestrator, RouterConfig, TracingSink};
use tracing::info;
use tracing_subscriber::EnvFilter;

const OFFLINE_ANSWER: &str =
    "I'm running offline and can only answer questions about our film catalogue.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        eprintln!("usage: film-desk \"<question>\"");
        std::process::exit(2);
    }

    let config = RouterConfig::from_env()?;

    let lookup: Arc<dyn DataLookup> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let catalog = SqliteCatalog::connect(&url).await?;
            if catalog.find_by_title("", 1).await?.is_empty() {
                catalog.seed(&sample_films()).await?;
            }
            info!(%url, "using sqlite catalogue");
            Arc::new(catalog)
        }
        Err(_) => Arc::new(InMemoryCatalog::sample()),
    };

    let completion: Arc<dyn Completion> = if std::env::var("OPENAI_API_KEY").is_ok() {
        Arc::new(OpenAICompletion::new(&config))
    } else {
        info!("OPENAI_API_KEY not set, using offline completion");
        Arc::new(FixedCompletion::new(OFFLINE_ANSWER))
    };

    let desk = Orchestrator::film_desk(lookup, completion, config)?
        .sink(TracingSink)
        .build()?;

    let outcome = desk.process(question).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
