//! Clare Daemon - registry query assistant
//!
//! Loads the configuration, opens the record and conversation databases,
//! and serves the query pipeline over HTTP.

mod routes;
mod server;

use anyhow::Result;
use clap::Parser;
use clare_common::cache::ContextCache;
use clare_common::conversation::SqliteConversationStore;
use clare_common::llm::HttpLlmClient;
use clare_common::records::SqliteRecordsStore;
use clare_common::{AssistantConfig, QueryPipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clared", version, about = "Clare registry assistant daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    listen: Option<String>,

    /// Conversation database path, overriding the configuration
    #[arg(long)]
    conversation_db: Option<PathBuf>,

    /// Registry records database path, overriding the configuration
    #[arg(long)]
    records_db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = AssistantConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(path) = args.conversation_db {
        config.conversation_db = path;
    }
    if let Some(path) = args.records_db {
        config.records_db = path;
    }

    info!("Clare Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let records = Arc::new(SqliteRecordsStore::open(&config.records_db)?);
    let conversations = Arc::new(SqliteConversationStore::open(&config.conversation_db)?);
    let llm = Arc::new(HttpLlmClient::new(config.llm.clone())?);
    let pipeline = Arc::new(QueryPipeline::new(
        records,
        conversations,
        llm,
        ContextCache::with_defaults(),
    ));

    let state = server::AppState::new(pipeline);
    server::run(state, &config.listen_addr).await
}
