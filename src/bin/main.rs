use market_desk_core::{
    api::start_server,
    gateway::OpenAiGateway,
    ledger::{Ledger, PriceTable},
    retrieval::{build_index, load_corpus_dir, HashingEmbedder, IndexHandle, RetrievalEngine},
    session::SessionStore,
    tools::market::create_default_registry,
    CoreConfig, Orchestrator,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = CoreConfig::from_env()?;

    info!("Market Intelligence Desk - API Server");
    info!("Port: {}", config.port);

    // Components
    let embedder = Arc::new(HashingEmbedder::default());
    let index = match &config.knowledge_dir {
        Some(dir) => {
            let documents = load_corpus_dir(dir)?;
            IndexHandle::new(build_index(&documents, embedder.as_ref(), 1).await?)
        }
        None => IndexHandle::empty(),
    };
    let engine = Arc::new(RetrievalEngine::new(index, embedder));

    let registry = Arc::new(create_default_registry(&config, Arc::clone(&engine))?);

    let prices = match &config.price_table_path {
        Some(path) => PriceTable::from_json(&std::fs::read_to_string(path)?)?,
        None => PriceTable::default_table(),
    };
    let ledger = Arc::new(Ledger::new(config.ops_per_min, prices));
    let sessions = SessionStore::new();

    let gateway = Arc::new(OpenAiGateway::new(
        config.model_api_key.clone(),
        config.model_api_base.clone(),
        config.call_timeout,
    )?);

    let orchestrator = Arc::new(Orchestrator::new(
        gateway,
        registry,
        ledger,
        sessions,
        config.max_rounds,
        config.call_timeout,
    ));

    info!(tools = ?orchestrator.tool_names(), "Orchestrator initialized");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
