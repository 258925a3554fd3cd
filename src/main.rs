use rust_chartlab::api::{run_server, AppState};
use rust_chartlab::config::AppConfig;
use rust_chartlab::data::SqliteStore;
use rust_chartlab::llm::{ChartOracle, DemoOracle, LLMClient, VisionOracle};
use rust_chartlab::services::{AnalysisService, TradePlanGate};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }

    // Setup Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Chart Lab...");

    // Load Configuration
    let config = AppConfig::load()?;
    info!("Loaded Configuration: {:?}", config);

    // Open Store
    if let Some(parent) = Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(SqliteStore::new(&config.database.path)?);
    info!("💾 Using database at {}", config.database.path);

    // Initialize Oracle
    let oracle: Arc<dyn ChartOracle> = if config.llm.demo {
        warn!("🧪 llm.demo is enabled - every analysis returns the fixed demo plan");
        Arc::new(DemoOracle)
    } else {
        if let Some(url) = &config.llm.base_url {
            info!("Using Custom OpenAI Base URL: {}", url);
        }
        info!("Using LLM Model: {}", config.llm.model);
        let client = LLMClient::from_config(&config.llm)?;
        Arc::new(VisionOracle::new(client, config.llm.timeout()))
    };

    let gate = TradePlanGate::new(config.analysis.confidence_threshold);
    info!("🚦 Confidence threshold: {}", gate.threshold());

    let app_state = Arc::new(AppState {
        analysis: AnalysisService::new(oracle, store.clone(), gate),
        sessions: store,
        config,
    });

    // Start API Server
    info!("Initializing API Server...");
    run_server(app_state).await?;

    Ok(())
}
