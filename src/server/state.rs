use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::Result;
use crate::config::Config;
use crate::database::sessions::{SessionStore, open_session_store};
use crate::database::vector_store::VectorIndexStore;
use crate::embeddings::{Embedder, OllamaClient};
use crate::indexer::Indexer;
use crate::llm::{ChatModel, DeepSeekClient};
use crate::rag::Orchestrator;

/// Store handles shared by every request, built once at startup
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub index: Arc<VectorIndexStore>,
    pub indexer: Indexer,
    pub orchestrator: Orchestrator,
}

impl AppContext {
    /// Wire already-built collaborators together
    #[inline]
    pub fn new(
        config: Config,
        index: Arc<VectorIndexStore>,
        sessions: Arc<dyn SessionStore>,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let indexer = Indexer::from_config(&config, Arc::clone(&index))?;
        let orchestrator = Orchestrator::new(Arc::clone(&index), sessions, model, &config);
        Ok(Self {
            config,
            index,
            indexer,
            orchestrator,
        })
    }

    /// Connect to the configured providers and load the persisted index
    #[inline]
    pub async fn connect(config: Config, api_key: String) -> Result<Self> {
        config.validate()?;

        let embedder: Arc<dyn Embedder> = Arc::new(
            OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?,
        );
        let index = Arc::new(
            VectorIndexStore::open(&config.storage.vector_db_path, embedder).await?,
        );
        let sessions = open_session_store(&config).await?;
        let model: Arc<dyn ChatModel> = Arc::new(
            DeepSeekClient::new(&config.llm, api_key)
                .context("Failed to initialize chat model client")?,
        );

        info!(
            "Knowledge base ready with {} chunks",
            index.count().await
        );
        Self::new(config, index, sessions, model)
    }

    #[inline]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        self.orchestrator.sessions()
    }
}
