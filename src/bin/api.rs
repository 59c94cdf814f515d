use std::sync::Arc;
use tracing::{error, info, warn};
use veramoney_assistant::{
    agent::SupervisorFactory,
    api::{serve, AppState},
    config::{Settings, SERVICE_NAME, SERVICE_VERSION},
    llm::OpenAiClient,
    logging,
    observability::{DatasetManager, LangfuseManager, PromptManager},
    rag::{KnowledgeRetriever, RagPipeline},
};

async fn knowledge_retriever(settings: &Settings) -> Option<KnowledgeRetriever> {
    let openai = match OpenAiClient::new(&settings.openai_api_key, &settings.openai_base_url) {
        Ok(client) => client,
        Err(e) => {
            warn!("Knowledge base disabled, OpenAI client unavailable: {}", e);
            return None;
        }
    };
    let embedder = Arc::new(openai.embeddings(&settings.openai_embedding_model));

    let pipeline = match RagPipeline::from_settings(settings, embedder) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            warn!("Knowledge base disabled: {}", e);
            return None;
        }
    };

    if let Err(e) = pipeline.initialize().await {
        error!("RAG pipeline failed, knowledge search unavailable: {}", e);
        return None;
    }

    let status = pipeline.status().await;
    info!(
        status = ?status.status,
        documents = status.document_count,
        chunks = status.chunk_count,
        "Knowledge base initialized"
    );
    pipeline.retriever()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Arc::new(Settings::from_env()?);
    let level = logging::init(&settings.log_level);

    info!("{} v{} starting", SERVICE_NAME, SERVICE_VERSION);
    info!(stage = %settings.app_stage, log_level = level, port = settings.app_port, "Configuration loaded");

    let langfuse = Arc::new(LangfuseManager::new(&settings));
    if langfuse.initialize().await {
        info!("Langfuse enabled");
    }

    let prompts = Arc::new(PromptManager::new(langfuse.clone(), settings.agent_model.clone()));
    prompts.sync_to_langfuse().await;

    let datasets = Arc::new(DatasetManager::new(langfuse.clone()));
    datasets.initialize().await;

    let retriever = knowledge_retriever(&settings).await;

    let factory = SupervisorFactory::from_settings(settings.clone(), retriever, langfuse, prompts)?;
    let state = AppState::new(settings, Arc::new(factory), datasets);

    serve(state).await?;
    Ok(())
}
