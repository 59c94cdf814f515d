use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use veramoney_assistant::{
    config::Settings,
    llm::OpenAiClient,
    logging,
    rag::{PipelineState, RagPipeline},
};

async fn run() -> veramoney_assistant::Result<bool> {
    let settings = Settings::from_env()?;
    logging::init(&settings.log_level);

    info!(chroma = %settings.chroma_url(), collection = %settings.rag_collection_name, "Knowledge base ingestion");

    let openai = OpenAiClient::new(&settings.openai_api_key, &settings.openai_base_url)?;
    let embedder = Arc::new(openai.embeddings(&settings.openai_embedding_model));
    let pipeline = RagPipeline::from_settings(&settings, embedder)?;
    pipeline.initialize().await?;

    let status = pipeline.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(status.status == PipelineState::Ready)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("Ingestion finished with errors");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Ingestion failed: {}", e);
            eprintln!("Ingestion failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
