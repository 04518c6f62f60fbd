use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

mod auth;
mod chat;
mod cli;
mod config;
mod eid;
mod embeddings;
mod grounding;
mod index;
mod ingest;
mod llm;
mod suggest;
#[cfg(test)]
mod tests;
mod web;

use chat::{ChatPipeline, ConversationStore, MemoryStore};
use config::Config;
use embeddings::{Embedder, FastembedProvider};
use grounding::RemoteDocument;
use index::{HttpVectorIndex, VectorIndex};
use llm::GeminiClient;
use std::time::Duration;
use suggest::{SuggestionEngine, SuggestionSessions};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "askdoc=info,tower_http=info".to_string()),
        )
        .init();

    let args = cli::Args::parse();
    let config = Config::load();

    match args.command {
        cli::Command::Daemon {} => run_daemon(config),

        cli::Command::Ingest {} => run_ingest(config),

        cli::Command::Suggest { query, top_k } => {
            let embedder = build_embedder(&config);
            let index = build_index(&config)?;
            let engine =
                SuggestionEngine::new(embedder, index, config.suggestions.threshold, top_k);

            let suggestions = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(async { engine.suggest_top(&query, top_k).await })?;

            println!("{}", serde_json::to_string_pretty(&suggestions).unwrap());
            Ok(())
        }
    }
}

fn build_embedder(config: &Config) -> Arc<dyn Embedder> {
    Arc::new(FastembedProvider::new(
        &config.suggestions.model,
        config.model_cache_dir(),
        config.suggestions.dimension,
        Duration::from_secs(config.suggestions.download_timeout_secs),
    ))
}

fn build_index(config: &Config) -> anyhow::Result<Arc<dyn VectorIndex>> {
    let api_key = std::env::var("VECTOR_INDEX_API_KEY")
        .context("VECTOR_INDEX_API_KEY must be set in the environment")?;
    let index = HttpVectorIndex::new(
        &config.vector_index.api_base,
        &config.vector_index.index_name,
        &api_key,
        config.suggestions.dimension,
    )?;
    Ok(Arc::new(index))
}

fn run_daemon(config: Config) -> anyhow::Result<()> {
    let Ok(api_token) = std::env::var("ASKDOC_API_TOKEN") else {
        bail!("ASKDOC_API_TOKEN must be set in the environment");
    };
    let gemini_key =
        std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set in the environment")?;

    let embedder = build_embedder(&config);
    let index = build_index(&config)?;
    let model = Arc::new(GeminiClient::new(
        &config.generative.api_base,
        &config.generative.model,
        &gemini_key,
    )?);
    let document = Arc::new(RemoteDocument::new(
        &config.grounding.document_url,
        &config.grounding.mime_type,
    )?);
    let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());

    let engine = Arc::new(SuggestionEngine::new(
        embedder.clone(),
        index.clone(),
        config.suggestions.threshold,
        config.suggestions.top_k,
    ));
    let sessions = Arc::new(SuggestionSessions::new(
        engine,
        Duration::from_millis(config.suggestions.debounce_ms),
    ));
    let pipeline = ChatPipeline::new(store.clone(), model, document);

    web::start_daemon(config, pipeline, sessions, store, api_token);
    Ok(())
}

fn run_ingest(config: Config) -> anyhow::Result<()> {
    let questions = ingest::load_corpus(&config.corpus_path())?;
    if questions.is_empty() {
        bail!("corpus {} contains no questions", config.corpus_path().display());
    }

    let embedder = build_embedder(&config);
    let index = build_index(&config)?;

    let report = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            ingest::ensure_ingested(&embedder, &index, &questions, config.ingest.batch_size).await
        })?;

    if report.skipped {
        println!("index already populated, nothing to do");
    } else {
        println!("ingested {} questions", report.written);
    }
    Ok(())
}
