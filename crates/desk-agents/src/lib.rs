//! LLM-backed collaborators for the `deliberation` pipeline, plus the
//! configuration, cached data source and run logs the CLI needs.

#![allow(clippy::uninlined_format_args)]

pub mod agents;
pub mod config;
pub mod data;
pub mod llm;
pub mod report;

use std::sync::Arc;

use anyhow::{Context, Result};
use deliberation::{
    JsonFileStore, ReasoningCall, ResearchStance, RiskStance, Stance, TradingPipeline,
};
use tracing::info;

use crate::agents::{ReasoningAnalyst, ReasoningDebater, ReasoningScorer};
use crate::config::DeskConfig;
use crate::data::CachedDataSource;
use crate::llm::ChatClient;

/// Wire every collaborator from configuration into a ready pipeline.
pub fn build_pipeline(config: &DeskConfig) -> Result<TradingPipeline> {
    let timeout = config.run.call_timeout();
    let quick: Arc<dyn ReasoningCall> = Arc::new(
        ChatClient::new(&config.llm, &config.llm.quick_model, timeout)
            .context("Failed to set up quick reasoning model")?,
    );
    let deep: Arc<dyn ReasoningCall> = Arc::new(
        ChatClient::new(&config.llm, &config.llm.deep_model, timeout)
            .context("Failed to set up deep reasoning model")?,
    );

    let mut builder = TradingPipeline::builder(config.run.clone())
        .quick_reasoning(quick.clone())
        .deep_reasoning(deep)
        .data_source(Arc::new(CachedDataSource::new(&config.data_dir)));

    for kind in &config.run.analysts {
        builder = builder.analyst(Arc::new(ReasoningAnalyst::new(*kind, quick.clone())));
    }
    let debater = Arc::new(ReasoningDebater::new(quick.clone()));
    for stance in ResearchStance::speaking_order() {
        builder = builder.research_agent(*stance, debater.clone());
    }
    for stance in RiskStance::speaking_order() {
        builder = builder.risk_agent(*stance, debater.clone());
    }
    if config.llm.score_debates {
        builder = builder.scorer(Arc::new(ReasoningScorer::new(quick)));
    }
    if let Some(dir) = &config.checkpoint_dir {
        builder = builder.store(Arc::new(JsonFileStore::new(dir)));
    }

    let pipeline = builder.build().context("Failed to assemble pipeline")?;
    info!(
        url = %config.llm.url,
        quick = %config.llm.quick_model,
        deep = %config.llm.deep_model,
        analysts = config.run.analysts.len(),
        checkpoints = config.checkpoint_dir.is_some(),
        "Pipeline ready"
    );
    Ok(pipeline)
}
