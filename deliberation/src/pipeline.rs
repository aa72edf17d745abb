//! Pipeline assembly: wires collaborators into the seven nodes and the
//! executor.
//!
//! ```text
//! PipelineBuilder::new(config)
//!     .quick_reasoning(..)   analysts' and debaters' model
//!     .deep_reasoning(..)    judges' and arbiter's model (defaults to quick)
//!     .data_source(..)
//!     .analyst(..) x N
//!     .research_agent(..) / .risk_agent(..)
//!     .scorer(..) / .store(..)            optional
//!     .build()? ─────────────────▶ TradingPipeline::propagate(subject, date)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::analysts::{AnalystDispatcher, AnalystTask, ToolInvocationGuard};
use crate::checkpoint::{validate_run_id, CheckpointStore};
use crate::collaborators::{DataRetrieval, QualityScorer, ReasoningCall};
use crate::config::{DebateSettings, RunConfig};
use crate::debate::{DebateCoordinator, ResearchStance, RiskStance, StanceAgent};
use crate::error::{CheckpointError, ConfigError};
use crate::graph::{
    pipeline_route, AnalystsNode, DebateRoundNode, DebateSlot, FinalArbiterNode, GraphExecutor,
    JudgeNode, RunOutcome, TraderNode,
};
use crate::state::{is_valid_subject, SharedState};
use crate::synthesis::{FinalArbiter, JudgeSynthesizer, TraderSynthesizer};

/// Collects collaborators; [`PipelineBuilder::build`] checks nothing is missing.
pub struct PipelineBuilder {
    config: RunConfig,
    quick: Option<Arc<dyn ReasoningCall>>,
    deep: Option<Arc<dyn ReasoningCall>>,
    data: Option<Arc<dyn DataRetrieval>>,
    analysts: Vec<Arc<dyn AnalystTask>>,
    research_agents: BTreeMap<ResearchStance, Arc<dyn StanceAgent<ResearchStance>>>,
    risk_agents: BTreeMap<RiskStance, Arc<dyn StanceAgent<RiskStance>>>,
    scorer: Option<Arc<dyn QualityScorer>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl PipelineBuilder {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            quick: None,
            deep: None,
            data: None,
            analysts: Vec::new(),
            research_agents: BTreeMap::new(),
            risk_agents: BTreeMap::new(),
            scorer: None,
            store: None,
        }
    }

    pub fn quick_reasoning(mut self, call: Arc<dyn ReasoningCall>) -> Self {
        self.quick = Some(call);
        self
    }

    pub fn deep_reasoning(mut self, call: Arc<dyn ReasoningCall>) -> Self {
        self.deep = Some(call);
        self
    }

    pub fn data_source(mut self, source: Arc<dyn DataRetrieval>) -> Self {
        self.data = Some(source);
        self
    }

    pub fn analyst(mut self, task: Arc<dyn AnalystTask>) -> Self {
        self.analysts.push(task);
        self
    }

    pub fn research_agent(
        mut self,
        stance: ResearchStance,
        agent: Arc<dyn StanceAgent<ResearchStance>>,
    ) -> Self {
        self.research_agents.insert(stance, agent);
        self
    }

    pub fn risk_agent(mut self, stance: RiskStance, agent: Arc<dyn StanceAgent<RiskStance>>) -> Self {
        self.risk_agents.insert(stance, agent);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<TradingPipeline, ConfigError> {
        self.config.validate()?;

        let quick = self
            .quick
            .ok_or(ConfigError::MissingCollaborator("quick reasoning call"))?;
        let deep = self.deep.unwrap_or_else(|| quick.clone());
        let data = self
            .data
            .ok_or(ConfigError::MissingCollaborator("data source"))?;

        let mut tasks = Vec::with_capacity(self.config.analysts.len());
        for kind in &self.config.analysts {
            let task = self
                .analysts
                .iter()
                .find(|t| t.kind() == *kind)
                .ok_or(ConfigError::MissingCollaborator("analyst task"))?;
            tasks.push(task.clone());
        }

        let research = coordinator(
            &self.config.research_debate,
            self.research_agents,
            self.scorer.clone(),
        )?;
        let risk = coordinator(&self.config.risk_debate, self.risk_agents, self.scorer)?;

        let call_timeout = self.config.call_timeout();
        let guard = Arc::new(
            ToolInvocationGuard::new(data, self.config.tool_retries)
                .with_call_timeout(call_timeout),
        );
        let dispatcher = AnalystDispatcher::new(guard, self.config.analyst_timeout());

        let mut executor = GraphExecutor::new(pipeline_route)
            .with_node_timeout(self.config.node_timeout())
            .with_node(Arc::new(AnalystsNode::new(dispatcher, tasks)))
            .with_node(Arc::new(DebateRoundNode::new(research)))
            .with_node(Arc::new(JudgeNode::<ResearchStance>::new(
                JudgeSynthesizer::new(deep.clone(), call_timeout),
            )))
            .with_node(Arc::new(TraderNode::new(TraderSynthesizer::new(
                quick,
                call_timeout,
            ))))
            .with_node(Arc::new(DebateRoundNode::new(risk)))
            .with_node(Arc::new(JudgeNode::<RiskStance>::new(
                JudgeSynthesizer::new(deep.clone(), call_timeout),
            )))
            .with_node(Arc::new(FinalArbiterNode::new(FinalArbiter::new(
                deep,
                call_timeout,
            ))));
        if let Some(store) = self.store {
            executor = executor.with_store(store);
        }

        Ok(TradingPipeline {
            config: self.config,
            executor,
        })
    }
}

fn coordinator<S: DebateSlot>(
    settings: &DebateSettings,
    agents: BTreeMap<S, Arc<dyn StanceAgent<S>>>,
    scorer: Option<Arc<dyn QualityScorer>>,
) -> Result<DebateCoordinator<S>, ConfigError> {
    let mut coordinator = DebateCoordinator::new(settings);
    for (stance, agent) in agents {
        coordinator = coordinator.with_agent(stance, agent);
    }
    if let Some(scorer) = scorer {
        coordinator = coordinator.with_scorer(scorer);
    }
    coordinator.validate()?;
    Ok(coordinator)
}

/// A fully wired decision pipeline.
pub struct TradingPipeline {
    config: RunConfig,
    executor: GraphExecutor,
}

impl TradingPipeline {
    pub fn builder(config: RunConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run one decision for `subject` on `trade_date` under a fresh run id.
    pub async fn propagate(
        &self,
        subject: &str,
        trade_date: NaiveDate,
    ) -> Result<RunOutcome, ConfigError> {
        let subject = normalize_subject(subject)?;
        Ok(self.start(SharedState::new(&subject, trade_date)).await)
    }

    /// Like [`propagate`](Self::propagate), under a caller-chosen run id.
    pub async fn propagate_as(
        &self,
        run_id: &str,
        subject: &str,
        trade_date: NaiveDate,
    ) -> Result<RunOutcome, ConfigError> {
        validate_run_id(run_id).map_err(|e| ConfigError::invalid(e.to_string()))?;
        let subject = normalize_subject(subject)?;
        Ok(self
            .start(SharedState::with_run_id(run_id, &subject, trade_date))
            .await)
    }

    /// Continue an interrupted run from its last checkpoint.
    pub async fn resume(&self, run_id: &str) -> Result<RunOutcome, CheckpointError> {
        validate_run_id(run_id)?;
        self.executor.resume(run_id, self.config.step_budget).await
    }

    async fn start(&self, state: SharedState) -> RunOutcome {
        let outcome = self.executor.run(state, self.config.step_budget).await;
        info!(run_id = %outcome.state.run_id, "{}", outcome.summary_line());
        outcome
    }
}

fn normalize_subject(subject: &str) -> Result<String, ConfigError> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(ConfigError::invalid("subject must not be empty"));
    }
    if !is_valid_subject(subject) {
        return Err(ConfigError::invalid(format!(
            "invalid subject {:?}: expected a ticker symbol",
            subject
        )));
    }
    Ok(subject.to_uppercase())
}
