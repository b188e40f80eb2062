//! Orchestrator for interview question pipeline runs
//!
//! A run batches the input skills, then a fixed-width pool of workers takes
//! one batch at a time through discovery, token budgeting and generation.
//! Every input skill ends in exactly one `SkillResult` event, whatever
//! happens to its batch, and the stream always ends with `Complete`.

use super::batcher::Batcher;
use super::events::{self, BatchStatus, EventPublisher, EventStream, PipelineEvent};
use super::models::{
    Batch, BatchPhase, BatchSummary, GeneratedQuestions, GenerationRequest, IndexedSkill,
    PlannedSkill, RunSummary, Skill, SkillPhase, SkillResult,
};
use crate::config::Config;
use crate::context::{ContextStrategySelector, GenerationStrategy, SourceContext, TokenBudgetSplitter};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::providers::{QuestionGenerator, SourceDiscoverer};
use crate::resilience::{
    CallFailure, RateLimiters, RetryExecutor, RetryPolicy, ServiceHealth, ServiceKind,
};
use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CANCELLED_REASON: &str = "run cancelled";
const NO_QUESTIONS_REASON: &str = "no questions generated";

/// Entry point: owns configuration and the two capabilities, starts runs
pub struct PipelineOrchestrator {
    config: Arc<Config>,
    discoverer: Arc<dyn SourceDiscoverer>,
    generator: Arc<dyn QuestionGenerator>,
    batcher: Batcher,
}

/// Caller's handle on a running pipeline
pub struct PipelineRun {
    pub run_id: Uuid,
    pub events: EventStream,
    cancel: CancellationToken,
}

impl PipelineRun {
    /// Stop admitting batches and abort pending calls.
    ///
    /// The stream still delivers a result for every skill and the sentinel.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next(&mut self) -> Option<PipelineEvent> {
        self.events.next().await
    }
}

impl PipelineOrchestrator {
    pub fn new(
        config: Config,
        discoverer: Arc<dyn SourceDiscoverer>,
        generator: Arc<dyn QuestionGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        let batcher = Batcher::new(config.pipeline.batch_size, config.pipeline.token_budget)?;

        Ok(Self {
            config: Arc::new(config),
            discoverer,
            generator,
            batcher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a run over `skills` on the current tokio runtime.
    ///
    /// Rate limiters and degraded flags are fresh for every run.
    pub fn run(&self, skills: Vec<Skill>) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (publisher, events) = events::channel(self.config.pipeline.event_buffer);

        let health = Arc::new(ServiceHealth::new());
        let limiters = Arc::new(RateLimiters::from_config(&self.config));
        let policy = RetryPolicy::from_config(&self.config.retry, self.config.pipeline.call_timeout());

        let ctx = Arc::new(RunContext {
            run_id,
            config: self.config.clone(),
            discoverer: self.discoverer.clone(),
            generator: self.generator.clone(),
            executor: RetryExecutor::new(policy, limiters, health.clone(), cancel.clone()),
            health,
            splitter: TokenBudgetSplitter::new(),
            selector: ContextStrategySelector::new(self.config.pipeline.min_context_chars),
            events: publisher,
            cancel: cancel.clone(),
        });

        let batches = self.batcher.batch(&skills);
        info!(
            "Starting pipeline run {} with {} skills in {} batches",
            run_id,
            skills.len(),
            batches.len()
        );
        tokio::spawn(drive(ctx, batches, skills.len()));

        PipelineRun {
            run_id,
            events,
            cancel,
        }
    }
}

/// State shared by the driver and every worker of one run
struct RunContext {
    run_id: Uuid,
    config: Arc<Config>,
    discoverer: Arc<dyn SourceDiscoverer>,
    generator: Arc<dyn QuestionGenerator>,
    executor: RetryExecutor,
    health: Arc<ServiceHealth>,
    splitter: TokenBudgetSplitter,
    selector: ContextStrategySelector,
    events: EventPublisher,
    cancel: CancellationToken,
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchTally {
    succeeded: usize,
    failed: usize,
}

impl std::ops::AddAssign for BatchTally {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Admit batches into the worker pool, then wait for all of them and
/// publish the completion sentinel
async fn drive(ctx: Arc<RunContext>, batches: Vec<Batch<IndexedSkill>>, total_skills: usize) {
    let started_at = Utc::now();
    let started = tokio::time::Instant::now();
    let pool = Arc::new(Semaphore::new(ctx.config.pipeline.worker_pool_width));
    let stagger = ctx.config.pipeline.batch_stagger();
    let mut workers = JoinSet::new();
    let mut totals = BatchTally::default();

    for (position, batch) in batches.into_iter().enumerate() {
        debug!("{} -> {:?}", batch.label, BatchPhase::Pending);
        let permit = if ctx.cancel.is_cancelled() {
            None
        } else {
            admit(&ctx, &pool, position > 0 && !stagger.is_zero()).await
        };

        match permit {
            Some(permit) => {
                workers.spawn(run_worker(ctx.clone(), batch, permit));
            }
            None => {
                let mut emitter = BatchEmitter::new(ctx.clone(), &batch);
                totals += emitter.finish(CANCELLED_REASON).await;
            }
        }
    }

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(tally) => totals += tally,
            Err(e) => error!("Batch worker for run {} could not be joined: {}", ctx.run_id, e),
        }
    }

    let summary = RunSummary {
        run_id: ctx.run_id,
        total_skills,
        succeeded: totals.succeeded,
        failed: totals.failed,
        cancelled: ctx.cancel.is_cancelled(),
        degraded_services: ctx.health.degraded_services(),
        started_at,
        finished_at: Utc::now(),
    };
    METRICS.record_run(started.elapsed());
    info!(
        "Pipeline run {} finished: {}/{} succeeded, {} failed, cancelled={}, degraded={:?}",
        summary.run_id,
        summary.succeeded,
        summary.total_skills,
        summary.failed,
        summary.cancelled,
        summary.degraded_services
    );

    if ctx.events.publish(PipelineEvent::Complete(summary)).await.is_err() {
        debug!("Run {} completed after its consumer went away", ctx.run_id);
    }
}

/// Wait for the stagger delay and a free worker slot; `None` once cancelled
async fn admit(
    ctx: &RunContext,
    pool: &Arc<Semaphore>,
    staggered: bool,
) -> Option<OwnedSemaphorePermit> {
    if staggered {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return None,
            _ = tokio::time::sleep(ctx.config.pipeline.batch_stagger()) => {}
        }
    }

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        permit = pool.clone().acquire_owned() => permit.ok(),
    }
}

async fn run_worker(
    ctx: Arc<RunContext>,
    batch: Batch<IndexedSkill>,
    permit: OwnedSemaphorePermit,
) -> BatchTally {
    let _permit = permit;
    let label = batch.label.clone();
    let mut emitter = BatchEmitter::new(ctx.clone(), &batch);

    let outcome = AssertUnwindSafe(ctx.process_batch(batch, &mut emitter))
        .catch_unwind()
        .await;

    let reason = match outcome {
        Ok(()) if ctx.cancel.is_cancelled() => CANCELLED_REASON.to_string(),
        Ok(()) => "batch ended without a result".to_string(),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("{}: worker panicked: {}", label, message);
            format!("batch worker failed: {}", message)
        }
    };
    emitter.finish(&reason).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl RunContext {
    async fn process_batch(&self, batch: Batch<IndexedSkill>, emitter: &mut BatchEmitter) {
        info!("{}: processing {} skills", batch.label, batch.len());
        self.publish_status(&batch, BatchPhase::Discovering).await;

        let discovered = self.discover(&batch).await;
        if self.cancel.is_cancelled() {
            return;
        }

        let planned = batch.map_items(|_| {
            discovered
                .into_iter()
                .map(|(item, context, discovery_degraded)| {
                    let strategy = self.selector.select(&context, discovery_degraded);
                    let phase = if strategy == GenerationStrategy::ContextBased {
                        SkillPhase::ContextFound
                    } else {
                        SkillPhase::NoContext
                    };
                    debug!("[{}] {} -> {:?}", item.index, item.skill, phase);
                    emitter.set_strategy(item.index, strategy);
                    PlannedSkill {
                        index: item.index,
                        request: GenerationRequest {
                            skill: item.skill,
                            context,
                            strategy,
                        },
                    }
                })
                .collect()
        });

        let (index, label) = (planned.index, planned.label.clone());
        let sub_batches = self.splitter.split(planned);
        if sub_batches.len() > 1 {
            let status = BatchStatus {
                batch_index: index,
                label,
                phase: BatchPhase::Splitting {
                    sub_batches: sub_batches.len(),
                },
            };
            self.publish(PipelineEvent::Status(status)).await;
        }

        for sub in sub_batches {
            if self.cancel.is_cancelled() {
                return;
            }
            self.generate(sub, emitter).await;
        }
    }

    /// Discover sources for every skill of the batch with bounded concurrency.
    ///
    /// Returns each skill with its context and whether discovery was degraded
    /// when the skill came up.
    async fn discover(&self, batch: &Batch<IndexedSkill>) -> Vec<(IndexedSkill, SourceContext, bool)> {
        stream::iter(batch.items.iter().cloned())
            .map(|item| self.discover_one(item, &batch.label))
            .buffered(self.config.pipeline.discovery_concurrency)
            .collect()
            .await
    }

    /// Failures other than a degraded service fall back to `NotFound`
    async fn discover_one(&self, item: IndexedSkill, label: &str) -> (IndexedSkill, SourceContext, bool) {
        if self.health.is_degraded(ServiceKind::Discovery) {
            return (item, SourceContext::NotFound, true);
        }

        debug!("[{}] {} -> {:?}", item.index, item.skill, SkillPhase::Discovering);
        let result = self
            .executor
            .execute(ServiceKind::Discovery, || {
                self.discoverer.discover_sources(&item.skill)
            })
            .await;

        match result {
            Ok(context) => (item, context, false),
            Err(CallFailure::Degraded {
                reason,
                newly_degraded,
                ..
            }) => {
                if newly_degraded {
                    self.announce_degraded(ServiceKind::Discovery, reason).await;
                }
                (item, SourceContext::NotFound, true)
            }
            Err(CallFailure::Cancelled) => (item, SourceContext::NotFound, false),
            Err(e) => {
                warn!(
                    "{}: discovery failed for '{}', continuing without context: {}",
                    label, item.skill, e
                );
                (item, SourceContext::NotFound, false)
            }
        }
    }

    /// One generation call for a sub-batch, then one result per skill
    async fn generate(&self, sub: Batch<PlannedSkill>, emitter: &mut BatchEmitter) {
        if self.health.is_degraded(ServiceKind::Generation) {
            let reason = self.generation_unavailable();
            self.fail_all(&sub, &reason, emitter).await;
            return;
        }

        if let Err(e) = self.splitter.check_budget(&sub) {
            warn!("{}: {}", sub.label, e);
        }
        self.publish_status(&sub, BatchPhase::Generating).await;
        info!("{}: generating questions for {} skills", sub.label, sub.len());
        for skill in &sub.items {
            debug!("[{}] {} -> {:?}", skill.index, skill.request.skill, SkillPhase::Generating);
        }

        let requests: Vec<GenerationRequest> =
            sub.items.iter().map(|skill| skill.request.clone()).collect();
        let result = self
            .executor
            .execute(ServiceKind::Generation, || {
                self.generator.generate_questions(&requests)
            })
            .await;

        match result {
            Ok(response) => {
                for result in reconcile(&sub.items, response) {
                    emitter.emit(result).await;
                }
            }
            Err(CallFailure::Cancelled) => {}
            Err(CallFailure::Degraded {
                reason,
                newly_degraded,
                ..
            }) => {
                if newly_degraded {
                    self.announce_degraded(ServiceKind::Generation, reason).await;
                }
                let reason = self.generation_unavailable();
                self.fail_all(&sub, &reason, emitter).await;
            }
            Err(e) => {
                error!("{}: generation failed: {}", sub.label, e);
                self.fail_all(&sub, &e.to_string(), emitter).await;
            }
        }
    }

    fn generation_unavailable(&self) -> String {
        format!(
            "generation service unavailable for this run: {}",
            self.health
                .reason(ServiceKind::Generation)
                .unwrap_or_else(|| "degraded".to_string())
        )
    }

    async fn fail_all(&self, sub: &Batch<PlannedSkill>, reason: &str, emitter: &mut BatchEmitter) {
        for skill in &sub.items {
            emitter
                .emit(SkillResult::failed(
                    skill.index,
                    skill.request.skill.clone(),
                    skill.request.strategy,
                    reason,
                ))
                .await;
        }
    }

    async fn announce_degraded(&self, service: ServiceKind, reason: String) {
        warn!("{} degraded for run {}: {}", service, self.run_id, reason);
        self.publish(PipelineEvent::ServiceDegraded {
            service: service.as_str().to_string(),
            reason,
        })
        .await;
    }

    async fn publish_status<T>(&self, batch: &Batch<T>, phase: BatchPhase) {
        self.publish(PipelineEvent::Status(BatchStatus {
            batch_index: batch.index,
            label: batch.label.clone(),
            phase,
        }))
        .await;
    }

    /// Publish with backpressure. A vanished consumer cancels the run.
    async fn publish(&self, event: PipelineEvent) {
        if self.events.publish(event).await.is_err() && !self.cancel.is_cancelled() {
            warn!("Event consumer for run {} went away, cancelling", self.run_id);
            self.cancel.cancel();
        }
    }
}

/// Match generated questions to requested skills: by normalized name first,
/// then positionally for whatever is left on both sides.
fn reconcile(items: &[PlannedSkill], response: Vec<GeneratedQuestions>) -> Vec<SkillResult> {
    let normalize = |skill: &str| skill.trim().to_lowercase();
    let mut slots: Vec<Option<Vec<String>>> = vec![None; items.len()];
    let mut leftovers = Vec::new();

    for entry in response {
        let key = normalize(&entry.skill);
        let matched = items
            .iter()
            .enumerate()
            .position(|(i, item)| slots[i].is_none() && normalize(&item.request.skill) == key);
        match matched {
            Some(i) => slots[i] = Some(entry.questions),
            None => leftovers.push(entry),
        }
    }

    let mut leftovers = leftovers.into_iter();
    for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
        match leftovers.next() {
            Some(entry) => *slot = Some(entry.questions),
            None => break,
        }
    }

    items
        .iter()
        .zip(slots)
        .map(|(item, slot)| {
            let questions: Vec<String> = slot
                .unwrap_or_default()
                .into_iter()
                .map(|question| question.trim().to_string())
                .filter(|question| !question.is_empty())
                .collect();
            if questions.is_empty() {
                SkillResult::failed(
                    item.index,
                    item.request.skill.clone(),
                    item.request.strategy,
                    NO_QUESTIONS_REASON,
                )
            } else {
                SkillResult::success(
                    item.index,
                    item.request.skill.clone(),
                    questions,
                    item.request.strategy,
                )
            }
        })
        .collect()
}

/// Per-batch bookkeeping that guarantees one result per skill
struct BatchEmitter {
    ctx: Arc<RunContext>,
    index: usize,
    label: String,
    pending: BTreeMap<usize, (Skill, GenerationStrategy)>,
    tally: BatchTally,
}

impl BatchEmitter {
    fn new(ctx: Arc<RunContext>, batch: &Batch<IndexedSkill>) -> Self {
        let pending = batch
            .items
            .iter()
            .map(|item| {
                debug!("[{}] {} -> {:?}", item.index, item.skill, SkillPhase::Pending);
                (item.index, (item.skill.clone(), GenerationStrategy::ContextFree))
            })
            .collect();
        Self {
            ctx,
            index: batch.index,
            label: batch.label.clone(),
            pending,
            tally: BatchTally::default(),
        }
    }

    fn set_strategy(&mut self, index: usize, strategy: GenerationStrategy) {
        if let Some(entry) = self.pending.get_mut(&index) {
            entry.1 = strategy;
        }
    }

    /// Publish a terminal result; later results for the same skill are dropped
    async fn emit(&mut self, result: SkillResult) {
        if self.pending.remove(&result.index).is_none() {
            debug!("{}: skill {} already reported", self.label, result.index);
            return;
        }

        let phase = if result.is_success() {
            self.tally.succeeded += 1;
            SkillPhase::Completed
        } else {
            self.tally.failed += 1;
            SkillPhase::Failed
        };
        debug!("[{}] {} -> {:?}", result.index, result.skill, phase);
        METRICS.record_skill_result(
            if result.is_success() { "success" } else { "failed" },
            result.strategy_used.as_str(),
        );
        self.ctx.publish(PipelineEvent::SkillResult(result)).await;
    }

    /// Fail whatever is still pending, then report the batch as done
    async fn finish(&mut self, reason: &str) -> BatchTally {
        let leftovers = std::mem::take(&mut self.pending);
        if !leftovers.is_empty() {
            warn!("{}: {} skills failed: {}", self.label, leftovers.len(), reason);
        }
        for (index, (skill, strategy)) in leftovers {
            self.tally.failed += 1;
            METRICS.record_skill_result("failed", strategy.as_str());
            self.ctx
                .publish(PipelineEvent::SkillResult(SkillResult::failed(
                    index, skill, strategy, reason,
                )))
                .await;
        }

        self.ctx
            .publish(PipelineEvent::Status(BatchStatus {
                batch_index: self.index,
                label: self.label.clone(),
                phase: BatchPhase::Done,
            }))
            .await;

        let summary = BatchSummary::new(
            self.index,
            self.label.clone(),
            self.tally.succeeded,
            self.tally.failed,
        );
        info!(
            "{} complete: {}/{} succeeded ({:?})",
            self.label, summary.succeeded, summary.total_skills, summary.outcome
        );
        self.ctx.publish(PipelineEvent::BatchCompleted(summary)).await;
        self.tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(index: usize, skill: &str) -> PlannedSkill {
        PlannedSkill {
            index,
            request: GenerationRequest {
                skill: skill.to_string(),
                context: SourceContext::NotFound,
                strategy: GenerationStrategy::ContextFree,
            },
        }
    }

    fn generated(skill: &str, questions: &[&str]) -> GeneratedQuestions {
        GeneratedQuestions {
            skill: skill.to_string(),
            questions: questions.iter().map(|q| q.to_string()).collect(),
        }
    }

    #[test]
    fn test_reconcile_matches_by_name_regardless_of_order() {
        let items = vec![planned(0, "Rust"), planned(1, "Kafka")];
        let results = reconcile(
            &items,
            vec![generated(" kafka ", &["K1"]), generated("RUST", &["R1", "R2"])],
        );

        assert_eq!(results[0].skill, "Rust");
        assert_eq!(results[0].questions, vec!["R1", "R2"]);
        assert_eq!(results[1].questions, vec!["K1"]);
        assert!(results.iter().all(|r| r.is_success()));
    }

    #[test]
    fn test_reconcile_falls_back_to_position() {
        let items = vec![planned(0, "Rust"), planned(1, "PostgreSQL")];
        let results = reconcile(
            &items,
            vec![generated("Rust", &["R1"]), generated("Postgres", &["P1"])],
        );
        assert_eq!(results[1].questions, vec!["P1"]);
        assert!(results[1].is_success());
    }

    #[test]
    fn test_reconcile_missing_and_empty_entries_fail() {
        let items = vec![planned(0, "Rust"), planned(1, "Go"), planned(2, "Zig")];
        let results = reconcile(&items, vec![generated("Go", &["  "]), generated("Rust", &["R1"])]);

        assert!(results[0].is_success());
        assert_eq!(results[1].error.as_deref(), Some(NO_QUESTIONS_REASON));
        assert_eq!(results[2].error.as_deref(), Some(NO_QUESTIONS_REASON));
    }

    #[test]
    fn test_reconcile_duplicates_fill_in_order() {
        let items = vec![planned(3, "Rust"), planned(4, "Rust")];
        let results = reconcile(
            &items,
            vec![generated("Rust", &["first"]), generated("Rust", &["second"])],
        );
        assert_eq!(results[0].index, 3);
        assert_eq!(results[0].questions, vec!["first"]);
        assert_eq!(results[1].questions, vec!["second"]);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
