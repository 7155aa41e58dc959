//! crates/homecare_core/src/jobs.rs
//!
//! Operator-triggered analytics jobs: association analysis over purchase
//! history and recipe drafting from the mined associations.
//!
//! Each job kind owns one status slot. Starting a job claims the slot through
//! `JobStatusStore::try_start` under a fresh run id, so at most one run of a
//! kind is in flight. The caller then drives the run (usually on a background
//! task) and polls the slot for progress. Every progress update doubles as a
//! heartbeat; a run whose heartbeat goes quiet for `stale_after` may be taken
//! over, and from then on its own writes are refused and it stops.

use chrono::Duration;
use mockable::Clock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    session_gap, AnalysisSummary, JobKind, JobResult, JobRun, JobStatus, ProductAssociation,
    RecipeDraft, RecipeGenerationSummary, RecipeStatus,
};
use crate::error::{ServiceError, ServiceResult};
use crate::mining::{mine_associations, segment_sessions};
use crate::ports::{
    AssociationStore, JobStatusStore, ProductCatalog, PurchaseHistoryStore, RecipeDraftStore,
    RecipeSynthesisService,
};
use crate::recipes::{build_clusters, ingredients_for, SkipReason, DEFAULT_CANDIDATE_LIMIT};

pub const DEFAULT_STALE_AFTER_MINUTES: i64 = 120;

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// How many association pairs seed recipe drafts per run.
    pub candidate_limit: u32,
    /// Pairs below this support are not persisted.
    pub min_support: f64,
    /// A running slot with no progress for this long may be taken over.
    pub stale_after: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            min_support: 0.0,
            stale_after: Duration::minutes(DEFAULT_STALE_AFTER_MINUTES),
        }
    }
}

/// The adapters the analytics jobs read from and write to.
#[derive(Clone)]
pub struct AnalyticsPorts {
    pub history: Arc<dyn PurchaseHistoryStore>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub associations: Arc<dyn AssociationStore>,
    pub drafts: Arc<dyn RecipeDraftStore>,
    pub jobs: Arc<dyn JobStatusStore>,
    pub synthesizer: Arc<dyn RecipeSynthesisService>,
}

#[derive(Clone)]
pub struct AnalyticsService {
    ports: AnalyticsPorts,
    clock: Arc<dyn Clock>,
    config: AnalyticsConfig,
}

impl AnalyticsService {
    pub fn new(ports: AnalyticsPorts, clock: Arc<dyn Clock>, config: AnalyticsConfig) -> Self {
        Self {
            ports,
            clock,
            config,
        }
    }

    pub async fn status(&self, kind: JobKind) -> ServiceResult<JobStatus> {
        Ok(self.ports.jobs.get_status(kind).await?)
    }

    pub async fn top_associations(&self, limit: u32) -> ServiceResult<Vec<ProductAssociation>> {
        Ok(self.ports.associations.top_by_lift(limit).await?)
    }

    pub async fn recipe_drafts(&self, limit: u32) -> ServiceResult<Vec<RecipeDraft>> {
        Ok(self.ports.drafts.list_drafts(limit).await?)
    }

    /// Claims the analysis slot. Fails while another analysis is running.
    pub async fn start_analysis(&self, operator_id: &str) -> ServiceResult<JobRun> {
        self.claim(JobKind::Analysis, operator_id).await
    }

    /// Claims the recipe generation slot.
    ///
    /// Refused outright when no associations exist; the slot is left untouched
    /// in that case.
    pub async fn start_recipe_generation(&self, operator_id: &str) -> ServiceResult<JobRun> {
        if self.ports.associations.count().await? == 0 {
            return Err(ServiceError::invalid_state(
                "no product associations exist yet; run analysis first",
            ));
        }
        self.claim(JobKind::RecipeGeneration, operator_id).await
    }

    async fn claim(&self, kind: JobKind, operator_id: &str) -> ServiceResult<JobRun> {
        let operator_id = operator_id.trim();
        if operator_id.is_empty() {
            return Err(ServiceError::validation("an operator id is required"));
        }
        let run_id = Uuid::new_v4();
        let now = self.clock.utc();
        let claimed = self
            .ports
            .jobs
            .try_start(kind, run_id, operator_id, now, now - self.config.stale_after)
            .await?;
        if !claimed {
            return Err(ServiceError::invalid_state(format!(
                "a {kind} run is already in progress"
            )));
        }
        info!(job = %kind, %run_id, operator_id, "Job started.");
        Ok(JobRun {
            run_id,
            operator_id: operator_id.to_string(),
            status: self.status(kind).await?,
        })
    }

    /// Executes a claimed analysis run and records its outcome in the slot.
    pub async fn run_analysis(&self, run: &JobRun) -> ServiceResult<AnalysisSummary> {
        let result = self.analyze(run).await;
        self.finish(run, result, JobResult::Analysis).await
    }

    /// Executes a claimed recipe generation run and records its outcome.
    pub async fn run_recipe_generation(
        &self,
        run: &JobRun,
    ) -> ServiceResult<RecipeGenerationSummary> {
        let result = self.generate_recipes(run).await;
        self.finish(run, result, JobResult::RecipeGeneration).await
    }

    async fn finish<S: Clone>(
        &self,
        run: &JobRun,
        result: ServiceResult<S>,
        wrap: fn(S) -> JobResult,
    ) -> ServiceResult<S> {
        let (kind, run_id) = (run.kind(), run.run_id);
        if matches!(result, Err(ServiceError::Superseded(_))) {
            return result;
        }
        let finished_at = self.clock.utc();
        let recorded = match &result {
            Ok(summary) => {
                self.ports
                    .jobs
                    .complete(kind, run_id, &wrap(summary.clone()), finished_at)
                    .await
            }
            Err(e) => {
                error!(job = %kind, %run_id, error = %e, "Job failed.");
                self.ports
                    .jobs
                    .fail(kind, run_id, &e.to_string(), finished_at)
                    .await
            }
        };
        match recorded {
            Ok(true) => {
                if result.is_ok() {
                    info!(job = %kind, %run_id, "Job completed.");
                }
                result
            }
            Ok(false) => Err(self.superseded(run)),
            Err(e) => {
                error!(job = %kind, %run_id, error = %e, "Failed to record job outcome.");
                if result.is_ok() {
                    return Err(e.into());
                }
                result
            }
        }
    }

    fn superseded(&self, run: &JobRun) -> ServiceError {
        warn!(job = %run.kind(), run_id = %run.run_id, "Job lost its slot to a newer run.");
        ServiceError::Superseded(format!(
            "this {} run was taken over by a newer run",
            run.kind()
        ))
    }

    /// Reports progress, and stops the run once it no longer holds its slot.
    async fn progress(&self, run: &JobRun, message: &str) -> ServiceResult<()> {
        debug!(job = %run.kind(), message, "Job progress.");
        let held = self
            .ports
            .jobs
            .update_progress(run.kind(), run.run_id, message, self.clock.utc())
            .await?;
        if !held {
            return Err(self.superseded(run));
        }
        Ok(())
    }

    async fn analyze(&self, run: &JobRun) -> ServiceResult<AnalysisSummary> {
        self.progress(run, "Loading purchase history").await?;
        let events = self.ports.history.load_events().await?;

        self.progress(run, &format!("Segmenting {} purchases into sessions", events.len()))
            .await?;
        let sessions = segment_sessions(&events, session_gap());

        self.progress(run, &format!("Mining associations across {} sessions", sessions.len()))
            .await?;
        let associations = mine_associations(&sessions, self.config.min_support);

        self.progress(run, &format!("Saving {} associations", associations.len()))
            .await?;
        self.ports.associations.replace_all(&associations).await?;

        Ok(AnalysisSummary {
            completed_at: self.clock.utc(),
            operator_id: run.operator_id.clone(),
            session_count: sessions.len() as u64,
            total_associations: associations.len() as u64,
        })
    }

    async fn generate_recipes(&self, run: &JobRun) -> ServiceResult<RecipeGenerationSummary> {
        self.progress(run, "Loading associations").await?;
        let associations = self.ports.associations.load_all().await?;
        if associations.is_empty() {
            return Err(ServiceError::invalid_state(
                "no product associations exist yet; run analysis first",
            ));
        }

        let clusters = build_clusters(&associations, self.config.candidate_limit as usize);
        let product_ids: Vec<String> = clusters
            .iter()
            .flat_map(|c| c.products.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let catalog: HashMap<String, _> = self
            .ports
            .catalog
            .get_products(&product_ids)
            .await?
            .into_iter()
            .map(|p| (p.product_id.clone(), p))
            .collect();

        let mut drafts = Vec::new();
        let mut skipped: HashMap<SkipReason, u32> = HashMap::new();
        let mut drafted: BTreeSet<Vec<String>> = BTreeSet::new();

        for (i, cluster) in clusters.iter().enumerate() {
            self.progress(
                run,
                &format!("Drafting recipe {} of {}", i + 1, clusters.len()),
            )
            .await?;

            let ingredients = match ingredients_for(cluster, &catalog) {
                Ok(ingredients) => ingredients,
                Err(reason) => {
                    *skipped.entry(reason).or_default() += 1;
                    continue;
                }
            };
            let mut key: Vec<String> = ingredients.iter().map(|i| i.product_id.clone()).collect();
            key.sort();
            if drafted.contains(&key) {
                *skipped.entry(SkipReason::Duplicate).or_default() += 1;
                continue;
            }

            let recipe = match self.ports.synthesizer.synthesize_recipe(&ingredients).await? {
                Some(recipe) if !recipe.name.trim().is_empty() => recipe,
                _ => {
                    debug!(
                        antecedent = %cluster.antecedent,
                        consequent = %cluster.consequent,
                        "No recipe for product cluster."
                    );
                    *skipped.entry(SkipReason::SynthesizerDeclined).or_default() += 1;
                    continue;
                }
            };

            drafted.insert(key);
            drafts.push(RecipeDraft {
                id: Uuid::new_v4(),
                name: recipe.name.trim().to_string(),
                description: recipe.description.trim().to_string(),
                ingredients,
                status: RecipeStatus::Draft,
                generated_by_ai: true,
                source_antecedent: cluster.antecedent.clone(),
                source_consequent: cluster.consequent.clone(),
                created_at: self.clock.utc(),
            });
        }

        self.progress(run, &format!("Saving {} recipe drafts", drafts.len()))
            .await?;
        if !drafts.is_empty() {
            self.ports.drafts.create_drafts(&drafts).await?;
        }

        for (reason, count) in &skipped {
            info!(reason = reason.as_str(), count, "Skipped product clusters.");
        }
        Ok(RecipeGenerationSummary {
            completed_at: self.clock.utc(),
            operator_id: run.operator_id.clone(),
            candidates: clusters.len() as u32,
            generated: drafts.len() as u32,
            skipped: skipped.values().sum(),
        })
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
