use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::constants::events;
use crate::data::store::AnalysisRepository;
use crate::error::{AnalysisError, OracleError};
use crate::llm::ChartOracle;
use crate::models::{
    AcceptedPlan, AnalysisJob, AnalyzeRequest, AuthenticatedCaller, HistoryEntry, TradePlan,
};
use crate::services::gate::TradePlanGate;

/// Runs one chart analysis request end to end:
/// authenticate, validate, ask the oracle, gate, persist, respond.
///
/// Holds no per-request state, so one instance serves concurrent requests.
#[derive(Clone)]
pub struct AnalysisService {
    oracle: Arc<dyn ChartOracle>,
    repository: Arc<dyn AnalysisRepository>,
    gate: TradePlanGate,
}

impl AnalysisService {
    pub fn new(
        oracle: Arc<dyn ChartOracle>,
        repository: Arc<dyn AnalysisRepository>,
        gate: TradePlanGate,
    ) -> Self {
        Self {
            oracle,
            repository,
            gate,
        }
    }

    pub fn gate(&self) -> &TradePlanGate {
        &self.gate
    }

    /// Handles a raw `POST /analyze` body for an optional caller.
    ///
    /// The caller is checked before the body is looked at, so anonymous
    /// requests cost neither parsing nor an oracle call.
    pub async fn submit_analysis(
        &self,
        caller: Option<&AuthenticatedCaller>,
        body: &[u8],
    ) -> Result<AcceptedPlan, AnalysisError> {
        let Some(caller) = caller else {
            info!(event = events::ANALYSIS_UNAUTHORIZED, "🔒 [ANALYSIS] Rejected anonymous request");
            return Err(AnalysisError::Unauthorized);
        };
        debug!(event = events::ANALYSIS_RECEIVED, user_id = %caller.user_id, "📥 [ANALYSIS] Request received");

        let request = AnalyzeRequest::from_json_slice(body).map_err(|fields| {
            info!(
                event = events::ANALYSIS_INVALID,
                user_id = %caller.user_id,
                fields = fields.len(),
                "⚠️ [ANALYSIS] Invalid request body"
            );
            AnalysisError::InvalidRequest(fields)
        })?;

        self.analyze(caller, request).await
    }

    /// Oracle, gate and persistence for an already validated request.
    pub async fn analyze(
        &self,
        caller: &AuthenticatedCaller,
        request: AnalyzeRequest,
    ) -> Result<AcceptedPlan, AnalysisError> {
        info!(
            event = events::ORACLE_CALLED,
            user_id = %caller.user_id,
            oracle = self.oracle.name(),
            horizon = request.horizon.as_str(),
            "🔭 [ANALYSIS] Calling oracle"
        );

        let candidate = self
            .oracle
            .analyze(&request.image_url, request.horizon)
            .await
            .map_err(|e| {
                log_oracle_failure(caller, &e);
                AnalysisError::AnalysisFailed(e)
            })?;

        let plan = self.gate.evaluate(candidate)?;

        let job = AnalysisJob::completed(caller, &request);
        let record = TradePlan::for_job(&job, &plan);

        if let Err(e) = self.repository.record_analysis(&job, &record).await {
            error!(
                event = events::PERSISTENCE_FAILED,
                user_id = %caller.user_id,
                job_id = %job.id,
                "❌ [ANALYSIS] Failed to persist analysis: {}",
                e
            );
            return Err(AnalysisError::PersistenceFailure(e));
        }

        info!(
            event = events::ANALYSIS_PERSISTED,
            user_id = %caller.user_id,
            job_id = %job.id,
            plan_id = %record.id,
            "✅ [ANALYSIS] Stored {} plan (confidence {:.2})",
            plan.direction.as_str(),
            plan.confidence
        );

        Ok(plan)
    }

    /// The caller's most recent analyses, newest first.
    pub async fn history(
        &self,
        caller: Option<&AuthenticatedCaller>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, AnalysisError> {
        let caller = caller.ok_or(AnalysisError::Unauthorized)?;
        let entries = self
            .repository
            .recent_analyses(&caller.user_id, limit)
            .await
            .map_err(|e| {
                error!("❌ [HISTORY] Failed to load history for {}: {}", caller.user_id, e);
                AnalysisError::PersistenceFailure(e)
            })?;
        debug!("📜 [HISTORY] {} entries for {}", entries.len(), caller.user_id);
        Ok(entries)
    }
}

fn log_oracle_failure(caller: &AuthenticatedCaller, err: &OracleError) {
    if err.is_unavailable() {
        error!(
            event = events::ORACLE_FAILED,
            user_id = %caller.user_id,
            "❌ [ANALYSIS] Oracle unavailable: {}",
            err
        );
    } else {
        warn!(
            event = events::ORACLE_FAILED,
            user_id = %caller.user_id,
            "⚠️ [ANALYSIS] Oracle reply unusable: {}",
            err
        );
    }
}
