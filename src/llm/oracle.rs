//! Chart analysis oracle: turns a chart image into a candidate trade plan.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use super::LLMClient;
use crate::agents::{Agent, ChartAnalyst};
use crate::error::OracleError;
use crate::models::{CandidatePlan, Horizon, Reasoning};

#[async_trait]
pub trait ChartOracle: Send + Sync {
    fn name(&self) -> &str;

    /// Exactly one call to the model per invocation; no retries, no caching.
    async fn analyze(&self, image_ref: &str, horizon: Horizon) -> Result<CandidatePlan, OracleError>;
}

/// Vision-language model behind an OpenAI-compatible endpoint.
pub struct VisionOracle {
    client: LLMClient,
    timeout: Duration,
}

impl VisionOracle {
    pub fn new(client: LLMClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ChartOracle for VisionOracle {
    fn name(&self) -> &str {
        &self.client.model
    }

    async fn analyze(&self, image_ref: &str, horizon: Horizon) -> Result<CandidatePlan, OracleError> {
        let analyst = ChartAnalyst::new(horizon);
        info!(
            "🤖 [ORACLE] {} analyzing chart for horizon '{}'",
            analyst.name(),
            horizon.as_str()
        );

        let reply = tokio::time::timeout(
            self.timeout,
            self.client.chat_with_image(&analyst.system_prompt(), image_ref),
        )
        .await
        .map_err(|_| OracleError::Timeout(self.timeout))??;

        let text = reply.ok_or_else(|| OracleError::MalformedResponse("model returned no content".to_string()))?;
        decode_candidate(&text)
    }
}

/// Fixed plan for running the service without model credentials.
pub struct DemoOracle;

impl DemoOracle {
    pub fn plan() -> CandidatePlan {
        CandidatePlan {
            direction: "long".to_string(),
            entry: vec![100.0, 105.0],
            stop: 95.0,
            take_profits: vec![112.0, 118.0],
            rr: 2.1,
            confidence: 0.84,
            reasoning: Reasoning::Points(vec!["demo output".to_string()]),
            timeframe: "1h".to_string(),
        }
    }
}

#[async_trait]
impl ChartOracle for DemoOracle {
    fn name(&self) -> &str {
        "demo"
    }

    async fn analyze(&self, _image_ref: &str, horizon: Horizon) -> Result<CandidatePlan, OracleError> {
        info!("🧪 [ORACLE] Demo plan for horizon '{}'", horizon.as_str());
        Ok(Self::plan())
    }
}

/// Decodes the model's reply into a typed candidate.
///
/// JSON mode should yield a bare object, but some providers still wrap it in
/// prose or code fences, so the outermost `{...}` is taken when present.
pub fn decode_candidate(text: &str) -> Result<CandidatePlan, OracleError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(OracleError::MalformedResponse("model returned empty content".to_string()));
    }

    let json_str = extract_json(trimmed).unwrap_or(trimmed);
    serde_json::from_str::<CandidatePlan>(json_str).map_err(|e| {
        warn!("⚠️ [ORACLE] Could not decode reply: {}", e);
        OracleError::MalformedResponse(e.to_string())
    })
}

fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}
