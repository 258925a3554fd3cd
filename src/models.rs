//! Request, response and record types shared across the analysis pipeline.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::FieldError;

/// Trading horizon selected by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "long-term")]
    LongTerm,
    #[serde(rename = "scalp (1-2h)")]
    Scalp,
}

impl Horizon {
    pub const ALL: [Horizon; 2] = [Horizon::LongTerm, Horizon::Scalp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::LongTerm => "long-term",
            Horizon::Scalp => "scalp (1-2h)",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.as_str() == value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "long" => Some(Direction::Long),
            "short" => Some(Direction::Short),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Identity of a caller whose session has been resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedCaller {
    pub user_id: String,
}

impl AuthenticatedCaller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// A validated `POST /analyze` body.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyzeRequest {
    pub image_url: String,
    pub horizon: Horizon,
}

impl AnalyzeRequest {
    /// Parses and validates a raw JSON body, reporting every failing field.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, Vec<FieldError>> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| vec![FieldError::new("body", format!("Invalid JSON: {}", e))])?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, Vec<FieldError>> {
        let Some(object) = value.as_object() else {
            return Err(vec![FieldError::new("body", "Expected a JSON object")]);
        };

        let mut errors = Vec::new();

        let image_url = match object.get("imageUrl") {
            None | Some(Value::Null) => {
                errors.push(FieldError::new("imageUrl", "Required"));
                None
            }
            Some(Value::String(s)) => match validate_image_ref(s) {
                Ok(()) => Some(s.clone()),
                Err(message) => {
                    errors.push(FieldError::new("imageUrl", message));
                    None
                }
            },
            Some(_) => {
                errors.push(FieldError::new("imageUrl", "Expected string"));
                None
            }
        };

        let horizon = match object.get("horizon") {
            None | Some(Value::Null) => {
                errors.push(FieldError::new("horizon", "Required"));
                None
            }
            Some(Value::String(s)) => match Horizon::parse(s) {
                Some(h) => Some(h),
                None => {
                    errors.push(FieldError::new(
                        "horizon",
                        format!(
                            "Invalid enum value. Expected 'long-term' | 'scalp (1-2h)', received '{}'",
                            s
                        ),
                    ));
                    None
                }
            },
            Some(_) => {
                errors.push(FieldError::new("horizon", "Expected string"));
                None
            }
        };

        match (image_url, horizon) {
            (Some(image_url), Some(horizon)) if errors.is_empty() => Ok(Self { image_url, horizon }),
            _ => Err(errors),
        }
    }

    /// The payload stored on the job record.
    pub fn params(&self) -> Value {
        json!({
            "imageUrl": self.image_url,
            "horizon": self.horizon.as_str(),
        })
    }
}

fn validate_image_ref(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("Must not be empty".to_string());
    }
    // Url::parse trims surrounding whitespace.
    if value.trim() != value {
        return Err("Must not have leading or trailing whitespace".to_string());
    }
    let parsed = url::Url::parse(value).map_err(|_| "Invalid url".to_string())?;
    match parsed.scheme() {
        "http" | "https" | "data" => Ok(()),
        other => Err(format!("Unsupported url scheme '{}'", other)),
    }
}

/// Justification attached to a plan: bullet points or a single paragraph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reasoning {
    Points(Vec<String>),
    Text(String),
}

/// Oracle output after decoding but before the gate has checked it.
///
/// Values are typed but not yet range-checked, so a structurally odd
/// reply (e.g. a three-element entry) still reaches the gate and gets
/// reported field by field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePlan {
    pub direction: String,
    pub entry: Vec<f64>,
    pub stop: f64,
    pub take_profits: Vec<f64>,
    pub rr: f64,
    pub confidence: f64,
    pub reasoning: Reasoning,
    pub timeframe: String,
}

/// A plan that passed the gate. Serializes to the `200` response body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPlan {
    pub direction: Direction,
    pub entry: [f64; 2],
    pub stop: f64,
    pub take_profits: Vec<f64>,
    pub rr: f64,
    pub confidence: f64,
    pub reasoning: Reasoning,
    pub timeframe: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    pub id: String,
    pub user_id: String,
    pub image_ref: String,
    pub params: Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl AnalysisJob {
    /// A job resolved synchronously with an accepted plan.
    pub fn completed(caller: &AuthenticatedCaller, request: &AnalyzeRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: caller.user_id.clone(),
            image_ref: request.image_url.clone(),
            params: request.params(),
            status: JobStatus::Done,
            // Millisecond precision, matching what the store keeps.
            created_at: Utc::now().trunc_subsecs(3),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePlan {
    pub id: String,
    pub job_id: String,
    pub user_id: String,
    pub direction: Direction,
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop: f64,
    pub take_profits: Vec<f64>,
    pub rr: f64,
    pub confidence: f64,
    pub reasoning: Reasoning,
    pub timeframe: String,
}

impl TradePlan {
    pub fn for_job(job: &AnalysisJob, plan: &AcceptedPlan) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            direction: plan.direction,
            entry_low: plan.entry[0],
            entry_high: plan.entry[1],
            stop: plan.stop,
            take_profits: plan.take_profits.clone(),
            rr: plan.rr,
            confidence: plan.confidence,
            reasoning: plan.reasoning.clone(),
            timeframe: plan.timeframe.clone(),
        }
    }

    pub fn to_accepted(&self) -> AcceptedPlan {
        AcceptedPlan {
            direction: self.direction,
            entry: [self.entry_low, self.entry_high],
            stop: self.stop,
            take_profits: self.take_profits.clone(),
            rr: self.rr,
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
            timeframe: self.timeframe.clone(),
        }
    }
}

/// One row of a user's history: a job and its plan, if any.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub job: AnalysisJob,
    pub plan: Option<TradePlan>,
}
