use tracing::info;

use crate::constants::analysis::{CONFIDENCE_THRESHOLD, MAX_TAKE_PROFITS, MIN_TAKE_PROFITS};
use crate::constants::events;
use crate::error::{AnalysisError, FieldError};
use crate::models::{AcceptedPlan, CandidatePlan, Direction};

/// Why a candidate plan was not accepted.
#[derive(Clone, Debug, PartialEq)]
pub enum GateRejection {
    Malformed(Vec<FieldError>),
    LowConfidence { confidence: f64, threshold: f64 },
}

impl From<GateRejection> for AnalysisError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::Malformed(fields) => AnalysisError::MalformedTradePlan(fields),
            GateRejection::LowConfidence {
                confidence,
                threshold,
            } => AnalysisError::LowConfidence {
                confidence,
                threshold,
            },
        }
    }
}

/// Structural checks plus the confidence floor a plan must clear before
/// it can be persisted or returned as advice.
#[derive(Clone, Copy, Debug)]
pub struct TradePlanGate {
    threshold: f64,
}

impl Default for TradePlanGate {
    fn default() -> Self {
        Self::new(CONFIDENCE_THRESHOLD)
    }
}

impl TradePlanGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn evaluate(&self, candidate: CandidatePlan) -> Result<AcceptedPlan, GateRejection> {
        let mut errors = Vec::new();

        let direction = Direction::parse(&candidate.direction);
        if direction.is_none() {
            errors.push(FieldError::new(
                "direction",
                format!("expected 'long' or 'short', got '{}'", candidate.direction),
            ));
        }

        let entry = match candidate.entry.as_slice() {
            [low, high] if !low.is_finite() || !high.is_finite() => {
                errors.push(FieldError::new("entry", "bounds must be finite numbers"));
                None
            }
            [low, high] if low > high => {
                errors.push(FieldError::new(
                    "entry",
                    format!("low {} is above high {}", low, high),
                ));
                None
            }
            [low, high] => Some([*low, *high]),
            other => {
                errors.push(FieldError::new(
                    "entry",
                    format!("expected 2 values, got {}", other.len()),
                ));
                None
            }
        };

        if !candidate.stop.is_finite() {
            errors.push(FieldError::new("stop", "must be a finite number"));
        }

        let tp_count = candidate.take_profits.len();
        if !(MIN_TAKE_PROFITS..=MAX_TAKE_PROFITS).contains(&tp_count) {
            errors.push(FieldError::new(
                "takeProfits",
                format!(
                    "expected {} to {} values, got {}",
                    MIN_TAKE_PROFITS, MAX_TAKE_PROFITS, tp_count
                ),
            ));
        } else if candidate.take_profits.iter().any(|tp| !tp.is_finite()) {
            errors.push(FieldError::new("takeProfits", "targets must be finite numbers"));
        }

        if !candidate.rr.is_finite() || candidate.rr < 0.0 {
            errors.push(FieldError::new(
                "rr",
                format!("must be a non-negative number, got {}", candidate.rr),
            ));
        }

        if !(0.0..=1.0).contains(&candidate.confidence) {
            errors.push(FieldError::new(
                "confidence",
                format!("must be within [0, 1], got {}", candidate.confidence),
            ));
        }

        let (Some(direction), Some(entry), true) = (direction, entry, errors.is_empty()) else {
            info!(
                event = events::PLAN_REJECTED,
                fields = errors.len(),
                "🚫 [GATE] Malformed trade plan"
            );
            return Err(GateRejection::Malformed(errors));
        };

        if candidate.confidence < self.threshold {
            info!(
                event = events::PLAN_REJECTED,
                confidence = candidate.confidence,
                threshold = self.threshold,
                "🚫 [GATE] Confidence below threshold"
            );
            return Err(GateRejection::LowConfidence {
                confidence: candidate.confidence,
                threshold: self.threshold,
            });
        }

        info!(
            event = events::PLAN_ACCEPTED,
            confidence = candidate.confidence,
            "✅ [GATE] Plan accepted"
        );

        Ok(AcceptedPlan {
            direction,
            entry,
            stop: candidate.stop,
            take_profits: candidate.take_profits,
            rr: candidate.rr,
            confidence: candidate.confidence,
            reasoning: candidate.reasoning,
            timeframe: candidate.timeframe,
        })
    }
}
