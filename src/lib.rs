//! Chart Lab - chart image analysis service
//!
//! Takes a trading-chart image and a horizon, asks a vision model for a
//! structured trade plan, gates it on confidence, and stores the accepted
//! plan together with the request that produced it.

pub mod agents;
pub mod api;
pub mod config;
pub mod constants;
pub mod data;
pub mod error;
pub mod llm;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AnalysisError, OracleError, StoreError};
pub use models::{AcceptedPlan, AuthenticatedCaller, CandidatePlan, Horizon, TradePlan};
pub use services::{AnalysisService, TradePlanGate};
