//! Application-wide constants and magic numbers
//!
//! This module centralizes all hardcoded values so the analysis pipeline
//! and its collaborators read their limits from one place.

use std::time::Duration;

/// Analysis pipeline constants
pub mod analysis {
    /// Minimum oracle confidence for a plan to be accepted
    pub const CONFIDENCE_THRESHOLD: f64 = 0.8;

    /// Default number of history entries returned per listing
    pub const HISTORY_LIMIT: usize = 50;

    /// Hard cap on history entries per listing
    pub const MAX_HISTORY_LIMIT: usize = 100;

    /// Accepted number of take-profit targets
    pub const MIN_TAKE_PROFITS: usize = 1;
    pub const MAX_TAKE_PROFITS: usize = 2;
}

/// Oracle (vision model) constants
pub mod oracle {
    use super::*;

    /// OpenRouter's OpenAI-compatible endpoint
    pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

    /// Vision model used when none is configured
    pub const DEFAULT_MODEL: &str = "qwen/qwen2.5-vl-72b-instruct:free";

    /// Upper bound on a single oracle round trip
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
}

/// HTTP server and session constants
pub mod server {
    pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

    /// Cookie the identity provider stores the session token in
    pub const DEFAULT_SESSION_COOKIE: &str = "next-auth.session-token";

    pub const DEFAULT_DATABASE_PATH: &str = "./data/chartlab.db";
}

/// Logging event names for structured logging
pub mod events {
    pub const ANALYSIS_RECEIVED: &str = "analysis_received";
    pub const ANALYSIS_UNAUTHORIZED: &str = "analysis_unauthorized";
    pub const ANALYSIS_INVALID: &str = "analysis_invalid";
    pub const ORACLE_CALLED: &str = "oracle_called";
    pub const ORACLE_FAILED: &str = "oracle_failed";
    pub const PLAN_REJECTED: &str = "plan_rejected";
    pub const PLAN_ACCEPTED: &str = "plan_accepted";
    pub const ANALYSIS_PERSISTED: &str = "analysis_persisted";
    pub const PERSISTENCE_FAILED: &str = "persistence_failed";
}
