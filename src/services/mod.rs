pub mod analysis;
pub mod gate;


pub use analysis::AnalysisService;
pub use gate::{GateRejection, TradePlanGate};
