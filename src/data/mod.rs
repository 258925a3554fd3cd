pub mod store;


pub use store::{AnalysisRepository, SessionResolver, SqliteStore};
