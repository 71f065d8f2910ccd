// stockline-common: cache and storage fabric shared by the stockline service
// Used by stockline-core (CLI / service entry) and by integration tests

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fx;
pub mod indicators;
pub mod keys;
pub mod logging;
pub mod maintenance;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod storage;
pub mod upstream;
pub mod validation;

// Re-export the types almost every caller touches
pub use cache::{CacheManager, CacheOutcome, CacheStatsSnapshot};
pub use config::{AppConfig, StorageMode};
pub use context::AppContext;
pub use error::{FabricError, FabricResult};
pub use keys::DataClass;
pub use model::{AnalysisResult, Bar, HealthSnapshot, Signal, SymbolRecord};
pub use orchestrator::Analyzer;
pub use storage::StorageBackend;
