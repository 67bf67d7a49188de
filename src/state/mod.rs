// State management module
// Handles SQLite persistence and file system operations

pub mod db;
pub mod models;
pub mod queries;
pub mod storage;

pub use db::{init_db, DbConnection, DbError, DbResult};
pub use models::{Analysis, AnalysisSummary, NewAnalysis};
pub use queries::{
    delete_analysis, find_analysis, get_analysis, list_analyses_for_user, save_analysis,
};
pub use storage::{StorageError, StorageResult};
