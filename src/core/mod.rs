pub mod error;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod token_cache;

pub use error::{ErrorClass, PrintError, Result, Stage};
pub use models::{
    BatchReport, Credentials, JobState, JobTicket, LedgerEntry, PhotoOutcome, PhotoUpload,
    PrintJob, PrintMode, PrintOptions, PrintSettings, remote_file_name,
};
pub use orchestrator::PrintService;
pub use retry::RetryPolicy;
pub use token_cache::TokenCache;
