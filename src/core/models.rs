use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::Stage;

pub const DEFAULT_PAPER_SIZE: &str = "ms_a4";
pub const DEFAULT_MEDIA_TYPE: &str = "mt_plainpaper";
pub const DEFAULT_QUALITY: &str = "normal";
pub const DEFAULT_JOB_NAME: &str = "My Little Fancam";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintMode {
    #[default]
    Document,
    Photo,
}

impl PrintMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrintMode::Document => "document",
            PrintMode::Photo => "photo",
        }
    }
}

impl std::str::FromStr for PrintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "document" => Ok(PrintMode::Document),
            "photo" => Ok(PrintMode::Photo),
            other => Err(format!("unknown print mode '{}'", other)),
        }
    }
}

/// Fully resolved settings for one print request.
///
/// Values are passed to the provider as-is; the provider decides what it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    pub paper_size: String,
    pub media_type: String,
    pub quality: String,
    pub borderless: bool,
    pub copies: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    pub print_mode: PrintMode,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            paper_size: DEFAULT_PAPER_SIZE.to_string(),
            media_type: DEFAULT_MEDIA_TYPE.to_string(),
            quality: DEFAULT_QUALITY.to_string(),
            borderless: false,
            copies: 1,
            job_name: None,
            print_mode: PrintMode::Document,
        }
    }
}

/// Caller-supplied print options. Anything left out falls back to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    pub paper_size: Option<String>,
    pub media_type: Option<String>,
    pub quality: Option<String>,
    pub borderless: Option<bool>,
    pub copies: Option<u32>,
    pub job_name: Option<String>,
    pub print_mode: Option<PrintMode>,
}

impl PrintOptions {
    pub fn resolve(&self, defaults: &PrintSettings) -> PrintSettings {
        PrintSettings {
            paper_size: self
                .paper_size
                .clone()
                .unwrap_or_else(|| defaults.paper_size.clone()),
            media_type: self
                .media_type
                .clone()
                .unwrap_or_else(|| defaults.media_type.clone()),
            quality: self
                .quality
                .clone()
                .unwrap_or_else(|| defaults.quality.clone()),
            borderless: self.borderless.unwrap_or(defaults.borderless),
            copies: self.copies.unwrap_or(defaults.copies),
            job_name: self.job_name.clone().or_else(|| defaults.job_name.clone()),
            print_mode: self.print_mode.unwrap_or(defaults.print_mode),
        }
    }
}

/// Bearer token and printer session returned by the credential exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub printer_id: String,
    /// Lifetime in seconds, when the provider reports one.
    pub expires_in: Option<u64>,
}

/// A freshly created remote job and its one-time upload URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub job_id: String,
    pub upload_uri: String,
}

/// Remote job state as last read from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    pub job_id: String,
    /// Provider vocabulary, echoed verbatim.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Full provider response body.
    #[serde(default)]
    pub raw: Value,
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    status_reason: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    update_date: Option<String>,
}

impl PrintJob {
    /// Parse the provider's job resource body.
    pub fn from_provider(job_id: &str, raw: Value) -> Result<Self, serde_json::Error> {
        let body: StatusBody = serde_json::from_value(raw.clone())?;
        Ok(Self {
            job_id: job_id.to_string(),
            status: body.status,
            status_reason: body.status_reason,
            created_at: body.start_date,
            updated_at: body.update_date,
            raw,
        })
    }

    pub fn state(&self) -> JobState {
        JobState::from(self.status.as_str())
    }
}

/// Coarse view over the provider's status vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Created,
    Processing,
    Completed,
    Failed,
    Canceled,
    Other(String),
}

impl From<&str> for JobState {
    fn from(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "created" | "pending" | "pending_held" => JobState::Created,
            "processing" => JobState::Processing,
            "completed" => JobState::Completed,
            "failed" | "aborted" => JobState::Failed,
            "canceled" | "cancelled" => JobState::Canceled,
            _ => JobState::Other(status.to_string()),
        }
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Canceled
        )
    }
}

/// One image in a batch.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub data: Vec<u8>,
    pub file_name: String,
}

/// The remote file name the provider expects: `1` plus the original extension.
pub fn remote_file_name(file_name: &str) -> String {
    match Path::new(file_name).extension() {
        Some(ext) => format!("1.{}", ext.to_string_lossy()),
        None => "1".to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhotoOutcome {
    Submitted {
        file_name: String,
        job: PrintJob,
    },
    Failed {
        file_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        error: String,
    },
}

impl PhotoOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, PhotoOutcome::Submitted { .. })
    }

    pub fn file_name(&self) -> &str {
        match self {
            PhotoOutcome::Submitted { file_name, .. } | PhotoOutcome::Failed { file_name, .. } => {
                file_name
            }
        }
    }
}

/// Per-item results of a batch, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<PhotoOutcome>,
}

impl BatchReport {
    pub fn submitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_submitted()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.submitted()
    }
}

/// A job as recorded in the local ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub device_id: String,
    pub file_name: String,
    pub content_digest: String,
    pub settings: String,
    pub created_at: String,
    pub status: String,
}
