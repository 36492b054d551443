//! Printer cloud providers.
//!
//! `PrinterCloud` has one method per remote call of the print protocol. The
//! orchestrator sequences them; implementations only talk to the provider.

mod epson;
mod simulated;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::error::Result;
use crate::core::models::{
    Credentials, DEFAULT_JOB_NAME, JobTicket, PrintJob, PrintSettings,
};

pub use epson::EpsonCloud;
pub use simulated::{CloudCall, Fault, FaultKind, SimulatedCloud};

/// Trait for printer cloud implementations (Epson Connect, simulated, ...)
#[async_trait]
pub trait PrinterCloud: Send + Sync {
    /// Exchange a device identifier for a bearer token and printer session.
    async fn authenticate(&self, device_id: &str) -> Result<Credentials>;

    async fn create_job(
        &self,
        credentials: &Credentials,
        settings: &PrintSettings,
    ) -> Result<JobTicket>;

    /// Deliver the image bytes to the job's one-time upload URI under `remote_name`.
    async fn upload(&self, ticket: &JobTicket, remote_name: &str, data: &[u8]) -> Result<()>;

    async fn start_print(&self, credentials: &Credentials, job_id: &str) -> Result<()>;

    async fn job_status(&self, credentials: &Credentials, job_id: &str) -> Result<PrintJob>;

    async fn cancel_job(&self, credentials: &Credentials, job_id: &str) -> Result<()>;
}

/// Body of the job creation request.
#[derive(Debug, Serialize)]
pub struct JobRequest<'a> {
    pub job_name: &'a str,
    pub print_mode: &'static str,
    pub print_setting: PrintSetting<'a>,
}

#[derive(Debug, Serialize)]
pub struct PrintSetting<'a> {
    pub media_size: &'a str,
    pub media_type: &'a str,
    pub borderless: bool,
    pub print_quality: &'a str,
    pub source: &'static str,
    pub color_mode: &'static str,
    pub copies: u32,
    pub collate: bool,
}

impl<'a> From<&'a PrintSettings> for JobRequest<'a> {
    fn from(settings: &'a PrintSettings) -> Self {
        Self {
            job_name: settings.job_name.as_deref().unwrap_or(DEFAULT_JOB_NAME),
            print_mode: settings.print_mode.as_str(),
            print_setting: PrintSetting {
                media_size: &settings.paper_size,
                media_type: &settings.media_type,
                borderless: settings.borderless,
                print_quality: &settings.quality,
                source: "auto",
                color_mode: "color",
                copies: settings.copies,
                collate: true,
            },
        }
    }
}

/// Factory function to create the provider selected by config
pub fn create_cloud(config: &AppConfig) -> Result<Arc<dyn PrinterCloud>> {
    if config.simulation {
        return Ok(Arc::new(SimulatedCloud::new()));
    }
    Ok(Arc::new(EpsonCloud::new(&config.provider)?))
}
