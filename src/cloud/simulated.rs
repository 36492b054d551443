use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{JobRequest, PrinterCloud};
use crate::core::error::{PrintError, Result, Stage};
use crate::core::models::{Credentials, JobTicket, PrintJob, PrintSettings};

const SIM_PRINTER_ID: &str = "sim-printer";

/// A remote call as seen by the simulated provider.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudCall {
    Authenticate { device_id: String },
    CreateJob { printer_id: String, body: Value },
    Upload { job_id: String, file_name: String, bytes: usize },
    StartPrint { job_id: String },
    JobStatus { job_id: String },
    Cancel { job_id: String },
}

impl CloudCall {
    pub fn stage(&self) -> Stage {
        match self {
            CloudCall::Authenticate { .. } => Stage::Authentication,
            CloudCall::CreateJob { .. } => Stage::JobCreation,
            CloudCall::Upload { .. } => Stage::Upload,
            CloudCall::StartPrint { .. } => Stage::PrintTrigger,
            CloudCall::JobStatus { .. } => Stage::StatusCheck,
            CloudCall::Cancel { .. } => Stage::Cancel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Answer with this HTTP status.
    Rejected(u16),
    /// Behave like a network failure.
    Unreachable,
}

/// Injected failure: calls to `stage` numbered `skip..skip + times` (zero-based) fail.
#[derive(Debug, Clone)]
pub struct Fault {
    pub stage: Stage,
    pub kind: FaultKind,
    pub skip: u32,
    pub times: u32,
}

#[derive(Debug)]
struct SimJob {
    status: String,
    uploaded: bool,
    start_date: String,
    update_date: String,
}

#[derive(Default)]
struct SimState {
    calls: Vec<CloudCall>,
    faults: Vec<Fault>,
    stage_counts: HashMap<Stage, u32>,
    jobs: HashMap<String, SimJob>,
    next_token: u32,
    next_job: u32,
}

impl SimState {
    fn record(&mut self, call: CloudCall) -> Result<()> {
        let stage = call.stage();
        self.calls.push(call);

        let count = self.stage_counts.entry(stage).or_insert(0);
        let index = *count;
        *count += 1;

        let fault = self
            .faults
            .iter()
            .find(|f| f.stage == stage && index >= f.skip && index - f.skip < f.times);

        match fault.map(|f| f.kind) {
            Some(FaultKind::Rejected(status)) => Err(PrintError::Rejected {
                stage,
                status,
                body: json!({ "code": "simulated_fault" }).to_string(),
            }),
            Some(FaultKind::Unreachable) => Err(PrintError::unreachable(
                stage,
                "simulated provider unreachable",
            )),
            None => Ok(()),
        }
    }

    fn job_mut(&mut self, stage: Stage, job_id: &str) -> Result<&mut SimJob> {
        self.jobs.get_mut(job_id).ok_or_else(|| PrintError::Rejected {
            stage,
            status: 404,
            body: json!({ "code": "job_not_found" }).to_string(),
        })
    }
}

/// In-memory printer cloud for tests and `--simulation` runs.
///
/// Records every call in order and follows the provider's job lifecycle:
/// `created` after creation, `processing` once printing starts, `canceled` after cancel.
#[derive(Default)]
pub struct SimulatedCloud {
    state: Mutex<SimState>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call to `stage`.
    pub fn failing(stage: Stage, kind: FaultKind) -> Self {
        Self::new().with_fault(Fault {
            stage,
            kind,
            skip: 0,
            times: u32::MAX,
        })
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.state.get_mut().faults.push(fault);
        self
    }

    pub async fn calls(&self) -> Vec<CloudCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn stages(&self) -> Vec<Stage> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .map(CloudCall::stage)
            .collect()
    }

    /// Move a job to a new provider status, as the remote printer would.
    pub async fn set_status(&self, job_id: &str, status: &str) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.status = status.to_string();
            job.update_date = Utc::now().to_rfc3339();
        }
    }
}

#[async_trait]
impl PrinterCloud for SimulatedCloud {
    async fn authenticate(&self, device_id: &str) -> Result<Credentials> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::Authenticate {
            device_id: device_id.to_string(),
        })?;

        state.next_token += 1;
        Ok(Credentials {
            token: format!("sim-token-{}", state.next_token),
            printer_id: SIM_PRINTER_ID.to_string(),
            expires_in: Some(3600),
        })
    }

    async fn create_job(
        &self,
        credentials: &Credentials,
        settings: &PrintSettings,
    ) -> Result<JobTicket> {
        let body = serde_json::to_value(JobRequest::from(settings)).unwrap_or(Value::Null);
        let mut state = self.state.lock().await;
        state.record(CloudCall::CreateJob {
            printer_id: credentials.printer_id.clone(),
            body,
        })?;

        state.next_job += 1;
        let job_id = format!("sim-job-{}", state.next_job);
        let now = Utc::now().to_rfc3339();
        state.jobs.insert(
            job_id.clone(),
            SimJob {
                status: "created".to_string(),
                uploaded: false,
                start_date: now.clone(),
                update_date: now,
            },
        );

        Ok(JobTicket {
            upload_uri: format!("https://upload.simulated.invalid/{}?Key=sim", job_id),
            job_id,
        })
    }

    async fn upload(&self, ticket: &JobTicket, remote_name: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::Upload {
            job_id: ticket.job_id.clone(),
            file_name: remote_name.to_string(),
            bytes: data.len(),
        })?;

        state.job_mut(Stage::Upload, &ticket.job_id)?.uploaded = true;
        Ok(())
    }

    async fn start_print(&self, _credentials: &Credentials, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::StartPrint {
            job_id: job_id.to_string(),
        })?;

        let job = state.job_mut(Stage::PrintTrigger, job_id)?;
        if !job.uploaded {
            return Err(PrintError::Rejected {
                stage: Stage::PrintTrigger,
                status: 409,
                body: json!({ "code": "no_document" }).to_string(),
            });
        }
        job.status = "processing".to_string();
        job.update_date = Utc::now().to_rfc3339();
        Ok(())
    }

    async fn job_status(&self, _credentials: &Credentials, job_id: &str) -> Result<PrintJob> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::JobStatus {
            job_id: job_id.to_string(),
        })?;

        let job = state.job_mut(Stage::StatusCheck, job_id)?;
        let raw = json!({
            "status": job.status,
            "start_date": job.start_date,
            "update_date": job.update_date,
            "total_pages": 1,
        });
        PrintJob::from_provider(job_id, raw)
            .map_err(|e| PrintError::invalid_response(Stage::StatusCheck, e))
    }

    async fn cancel_job(&self, _credentials: &Credentials, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::Cancel {
            job_id: job_id.to_string(),
        })?;

        let job = state.job_mut(Stage::Cancel, job_id)?;
        job.status = "canceled".to_string();
        job.update_date = Utc::now().to_rfc3339();
        Ok(())
    }
}
