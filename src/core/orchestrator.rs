//! Print orchestration: drives one image (or a batch) through the provider's job protocol.
//!
//! Each `print_photo` runs authenticate, create job, upload, print and status read in
//! that order. The first failing stage aborts the run; nothing already submitted is
//! cancelled. Batches run items one at a time with a fixed pause between them and
//! keep going after a failed item. Concurrent batches on one service queue behind each
//! other, and the pause also separates the last item of one batch from the first of the next.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_rusqlite::Connection;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::cloud::PrinterCloud;
use crate::config::AppConfig;
use crate::db::{self, jobs::NewLedgerEntry};

use super::error::{PrintError, Result};
use super::models::{
    BatchReport, Credentials, PhotoOutcome, PhotoUpload, PrintJob, PrintOptions, PrintSettings,
    remote_file_name,
};
use super::retry::RetryPolicy;
use super::token_cache::TokenCache;

pub struct PrintService {
    cloud: Arc<dyn PrinterCloud>,
    defaults: PrintSettings,
    default_device: Option<String>,
    retry: RetryPolicy,
    tokens: Option<TokenCache>,
    batch_delay: Duration,
    /// Held for the whole of a batch. Records when the last batch item finished.
    batch_slot: Mutex<Option<Instant>>,
    ledger: Option<Connection>,
}

impl PrintService {
    pub fn new(cloud: Arc<dyn PrinterCloud>, config: &AppConfig) -> Self {
        let tokens = config
            .token_cache
            .enabled
            .then(|| TokenCache::new(Duration::from_secs(config.token_cache.max_ttl_secs)));

        Self {
            cloud,
            defaults: config.print.clone(),
            default_device: config.provider.device_id.clone(),
            retry: RetryPolicy::from(&config.retry),
            tokens,
            batch_delay: config.batch_delay(),
            batch_slot: Mutex::new(None),
            ledger: None,
        }
    }

    /// Mirror submitted jobs and observed statuses into a local ledger.
    pub fn with_ledger(mut self, conn: Connection) -> Self {
        self.ledger = Some(conn);
        self
    }

    pub fn ledger(&self) -> Option<&Connection> {
        self.ledger.as_ref()
    }

    pub fn default_device(&self) -> Option<&str> {
        self.default_device.as_deref()
    }

    /// Use `requested` when given, otherwise the configured device.
    pub fn resolve_device(&self, requested: Option<&str>) -> Result<String> {
        requested
            .filter(|d| !d.is_empty())
            .or(self.default_device())
            .map(str::to_string)
            .ok_or(PrintError::NoDevice)
    }

    /// Submit one image and return the job status read right after printing starts.
    pub async fn print_photo(
        &self,
        device_id: &str,
        image: &[u8],
        file_name: &str,
        options: &PrintOptions,
    ) -> Result<PrintJob> {
        let span = info_span!("print_photo", device = %device_id, file = %file_name);

        async move {
            let result = self.run_pipeline(device_id, image, file_name, options).await;
            if let Err(e) = &result {
                self.forget_on_unauthorized(device_id, e).await;
                error!(error = %e, "Print failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline(
        &self,
        device_id: &str,
        image: &[u8],
        file_name: &str,
        options: &PrintOptions,
    ) -> Result<PrintJob> {
        let settings = options.resolve(&self.defaults);
        let credentials = self.credentials(device_id).await?;

        let cloud = &self.cloud;
        let creds = &credentials;
        let settings_ref = &settings;

        let ticket = self
            .retry
            .run_once("create_job", move || cloud.create_job(creds, settings_ref))
            .await?;
        info!(job_id = %ticket.job_id, "Print job created");
        self.record_submission(device_id, file_name, image, &settings, &ticket.job_id)
            .await;

        let remote_name = remote_file_name(file_name);
        let ticket_ref = &ticket;
        let name = remote_name.as_str();
        self.retry
            .run("upload", move || cloud.upload(ticket_ref, name, image))
            .await?;
        debug!(job_id = %ticket.job_id, remote_name = %remote_name, bytes = image.len(), "Image uploaded");

        let job_id = ticket.job_id.as_str();
        self.retry
            .run_once("start_print", move || cloud.start_print(creds, job_id))
            .await?;

        let job = self
            .retry
            .run("job_status", move || cloud.job_status(creds, job_id))
            .await?;
        self.record_status(&job.job_id, &job.status).await;

        info!(job_id = %job.job_id, status = %job.status, "Print submitted");
        Ok(job)
    }

    /// Print each image in order, pausing between items. A failed item is reported and skipped.
    pub async fn print_multiple_photos(
        &self,
        device_id: &str,
        images: &[PhotoUpload],
        options: &PrintOptions,
    ) -> BatchReport {
        let batch_id = Uuid::now_v7().to_string();
        let mut last_finished = self.batch_slot.lock().await;
        let started_at = Utc::now();
        info!(batch_id = %batch_id, count = images.len(), "Starting print batch");

        let mut outcomes = Vec::with_capacity(images.len());
        for image in images {
            if let Some(finished) = *last_finished {
                if !self.batch_delay.is_zero() {
                    tokio::time::sleep_until(finished + self.batch_delay).await;
                }
            }

            let outcome = match self
                .print_photo(device_id, &image.data, &image.file_name, options)
                .await
            {
                Ok(job) => PhotoOutcome::Submitted {
                    file_name: image.file_name.clone(),
                    job,
                },
                Err(e) => {
                    warn!(
                        batch_id = %batch_id,
                        index = outcomes.len(),
                        file = %image.file_name,
                        error = %e,
                        "Photo failed, continuing with batch"
                    );
                    PhotoOutcome::Failed {
                        file_name: image.file_name.clone(),
                        stage: e.stage(),
                        error: e.to_string(),
                    }
                }
            };
            *last_finished = Some(Instant::now());
            outcomes.push(outcome);
        }
        drop(last_finished);

        let report = BatchReport {
            batch_id,
            started_at,
            outcomes,
        };
        info!(
            batch_id = %report.batch_id,
            submitted = report.submitted(),
            failed = report.failed(),
            "Print batch finished"
        );
        report
    }

    /// Read a job's current status on the configured device.
    pub async fn check_print_job_status(&self, job_id: &str) -> Result<PrintJob> {
        let device_id = self.resolve_device(None)?;
        self.check_print_job_status_on(&device_id, job_id).await
    }

    /// Read a job's current status on `device_id`.
    pub async fn check_print_job_status_on(
        &self,
        device_id: &str,
        job_id: &str,
    ) -> Result<PrintJob> {
        let credentials = self.credentials(device_id).await?;

        let cloud = &self.cloud;
        let creds = &credentials;
        let result = self
            .retry
            .run("job_status", move || cloud.job_status(creds, job_id))
            .await;

        match result {
            Ok(job) => {
                self.record_status(&job.job_id, &job.status).await;
                Ok(job)
            }
            Err(e) => {
                self.forget_on_unauthorized(device_id, &e).await;
                Err(e)
            }
        }
    }

    /// Cancel a job on the configured device. Returns false when the provider refuses.
    pub async fn cancel_print_job(&self, job_id: &str) -> Result<bool> {
        let device_id = self.resolve_device(None)?;
        self.cancel_print_job_on(&device_id, job_id).await
    }

    pub async fn cancel_print_job_on(&self, device_id: &str, job_id: &str) -> Result<bool> {
        let credentials = self.credentials(device_id).await?;

        let cloud = &self.cloud;
        let creds = &credentials;
        let result = self
            .retry
            .run("cancel_job", move || cloud.cancel_job(creds, job_id))
            .await;

        match result {
            Ok(()) => {
                info!(job_id, "Print job cancelled");
                self.record_status(job_id, "canceled").await;
                Ok(true)
            }
            Err(e @ PrintError::Rejected { .. }) => {
                self.forget_on_unauthorized(device_id, &e).await;
                warn!(job_id, error = %e, "Provider refused to cancel job");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn credentials(&self, device_id: &str) -> Result<Credentials> {
        if let Some(cache) = &self.tokens {
            if let Some(credentials) = cache.get(device_id).await {
                debug!(device = %device_id, "Reusing cached credentials");
                return Ok(credentials);
            }
        }

        let cloud = &self.cloud;
        let credentials = self
            .retry
            .run("authenticate", move || cloud.authenticate(device_id))
            .await?;
        debug!(device = %device_id, printer_id = %credentials.printer_id, "Authenticated");

        if let Some(cache) = &self.tokens {
            cache.insert(device_id, credentials.clone()).await;
        }
        Ok(credentials)
    }

    async fn forget_on_unauthorized(&self, device_id: &str, err: &PrintError) {
        if let (Some(cache), true) = (&self.tokens, err.is_unauthorized()) {
            cache.invalidate(device_id).await;
        }
    }

    async fn record_submission(
        &self,
        device_id: &str,
        file_name: &str,
        image: &[u8],
        settings: &PrintSettings,
        job_id: &str,
    ) {
        let Some(conn) = &self.ledger else {
            return;
        };

        let entry = NewLedgerEntry {
            job_id: job_id.to_string(),
            device_id: device_id.to_string(),
            file_name: file_name.to_string(),
            content_digest: blake3::hash(image).to_hex().to_string(),
            settings: serde_json::to_string(settings).unwrap_or_default(),
        };
        if let Err(e) = db::jobs::record_submission(conn, entry).await {
            warn!(job_id, error = %e, "Failed to record job in ledger");
        }
    }

    async fn record_status(&self, job_id: &str, status: &str) {
        let Some(conn) = &self.ledger else {
            return;
        };

        if let Err(e) =
            db::jobs::record_status(conn, job_id.to_string(), status.to_string()).await
        {
            warn!(job_id, error = %e, "Failed to record job status in ledger");
        }
    }
}
