use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{JobRequest, PrinterCloud};
use crate::config::ProviderConfig;
use crate::core::error::{PrintError, Result, Stage};
use crate::core::models::{Credentials, JobTicket, PrintJob, PrintSettings};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    subject_id: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct JobCreated {
    id: String,
    upload_uri: String,
}

/// HTTP client for the Epson Connect printing API.
pub struct EpsonCloud {
    base_url: String,
    client_id: String,
    client_secret: String,
    client: Client,
}

impl EpsonCloud {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| PrintError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            client,
        })
    }

    fn printing_url(&self, path: &str) -> String {
        format!("{}/api/1/printing{}", self.base_url, path)
    }

    /// Printing API URL with each of `segments` percent-encoded as one path segment.
    fn resource_url(&self, segments: &[&str]) -> Result<Url> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(PrintError::InvalidId((*bad).to_string()));
        }

        let mut url = Url::parse(&self.printing_url(""))
            .map_err(|e| PrintError::Config(format!("invalid provider URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| PrintError::Config(format!("provider URL {} has no path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn job_url(&self, printer_id: &str, job_id: &str) -> Result<Url> {
        self.resource_url(&["printers", printer_id, "jobs", job_id])
    }
}

/// A request that could not connect never reached the provider.
fn send_failed(stage: Stage, err: reqwest::Error) -> PrintError {
    if err.is_connect() {
        PrintError::unreachable(stage, err)
    } else {
        PrintError::transport(stage, err)
    }
}

/// Turn a non-success status into `PrintError::Rejected`, keeping the body for the message.
async fn ensure_success(stage: Stage, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PrintError::Rejected {
        stage,
        status: status.as_u16(),
        body,
    })
}

async fn parse_json<T: DeserializeOwned>(stage: Stage, response: Response) -> Result<T> {
    let response = ensure_success(stage, response).await?;
    let text = response
        .text()
        .await
        .map_err(|e| PrintError::transport(stage, e))?;
    serde_json::from_str(&text).map_err(|e| PrintError::invalid_response(stage, e))
}

#[async_trait]
impl PrinterCloud for EpsonCloud {
    async fn authenticate(&self, device_id: &str) -> Result<Credentials> {
        let stage = Stage::Authentication;
        let response = self
            .client
            .post(self.printing_url("/oauth2/auth/token"))
            .query(&[("subject", "printer")])
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", device_id),
                ("password", ""),
            ])
            .send()
            .await
            .map_err(|e| send_failed(stage, e))?;

        let token: TokenResponse = parse_json(stage, response).await?;
        Ok(Credentials {
            token: token.access_token,
            printer_id: token.subject_id,
            expires_in: token.expires_in,
        })
    }

    async fn create_job(
        &self,
        credentials: &Credentials,
        settings: &PrintSettings,
    ) -> Result<JobTicket> {
        let stage = Stage::JobCreation;
        let url = self.resource_url(&["printers", credentials.printer_id.as_str(), "jobs"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&credentials.token)
            .json(&JobRequest::from(settings))
            .send()
            .await
            .map_err(|e| send_failed(stage, e))?;

        let created: JobCreated = parse_json(stage, response).await?;
        Ok(JobTicket {
            job_id: created.id,
            upload_uri: created.upload_uri,
        })
    }

    async fn upload(&self, ticket: &JobTicket, remote_name: &str, data: &[u8]) -> Result<()> {
        let stage = Stage::Upload;
        let mut url =
            Url::parse(&ticket.upload_uri).map_err(|e| PrintError::invalid_response(stage, e))?;
        url.query_pairs_mut().append_pair("File", remote_name);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, data.len())
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| send_failed(stage, e))?;

        // The upload endpoint signals success with 200 only.
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(PrintError::Rejected {
                stage,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn start_print(&self, credentials: &Credentials, job_id: &str) -> Result<()> {
        let stage = Stage::PrintTrigger;
        let url = self.resource_url(&[
            "printers",
            credentials.printer_id.as_str(),
            "jobs",
            job_id,
            "print",
        ])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&credentials.token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| send_failed(stage, e))?;

        let response = ensure_success(stage, response).await?;
        let body = response.text().await.unwrap_or_default();
        debug!(job_id, response = %body, "Print triggered");
        Ok(())
    }

    async fn job_status(&self, credentials: &Credentials, job_id: &str) -> Result<PrintJob> {
        let stage = Stage::StatusCheck;
        let response = self
            .client
            .get(self.job_url(&credentials.printer_id, job_id)?)
            .bearer_auth(&credentials.token)
            .send()
            .await
            .map_err(|e| send_failed(stage, e))?;

        let raw: Value = parse_json(stage, response).await?;
        PrintJob::from_provider(job_id, raw).map_err(|e| PrintError::invalid_response(stage, e))
    }

    async fn cancel_job(&self, credentials: &Credentials, job_id: &str) -> Result<()> {
        let stage = Stage::Cancel;
        let response = self
            .client
            .delete(self.job_url(&credentials.printer_id, job_id)?)
            .bearer_auth(&credentials.token)
            .send()
            .await
            .map_err(|e| send_failed(stage, e))?;

        ensure_success(stage, response).await?;
        Ok(())
    }
}
