use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::info;

use super::facts::{Dataset, JobRun};
use crate::error::LineageError;

/// Transport for lineage facts.
///
/// Implementations are called from the run lifecycle only; failures are the
/// reporter's to log and drop, so a sink must never be load-bearing.
#[async_trait]
pub trait LineageSink: Send + Sync {
    async fn emit(&self, run: &JobRun) -> Result<(), LineageError>;
}

/// POSTs each fact as JSON to a collector endpoint.
pub struct HttpLineageSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLineageSink {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, LineageError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(format!("kafka-tally/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| LineageError::Sink(e.to_string()))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl LineageSink for HttpLineageSink {
    async fn emit(&self, run: &JobRun) -> Result<(), LineageError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(run)
            .send()
            .await
            .map_err(|e| LineageError::Sink(e.to_string()))?;

        response
            .error_for_status()
            .map_err(|e| LineageError::Sink(e.to_string()))?;

        Ok(())
    }
}

/// Fallback when no collector is configured: facts go to the log.
pub struct LogLineageSink;

#[async_trait]
impl LineageSink for LogLineageSink {
    async fn emit(&self, run: &JobRun) -> Result<(), LineageError> {
        info!(
            job = %run.job_name,
            run_id = %run.run_id,
            outcome = ?run.outcome,
            inputs = ?run.inputs.iter().map(Dataset::uri).collect::<Vec<_>>(),
            outputs = ?run.outputs.iter().map(Dataset::uri).collect::<Vec<_>>(),
            "lineage fact"
        );
        Ok(())
    }
}
