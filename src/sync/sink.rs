use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::models::Sample;

/// Remote endpoint accepting location batches.
///
/// Delivery is all-or-nothing per batch: only a success return acknowledges
/// the batch, and any transport failure or non-success status is a retry
/// candidate.
#[async_trait]
pub trait LocationSink: Send + Sync {
    async fn upload_batch(&self, session_id: &str, samples: &[Sample]) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchPayload<'a> {
    session_id: &'a str,
    samples: &'a [Sample],
}

/// POSTs batches as JSON to a configured URL.
pub struct HttpLocationSink {
    client: reqwest::Client,
    url: String,
}

impl HttpLocationSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl LocationSink for HttpLocationSink {
    async fn upload_batch(&self, session_id: &str, samples: &[Sample]) -> Result<()> {
        let payload = BatchPayload {
            session_id,
            samples,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("location upload request failed")?;

        if !response.status().is_success() {
            bail!("location sink returned HTTP {}", response.status());
        }

        Ok(())
    }
}
