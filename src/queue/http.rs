use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{BatchEntry, BatchOutcome, FailedEntry, QueueClient, QueueError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendBatchRequest<'a> {
    queue_url: &'a str,
    entries: Vec<RequestEntry<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RequestEntry<'a> {
    id: &'a str,
    message_body: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendBatchResponse {
    #[serde(default)]
    successful: Vec<SuccessfulEntry>,
    #[serde(default)]
    failed: Vec<ResponseFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SuccessfulEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseFailure {
    id: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Batch client for HTTP queue endpoints
///
/// Posts `{QueueUrl, Entries: [{Id, MessageBody}]}` and expects
/// `{Successful: [{Id}], Failed: [{Id, Code, Message}]}` back.
#[derive(Debug, Clone)]
pub struct HttpQueueClient {
    client: Client,
    token: Option<String>,
}

impl HttpQueueClient {
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self, QueueError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, token })
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    async fn send_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchOutcome, QueueError> {
        let body = SendBatchRequest {
            queue_url,
            entries: entries
                .iter()
                .map(|e| RequestEntry {
                    id: &e.id,
                    message_body: &e.message_body,
                })
                .collect(),
        };

        let mut request = self.client.post(queue_url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendBatchResponse = response
            .json()
            .await
            .map_err(|e| QueueError::InvalidResponse(e.to_string()))?;

        let mut outcome = BatchOutcome {
            successful: parsed.successful.into_iter().map(|e| e.id).collect(),
            failed: parsed
                .failed
                .into_iter()
                .map(|f| FailedEntry {
                    id: f.id,
                    code: f.code,
                    message: f.message,
                })
                .collect(),
        };

        // Entries the queue never mentioned were not accepted
        let acknowledged: HashSet<&str> = outcome
            .successful
            .iter()
            .chain(outcome.failed.iter().map(|f| &f.id))
            .map(String::as_str)
            .collect();
        let missing: Vec<FailedEntry> = entries
            .iter()
            .filter(|e| !acknowledged.contains(e.id.as_str()))
            .map(|e| FailedEntry {
                id: e.id.clone(),
                code: "Unacknowledged".to_string(),
                message: "entry missing from queue response".to_string(),
            })
            .collect();
        outcome.failed.extend(missing);

        debug!(
            "queue accepted {} of {} entries",
            outcome.successful.len(),
            entries.len()
        );
        Ok(outcome)
    }
}
