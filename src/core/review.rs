//! Follow-up once the intake assistant has gathered the patient's history:
//! trigger the history/exam analysis and report progress into the chat log
//! through the notification bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::bus::NotificationBus;
use crate::core::message::ChatMessage;
use crate::utils::url::construct_resource_url;

pub const ANALYZING_MESSAGE: &str = "1) analyzing history and patient exam results...";
pub const SENT_FOR_REVIEW_MESSAGE: &str = "2) sent it to doctor for review";
pub const ANALYSIS_FAILED_MESSAGE: &str = "There was an error during analysis. Please try again.";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid analysis URL for patient {0}")]
    InvalidUrl(String),
    #[error("analysis request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("analysis service responded with status {0}")]
    Status(u16),
}

#[async_trait]
pub trait AnalysisTrigger: Send + Sync {
    async fn trigger(&self, patient_id: &str) -> Result<(), AnalysisError>;
}

/// `GET {base}/analyzing/qa-pexam/{patient_id}`; the response body is not
/// inspected.
pub struct HttpAnalysisTrigger {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAnalysisTrigger {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AnalysisTrigger for HttpAnalysisTrigger {
    async fn trigger(&self, patient_id: &str) -> Result<(), AnalysisError> {
        let url = construct_resource_url(&self.base_url, "analyzing/qa-pexam", patient_id)
            .ok_or_else(|| AnalysisError::InvalidUrl(patient_id.to_string()))?;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AnalysisError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

pub struct ReviewOrchestrator {
    trigger: Arc<dyn AnalysisTrigger>,
    bus: NotificationBus,
}

impl ReviewOrchestrator {
    pub fn new(trigger: Arc<dyn AnalysisTrigger>, bus: NotificationBus) -> Self {
        Self { trigger, bus }
    }

    /// Publish progress, run the analysis, and publish its outcome. Both
    /// outcomes end up in the chat log as system messages.
    pub async fn run_analysis(&self, patient_id: &str) {
        self.bus.publish_chat(ChatMessage::system(ANALYZING_MESSAGE));
        match self.trigger.trigger(patient_id).await {
            Ok(()) => {
                info!(%patient_id, "history analysis submitted");
                self.bus.publish_chat(ChatMessage::system(SENT_FOR_REVIEW_MESSAGE));
            }
            Err(err) => {
                warn!(%patient_id, error = %err, "history analysis failed");
                self.bus.publish_chat(ChatMessage::system(ANALYSIS_FAILED_MESSAGE));
            }
        }
    }

    /// Fire-and-forget variant used by the exchange driver.
    pub fn spawn_analysis(self: &Arc<Self>, patient_id: String) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run_analysis(&patient_id).await })
    }
}
