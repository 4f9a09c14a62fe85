use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::models::{envelope::MessageEnvelope, template::RenderedTemplate};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth another attempt later.
    #[error("{0}")]
    Transient(String),

    /// Will fail the same way every time.
    #[error("{0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Classifies a non-success provider response. Client errors are
    /// permanent except timeouts and throttling.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("provider returned {}: {}", status, body.trim());

        if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            DeliveryError::Permanent(message)
        } else {
            DeliveryError::Transient(message)
        }
    }

    pub fn from_transport(error: reqwest::Error) -> Self {
        DeliveryError::Transient(format!("provider request failed: {}", error))
    }
}

/// A delivery backend for one channel.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Recorded in the ledger's `provider` column.
    fn name(&self) -> &str;

    /// Delivers the rendered notification. `Ok` carries a short detail for
    /// the ledger.
    async fn deliver(
        &self,
        envelope: &MessageEnvelope,
        rendered: &RenderedTemplate,
    ) -> Result<String, DeliveryError>;
}
