use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::channel::Channel;

/// Body of `POST /v1/notifications/send` as submitted by clients.
///
/// `notification_type` and `template_code` are legacy aliases kept for older
/// producers; [`SendRequest::normalize`] folds them into the canonical fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub template_slug: Option<String>,
    #[serde(default)]
    pub template_code: Option<String>,
    #[serde(default)]
    pub variables: Option<HashMap<String, JsonValue>>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, JsonValue>>,
}

/// A request that passed validation. Every field is populated.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub request_id: String,
    pub user_id: String,
    pub channel: Channel,
    pub template_slug: String,
    pub variables: HashMap<String, JsonValue>,
    pub priority: String,
    pub metadata: HashMap<String, JsonValue>,
}

impl SendRequest {
    pub fn normalize(self) -> Result<NormalizedRequest, String> {
        let request_id = self.request_id.trim().to_string();
        if request_id.is_empty() {
            return Err("request_id is required".to_string());
        }

        let user_id = self.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err("user_id is required".to_string());
        }

        let channel = first_non_empty(self.channel, self.notification_type)
            .ok_or_else(|| "channel or notification_type is required".to_string())?;
        let channel = Channel::parse(&channel)
            .ok_or_else(|| format!("unsupported channel '{}', expected email or push", channel))?;

        let template_slug = first_non_empty(self.template_slug, self.template_code)
            .ok_or_else(|| "template_slug or template_code is required".to_string())?;

        let priority =
            first_non_empty(self.priority, None).unwrap_or_else(|| "normal".to_string());

        Ok(NormalizedRequest {
            request_id,
            user_id,
            channel,
            template_slug,
            variables: self.variables.unwrap_or_default(),
            priority,
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

fn first_non_empty(primary: Option<String>, alias: Option<String>) -> Option<String> {
    [primary, alias]
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
