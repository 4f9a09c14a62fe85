use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::{
    channel::Channel,
    preferences::{PushToken, UserPreferences},
    request::NormalizedRequest,
    template::Template,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub locale: String,
    #[serde(default)]
    pub push_tokens: Vec<PushToken>,
}

/// Unit of work published to the broker. Carries everything a channel worker
/// needs except provider credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub request_id: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub channel: Channel,
    pub user: User,
    pub template: Template,
    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub provider_overrides: HashMap<String, JsonValue>,
    #[serde(default)]
    pub retry_count: u32,
}

impl MessageEnvelope {
    pub fn build(
        request: NormalizedRequest,
        correlation_id: String,
        preferences: UserPreferences,
        template: Template,
    ) -> Self {
        Self {
            request_id: request.request_id,
            correlation_id,
            created_at: Utc::now(),
            channel: request.channel,
            user: User {
                id: request.user_id,
                email: preferences.email,
                locale: preferences.locale,
                push_tokens: preferences.push_tokens,
            },
            template,
            variables: request.variables,
            provider_overrides: request.metadata,
            retry_count: 0,
        }
    }

    /// Copy of this envelope for the next delivery attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub original_message: JsonValue,
    pub failure_reason: String,
    pub failed_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> MessageEnvelope {
        let request = NormalizedRequest {
            request_id: "R1".to_string(),
            user_id: "u-1".to_string(),
            channel: Channel::Push,
            template_slug: "welcome".to_string(),
            variables: HashMap::from([("name".to_string(), serde_json::json!("Ada"))]),
            priority: "normal".to_string(),
            metadata: HashMap::new(),
        };
        let preferences = UserPreferences {
            allow_email: true,
            allow_push: true,
            email: "ada@example.com".to_string(),
            locale: "en".to_string(),
            push_tokens: vec![PushToken {
                token: "tok".to_string(),
                platform: "android".to_string(),
            }],
        };
        let template = Template {
            slug: "welcome".to_string(),
            locale: "en".to_string(),
            version: 1,
            subject: "Hi".to_string(),
            body: "Hello {{name}}".to_string(),
        };

        MessageEnvelope::build(request, "corr-1".to_string(), preferences, template)
    }

    #[test]
    fn build_starts_at_zero_retries() {
        let envelope = envelope();

        assert_eq!(envelope.retry_count, 0);
        assert_eq!(envelope.user.id, "u-1");
        assert_eq!(envelope.user.push_tokens.len(), 1);
        assert_eq!(envelope.correlation_id, "corr-1");
    }

    #[test]
    fn next_attempt_only_bumps_retry_count() {
        let first = envelope();
        let second = first.next_attempt();

        assert_eq!(second.retry_count, 1);
        assert_eq!(second.request_id, first.request_id);
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn payload_uses_lowercase_channel() {
        let json = serde_json::to_value(envelope()).unwrap();

        assert_eq!(json["channel"], "push");
        assert_eq!(json["retry_count"], 0);
        assert!(json.get("provider_overrides").is_none());
    }
}
