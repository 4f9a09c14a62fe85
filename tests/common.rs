use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use notification_gateway::{
    api::AppState,
    clients::{
        health::HealthChecker,
        publisher::{EnvelopePublisher, RetryPublisher},
        template::TemplateServiceClient,
        user::UserServiceClient,
    },
    models::{
        channel::Channel,
        envelope::{DeadLetterMessage, MessageEnvelope, User},
        preferences::PushToken,
        request::SendRequest,
        template::{RenderedTemplate, Template},
    },
    services::{metrics::RequestMetrics, pipeline::AdmissionPipeline},
    store::{MemoryCacheStore, MemoryStatusLedger},
    worker::provider::{DeliveryError, DeliveryProvider},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

/// Publisher that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<MessageEnvelope>>,
    pub retried: Mutex<Vec<(MessageEnvelope, Duration)>>,
    pub dead_lettered: Mutex<Vec<DeadLetterMessage>>,
    pub failing: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    fn check(&self) -> Result<(), Error> {
        if *self.failing.lock() {
            Err(anyhow!("broker unreachable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EnvelopePublisher for RecordingPublisher {
    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), Error> {
        self.check()?;
        self.published.lock().push(envelope.clone());
        Ok(())
    }
}

#[async_trait]
impl RetryPublisher for RecordingPublisher {
    async fn publish_retry(&self, envelope: &MessageEnvelope, delay: Duration) -> Result<(), Error> {
        self.check()?;
        self.retried.lock().push((envelope.clone(), delay));
        Ok(())
    }

    async fn publish_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), Error> {
        self.check()?;
        self.dead_lettered.lock().push(message.clone());
        Ok(())
    }
}

/// Provider that replays a scripted sequence of results, then succeeds.
#[derive(Default)]
pub struct ScriptedProvider {
    pub script: Mutex<Vec<Result<String, DeliveryError>>>,
    pub deliveries: Mutex<Vec<RenderedTemplate>>,
}

impl ScriptedProvider {
    pub fn with_script(script: Vec<Result<String, DeliveryError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().rev().collect()),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().len()
    }
}

#[async_trait]
impl DeliveryProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn deliver(
        &self,
        _envelope: &MessageEnvelope,
        rendered: &RenderedTemplate,
    ) -> Result<String, DeliveryError> {
        self.deliveries.lock().push(rendered.clone());
        self.script
            .lock()
            .pop()
            .unwrap_or_else(|| Ok("delivered".to_string()))
    }
}

pub struct Harness {
    pub cache: Arc<MemoryCacheStore>,
    pub ledger: Arc<MemoryStatusLedger>,
    pub publisher: Arc<RecordingPublisher>,
    pub preferences: Arc<UserServiceClient>,
    pub templates: Arc<TemplateServiceClient>,
    pub pipeline: AdmissionPipeline,
    pub user_service: MockServer,
    pub template_service: MockServer,
}

impl Harness {
    pub async fn start() -> Result<Self> {
        let user_service = MockServer::start().await;
        let template_service = MockServer::start().await;

        let cache = Arc::new(MemoryCacheStore::new());
        let ledger = Arc::new(MemoryStatusLedger::new());
        let publisher = Arc::new(RecordingPublisher::default());

        let preferences = Arc::new(UserServiceClient::new(
            &user_service.uri(),
            "internal-key",
            Duration::from_secs(2),
            cache.clone(),
            Duration::from_secs(300),
        )?);
        let templates = Arc::new(TemplateServiceClient::new(
            &template_service.uri(),
            Duration::from_secs(2),
        )?);

        let pipeline = build_pipeline(&cache, &ledger, &publisher, &preferences, &templates);

        Ok(Self {
            cache,
            ledger,
            publisher,
            preferences,
            templates,
            pipeline,
            user_service,
            template_service,
        })
    }

    /// A second pipeline over the same doubles, for wiring into a router.
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            pipeline: build_pipeline(
                &self.cache,
                &self.ledger,
                &self.publisher,
                &self.preferences,
                &self.templates,
            ),
            health_checker: HealthChecker::new(self.cache.clone(), self.ledger.clone()),
            metrics: Arc::new(RequestMetrics::new()),
        })
    }

    pub async fn mount_user(&self, user_id: &str, allow_email: bool, allow_push: bool) {
        Mock::given(method("GET"))
            .and(path(format!("/internal/users/{}/notification-profile", user_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "allow_email": allow_email,
                    "allow_push": allow_push,
                    "email": "ada@example.com",
                    "locale": "en",
                    "push_tokens": [{"token": "device-1", "platform": "android"}]
                }
            })))
            .mount(&self.user_service)
            .await;
    }

    pub async fn mount_template(&self, slug: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/templates/{}/active", slug)))
            .and(query_param("locale", "en"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "ok",
                "data": {
                    "id": "tpl-1",
                    "version": 3,
                    "subject": "Welcome {{name}}",
                    "body": "Hello {{name}}"
                }
            })))
            .mount(&self.template_service)
            .await;
    }
}

fn build_pipeline(
    cache: &Arc<MemoryCacheStore>,
    ledger: &Arc<MemoryStatusLedger>,
    publisher: &Arc<RecordingPublisher>,
    preferences: &Arc<UserServiceClient>,
    templates: &Arc<TemplateServiceClient>,
) -> AdmissionPipeline {
    AdmissionPipeline::new(
        cache.clone(),
        ledger.clone(),
        preferences.clone(),
        templates.clone(),
        publisher.clone(),
        Duration::from_secs(86_400),
    )
}

pub fn send_request(request_id: &str, channel: &str) -> SendRequest {
    SendRequest {
        request_id: request_id.to_string(),
        user_id: "u-1".to_string(),
        channel: Some(channel.to_string()),
        template_slug: Some("welcome".to_string()),
        variables: Some(HashMap::from([("name".to_string(), json!("Ada"))])),
        ..Default::default()
    }
}

pub fn envelope(request_id: &str, channel: Channel) -> MessageEnvelope {
    MessageEnvelope {
        request_id: request_id.to_string(),
        correlation_id: "corr-1".to_string(),
        created_at: chrono::Utc::now(),
        channel,
        user: User {
            id: "u-1".to_string(),
            email: "ada@example.com".to_string(),
            locale: "en".to_string(),
            push_tokens: vec![PushToken {
                token: "device-1".to_string(),
                platform: "android".to_string(),
            }],
        },
        template: Template {
            slug: "welcome".to_string(),
            locale: "en".to_string(),
            version: 1,
            subject: "Welcome {{name}}".to_string(),
            body: "Hello {{name}}".to_string(),
        },
        variables: HashMap::from([("name".to_string(), Value::from("Ada"))]),
        provider_overrides: HashMap::new(),
        retry_count: 0,
    }
}
