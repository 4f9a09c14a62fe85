use std::{collections::HashMap, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::models::template::{RenderedTemplate, Template};

pub const DEFAULT_LOCALE: &str = "en";

/// Source of the active template for a slug and locale.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn get_template(&self, slug: &str, locale: Option<&str>) -> Result<Template, Error>;
}

#[derive(Deserialize)]
struct TemplateEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<TemplateData>,
}

#[derive(Deserialize)]
struct TemplateData {
    #[serde(default)]
    version: i64,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

/// Template-service client. Every call goes to the service; nothing is
/// cached locally.
pub struct TemplateServiceClient {
    http_client: Client,
    base_url: String,
}

impl TemplateServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!("Template service client initialized");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TemplateSource for TemplateServiceClient {
    async fn get_template(&self, slug: &str, locale: Option<&str>) -> Result<Template, Error> {
        let locale = locale
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(DEFAULT_LOCALE);

        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|_| anyhow!("Invalid template service URL"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Invalid template service URL"))?
            .pop_if_empty()
            .extend(["v1", "templates", slug, "active"]);
        url.query_pairs_mut().append_pair("locale", locale);

        debug!(template_slug = slug, locale, "Fetching template from service");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("Template service request failed: {}", e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(anyhow!("Template service returned status {}", status));
        }

        let envelope: TemplateEnvelope = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse template JSON: {}", e))?;

        match envelope.data {
            Some(data) if envelope.success => Ok(Template {
                slug: slug.to_string(),
                locale: locale.to_string(),
                version: data.version,
                subject: data.subject,
                body: data.body,
            }),
            _ => Err(anyhow!("Template service error: {}", envelope.message)),
        }
    }
}

/// Substitutes `{{name}}` placeholders in the template's subject and body.
pub fn render_template(
    template: &Template,
    variables: &HashMap<String, serde_json::Value>,
) -> Result<RenderedTemplate, Error> {
    debug!(
        template_slug = %template.slug,
        variable_count = variables.len(),
        "Rendering template"
    );

    Ok(RenderedTemplate {
        subject: replace_variables(&template.subject, variables)?,
        body: replace_variables(&template.body, variables)?,
    })
}

fn replace_variables(
    template: &str,
    variables: &HashMap<String, serde_json::Value>,
) -> Result<String, Error> {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        if !result.contains(&placeholder) {
            continue;
        }

        let replacement = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => String::new(),
            _ => {
                return Err(anyhow!("Unsupported variable type for key '{}'", key));
            }
        };

        result = result.replace(&placeholder, &replacement);
    }

    if let Some(start) = result.find("{{")
        && let Some(len) = result[start..].find("}}")
    {
        let missing_var = &result[start..start + len + 2];

        warn!(
            missing_variable = %missing_var,
            "Template contains unreplaced variable"
        );

        return Err(anyhow!("Missing variable in template: {}", missing_var));
    }

    Ok(result)
}
