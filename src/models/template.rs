use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub slug: String,
    pub locale: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

/// Subject and body after variable substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub body: String,
}
