use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushToken {
    pub token: String,
    #[serde(default)]
    pub platform: String,
}

/// Snapshot of a user's notification profile as served by the user service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub allow_email: bool,
    #[serde(default)]
    pub allow_push: bool,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub push_tokens: Vec<PushToken>,
}
