use crate::models::{channel::Channel, preferences::UserPreferences};

pub const OPT_OUT_DETAIL: &str = "user opted out";

/// Whether the user has switched off `channel`.
pub fn should_skip(channel: Channel, preferences: &UserPreferences) -> bool {
    match channel {
        Channel::Email => !preferences.allow_email,
        Channel::Push => !preferences.allow_push,
    }
}
