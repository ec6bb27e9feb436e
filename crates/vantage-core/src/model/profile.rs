// ── Profile domain types ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The application's profile index: which profile is active plus the
/// list of known profiles.
///
/// Unknown top-level fields are preserved so a read-modify-write of the
/// profiles file never drops data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Uid of the active profile.
    #[serde(default)]
    pub current: Option<String>,

    #[serde(default)]
    pub items: Vec<ProfileItem>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ProfilesConfig {
    pub fn item(&self, uid: &str) -> Option<&ProfileItem> {
        self.items.iter().find(|item| item.uid == uid)
    }

    pub fn current_item(&self) -> Option<&ProfileItem> {
        self.current.as_deref().and_then(|uid| self.item(uid))
    }

    /// A copy with `current` replaced.
    pub fn with_current(&self, uid: impl Into<String>) -> Self {
        Self {
            current: Some(uid.into()),
            ..self.clone()
        }
    }
}

/// A single profile entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileItem {
    pub uid: String,

    /// `local`, `remote`, `merge`, `script`, ...
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// File name relative to the profiles directory.
    #[serde(default)]
    pub file: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    /// Unix timestamp of the last update.
    #[serde(default)]
    pub updated: Option<u64>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ProfileItem {
    /// Display name, falling back to the uid.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uid)
    }
}

/// Outcome of one profile switch, as reported by the switch queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchResult {
    pub profile_id: String,
    pub success: bool,
    pub notify_on_success: bool,
    /// Failure message; `None` on success.
    pub message: Option<String>,
}

impl SwitchResult {
    pub fn success(profile_id: impl Into<String>, notify_on_success: bool) -> Self {
        Self {
            profile_id: profile_id.into(),
            success: true,
            notify_on_success,
            message: None,
        }
    }

    pub fn failure(
        profile_id: impl Into<String>,
        notify_on_success: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            success: false,
            notify_on_success,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PROFILES_YAML: &str = r"
current: p2
chain: []
items:
  - uid: p1
    type: local
    name: Home
    file: p1.yaml
  - uid: p2
    type: remote
    name: Work
    file: p2.yaml
    url: https://example.com/sub
    updated: 1760000000
    option:
      user_agent: vantage
";

    #[test]
    fn parses_profiles_yaml_and_keeps_unknown_fields() {
        let cfg: ProfilesConfig = serde_yaml::from_str(PROFILES_YAML).unwrap();
        assert_eq!(cfg.current.as_deref(), Some("p2"));
        assert_eq!(cfg.items.len(), 2);
        assert!(cfg.extra.contains_key("chain"));

        let work = cfg.current_item().unwrap();
        assert_eq!(work.display_name(), "Work");
        assert_eq!(work.kind.as_deref(), Some("remote"));
        assert!(work.extra.contains_key("option"));
    }

    #[test]
    fn with_current_replaces_only_current() {
        let cfg: ProfilesConfig = serde_yaml::from_str(PROFILES_YAML).unwrap();
        let switched = cfg.with_current("p1");
        assert_eq!(switched.current.as_deref(), Some("p1"));
        assert_eq!(switched.items, cfg.items);
        assert_eq!(switched.extra, cfg.extra);
    }

    #[test]
    fn display_name_falls_back_to_uid() {
        let item: ProfileItem = serde_yaml::from_str("uid: abc").unwrap();
        assert_eq!(item.display_name(), "abc");
    }
}
