use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Row from the `profiles` table, keyed by the auth user id.
///
/// Only the columns the client reads directly are typed; everything else
/// (progress counters, preferences) stays in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            avatar_url: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for display, falling back to the user id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile_row() {
        let json = r#"{"id":"u1","name":"Ada","avatar_url":null,"lessons_completed":12,"streak_days":3,"role":"student"}"#;
        let profile: Profile = serde_json::from_str(json).expect("Failed to parse profile JSON");

        assert_eq!(profile.id, "u1");
        assert_eq!(profile.display_name(), "Ada");
        assert_eq!(profile.avatar_url, None);
        assert_eq!(profile.extra.get("lessons_completed"), Some(&Value::from(12)));
        assert_eq!(profile.extra.get("role"), Some(&Value::from("student")));
        assert!(!profile.extra.contains_key("name"));
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        assert_eq!(Profile::new("u1").display_name(), "u1");
        assert_eq!(Profile::new("u1").with_name("  ").display_name(), "u1");
    }
}
