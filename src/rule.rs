//! Rule data model: key, kind and the persisted rule body.

use std::ffi::OsStr;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key reserved for the manager's own dialog stylesheet. Never persisted.
pub const BASE_CSS_KEY: &str = "__BASE_CSS__";

/// Opaque, stable rule identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleKey(String);

impl RuleKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a fresh key: `ucm_<unix millis>_<7 random chars>`.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("ucm_{millis}_{}", &random[..7]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if the key can name a persisted rule: a single plain path
    /// segment, not reserved. Keys read from JSON are checked with this
    /// before they reach the mirror folder.
    pub fn is_storable(&self) -> bool {
        let key = self.0.as_str();
        !key.is_empty()
            && key != "."
            && key != ".."
            && key != BASE_CSS_KEY
            && !key.contains(['/', '\\', ':', '\0'])
            && Path::new(key).file_name() == Some(OsStr::new(key))
    }

    /// Short suffix used to tell apart export folders of rules sharing a label.
    pub fn suffix(&self) -> &str {
        let tail = self.0.rsplit('_').next().unwrap_or(&self.0);
        if tail.is_empty() { &self.0 } else { tail }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of a rule. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    #[serde(rename = "css")]
    Style,
    #[serde(rename = "js")]
    Script,
}

impl RuleKind {
    /// Persisted name and export file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Style => "css",
            Self::Script => "js",
        }
    }

    /// Badge shown in front of the label in the rule list.
    pub fn badge(self) -> &'static str {
        match self {
            Self::Style => "CSS",
            Self::Script => "JS",
        }
    }

    /// Kind of a standalone file, from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "css" => Some(Self::Style),
            "js" | "mjs" => Some(Self::Script),
            _ => None,
        }
    }
}

/// Rule content as written in the rule file, `key → RuleBody`.
///
/// Field order here is the field order on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBody {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub label: String,
    pub enabled: bool,
    pub code: String,
}

impl RuleBody {
    /// Strict per-entry validation used by both load and import: a recognized
    /// `type`, string `label` and `code`, boolean `enabled`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = match obj.get("type")?.as_str()? {
            "css" => RuleKind::Style,
            "js" => RuleKind::Script,
            _ => return None,
        };
        Some(Self {
            kind,
            label: obj.get("label")?.as_str()?.to_string(),
            enabled: obj.get("enabled")?.as_bool()?,
            code: obj.get("code")?.as_str()?.to_string(),
        })
    }
}

/// A user rule: a style or script snippet with an enabled flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub key: RuleKey,
    pub kind: RuleKind,
    pub label: String,
    pub enabled: bool,
    pub code: String,
}

impl Rule {
    /// New enabled rule with a fresh key.
    pub fn new(kind: RuleKind, label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            key: RuleKey::generate(),
            kind,
            label: label.into(),
            enabled: true,
            code: code.into(),
        }
    }

    pub fn from_body(key: RuleKey, body: RuleBody) -> Self {
        Self {
            key,
            kind: body.kind,
            label: body.label,
            enabled: body.enabled,
            code: body.code,
        }
    }

    pub fn body(&self) -> RuleBody {
        RuleBody {
            kind: self.kind,
            label: self.label.clone(),
            enabled: self.enabled,
            code: self.code.clone(),
        }
    }

    /// `[CSS] label` / `[JS] label`.
    pub fn display_label(&self) -> String {
        format!("[{}] {}", self.kind.badge(), self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_keys_are_unique() {
        let a = RuleKey::generate();
        let b = RuleKey::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("ucm_"));
        assert_eq!(a.suffix().len(), 7);
    }

    #[test]
    fn test_storable_keys() {
        assert!(RuleKey::generate().is_storable());
        assert!(RuleKey::from("my-rule.v2").is_storable());
        for bad in ["", ".", "..", "/x", "a/b", "..\\x", "C:x", "a\0b", BASE_CSS_KEY] {
            assert!(!RuleKey::from(bad).is_storable(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_suffix_without_underscore() {
        assert_eq!(RuleKey::from("plain").suffix(), "plain");
    }

    #[test]
    fn test_kind_from_path() {
        assert_eq!(RuleKind::from_path(Path::new("a/b.css")), Some(RuleKind::Style));
        assert_eq!(RuleKind::from_path(Path::new("x.JS")), Some(RuleKind::Script));
        assert_eq!(RuleKind::from_path(Path::new("x.mjs")), Some(RuleKind::Script));
        assert_eq!(RuleKind::from_path(Path::new("x.json")), None);
        assert_eq!(RuleKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_body_validation_accepts_well_formed() {
        let v = json!({"type": "css", "label": "X", "enabled": true, "code": "a{}"});
        let body = RuleBody::from_value(&v).unwrap();
        assert_eq!(body.kind, RuleKind::Style);
        assert!(body.enabled);
    }

    #[test]
    fn test_body_validation_rejects_malformed() {
        let missing_enabled = json!({"type": "js", "label": "X", "code": ""});
        let bad_type = json!({"type": "html", "label": "X", "enabled": true, "code": ""});
        let enabled_as_string = json!({"type": "js", "label": "X", "enabled": "true", "code": ""});
        let not_object = json!("css");
        assert!(RuleBody::from_value(&missing_enabled).is_none());
        assert!(RuleBody::from_value(&bad_type).is_none());
        assert!(RuleBody::from_value(&enabled_as_string).is_none());
        assert!(RuleBody::from_value(&not_object).is_none());
    }

    #[test]
    fn test_body_field_order_on_disk() {
        let rule = Rule::new(RuleKind::Script, "L", "c");
        let text = serde_json::to_string(&rule.body()).unwrap();
        assert_eq!(text, r#"{"type":"js","label":"L","enabled":true,"code":"c"}"#);
    }

    #[test]
    fn test_display_label() {
        let rule = Rule::new(RuleKind::Style, "Dark tabs", "");
        assert_eq!(rule.display_label(), "[CSS] Dark tabs");
    }
}
