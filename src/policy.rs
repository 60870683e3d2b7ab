//! Maintenance policies and their wire format

use crate::template::BUILTIN_TEMPLATE;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// One record as served by the policy source
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRecord {
    /// Host pattern, matched against the request's Host header
    #[serde(alias = "Regex")]
    pub regex: String,

    #[serde(default, alias = "AllowIps", deserialize_with = "null_as_empty")]
    pub allow_ips: Vec<String>,

    /// Template file, relative to the configured template directory
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub heading: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reference to the HTML document used for blocked responses
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateRef {
    /// The page compiled into the binary
    Builtin,
    File(PathBuf),
}

impl TemplateRef {
    /// Resolve a record's template reference against the template directory.
    ///
    /// References come from the remote payload, so they must stay inside the
    /// directory: absolute paths, `..` segments, or any file reference when no
    /// directory is configured fall back to the builtin page.
    pub fn resolve(template: Option<&str>, base: Option<&Path>) -> Self {
        let Some(template) = template.map(str::trim).filter(|t| !t.is_empty()) else {
            return TemplateRef::Builtin;
        };

        let path = Path::new(template);
        let contained = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        match base {
            Some(base) if contained => TemplateRef::File(base.join(path)),
            Some(_) => {
                warn!(template, "Template reference escapes the template directory, using builtin page");
                TemplateRef::Builtin
            }
            None => {
                warn!(template, "No template directory configured, using builtin page");
                TemplateRef::Builtin
            }
        }
    }
}

/// Values applied to records that omit optional fields
#[derive(Debug, Clone, Default)]
pub struct PolicyDefaults {
    pub template_dir: Option<PathBuf>,
    pub heading: String,
    pub message: String,
}

/// A compiled maintenance policy
#[derive(Debug, Clone)]
pub struct Policy {
    pub host_pattern: String,
    /// `None` when the pattern failed to compile; such a policy never matches
    matcher: Option<Regex>,
    pub allow_ips: HashSet<String>,
    pub template: TemplateRef,
    /// The template document, loaded at refresh time
    pub page: Arc<str>,
    pub heading: String,
    pub message: String,
}

impl Policy {
    /// Build a policy from its wire record. Returns the compile error alongside
    /// the (never-matching) policy so the caller decides how to report it.
    pub fn compile(record: PolicyRecord, defaults: &PolicyDefaults) -> (Self, Option<regex::Error>) {
        let (matcher, error) = match Regex::new(&record.regex) {
            Ok(re) => (Some(re), None),
            Err(e) => (None, Some(e)),
        };

        let policy = Self {
            template: TemplateRef::resolve(record.template.as_deref(), defaults.template_dir.as_deref()),
            page: Arc::from(BUILTIN_TEMPLATE),
            heading: record.heading.unwrap_or_else(|| defaults.heading.clone()),
            message: record.message.unwrap_or_else(|| defaults.message.clone()),
            allow_ips: record.allow_ips.into_iter().map(|ip| ip.trim().to_string()).collect(),
            host_pattern: record.regex,
            matcher,
        };

        (policy, error)
    }

    /// Convenience constructor with the builtin template, mostly for tests
    pub fn new(pattern: &str, allow_ips: &[&str]) -> Self {
        let record = PolicyRecord {
            regex: pattern.to_string(),
            allow_ips: allow_ips.iter().map(|s| s.to_string()).collect(),
            template: None,
            heading: None,
            message: None,
        };
        Self::compile(record, &PolicyDefaults::default()).0
    }

    pub fn with_text(mut self, heading: &str, message: &str) -> Self {
        self.heading = heading.to_string();
        self.message = message.to_string();
        self
    }

    pub fn is_valid(&self) -> bool {
        self.matcher.is_some()
    }

    pub fn matches_host(&self, host: &str) -> bool {
        self.matcher.as_ref().is_some_and(|re| re.is_match(host))
    }

    pub fn allows<'a, I>(&self, ips: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        ips.into_iter().any(|ip| self.allow_ips.contains(ip))
    }
}

/// Ordered collection of policies; replaced wholesale, never edited in place
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<Policy>,
}

impl PolicySet {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Policy> {
        self.policies.iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl FromIterator<Policy> for PolicySet {
    fn from_iter<T: IntoIterator<Item = Policy>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PolicySet {
    type Item = &'a Policy;
    type IntoIter = std::slice::Iter<'a, Policy>;

    fn into_iter(self) -> Self::IntoIter {
        self.policies.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> PolicyDefaults {
        PolicyDefaults {
            template_dir: Some(PathBuf::from("/srv/templates")),
            heading: "Maintenance".to_string(),
            message: "Back soon".to_string(),
        }
    }

    #[test]
    fn test_decode_records() {
        let json = r#"[
            {"regex": "^a\\.example\\.com$", "allowIps": ["10.0.0.1"], "template": "a.html", "heading": "A", "message": "down"},
            {"regex": "^b\\.example\\.com$", "allowIps": [], "unknown": true}
        ]"#;
        let records: Vec<PolicyRecord> = serde_json::from_str(json).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].allow_ips, vec!["10.0.0.1"]);
        assert_eq!(records[0].template.as_deref(), Some("a.html"));
        assert!(records[1].heading.is_none());
    }

    #[test]
    fn test_decode_null_allow_ips() {
        let json = r#"[{"regex": "^x$", "allowIps": null}, {"regex": "^y$"}]"#;
        let records: Vec<PolicyRecord> = serde_json::from_str(json).unwrap();
        assert!(records[0].allow_ips.is_empty());
        assert!(records[1].allow_ips.is_empty());
    }

    #[test]
    fn test_decode_legacy_field_names() {
        let json = r#"[{"Regex": "^x$", "AllowIps": ["1.2.3.4"]}]"#;
        let records: Vec<PolicyRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[0].regex, "^x$");
        assert_eq!(records[0].allow_ips, vec!["1.2.3.4"]);
    }

    #[test]
    fn test_compile_applies_defaults() {
        let record = PolicyRecord {
            regex: "^shop\\.".to_string(),
            allow_ips: vec![" 10.0.0.1 ".to_string()],
            template: Some("shop.html".to_string()),
            heading: None,
            message: Some("Inventory update".to_string()),
        };
        let (policy, err) = Policy::compile(record, &defaults());

        assert!(err.is_none());
        assert!(policy.is_valid());
        assert_eq!(policy.heading, "Maintenance");
        assert_eq!(policy.message, "Inventory update");
        assert!(policy.allow_ips.contains("10.0.0.1"));
        assert_eq!(
            policy.template,
            TemplateRef::File(PathBuf::from("/srv/templates/shop.html"))
        );
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        let record = PolicyRecord {
            regex: "([unclosed".to_string(),
            allow_ips: vec![],
            template: None,
            heading: None,
            message: None,
        };
        let (policy, err) = Policy::compile(record, &defaults());

        assert!(err.is_some());
        assert!(!policy.is_valid());
        assert!(!policy.matches_host("([unclosed"));
        assert!(!policy.matches_host("anything"));
    }

    #[test]
    fn test_template_resolution() {
        let base = Path::new("/base");
        assert_eq!(TemplateRef::resolve(None, Some(base)), TemplateRef::Builtin);
        assert_eq!(TemplateRef::resolve(Some("  "), Some(base)), TemplateRef::Builtin);
        assert_eq!(
            TemplateRef::resolve(Some("shop/page.html"), Some(base)),
            TemplateRef::File(PathBuf::from("/base/shop/page.html"))
        );
        assert_eq!(
            TemplateRef::resolve(Some("./page.html"), Some(base)),
            TemplateRef::File(PathBuf::from("/base/./page.html"))
        );
        assert_eq!(TemplateRef::resolve(Some("page.html"), None), TemplateRef::Builtin);
    }

    #[test]
    fn test_template_outside_directory_uses_builtin() {
        let base = Path::new("/base");
        for template in ["/etc/passwd", "../secrets.html", "pages/../../etc/passwd", "a/.."] {
            assert_eq!(
                TemplateRef::resolve(Some(template), Some(base)),
                TemplateRef::Builtin,
                "template {}",
                template
            );
        }

        let record = PolicyRecord {
            regex: "^x$".to_string(),
            allow_ips: vec![],
            template: Some("/etc/passwd".to_string()),
            heading: None,
            message: None,
        };
        let (policy, _) = Policy::compile(record, &defaults());
        assert_eq!(policy.template, TemplateRef::Builtin);
        assert_eq!(&*policy.page, BUILTIN_TEMPLATE);
    }

    #[test]
    fn test_pattern_is_unanchored_search() {
        let policy = Policy::new("example\\.com", &[]);
        assert!(policy.matches_host("www.example.com:8080"));
        assert!(!policy.matches_host("example.org"));
    }

    #[test]
    fn test_allows_exact_match_only() {
        let policy = Policy::new(".*", &["10.0.0.1"]);
        assert!(policy.allows(["10.0.0.1"]));
        assert!(!policy.allows(["10.0.0.10", "10.0.0.0/8"]));
        assert!(!policy.allows(std::iter::empty::<&str>()));
    }
}
