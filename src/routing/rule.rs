//! Routing rule value type.
//!
//! A `RoutingRule` is created once from persisted configuration or an admin
//! mutation and never mutated in place — edits replace the table entry
//! wholesale, matching the "a rule is created once and never mutated"
//! invariant.

use serde::{Deserialize, Serialize};

fn default_priority() -> i64 {
    100
}

fn default_description() -> String {
    String::new()
}

/// One entry in the routing table.
///
/// `path_pattern` is normalized to begin with `/` on construction. Patterns
/// ending in `/*` are wildcard prefixes; anything else is matched exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(rename = "pathPattern")]
    pub path_pattern: String,

    #[serde(rename = "targetHost")]
    pub target_host: String,

    #[serde(rename = "targetPort")]
    pub target_port: u16,

    #[serde(default = "default_description")]
    pub description: String,

    #[serde(default, rename = "stripPrefix")]
    pub strip_prefix: bool,

    #[serde(default = "default_priority")]
    pub priority: i64,

    #[serde(default, rename = "forwardHost")]
    pub forward_host: bool,

    #[serde(default, rename = "useSSL")]
    pub use_ssl: bool,
}

impl RoutingRule {
    /// Builds a rule, normalizing `path_pattern` to start with `/`.
    ///
    /// Returns `Err` if `path_pattern` is empty after normalization, or if
    /// `target_host` is empty, or `target_port` is 0 (serde's `u16` already
    /// rejects values above 65535).
    pub fn new(
        path_pattern: impl Into<String>,
        target_host: impl Into<String>,
        target_port: u16,
    ) -> Result<Self, String> {
        let mut rule = RoutingRule {
            path_pattern: path_pattern.into(),
            target_host: target_host.into(),
            target_port,
            description: String::new(),
            strip_prefix: false,
            priority: default_priority(),
            forward_host: false,
            use_ssl: false,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Normalizes `path_pattern` to start with `/` and rejects the
    /// `spec.md` §3 invariants: empty `path_pattern`, empty `target_host`,
    /// or `target_port == 0`.
    ///
    /// Every rule that enters the route table must go through this —
    /// `RoutingRule` derives `Deserialize` directly (for the JSON schema's
    /// field names), so a rule read from a config file or an admin request
    /// body has not run this check until the caller calls it explicitly.
    pub(crate) fn validate(&mut self) -> Result<(), String> {
        if !self.path_pattern.starts_with('/') {
            self.path_pattern = format!("/{}", self.path_pattern);
        }
        if self.path_pattern == "/" {
            // A bare "/" is a valid exact pattern; nothing further to do.
        }
        if self.path_pattern.is_empty() {
            return Err("pathPattern must not be empty".to_string());
        }
        if self.target_host.is_empty() {
            return Err("targetHost must not be empty".to_string());
        }
        if self.target_port == 0 {
            return Err("targetPort must be in [1, 65535]".to_string());
        }
        Ok(())
    }

    /// `true` for patterns ending in `/*`.
    pub fn is_wildcard(&self) -> bool {
        self.path_pattern.ends_with("/*")
    }

    /// The prefix a wildcard pattern matches against (pattern minus `/*`).
    fn wildcard_prefix(&self) -> &str {
        &self.path_pattern[..self.path_pattern.len() - 2]
    }

    /// Secondary sort key: exact patterns beat wildcards, longer wildcards
    /// beat shorter ones.
    pub fn specificity(&self) -> i64 {
        if self.is_wildcard() {
            1000 + self.path_pattern.len() as i64
        } else {
            10000
        }
    }

    /// Does this rule match `path`?
    ///
    /// Exact patterns require equality. Wildcard patterns match the prefix
    /// itself or the prefix followed by `/` — `/api/*` matches `/api` and
    /// `/api/x` but not `/apistore`.
    pub fn matches(&self, path: &str) -> bool {
        if self.is_wildcard() {
            let prefix = self.wildcard_prefix();
            path == prefix || path.starts_with(&format!("{prefix}/"))
        } else {
            path == self.path_pattern
        }
    }

    /// Rewrites `path` per `strip_prefix`. Only meaningful when
    /// `strip_prefix` is true; callers should check that first.
    pub fn rewrite_path(&self, path: &str) -> String {
        if !self.strip_prefix {
            return path.to_string();
        }
        if self.is_wildcard() {
            let prefix = self.wildcard_prefix();
            let rest = path.strip_prefix(prefix).unwrap_or(path);
            if rest.is_empty() {
                "/".to_string()
            } else if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{rest}")
            }
        } else {
            "/".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_prefix_and_subpaths_not_siblings() {
        let rule = RoutingRule::new("/api/*", "h1", 8081).unwrap();
        assert!(rule.matches("/api"));
        assert!(rule.matches("/api/x"));
        assert!(!rule.matches("/apistore"));
    }

    #[test]
    fn exact_pattern_matches_only_itself() {
        let rule = RoutingRule::new("/admin", "h3", 8083).unwrap();
        assert!(rule.matches("/admin"));
        assert!(!rule.matches("/admin/x"));
    }

    #[test]
    fn rewrite_strips_wildcard_prefix() {
        let mut rule = RoutingRule::new("/api/*", "h1", 8081).unwrap();
        rule.strip_prefix = true;
        assert_eq!(rule.rewrite_path("/api/x/y"), "/x/y");
        assert_eq!(rule.rewrite_path("/api"), "/");
    }

    #[test]
    fn rewrite_exact_pattern_collapses_to_root() {
        let mut rule = RoutingRule::new("/exact", "h1", 8081).unwrap();
        rule.strip_prefix = true;
        assert_eq!(rule.rewrite_path("/exact"), "/");
    }

    #[test]
    fn specificity_orders_exact_over_wildcard_and_longer_over_shorter() {
        let exact = RoutingRule::new("/admin", "h", 1).unwrap();
        let long_wild = RoutingRule::new("/api/v2/*", "h", 1).unwrap();
        let short_wild = RoutingRule::new("/api/*", "h", 1).unwrap();
        assert!(exact.specificity() > long_wild.specificity());
        assert!(long_wild.specificity() > short_wild.specificity());
    }

    #[test]
    fn new_rejects_empty_host_and_zero_port() {
        assert!(RoutingRule::new("/x", "", 80).is_err());
        assert!(RoutingRule::new("/x", "h", 0).is_err());
    }

    #[test]
    fn new_normalizes_missing_leading_slash() {
        let rule = RoutingRule::new("api/*", "h", 80).unwrap();
        assert_eq!(rule.path_pattern, "/api/*");
    }
}
