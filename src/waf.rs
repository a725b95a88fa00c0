//! Deny-list URL filtering.
//!
//! A small ordered set of compiled regex signatures is evaluated against
//! the request target (path plus query string) before anything else in
//! the pipeline runs. A match is a terminal 403. This is deliberately a
//! cheap pattern scan, not a parser: it trades false negatives on novel
//! payloads for near-zero latency and zero false positives on
//! well-formed traffic, and it must stay that way. All patterns are
//! compiled once at startup; the hot path only runs pre-built matchers.

use regex::Regex;

use crate::{GatewayError, Result};

/// Built-in signatures, matched case-insensitively against the raw
/// (undecoded) request target. Common percent-encoded spellings are
/// folded into the patterns themselves.
const BUILT_IN_SIGNATURES: [(&str, &str); 9] = [
    ("script_tag", r"(?i)(<|%3c)\s*script"),
    ("sql_union_select", r"(?i)union(%20|[\s+])+(all(%20|[\s+])+)?select"),
    ("sql_drop_table", r"(?i)drop(%20|[\s+])+table"),
    ("sql_insert_into", r"(?i)insert(%20|[\s+])+into"),
    ("sql_information_schema", r"(?i)information_schema"),
    ("path_traversal", r"(?i)(%2e|\.){2}(%2f|/)"),
    ("dotfile_probe", r"(?i)/\.(env|git|htaccess|htpasswd|aws|ssh)"),
    ("system_file_probe", r"(?i)/etc/(passwd|shadow)"),
    ("scanner_probe", r"(?i)/wp-(admin|login)"),
];

/// One compiled deny rule. The name appears in server-side logs only,
/// never in a client response.
#[derive(Debug, Clone)]
pub struct FilterRule {
    /// Short identifier for log lines.
    pub name: String,
    /// Compiled signature.
    pub pattern: Regex,
}

/// The ordered deny-list applied to every non-static request target.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    rules: Vec<FilterRule>,
}

impl UrlFilter {
    /// Compiles the built-in signature set.
    pub fn built_in() -> Result<Self> {
        Self::with_extra_patterns(&[])
    }

    /// Compiles the built-in signature set plus deployment-specific
    /// extra patterns appended after the built-ins.
    pub fn with_extra_patterns(extra: &[String]) -> Result<Self> {
        let mut rules = Vec::with_capacity(BUILT_IN_SIGNATURES.len() + extra.len());

        for (name, pattern) in BUILT_IN_SIGNATURES {
            rules.push(FilterRule {
                name: name.to_owned(),
                pattern: Regex::new(pattern).map_err(|e| {
                    GatewayError::Config(format!("invalid built-in filter pattern {name}: {e}"))
                })?,
            });
        }

        for (i, pattern) in extra.iter().enumerate() {
            rules.push(FilterRule {
                name: format!("custom_{}", i + 1),
                pattern: Regex::new(pattern).map_err(|e| {
                    GatewayError::Config(format!("invalid filter pattern \"{pattern}\": {e}"))
                })?,
            });
        }

        Ok(Self { rules })
    }

    /// Returns the name of the first rule matching `target`, or `None`
    /// if the target is clean. `target` is the raw path plus query
    /// string as received.
    pub fn matched_rule(&self, target: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(target))
            .map(|rule| rule.name.as_str())
    }

    /// Binary allow/deny view of [`UrlFilter::matched_rule`].
    pub fn is_allowed(&self, target: &str) -> bool {
        self.matched_rule(target).is_none()
    }

    /// Number of compiled rules, built-in plus extra.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
