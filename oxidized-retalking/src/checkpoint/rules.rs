use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

/// Key rule errors.
#[derive(Debug, Snafu)]
pub enum KeyRuleError {
    #[snafu(display("Cannot compile key pattern: {pattern}"))]
    CompilePattern { source: regex::Error, pattern: String },

    #[snafu(display("Segment to strip must be non-empty and cannot contain '.': {segment:?}"))]
    InvalidSegment { segment: String },
}

/// Rewrite rule for checkpoint parameter names.
#[derive(Clone, Debug)]
pub enum KeyRule {
    /// Drop parameters whose name matches the pattern anywhere.
    Drop(Regex),

    /// Remove every path segment that is equal to the given segment.
    ///
    /// For instance, stripping `module` rewrites `module.core.weight` to
    /// `core.weight` and `encoder.module` to `encoder`.
    StripSegment(String),
}

impl KeyRule {
    /// Apply the rule to a parameter name.
    ///
    /// Returns `None` when the parameter should be dropped.
    pub fn apply(&self, name: String) -> Option<String> {
        match self {
            KeyRule::Drop(pattern) => (!pattern.is_match(&name)).then_some(name),
            KeyRule::StripSegment(segment) => {
                if !name.split('.').any(|s| s == segment.as_str()) {
                    return Some(name);
                }
                Some(
                    name.split('.')
                        .filter(|s| *s != segment.as_str())
                        .collect::<Vec<_>>()
                        .join("."),
                )
            }
        }
    }
}

/// Serializable form of a [`KeyRule`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRuleConfig {
    /// Regular expression of parameter names to drop.
    Drop(String),

    /// Path segment to remove.
    StripSegment(String),
}

impl TryFrom<KeyRuleConfig> for KeyRule {
    type Error = KeyRuleError;

    fn try_from(config: KeyRuleConfig) -> Result<Self, Self::Error> {
        match config {
            KeyRuleConfig::Drop(pattern) => Ok(KeyRule::Drop(
                Regex::new(&pattern).context(CompilePatternSnafu { pattern })?,
            )),
            KeyRuleConfig::StripSegment(segment) => {
                if segment.is_empty() || segment.contains('.') {
                    return InvalidSegmentSnafu { segment }.fail();
                }
                Ok(KeyRule::StripSegment(segment))
            }
        }
    }
}

/// Ordered list of key rules.
///
/// Rules are applied in order. As soon as a rule drops a parameter,
/// later rules are not applied.
#[derive(Clone, Debug, Default)]
pub struct KeyRules {
    rules: Vec<KeyRule>,
}

impl KeyRules {
    /// Create key rules.
    pub fn new(rules: Vec<KeyRule>) -> Self {
        Self { rules }
    }

    /// Rules that produce names as used by the talking-head networks.
    ///
    /// Parameters of the low-resolution branch are dropped, these are
    /// loaded from a separate checkpoint. The `module` segments that
    /// are added by data-parallel training are removed.
    pub fn talking_head() -> Self {
        static TALKING_HEAD: OnceLock<KeyRules> = OnceLock::new();
        TALKING_HEAD
            .get_or_init(|| {
                KeyRules::try_from(default_key_rule_configs()).expect("Invalid default key rules")
            })
            .clone()
    }

    /// Get the rules.
    pub fn rules(&self) -> &[KeyRule] {
        &self.rules
    }

    /// Rewrite a parameter name.
    ///
    /// Returns `None` when the parameter should be dropped.
    pub fn apply(&self, name: &str) -> Option<String> {
        self.rules
            .iter()
            .try_fold(name.to_string(), |name, rule| rule.apply(name))
    }
}

impl TryFrom<Vec<KeyRuleConfig>> for KeyRules {
    type Error = KeyRuleError;

    fn try_from(configs: Vec<KeyRuleConfig>) -> Result<Self, Self::Error> {
        configs
            .into_iter()
            .map(KeyRule::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map(KeyRules::new)
    }
}

/// Configuration of [`KeyRules::talking_head`].
pub(crate) fn default_key_rule_configs() -> Vec<KeyRuleConfig> {
    vec![
        KeyRuleConfig::Drop("low_res".to_string()),
        KeyRuleConfig::StripSegment("module".to_string()),
    ]
}
