use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::checkpoint::assign::AssignmentMode;
use crate::checkpoint::rules::{default_key_rule_configs, KeyRuleConfig};

/// Loader configuration errors.
#[derive(Debug, Snafu)]
pub enum LoaderConfigError {
    #[snafu(display("Cannot open loader configuration: {}", path.to_string_lossy()))]
    Open {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Cannot parse loader configuration: {}", path.to_string_lossy()))]
    Parse {
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Checkpoint loader configuration.
///
/// The defaults match the checkpoints of the talking-head networks.
/// Configurations can be read from JSON, where missing fields take
/// their default values:
///
/// ```json
/// {
///   "state_dict_key": "state_dict",
///   "key_rules": [{"drop": "low_res"}, {"strip_segment": "module"}],
///   "assignment_mode": "partial"
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    state_dict_key: String,
    unwrapped_marker: String,
    dnet_state_dict_key: String,
    key_rules: Vec<KeyRuleConfig>,
    assignment_mode: AssignmentMode,
}

impl LoaderConfig {
    /// Read a loader configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LoaderConfigError> {
        let path = path.as_ref();
        let file = BufReader::new(File::open(path).context(OpenSnafu { path })?);
        serde_json::from_reader(file).context(ParseSnafu { path })
    }

    /// Key under which wrapped checkpoints store their parameters.
    ///
    /// Default: `"state_dict"`
    pub fn state_dict_key(mut self, state_dict_key: impl Into<String>) -> Self {
        self.state_dict_key = state_dict_key.into();
        self
    }

    /// Checkpoints whose path contains this marker are not wrapped.
    ///
    /// Default: `"arcface"`
    pub fn unwrapped_marker(mut self, unwrapped_marker: impl Into<String>) -> Self {
        self.unwrapped_marker = unwrapped_marker.into();
        self
    }

    /// Key under which DNet checkpoints store their parameters.
    ///
    /// Default: `"net_G_ema"`
    pub fn dnet_state_dict_key(mut self, dnet_state_dict_key: impl Into<String>) -> Self {
        self.dnet_state_dict_key = dnet_state_dict_key.into();
        self
    }

    /// Rules for rewriting checkpoint parameter names.
    ///
    /// Default: drop `low_res` parameters, strip `module` segments.
    pub fn key_rules(mut self, key_rules: Vec<KeyRuleConfig>) -> Self {
        self.key_rules = key_rules;
        self
    }

    /// Parameter assignment mode.
    ///
    /// Default: `AssignmentMode::Partial`
    pub fn assignment_mode(mut self, assignment_mode: AssignmentMode) -> Self {
        self.assignment_mode = assignment_mode;
        self
    }

    pub(crate) fn get_state_dict_key(&self) -> &str {
        &self.state_dict_key
    }

    pub(crate) fn get_unwrapped_marker(&self) -> &str {
        &self.unwrapped_marker
    }

    pub(crate) fn get_dnet_state_dict_key(&self) -> &str {
        &self.dnet_state_dict_key
    }

    pub(crate) fn get_key_rules(&self) -> &[KeyRuleConfig] {
        &self.key_rules
    }

    pub(crate) fn get_assignment_mode(&self) -> AssignmentMode {
        self.assignment_mode
    }

    /// Nested mappings that are read from PyTorch checkpoints.
    pub(crate) fn sections(&self) -> Vec<&str> {
        let mut sections = vec![self.state_dict_key.as_str()];
        if self.dnet_state_dict_key != self.state_dict_key {
            sections.push(self.dnet_state_dict_key.as_str());
        }
        sections
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            state_dict_key: "state_dict".to_string(),
            unwrapped_marker: "arcface".to_string(),
            dnet_state_dict_key: "net_G_ema".to_string(),
            key_rules: default_key_rule_configs(),
            assignment_mode: AssignmentMode::Partial,
        }
    }
}
