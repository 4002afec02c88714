use std::path::Path;

use candle_core::Tensor;

use crate::checkpoint::raw::{RawCheckpoint, StateDict};
use crate::checkpoint::rules::KeyRules;

/// Converts raw checkpoints into state dicts with model parameter names.
#[derive(Clone, Debug)]
pub struct KeyNormalizer {
    state_dict_key: String,
    unwrapped_marker: String,
    rules: KeyRules,
}

impl KeyNormalizer {
    /// Create a key normalizer.
    ///
    /// * `state_dict_key` - Key under which wrapped checkpoints store
    ///   their parameters.
    /// * `unwrapped_marker` - Checkpoints whose path contains this
    ///   string store their parameters at the top level.
    /// * `rules` - Rules for rewriting parameter names.
    pub fn new(
        state_dict_key: impl Into<String>,
        unwrapped_marker: impl Into<String>,
        rules: KeyRules,
    ) -> Self {
        Self {
            state_dict_key: state_dict_key.into(),
            unwrapped_marker: unwrapped_marker.into(),
            rules,
        }
    }

    /// Check if the parameters of the checkpoint at `path` are wrapped.
    pub fn is_wrapped(&self, path: impl AsRef<Path>) -> bool {
        !path
            .as_ref()
            .to_string_lossy()
            .contains(self.unwrapped_marker.as_str())
    }

    /// Get the state dict of a checkpoint with normalized names.
    ///
    /// * `raw` - The deserialized checkpoint.
    /// * `path` - Path the checkpoint was loaded from, only used to
    ///   decide whether the parameters are wrapped.
    pub fn normalize(&self, raw: RawCheckpoint, path: impl AsRef<Path>) -> StateDict {
        if self.is_wrapped(path) {
            self.apply_rules(raw.section(&self.state_dict_key))
        } else {
            self.apply_rules(raw)
        }
    }

    /// Rewrite parameter names using the key rules.
    ///
    /// Parameters are processed in iteration order. When two parameters
    /// are rewritten to the same name, the later one wins.
    pub fn apply_rules(&self, tensors: impl IntoIterator<Item = (String, Tensor)>) -> StateDict {
        let mut state_dict = StateDict::new();
        for (name, tensor) in tensors {
            let Some(normalized) = self.rules.apply(&name) else {
                continue;
            };
            if state_dict.contains_key(&normalized) {
                tracing::warn!(
                    name = %name,
                    normalized = %normalized,
                    "Normalized parameter name collides, replacing earlier parameter"
                );
            }
            state_dict.insert(normalized, tensor);
        }
        state_dict
    }
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new("state_dict", "arcface", KeyRules::talking_head())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use candle_core::{Device, Tensor};
    use rstest::rstest;

    use super::KeyNormalizer;
    use crate::checkpoint::raw::{RawCheckpoint, StateDict};

    fn tensor(v: f32) -> Tensor {
        Tensor::new(&[v], &Device::Cpu).unwrap()
    }

    fn values(state_dict: &StateDict) -> HashMap<String, Vec<f32>> {
        state_dict
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.to_vec1::<f32>().unwrap()))
            .collect()
    }

    #[test]
    fn wrapped_checkpoint_is_unwrapped_and_normalized() {
        let raw = RawCheckpoint::from_tensors([
            ("state_dict.module.low_res.weight".to_string(), tensor(1.)),
            ("state_dict.module.core.weight".to_string(), tensor(2.)),
        ]);
        let normalized = KeyNormalizer::default().normalize(raw, "foo/LNet.pth");
        assert_eq!(
            values(&normalized),
            HashMap::from([("core.weight".to_string(), vec![2.])])
        );
    }

    #[test]
    fn marked_checkpoint_is_not_unwrapped() {
        let raw = RawCheckpoint::from_tensors([("w".to_string(), tensor(3.))]);
        let normalizer = KeyNormalizer::default();
        assert!(!normalizer.is_wrapped("foo/arcface_model.pth"));
        let normalized = normalizer.normalize(raw, "foo/arcface_model.pth");
        assert_eq!(
            values(&normalized),
            HashMap::from([("w".to_string(), vec![3.])])
        );
    }

    #[test]
    fn missing_state_dict_gives_empty_mapping() {
        let raw = RawCheckpoint::from_tensors([("w".to_string(), tensor(3.))]);
        assert!(KeyNormalizer::default()
            .normalize(raw, "foo/ENet.pth")
            .is_empty());
    }

    #[test]
    fn low_res_parameters_are_always_dropped() {
        let raw = RawCheckpoint::from_tensors([
            ("low_res.a".to_string(), tensor(1.)),
            ("module.low_res.b".to_string(), tensor(2.)),
            ("x.y.low_res".to_string(), tensor(3.)),
            ("module.module.low_res_head.c".to_string(), tensor(4.)),
            ("enhancer.d".to_string(), tensor(5.)),
        ]);
        let normalized = KeyNormalizer::default().normalize(raw, "arcface.pth");
        assert_eq!(
            normalized.keys().cloned().collect::<HashSet<_>>(),
            HashSet::from(["enhancer.d".to_string()])
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let normalizer = KeyNormalizer::default();
        let state_dict: StateDict = HashMap::from([
            ("module.core.weight".to_string(), tensor(1.)),
            ("module.enhancer.module.bias".to_string(), tensor(2.)),
            ("module.low_res.weight".to_string(), tensor(3.)),
            ("head.weight".to_string(), tensor(4.)),
        ]);

        let once = normalizer.apply_rules(state_dict);
        let twice = normalizer.apply_rules(once.clone());
        assert_eq!(values(&once), values(&twice));

        let raw = RawCheckpoint::from_tensors(once.clone());
        let again = normalizer.normalize(raw, "checkpoints/arcface.pth");
        assert_eq!(values(&once), values(&again));
    }

    #[rstest]
    #[case::prefixed_first(["module.core.weight", "core.weight"], 2.)]
    #[case::prefixed_last(["core.weight", "module.core.weight"], 1.)]
    fn colliding_names_keep_last_parameter(#[case] names: [&str; 2], #[case] expected: f32) {
        let raw = RawCheckpoint::from_tensors([
            (format!("state_dict.{}", names[0]), tensor(1.)),
            (format!("state_dict.{}", names[1]), tensor(2.)),
        ]);
        for _ in 0..8 {
            let normalized = KeyNormalizer::default().normalize(raw.clone(), "LNet.pth");
            assert_eq!(
                values(&normalized),
                HashMap::from([("core.weight".to_string(), vec![expected])])
            );
        }
    }
}
