use std::collections::HashMap;

use candle_core::Tensor;

/// Flat mapping from parameter names to tensors.
pub type StateDict = HashMap<String, Tensor>;

/// Deserialized checkpoint.
///
/// Nested mappings are flattened into dotted names. For instance, a
/// checkpoint `{"state_dict": {"module.core.weight": t}}` is stored as
/// `{"state_dict.module.core.weight": t}`. Training metadata that is not
/// a tensor is not retained.
///
/// Tensors are kept in checkpoint order, so that name collisions after
/// key normalization are resolved the same way on every load.
#[derive(Clone, Debug, Default)]
pub struct RawCheckpoint {
    tensors: Vec<(String, Tensor)>,
}

impl RawCheckpoint {
    /// Create a raw checkpoint from flattened tensors.
    pub fn from_tensors(tensors: impl IntoIterator<Item = (String, Tensor)>) -> Self {
        Self {
            tensors: tensors.into_iter().collect(),
        }
    }

    /// Add the tensors of a nested mapping.
    ///
    /// * `key` - Key of the nested mapping in the top-level mapping.
    /// * `tensors` - Tensors of the nested mapping.
    pub(crate) fn insert_section(
        &mut self,
        key: &str,
        tensors: impl IntoIterator<Item = (String, Tensor)>,
    ) {
        self.tensors.extend(
            tensors
                .into_iter()
                .map(|(name, tensor)| (format!("{key}.{name}"), tensor)),
        );
    }

    /// Check if the checkpoint has no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Number of tensors in the checkpoint.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Iterate over the tensors and their flattened names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.tensors
            .iter()
            .map(|(name, tensor)| (name.as_str(), tensor))
    }

    /// Get the tensors of a nested mapping.
    ///
    /// The key prefix is removed from the returned names. If the
    /// checkpoint has no mapping under `key`, the result is empty.
    pub fn section(&self, key: &str) -> RawCheckpoint {
        let prefix = format!("{key}.");
        self.tensors
            .iter()
            .filter_map(|(name, tensor)| {
                name.strip_prefix(&prefix)
                    .map(|name| (name.to_string(), tensor.clone()))
            })
            .collect()
    }

    /// Use the whole checkpoint as a state dict.
    ///
    /// When a name occurs more than once, the last tensor wins.
    pub fn into_state_dict(self) -> StateDict {
        self.tensors.into_iter().collect()
    }
}

impl FromIterator<(String, Tensor)> for RawCheckpoint {
    fn from_iter<T: IntoIterator<Item = (String, Tensor)>>(iter: T) -> Self {
        Self::from_tensors(iter)
    }
}

impl IntoIterator for RawCheckpoint {
    type Item = (String, Tensor);
    type IntoIter = std::vec::IntoIter<(String, Tensor)>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}
