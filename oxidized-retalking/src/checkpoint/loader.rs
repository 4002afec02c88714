use std::path::{Path, PathBuf};

use snafu::{ensure, ResultExt, Snafu};

use crate::checkpoint::assign::{assign, AssignError, AssignReport};
use crate::checkpoint::config::LoaderConfig;
use crate::checkpoint::device::{resolve_device_target, DeviceTarget, Hardware, SystemHardware};
use crate::checkpoint::format::{
    read_pytorch, read_pytorch_layout, read_safetensors, CheckpointFormat,
};
use crate::checkpoint::normalize::KeyNormalizer;
use crate::checkpoint::raw::{RawCheckpoint, StateDict};
use crate::checkpoint::rules::{KeyRuleError, KeyRules};
use crate::model::StateDictModel;

/// Checkpoint deserialization errors.
#[derive(Debug, Snafu)]
pub enum CheckpointError {
    #[snafu(display("Cannot deserialize checkpoint: {}", path.to_string_lossy()))]
    Deserialize {
        source: candle_core::Error,
        path: PathBuf,
    },

    #[snafu(display("Cannot create device for target: {target:?}"))]
    Device {
        source: candle_core::Error,
        target: DeviceTarget,
    },

    #[snafu(display("Checkpoint does not exist: {}", path.to_string_lossy()))]
    NonExistentCheckpoint { path: PathBuf },
}

/// Errors while loading a checkpoint into a model.
#[derive(Debug, Snafu)]
pub enum LoadCheckpointError {
    #[snafu(display("Cannot assign checkpoint parameters: {}", path.to_string_lossy()))]
    AssignParameters { source: AssignError, path: PathBuf },

    #[snafu(display("Cannot load checkpoint"))]
    LoadRaw { source: CheckpointError },
}

/// Loads checkpoints into models.
///
/// Loading a checkpoint has three steps:
///
/// 1. The checkpoint is deserialized to the device target that fits the
///    available hardware ([`CheckpointLoader::load_raw`]).
/// 2. Parameter names are normalized to model parameter names
///    ([`CheckpointLoader::normalize_keys`]).
/// 3. Parameters are assigned to the model ([`CheckpointLoader::assign`]).
pub struct CheckpointLoader<P = SystemHardware> {
    config: LoaderConfig,
    normalizer: KeyNormalizer,
    hardware: P,
}

impl CheckpointLoader<SystemHardware> {
    /// Create a loader for the system hardware.
    pub fn new(config: LoaderConfig) -> Result<Self, KeyRuleError> {
        Self::with_hardware(config, SystemHardware)
    }
}

impl Default for CheckpointLoader<SystemHardware> {
    fn default() -> Self {
        Self {
            config: LoaderConfig::default(),
            normalizer: KeyNormalizer::default(),
            hardware: SystemHardware,
        }
    }
}

impl<P> CheckpointLoader<P>
where
    P: Hardware,
{
    /// Create a loader for the given hardware.
    pub fn with_hardware(config: LoaderConfig, hardware: P) -> Result<Self, KeyRuleError> {
        let rules = KeyRules::try_from(config.get_key_rules().to_vec())?;
        let normalizer = KeyNormalizer::new(
            config.get_state_dict_key(),
            config.get_unwrapped_marker(),
            rules,
        );
        Ok(Self {
            config,
            normalizer,
            hardware,
        })
    }

    /// Get the loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Get the device target for deserializing checkpoints.
    pub fn resolve_device_target(&self) -> DeviceTarget {
        resolve_device_target(&self.hardware)
    }

    /// Deserialize a checkpoint.
    ///
    /// Besides the top-level tensors of a PyTorch checkpoint, all
    /// configured nested state dicts are read. See
    /// [`CheckpointLoader::load_raw_sections`].
    pub fn load_raw(&self, path: impl AsRef<Path>) -> Result<RawCheckpoint, CheckpointError> {
        self.load_raw_sections(path, &self.config.sections())
    }

    /// Deserialize a checkpoint, reading the given nested state dicts.
    ///
    /// Nested state dicts that are absent from a PyTorch checkpoint are
    /// skipped. A nested state dict that is present but cannot be read
    /// is an error. Safetensors checkpoints store nested state dicts
    /// with flattened names, so they are always read completely.
    ///
    /// * `path` - Path of the checkpoint.
    /// * `sections` - Keys of the nested state dicts to read.
    pub fn load_raw_sections(
        &self,
        path: impl AsRef<Path>,
        sections: &[&str],
    ) -> Result<RawCheckpoint, CheckpointError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Load checkpoint");

        ensure!(path.is_file(), NonExistentCheckpointSnafu { path });

        let target = self.resolve_device_target();
        tracing::debug!(?target, "Resolved checkpoint device target");
        let device = target.device().context(DeviceSnafu { target })?;

        match CheckpointFormat::from_path(path) {
            CheckpointFormat::SafeTensors => Ok(RawCheckpoint::from_tensors(
                read_safetensors(path, &device).context(DeserializeSnafu { path })?,
            )),
            CheckpointFormat::PyTorch => {
                let layout = read_pytorch_layout(path).context(DeserializeSnafu { path })?;

                let mut raw = if layout.has_tensors {
                    RawCheckpoint::from_tensors(
                        read_pytorch(path, None, &device).context(DeserializeSnafu { path })?,
                    )
                } else {
                    RawCheckpoint::default()
                };

                for &key in sections {
                    if !layout.has_section(key) {
                        tracing::debug!(key, "Checkpoint has no nested state dict");
                        continue;
                    }
                    raw.insert_section(
                        key,
                        read_pytorch(path, Some(key), &device).context(DeserializeSnafu { path })?,
                    );
                }

                Ok(raw)
            }
        }
    }

    /// Get the state dict of a checkpoint with model parameter names.
    ///
    /// * `raw` - The deserialized checkpoint.
    /// * `path` - Path the checkpoint was loaded from.
    pub fn normalize_keys(&self, raw: RawCheckpoint, path: impl AsRef<Path>) -> StateDict {
        self.normalizer.normalize(raw, path)
    }

    /// Assign parameters to a model using the configured assignment mode.
    pub fn assign<M>(&self, model: &M, state_dict: &StateDict) -> Result<AssignReport, AssignError>
    where
        M: StateDictModel + ?Sized,
    {
        assign(model, state_dict, self.config.get_assignment_mode())
    }

    /// Load a checkpoint into a model.
    ///
    /// The model is modified in place and returned. Its mode is not
    /// changed.
    ///
    /// * `path` - Path of the checkpoint.
    /// * `model` - Model to load the checkpoint into.
    pub fn load_checkpoint<M>(&self, path: impl AsRef<Path>, model: M) -> Result<M, LoadCheckpointError>
    where
        M: StateDictModel,
    {
        let path = path.as_ref();
        let raw = if self.normalizer.is_wrapped(path) {
            self.load_raw_sections(path, &[self.config.get_state_dict_key()])
        } else {
            self.load_raw_sections(path, &[])
        }
        .context(LoadRawSnafu)?;
        let state_dict = self.normalize_keys(raw, path);
        let report = self
            .assign(&model, &state_dict)
            .context(AssignParametersSnafu { path })?;

        tracing::debug!(
            assigned = report.assigned().len(),
            missing = report.missing().len(),
            unexpected = report.unexpected().len(),
            "Assigned checkpoint parameters"
        );

        Ok(model)
    }
}
