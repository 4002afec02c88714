//! Loading of talking-head network checkpoints.

mod assign;
pub use assign::{assign, AssignError, AssignReport, AssignmentMode};

mod config;
pub use config::{LoaderConfig, LoaderConfigError};

mod device;
pub use device::{resolve_device_target, DeviceTarget, Hardware, StaticHardware, SystemHardware};

mod format;
pub use format::CheckpointFormat;

mod loader;
pub use loader::{CheckpointError, CheckpointLoader, LoadCheckpointError};

mod normalize;
pub use normalize::KeyNormalizer;

mod raw;
pub use raw::{RawCheckpoint, StateDict};

mod rules;
pub use rules::{KeyRule, KeyRuleConfig, KeyRuleError, KeyRules};
