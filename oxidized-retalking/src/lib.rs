//! Checkpoint loading for the talking-head face generation networks.
//!
//! The networks themselves are provided by the caller through
//! [`networks::RetalkingNetworks`]; this crate selects a device to
//! deserialize to, reads PyTorch or safetensors checkpoints, normalizes
//! parameter names and assigns the parameters to the networks.

pub mod checkpoint;
pub mod error;
pub mod model;
pub mod networks;
pub mod repository;

#[cfg(test)]
pub(crate) mod util;
