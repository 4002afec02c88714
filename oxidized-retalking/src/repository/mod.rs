//! Repositories that checkpoints can be fetched from.

pub mod hf_hub;

pub mod local;

pub mod repo;
