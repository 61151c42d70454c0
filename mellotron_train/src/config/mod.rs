//! Configuration types for mellotron_train.
//!
//! Burn-style configuration structs for the trainer and its loss scaler.
//! Both serialize to JSON through [`burn::config::Config`].

mod training;

pub use training::{LossScaleConfig, TrainingConfig};
