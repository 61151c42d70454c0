//! Loss functions for Tacotron2 training.
//!
//! - Mel loss: squared error against the target spectrogram, before and after
//!   the postnet
//! - Gate loss: weighted sigmoid cross-entropy on the stop token

mod tacotron;

pub use tacotron::{LossOutput, Tacotron2Loss};
