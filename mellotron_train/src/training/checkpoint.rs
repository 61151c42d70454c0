//! Checkpoint save/load functionality for training state.
//!
//! A checkpoint is one bincode file holding a versioned map from string
//! keys to values:
//!
//! - `model`: named model weights (written as `state_dict` by format 1)
//! - `optimizer`: the Burn optimizer record
//! - `iteration`: epoch the checkpoint was taken at
//! - `learning_rate`
//! - `global_step`
//!
//! Only the model weights are required on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Record, Recorder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::model::StateDict;

/// Format version written by this crate.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 2;

/// Checkpoint file extension.
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// Leading bytes of every checkpoint file.
const CHECKPOINT_MAGIC: &[u8; 8] = b"MELLOCKP";

/// Canonical key of the model weights.
pub const MODEL_KEY: &str = "model";
/// Canonical key of the optimizer record.
pub const OPTIMIZER_KEY: &str = "optimizer";
/// Canonical key of the epoch counter.
pub const ITERATION_KEY: &str = "iteration";
/// Canonical key of the learning rate.
pub const LEARNING_RATE_KEY: &str = "learning_rate";
/// Canonical key of the global step.
pub const GLOBAL_STEP_KEY: &str = "global_step";

/// Accepted spellings of each canonical key, in preference order.
const KEY_MIGRATIONS: &[(&str, &[&str])] = &[
    (MODEL_KEY, &["model", "state_dict"]),
    (OPTIMIZER_KEY, &["optimizer"]),
    (ITERATION_KEY, &["iteration"]),
    (LEARNING_RATE_KEY, &["learning_rate"]),
    (GLOBAL_STEP_KEY, &["global_step"]),
];

/// A stored checkpoint value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CheckpointValue {
    /// Named model weights.
    Weights(StateDict),
    /// Serialized Burn record.
    Record(Vec<u8>),
    /// Integer metadata.
    Int(i64),
    /// Float metadata.
    Float(f64),
    /// Text metadata.
    Text(String),
}

impl CheckpointValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Weights(_) => "weights",
            Self::Record(_) => "record",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

/// On-disk checkpoint representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Schema version.
    pub format_version: u32,
    /// Stored values by key.
    pub entries: BTreeMap<String, CheckpointValue>,
}

impl CheckpointFile {
    /// Create an empty file of `format_version`.
    pub fn new(format_version: u32) -> Self {
        Self {
            format_version,
            entries: BTreeMap::new(),
        }
    }

    /// Add an entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: CheckpointValue) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Look up a canonical key through the migration table.
    pub fn resolve(&self, canonical: &str) -> Option<(&str, &CheckpointValue)> {
        let aliases = KEY_MIGRATIONS
            .iter()
            .find(|(key, _)| *key == canonical)
            .map_or(&[][..], |(_, aliases)| *aliases);
        aliases
            .iter()
            .find_map(|alias| self.entries.get_key_value(*alias))
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Decode the typed checkpoint.
    pub fn into_checkpoint(self) -> Result<Checkpoint> {
        if self.format_version == 0 {
            return Err(TrainError::checkpoint_format("format version 0 is not a checkpoint"));
        }
        if self.format_version > CHECKPOINT_FORMAT_VERSION {
            return Err(TrainError::checkpoint_format(format!(
                "format version {} is newer than supported version {}",
                self.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }

        let model = match self.resolve(MODEL_KEY) {
            Some((_, CheckpointValue::Weights(state))) => state.clone(),
            Some((key, other)) => return Err(wrong_kind(key, "weights", other)),
            None => {
                return Err(TrainError::checkpoint_format(
                    "no model weights under `model` or `state_dict`",
                ))
            }
        };

        let optimizer = match self.resolve(OPTIMIZER_KEY) {
            Some((_, CheckpointValue::Record(bytes))) => Some(bytes.clone()),
            Some((key, other)) => return Err(wrong_kind(key, "record", other)),
            None => None,
        };

        Ok(Checkpoint {
            model,
            optimizer,
            iteration: self.resolve_count(ITERATION_KEY)?,
            learning_rate: self.resolve_float(LEARNING_RATE_KEY)?,
            global_step: self.resolve_count(GLOBAL_STEP_KEY)?,
        })
    }

    fn resolve_count(&self, canonical: &str) -> Result<Option<usize>> {
        match self.resolve(canonical) {
            Some((key, CheckpointValue::Int(v))) => usize::try_from(*v).map(Some).map_err(|_| {
                TrainError::checkpoint_format(format!("`{key}` holds negative value {v}"))
            }),
            Some((key, other)) => Err(wrong_kind(key, "int", other)),
            None => Ok(None),
        }
    }

    fn resolve_float(&self, canonical: &str) -> Result<Option<f64>> {
        match self.resolve(canonical) {
            Some((_, CheckpointValue::Float(v))) => Ok(Some(*v)),
            Some((_, CheckpointValue::Int(v))) => Ok(Some(*v as f64)),
            Some((key, other)) => Err(wrong_kind(key, "float", other)),
            None => Ok(None),
        }
    }
}

fn wrong_kind(key: &str, expected: &str, got: &CheckpointValue) -> TrainError {
    TrainError::checkpoint_format(format!("`{key}` holds {}, expected {expected}", got.kind()))
}

/// Training state captured in a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Model weights.
    pub model: StateDict,
    /// Optimizer record bytes.
    pub optimizer: Option<Vec<u8>>,
    /// Epoch the checkpoint was taken at.
    pub iteration: Option<usize>,
    /// Learning rate at save time.
    pub learning_rate: Option<f64>,
    /// Global step at save time.
    pub global_step: Option<usize>,
}

impl Checkpoint {
    /// A checkpoint holding only model weights.
    pub fn new(model: StateDict) -> Self {
        Self {
            model,
            optimizer: None,
            iteration: None,
            learning_rate: None,
            global_step: None,
        }
    }

    /// Attach an optimizer record.
    pub fn with_optimizer(mut self, record: Vec<u8>) -> Self {
        self.optimizer = Some(record);
        self
    }

    /// Attach the epoch counter.
    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Attach the learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }

    /// Attach the global step.
    pub fn with_global_step(mut self, global_step: usize) -> Self {
        self.global_step = Some(global_step);
        self
    }

    /// Convert to the current on-disk format.
    pub fn to_file(&self) -> CheckpointFile {
        let mut file = CheckpointFile::new(CHECKPOINT_FORMAT_VERSION)
            .with_entry(MODEL_KEY, CheckpointValue::Weights(self.model.clone()));
        if let Some(record) = &self.optimizer {
            file = file.with_entry(OPTIMIZER_KEY, CheckpointValue::Record(record.clone()));
        }
        if let Some(iteration) = self.iteration {
            file = file.with_entry(ITERATION_KEY, CheckpointValue::Int(iteration as i64));
        }
        if let Some(lr) = self.learning_rate {
            file = file.with_entry(LEARNING_RATE_KEY, CheckpointValue::Float(lr));
        }
        if let Some(step) = self.global_step {
            file = file.with_entry(GLOBAL_STEP_KEY, CheckpointValue::Int(step as i64));
        }
        file
    }
}

/// Path of checkpoint `name` in `dir`.
pub fn checkpoint_file_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{CHECKPOINT_EXTENSION}"))
}

/// Write a checkpoint file to `path`, creating parent directories.
///
/// The file is written next to its destination and renamed over it, so a
/// crash mid-write never leaves a truncated checkpoint behind.
pub fn write_checkpoint_file(path: &Path, file: &CheckpointFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = CHECKPOINT_MAGIC.to_vec();
    bytes.extend(bincode::serialize(file)?);

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a checkpoint file without interpreting it.
///
/// A file that is not a checkpoint, or whose body does not decode, is a
/// [`TrainError::CheckpointFormat`].
pub fn read_checkpoint_file(path: &Path) -> Result<CheckpointFile> {
    let bytes = fs::read(path)?;
    let body = bytes.strip_prefix(CHECKPOINT_MAGIC.as_slice()).ok_or_else(|| {
        TrainError::checkpoint_format(format!("{path:?} is not a checkpoint file"))
    })?;
    bincode::deserialize(body).map_err(|e| {
        TrainError::checkpoint_format(format!("unrecognized checkpoint {path:?}: {e}"))
    })
}

/// Save checkpoint `name` to `dir`. Returns the written path.
pub fn save_checkpoint(dir: &Path, name: &str, checkpoint: &Checkpoint) -> Result<PathBuf> {
    let path = checkpoint_file_path(dir, name);
    write_checkpoint_file(&path, &checkpoint.to_file())?;

    log::info!(
        "Saved checkpoint to {:?} (iteration {:?}, global step {:?})",
        path,
        checkpoint.iteration,
        checkpoint.global_step
    );
    Ok(path)
}

/// Load the checkpoint at `path`.
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let file = read_checkpoint_file(path)?;
    let version = file.format_version;
    let checkpoint = file.into_checkpoint()?;

    log::info!(
        "Loaded checkpoint from {:?} (format {}, {} parameters)",
        path,
        version,
        checkpoint.model.len()
    );
    Ok(checkpoint)
}

/// Check if a checkpoint file exists at the given path.
pub fn checkpoint_exists(path: &Path) -> bool {
    path.is_file()
}

/// Get the latest checkpoint from a series of numbered checkpoints.
///
/// Looks for files named `{prefix}_N.ckpt` where N is an epoch number.
pub fn find_latest_checkpoint(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let mut latest: Option<(usize, PathBuf)> = None;

    for entry in fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if !checkpoint_exists(&path) {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
            continue;
        }
        let epoch = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(prefix))
            .and_then(|s| s.strip_prefix('_'))
            .and_then(|s| s.parse::<usize>().ok());
        if let Some(epoch) = epoch {
            if latest.as_ref().map_or(true, |(best, _)| epoch > *best) {
                latest = Some((epoch, path));
            }
        }
    }

    latest.map(|(_, path)| path)
}

/// Serialize a Burn record (optimizer state) to bytes.
pub fn record_to_bytes<B: Backend, R: Record<B>>(record: R) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Ok(Recorder::<B>::record(&recorder, record, ())?)
}

/// Deserialize a Burn record from bytes.
pub fn record_from_bytes<B: Backend, R: Record<B>>(bytes: Vec<u8>, device: &B::Device) -> Result<R> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Ok(Recorder::<B>::load(&recorder, bytes, device)?)
}
