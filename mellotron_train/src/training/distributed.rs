//! Collective operations for data-parallel training.
//!
//! Workers synchronize only through [`Collective::all_reduce_mean`]: once per
//! step for gradients, and once per step for the logged loss components.
//! Every worker must issue the same sequence of calls with equal-length
//! buffers.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::{Result, TrainError};

/// A process group reachable from one worker.
pub trait Collective: Send + Sync {
    /// This worker's rank.
    fn rank(&self) -> usize;

    /// Number of workers.
    fn world_size(&self) -> usize;

    /// Replace `values` with their element-wise mean across workers. Blocks
    /// until every worker has contributed.
    fn all_reduce_mean(&self, values: &mut [f32]) -> Result<()>;

    /// Whether this worker writes checkpoints and logs.
    fn is_primary(&self) -> bool {
        self.rank() == 0
    }

    /// Leave the group after a local failure. Workers waiting in, or later
    /// entering, a reduction fail instead of waiting for this one.
    fn abort(&self, _reason: &str) {}
}

#[derive(Debug, Default)]
struct ReduceState {
    generation: u64,
    arrived: usize,
    sum: Vec<f32>,
    result: Vec<f32>,
    failure: Option<String>,
}

#[derive(Debug)]
struct Shared {
    world_size: usize,
    state: Mutex<ReduceState>,
    done: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, ReduceState>> {
        self.state.lock().map_err(|_| collective_error("reduce state poisoned"))
    }
}

/// In-process collective for workers running on threads.
///
/// Each reduction is one generation of a barrier: contributions are summed
/// as workers arrive, and the last arrival publishes the mean and wakes the
/// rest. A length mismatch fails the current and every later reduction on
/// all workers, so no worker is left waiting.
#[derive(Debug, Clone)]
pub struct LocalCollective {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalCollective {
    /// Create a group of `world_size` connected workers, indexed by rank.
    pub fn group(world_size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            world_size: world_size.max(1),
            state: Mutex::new(ReduceState::default()),
            done: Condvar::new(),
        });
        (0..world_size.max(1))
            .map(|rank| Self {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn fail(&self, mut state: MutexGuard<'_, ReduceState>, message: String) -> TrainError {
        if state.failure.is_none() {
            state.failure = Some(message.clone());
        }
        state.arrived = 0;
        state.generation += 1;
        self.shared.done.notify_all();
        collective_error(message)
    }
}

impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn all_reduce_mean(&self, values: &mut [f32]) -> Result<()> {
        let world_size = self.shared.world_size;
        if world_size == 1 {
            return Ok(());
        }

        let mut state = self.shared.lock()?;
        if let Some(failure) = &state.failure {
            return Err(collective_error(failure.clone()));
        }

        let generation = state.generation;
        if state.arrived == 0 {
            state.sum.clear();
            state.sum.extend_from_slice(values);
        } else if state.sum.len() != values.len() {
            let message = format!(
                "rank {} contributed {} values, group expects {}",
                self.rank,
                values.len(),
                state.sum.len()
            );
            return Err(self.fail(state, message));
        } else {
            for (acc, &v) in state.sum.iter_mut().zip(values.iter()) {
                *acc += v;
            }
        }
        state.arrived += 1;

        if state.arrived == world_size {
            let scale = 1.0 / world_size as f32;
            state.result = state.sum.iter().map(|v| v * scale).collect();
            state.arrived = 0;
            state.generation += 1;
            self.shared.done.notify_all();
        } else {
            state = self
                .shared
                .done
                .wait_while(state, |s| s.generation == generation)
                .map_err(|_| collective_error("reduce state poisoned"))?;
            if let Some(failure) = &state.failure {
                return Err(collective_error(failure.clone()));
            }
        }

        values.copy_from_slice(&state.result);
        Ok(())
    }

    fn abort(&self, reason: &str) {
        let Ok(state) = self.shared.lock() else {
            return;
        };
        if state.failure.is_some() {
            return;
        }
        self.fail(state, format!("rank {} left the group: {reason}", self.rank));
    }
}

fn collective_error(message: impl Into<String>) -> TrainError {
    TrainError::Collective {
        message: message.into(),
    }
}
