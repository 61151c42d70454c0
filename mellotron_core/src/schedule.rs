//! Reduction-window ("gradual training") curriculum.
//!
//! Training starts with the decoder emitting several frames per step and a
//! large batch, then moves to finer settings as the global step passes each
//! window's `until_step`. The scheduler is consulted once per epoch.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One curriculum entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionWindow {
    /// Decoder frames emitted per step while this window is active.
    pub n_frames_per_step: usize,
    /// Batch size while this window is active.
    pub batch_size: usize,
    /// Global step at which this window ends; `None` for open-ended.
    pub until_step: Option<usize>,
}

impl ReductionWindow {
    /// Create a window ending at `until_step`.
    pub fn until(n_frames_per_step: usize, batch_size: usize, until_step: usize) -> Self {
        Self {
            n_frames_per_step,
            batch_size,
            until_step: Some(until_step),
        }
    }

    /// Create an open-ended window.
    pub fn open(n_frames_per_step: usize, batch_size: usize) -> Self {
        Self {
            n_frames_per_step,
            batch_size,
            until_step: None,
        }
    }

    /// Settings this window applies.
    pub fn settings(&self) -> WindowSettings {
        WindowSettings {
            frames_per_step: self.n_frames_per_step,
            batch_size: self.batch_size,
        }
    }

    /// Whether `global_step` has reached the end of this window.
    #[inline]
    pub fn is_exhausted(&self, global_step: usize) -> bool {
        matches!(self.until_step, Some(until) if global_step >= until)
    }
}

/// Effective loader settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    /// Frames per decoder step.
    pub frames_per_step: usize,
    /// Batch size.
    pub batch_size: usize,
}

/// Validated, ordered list of reduction windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReductionWindowSchedule {
    windows: Vec<ReductionWindow>,
}

impl ReductionWindowSchedule {
    /// Validate and wrap a list of windows.
    ///
    /// Every `until_step` must be strictly greater than the previous one, only
    /// the last window may be open-ended, and frame/batch counts must be
    /// positive. An empty list is a valid, inert schedule.
    pub fn new(windows: Vec<ReductionWindow>) -> Result<Self, CoreError> {
        let mut previous: Option<usize> = None;
        let last = windows.len().saturating_sub(1);

        for (index, window) in windows.iter().enumerate() {
            if window.n_frames_per_step == 0 {
                return Err(CoreError::InvalidSchedule {
                    index,
                    reason: "n_frames_per_step must be positive",
                });
            }
            if window.batch_size == 0 {
                return Err(CoreError::InvalidSchedule {
                    index,
                    reason: "batch_size must be positive",
                });
            }
            match window.until_step {
                None if index != last => {
                    return Err(CoreError::InvalidSchedule {
                        index,
                        reason: "only the final window may be open-ended",
                    });
                }
                Some(until) if previous.is_some_and(|p| until <= p) => {
                    return Err(CoreError::InvalidSchedule {
                        index,
                        reason: "until_step must increase strictly",
                    });
                }
                _ => {}
            }
            previous = window.until_step;
        }

        Ok(Self { windows })
    }

    /// An empty schedule.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the schedule has no windows.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Window at `index`.
    pub fn get(&self, index: usize) -> Option<&ReductionWindow> {
        self.windows.get(index)
    }

    /// All windows in order.
    pub fn windows(&self) -> &[ReductionWindow] {
        &self.windows
    }
}

/// Cursor over a [`ReductionWindowSchedule`].
///
/// Holds the active settings, which start at the caller-provided initial
/// values and change only when the global step passes a window boundary.
#[derive(Debug, Clone)]
pub struct ReductionWindowScheduler {
    schedule: ReductionWindowSchedule,
    cursor: usize,
    active: WindowSettings,
}

impl ReductionWindowScheduler {
    /// Create a scheduler positioned at the first window.
    pub fn new(schedule: ReductionWindowSchedule, initial: WindowSettings) -> Self {
        Self {
            schedule,
            cursor: 0,
            active: initial,
        }
    }

    /// Currently active settings.
    pub fn active(&self) -> WindowSettings {
        self.active
    }

    /// Index of the current window.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The schedule being followed.
    pub fn schedule(&self) -> &ReductionWindowSchedule {
        &self.schedule
    }

    /// Advance past every window `global_step` has exhausted.
    ///
    /// Returns the new settings when the cursor moved, meaning the caller must
    /// rebuild its loader, sampler and collator. Returns `None` when nothing
    /// changed: empty schedule, open-ended current window, or the step has not
    /// reached the boundary yet. Crossing several boundaries in one call
    /// reports one transition. An exhausted final window stays in effect.
    pub fn adjust(&mut self, global_step: usize) -> Option<WindowSettings> {
        let start = self.cursor;
        let last = self.schedule.len().checked_sub(1)?;

        while self.cursor < last && self.schedule.windows[self.cursor].is_exhausted(global_step) {
            self.cursor += 1;
        }

        if self.cursor == start {
            return None;
        }

        self.active = self.schedule.windows[self.cursor].settings();
        Some(self.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_window_scheduler() -> ReductionWindowScheduler {
        let schedule = ReductionWindowSchedule::new(vec![
            ReductionWindow::until(2, 64, 1000),
            ReductionWindow::open(1, 32),
        ])
        .unwrap();
        ReductionWindowScheduler::new(
            schedule,
            WindowSettings {
                frames_per_step: 2,
                batch_size: 64,
            },
        )
    }

    #[test]
    fn test_before_boundary() {
        let mut scheduler = two_window_scheduler();
        assert_eq!(scheduler.adjust(999), None);
        assert_eq!(scheduler.active().frames_per_step, 2);
        assert_eq!(scheduler.active().batch_size, 64);
    }

    #[test]
    fn test_transition_signaled_once() {
        let mut scheduler = two_window_scheduler();
        let next = scheduler.adjust(1000).unwrap();
        assert_eq!((next.frames_per_step, next.batch_size), (1, 32));
        assert_eq!(scheduler.adjust(1000), None);
        assert_eq!(scheduler.adjust(5000), None);
    }

    #[test]
    fn test_late_resume_skips_once() {
        let mut scheduler = two_window_scheduler();
        assert!(scheduler.adjust(1500).is_some());
        assert_eq!(scheduler.cursor(), 1);
        assert_eq!(scheduler.adjust(1500), None);
    }

    #[test]
    fn test_skips_multiple_windows() {
        let schedule = ReductionWindowSchedule::new(vec![
            ReductionWindow::until(4, 128, 100),
            ReductionWindow::until(3, 96, 200),
            ReductionWindow::until(2, 64, 300),
            ReductionWindow::open(1, 32),
        ])
        .unwrap();
        let initial = schedule.get(0).unwrap().settings();
        let mut scheduler = ReductionWindowScheduler::new(schedule, initial);

        let next = scheduler.adjust(250).unwrap();
        assert_eq!(next.frames_per_step, 2);
        assert_eq!(scheduler.cursor(), 2);
    }

    #[test]
    fn test_empty_schedule_is_inert() {
        let initial = WindowSettings {
            frames_per_step: 3,
            batch_size: 16,
        };
        let mut scheduler = ReductionWindowScheduler::new(ReductionWindowSchedule::empty(), initial);
        assert_eq!(scheduler.adjust(1_000_000), None);
        assert_eq!(scheduler.active(), initial);
    }

    #[test]
    fn test_exhausted_final_window_stays() {
        let schedule = ReductionWindowSchedule::new(vec![
            ReductionWindow::until(2, 8, 10),
            ReductionWindow::until(1, 4, 20),
        ])
        .unwrap();
        let initial = schedule.get(0).unwrap().settings();
        let mut scheduler = ReductionWindowScheduler::new(schedule, initial);

        assert!(scheduler.adjust(50).is_some());
        assert_eq!(scheduler.cursor(), 1);
        assert_eq!(scheduler.adjust(60), None);
    }

    #[test]
    fn test_validation_rejects_non_monotonic() {
        let err = ReductionWindowSchedule::new(vec![
            ReductionWindow::until(2, 8, 100),
            ReductionWindow::until(1, 8, 50),
        ])
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchedule { index: 1, .. }));
    }

    #[test]
    fn test_validation_rejects_inner_open_window() {
        let err = ReductionWindowSchedule::new(vec![
            ReductionWindow::open(2, 8),
            ReductionWindow::open(1, 8),
        ])
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchedule { index: 0, .. }));
    }

    #[test]
    fn test_validation_rejects_zero_batch() {
        assert!(ReductionWindowSchedule::new(vec![ReductionWindow::open(1, 0)]).is_err());
    }
}
