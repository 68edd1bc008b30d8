//! Thread-per-stage execution with explicit joins.

use std::any::Any;
use std::thread::{self, Scope, ScopedJoinHandle};

use crate::error::{FabryError, Result};

use super::types::PipelineStage;

/// Spawns independently runnable stages on named scoped threads.
pub struct StageScheduler<'scope, 'env> {
    scope: &'scope Scope<'scope, 'env>,
}

impl<'scope, 'env> StageScheduler<'scope, 'env> {
    pub fn new(scope: &'scope Scope<'scope, 'env>) -> Self {
        Self { scope }
    }

    /// Start `job` on its own thread; the result is collected with [`StageTask::join`].
    pub fn spawn<T, F>(&self, stage: PipelineStage, job: F) -> Result<StageTask<'scope, T>>
    where
        T: Send + 'scope,
        F: FnOnce() -> Result<T> + Send + 'scope,
    {
        let handle = thread::Builder::new()
            .name(format!("fabry-{}", stage.slug()))
            .spawn_scoped(self.scope, job)?;
        Ok(StageTask { handle, stage })
    }
}

/// A running stage.
pub struct StageTask<'scope, T> {
    handle: ScopedJoinHandle<'scope, Result<T>>,
    stage: PipelineStage,
}

impl<T> StageTask<'_, T> {
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Block until the stage finishes. A panic becomes `StageFailed`.
    pub fn join(self) -> Result<T> {
        let stage = self.stage;
        self.handle.join().map_err(|payload| FabryError::StageFailed {
            stage: stage.slug().to_string(),
            reason: panic_message(payload.as_ref()),
        })?
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_results_are_joined() {
        let values = [1, 2, 3];
        let sum = thread::scope(|scope| {
            let scheduler = StageScheduler::new(scope);
            let task = scheduler
                .spawn(PipelineStage::Rings, || Ok(values.iter().sum::<i32>()))
                .unwrap();
            task.join().unwrap()
        });
        assert_eq!(sum, 6);
    }

    #[test]
    fn test_panicking_stage_reports_failure() {
        let err = thread::scope(|scope| {
            let scheduler = StageScheduler::new(scope);
            let task = scheduler
                .spawn(PipelineStage::BorderMap, || -> Result<()> { panic!("boom") })
                .unwrap();
            task.join().unwrap_err()
        });
        assert!(matches!(err, FabryError::StageFailed { ref reason, .. } if reason == "boom"));
    }
}
