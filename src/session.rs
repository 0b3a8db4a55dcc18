//! Caller-side state for one "pick, detect, redact, save" cycle.
//!
//! Results are tagged with the job that produced them. Picking a new image
//! starts a new job. A result from any older job is dropped instead of being
//! shown against the current image.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::Result;
use crate::pipeline::JobResult;
use crate::worker::JobId;

#[derive(Default)]
pub struct Selection {
    pending: Option<JobId>,
    result: Option<JobResult>,
    redact: BTreeSet<usize>,
}

impl Selection {
    /// Forgets the previous image and waits for `job`.
    pub fn begin(&mut self, job: JobId) {
        self.pending = Some(job);
        self.result = None;
        self.redact.clear();
    }

    /// Applies the outcome of `job`. Returns `Ok(false)` for stale results.
    /// On failure the selection is cleared and the error handed back.
    pub fn apply(&mut self, job: JobId, outcome: Result<JobResult>) -> Result<bool> {
        if self.pending != Some(job) {
            debug!("Dropping stale result of job {job}");
            return Ok(false);
        }
        self.pending = None;

        match outcome {
            Ok(result) => {
                self.result = Some(result);
                Ok(true)
            }
            Err(e) => {
                warn!("Job {job} failed: {e}");
                self.clear();
                Err(e)
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.result = None;
        self.redact.clear();
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub fn selected(&self) -> &BTreeSet<usize> {
        &self.redact
    }

    /// Flips whether face `idx` will be blurred. Returns the new state.
    pub fn toggle(&mut self, idx: usize) -> bool {
        let in_range = self.result.as_ref().is_some_and(|r| idx < r.faces.len());
        if !in_range {
            return false;
        }

        if !self.redact.remove(&idx) {
            self.redact.insert(idx);
            true
        } else {
            false
        }
    }

    /// Marks every face classified as a child for redaction.
    pub fn select_children(&mut self) {
        if let Some(result) = &self.result {
            self.redact.extend(
                result
                    .faces
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.age.is_child())
                    .map(|(idx, _)| idx),
            );
        }
    }

    pub fn select_all(&mut self) {
        if let Some(result) = &self.result {
            self.redact.extend(0..result.faces.len());
        }
    }
}
