//! Records phase transitions and intra-phase progress for one job.
//!
//! Store failures are logged and swallowed: losing a progress update must
//! never fail the job it describes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::job::{PhaseResult, PhaseStats};
use crate::job_store::JobStore;
use crate::pipeline::{Phase, phase_percent, step_percent};

pub struct ProgressTracker<J: JobStore> {
    store: J,
    job_id: Uuid,
    phase_started: Mutex<Option<(Phase, Instant)>>,
}

impl<J: JobStore> ProgressTracker<J> {
    pub fn new(store: J, job_id: Uuid) -> Self {
        Self {
            store,
            job_id,
            phase_started: Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    fn set_started(&self, phase: Phase) {
        let mut started = self
            .phase_started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *started = Some((phase, Instant::now()));
    }

    fn elapsed_for(&self, phase: Phase) -> Duration {
        let started = self
            .phase_started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *started {
            Some((p, at)) if p == phase => at.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Writes `"Phase n/8: name"` at the phase's base percentage.
    pub async fn start_phase(&self, phase: Phase) {
        self.set_started(phase);
        tracing::info!(job_id = %self.job_id, phase = phase.number(), "{}", phase);
        self.write(phase, phase_percent(phase), &phase.to_string())
            .await;
    }

    /// Writes `"{step}: {current}/{total} - {detail}"` with interpolated progress.
    pub async fn update_step(
        &self,
        phase: Phase,
        step: &str,
        current: usize,
        total: usize,
        detail: &str,
    ) {
        let message = if detail.is_empty() {
            format!("{step}: {current}/{total}")
        } else {
            format!("{step}: {current}/{total} - {detail}")
        };
        self.write(phase, step_percent(phase, current, total), &message)
            .await;
    }

    /// Appends the phase's result to the job's history.
    pub async fn complete_phase(&self, phase: Phase, summary: impl Into<String>, stats: PhaseStats) {
        let elapsed = self.elapsed_for(phase);
        let result = PhaseResult {
            phase: phase.number(),
            name: phase.name().to_string(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            duration: format_duration(elapsed),
            summary: summary.into(),
            stats,
        };
        tracing::info!(
            job_id = %self.job_id,
            phase = phase.number(),
            duration = %result.duration,
            summary = %result.summary,
            "Phase complete"
        );
        if let Err(e) = self.store.append_phase(self.job_id, result).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to record phase result");
        }
    }

    async fn write(&self, phase: Phase, percent: u8, message: &str) {
        if let Err(e) = self
            .store
            .update_progress(self.job_id, phase.number(), percent, message)
            .await
        {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to update progress");
        }
    }
}

/// `"850ms"`, `"12.3s"`, or `"2m 05s"`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1_000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
