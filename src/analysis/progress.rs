use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::status::{AnalysisStatus, StatusBoard};

/// Estimates never pass this value until the detector answers.
pub const ESTIMATE_CAP: f32 = 92.0;

/// Per-tick increment: fast at first, slowing as the estimate nears the cap.
pub fn estimate_increment(current: f32) -> f32 {
    if current < 30.0 {
        2.0
    } else if current < 60.0 {
        1.0
    } else if current < 85.0 {
        0.5
    } else if current < ESTIMATE_CAP {
        0.25
    } else {
        0.0
    }
}

pub fn next_estimate(current: f32, status: AnalysisStatus) -> f32 {
    match status {
        AnalysisStatus::Analyzing => (current + estimate_increment(current)).min(ESTIMATE_CAP),
        AnalysisStatus::Completed => 100.0,
        AnalysisStatus::Error => 0.0,
        AnalysisStatus::Pending => current,
    }
}

/// Batch-level progress: time-based until everything is done.
pub fn header_progress(elapsed: Duration, budget: Duration, all_complete: bool) -> f32 {
    if all_complete {
        return 100.0;
    }
    if budget.is_zero() {
        return ESTIMATE_CAP;
    }
    (elapsed.as_secs_f32() / budget.as_secs_f32() * 100.0).min(ESTIMATE_CAP)
}

/// Advance estimates every `period` until nothing is pending or analyzing.
pub fn spawn_ticker(board: StatusBoard, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            if !board.advance_estimates() {
                tracing::debug!("Progress ticker stopped");
                break;
            }
        }
    })
}
