use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use super::progress::next_estimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Analyzing,
    Completed,
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Error)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Error photos may only re-enter analysis through a manual retry.
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        matches!(
            (self, next),
            (Pending, Analyzing) | (Analyzing, Completed) | (Analyzing, Error) | (Error, Analyzing)
        )
    }
}

/// Analysis state of one photo as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoAnalysis {
    pub status: AnalysisStatus,
    /// Estimated progress in percent.
    pub progress: f32,
    pub equipment_count: Option<usize>,
    pub error: Option<String>,
}

impl PhotoAnalysis {
    pub fn pending() -> Self {
        Self {
            status: AnalysisStatus::Pending,
            progress: 0.0,
            equipment_count: None,
            error: None,
        }
    }

    pub fn analyzing() -> Self {
        Self {
            status: AnalysisStatus::Analyzing,
            ..Self::pending()
        }
    }

    pub fn completed(equipment_count: usize) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            progress: 100.0,
            equipment_count: Some(equipment_count),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Error,
            progress: 0.0,
            equipment_count: None,
            error: Some(message.into()),
        }
    }

    pub fn percent(&self) -> u8 {
        self.progress.clamp(0.0, 100.0).round() as u8
    }
}

pub type StatusMap = HashMap<Uuid, PhotoAnalysis>;

/// Shared per-photo status map.
///
/// Every write replaces the whole map inside the watch channel, so
/// subscribers always observe consistent snapshots.
#[derive(Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<Arc<StatusMap>>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(StatusMap::new()));
        Self { tx: Arc::new(tx) }
    }

    /// Start a new batch with every photo pending.
    pub fn reset(&self, photo_ids: impl IntoIterator<Item = Uuid>) {
        let map: StatusMap = photo_ids
            .into_iter()
            .map(|id| (id, PhotoAnalysis::pending()))
            .collect();
        self.tx.send_replace(Arc::new(map));
    }

    /// Apply a state change. Invalid transitions and unknown photos are
    /// rejected and logged.
    pub fn transition(&self, photo_id: Uuid, next: PhotoAnalysis) -> bool {
        self.tx.send_if_modified(|current| {
            let Some(existing) = current.get(&photo_id) else {
                tracing::warn!(%photo_id, "Status update for unknown photo");
                return false;
            };
            if !existing.status.can_transition_to(next.status) {
                tracing::warn!(
                    %photo_id,
                    from = ?existing.status,
                    to = ?next.status,
                    "Rejected analysis status transition"
                );
                return false;
            }

            let mut map = StatusMap::clone(current);
            map.insert(photo_id, next);
            *current = Arc::new(map);
            true
        })
    }

    /// Advance every analyzing photo's estimate by one tick.
    ///
    /// Returns whether any photo is still pending or analyzing.
    pub fn advance_estimates(&self) -> bool {
        let mut active = false;
        self.tx.send_if_modified(|current| {
            active = current.values().any(|a| a.status.is_active());

            let mut changed = false;
            let mut map = StatusMap::clone(current);
            for analysis in map.values_mut() {
                let next = next_estimate(analysis.progress, analysis.status);
                if next != analysis.progress {
                    analysis.progress = next;
                    changed = true;
                }
            }
            if changed {
                *current = Arc::new(map);
            }
            changed
        });
        active
    }

    pub fn snapshot(&self) -> Arc<StatusMap> {
        self.tx.borrow().clone()
    }

    pub fn get(&self, photo_id: Uuid) -> Option<PhotoAnalysis> {
        self.tx.borrow().get(&photo_id).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusMap>> {
        self.tx.subscribe()
    }

    /// True once every photo is completed or in error; vacuously true when empty.
    pub fn all_complete(&self) -> bool {
        self.tx.borrow().values().all(|a| a.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use AnalysisStatus::*;
        assert!(Pending.can_transition_to(Analyzing));
        assert!(Analyzing.can_transition_to(Completed));
        assert!(Analyzing.can_transition_to(Error));
        assert!(Error.can_transition_to(Analyzing));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Analyzing));
        assert!(!Error.can_transition_to(Completed));
    }

    #[test]
    fn test_board_rejects_invalid_updates() {
        let board = StatusBoard::new();
        let id = Uuid::new_v4();
        board.reset([id]);

        assert!(!board.transition(id, PhotoAnalysis::completed(3)));
        assert!(!board.transition(Uuid::new_v4(), PhotoAnalysis::analyzing()));
        assert_eq!(board.get(id), Some(PhotoAnalysis::pending()));

        assert!(board.transition(id, PhotoAnalysis::analyzing()));
        assert!(board.transition(id, PhotoAnalysis::completed(3)));
        assert_eq!(board.get(id).unwrap().percent(), 100);
    }

    #[test]
    fn test_completion_predicate() {
        let board = StatusBoard::new();
        assert!(board.all_complete());

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        board.reset([a, b]);
        assert!(!board.all_complete());

        board.transition(a, PhotoAnalysis::analyzing());
        board.transition(a, PhotoAnalysis::failed("boom"));
        assert!(!board.all_complete());

        board.transition(b, PhotoAnalysis::analyzing());
        board.transition(b, PhotoAnalysis::completed(0));
        assert!(board.all_complete());
    }

    #[test]
    fn test_subscribers_see_whole_snapshots() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        let id = Uuid::new_v4();

        board.reset([id]);
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.len(), 1);

        board.transition(id, PhotoAnalysis::analyzing());
        assert!(board.advance_estimates());
        let after = rx.borrow_and_update().clone();
        assert_eq!(after[&id].progress, 2.0);
        // Earlier snapshot is untouched
        assert_eq!(seen[&id].status, AnalysisStatus::Pending);
    }
}
