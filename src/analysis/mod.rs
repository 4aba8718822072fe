//! Concurrent equipment analysis of uploaded photos with live progress.

mod orchestrator;
mod progress;
mod status;

pub use orchestrator::{AnalysisSummary, DetectionOrchestrator};
pub use progress::{
    estimate_increment, header_progress, next_estimate, spawn_ticker, ESTIMATE_CAP,
};
pub use status::{AnalysisStatus, PhotoAnalysis, StatusBoard, StatusMap};
