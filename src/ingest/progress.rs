use serde::Serialize;
use tokio::sync::mpsc;

/// Stage of a single photo upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStage {
    Validating,
    Compressing,
    Uploading,
    Saving,
    Completed,
    Error,
}

impl UploadStage {
    pub fn percent(&self) -> u8 {
        match self {
            UploadStage::Validating => 10,
            UploadStage::Compressing => 30,
            UploadStage::Uploading => 50,
            UploadStage::Saving => 80,
            UploadStage::Completed => 100,
            UploadStage::Error => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    /// Position of the photo in its batch.
    pub photo_index: usize,
    pub stage: UploadStage,
    pub progress: u8,
    pub error: Option<String>,
}

/// Optional receiver of upload progress. Reporting never fails.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink(Option<mpsc::UnboundedSender<UploadProgress>>);

impl ProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<UploadProgress>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UploadProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn stage(&self, photo_index: usize, stage: UploadStage) {
        self.send(UploadProgress {
            photo_index,
            stage,
            progress: stage.percent(),
            error: None,
        });
    }

    pub fn failed(&self, photo_index: usize, error: impl Into<String>) {
        self.send(UploadProgress {
            photo_index,
            stage: UploadStage::Error,
            progress: 0,
            error: Some(error.into()),
        });
    }

    fn send(&self, update: UploadProgress) {
        if let Some(tx) = &self.0 {
            // Receiver gone just means nobody is watching
            let _ = tx.send(update);
        }
    }
}
