//! Photo ingestion: validate, compress, store and record.

mod batch;
mod compress;
mod progress;
mod upload;
mod validate;

pub use batch::BatchUpload;
pub use compress::{compress, target_dimensions, CompressedImage};
pub use progress::{ProgressSink, UploadProgress, UploadStage};
pub use upload::{UploadOrchestrator, UploadSettings};
pub use validate::{validate, validate_files, ImageFile, ALLOWED_TYPES, MAX_FILE_SIZE};
