pub mod client;
pub mod report;
pub mod upload;

pub use client::{ClientError, SegmentationClient};
pub use report::{save_mask, write_summary, AnalysisSummary, ReportError};
pub use upload::{validate_image_file, ImageUpload, UploadError, MAX_UPLOAD_BYTES};
