use std::path::{Path, PathBuf};
use thiserror::Error;
use vessel_api::DataUri;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File not found: {0:?}")]
    NotFound(PathBuf),
    #[error("File is empty: {0:?}")]
    Empty(PathBuf),
    #[error("File size must be less than {}MB", .max_bytes.div_ceil(1024 * 1024))]
    TooLarge { size: u64, max_bytes: u64 },
    #[error("File must be an image")]
    NotAnImage,
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

/// An image read from disk and checked before it is sent for analysis.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn to_data_uri(&self) -> String {
        DataUri::encode(&self.mime_type, &self.bytes)
    }

    /// File name without its extension, used to name the saved results.
    pub fn stem(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("image")
    }
}

pub fn validate_image_file(path: &Path, max_bytes: u64) -> Result<ImageUpload, UploadError> {
    if !path.is_file() {
        return Err(UploadError::NotFound(path.to_path_buf()));
    }

    let size = std::fs::metadata(path)?.len();
    if size == 0 {
        return Err(UploadError::Empty(path.to_path_buf()));
    }
    if size > max_bytes {
        return Err(UploadError::TooLarge { size, max_bytes });
    }

    let bytes = std::fs::read(path)?;
    let format = image::guess_format(&bytes).map_err(|_| UploadError::NotAnImage)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    tracing::debug!("Validated {} ({} bytes, {:?})", file_name, size, format);

    Ok(ImageUpload {
        file_name,
        mime_type: format.to_mime_type().to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn temp_file(suffix: &str, contents: &[u8]) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn test_accepts_png() {
        let file = temp_file(".png", &png_bytes());

        let upload = validate_image_file(file.path(), MAX_UPLOAD_BYTES).unwrap();

        assert_eq!(upload.mime_type, "image/png");
        assert!(upload.file_name.ends_with(".png"));
        assert!(upload.to_data_uri().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_format_is_sniffed_not_taken_from_extension() {
        let file = temp_file(".jpg", &png_bytes());

        let upload = validate_image_file(file.path(), MAX_UPLOAD_BYTES).unwrap();

        assert_eq!(upload.mime_type, "image/png");
    }

    #[test]
    fn test_rejects_text_file() {
        let file = temp_file(".png", b"just some notes");

        let err = validate_image_file(file.path(), MAX_UPLOAD_BYTES).unwrap_err();

        assert!(matches!(err, UploadError::NotAnImage));
        assert_eq!(err.to_string(), "File must be an image");
    }

    #[test]
    fn test_rejects_large_file() {
        let file = temp_file(".png", &png_bytes());

        let err = validate_image_file(file.path(), 16).unwrap_err();

        assert!(matches!(err, UploadError::TooLarge { max_bytes: 16, .. }));
    }

    #[test]
    fn test_size_message_uses_megabytes() {
        let err = UploadError::TooLarge {
            size: MAX_UPLOAD_BYTES + 1,
            max_bytes: MAX_UPLOAD_BYTES,
        };
        assert_eq!(err.to_string(), "File size must be less than 10MB");
    }

    #[test]
    fn test_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.png");
        assert!(matches!(
            validate_image_file(&missing, MAX_UPLOAD_BYTES),
            Err(UploadError::NotFound(_))
        ));

        let empty = temp_file(".png", b"");
        assert!(matches!(
            validate_image_file(empty.path(), MAX_UPLOAD_BYTES),
            Err(UploadError::Empty(_))
        ));
    }

    #[test]
    fn test_stem_drops_extension() {
        let upload = ImageUpload {
            file_name: "left_eye.jpeg".to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: vec![1],
        };
        assert_eq!(upload.stem(), "left_eye");
    }
}
