use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug, PartialEq)]
pub enum DataUriError {
    #[error("empty payload")]
    Empty,
    #[error("malformed data URI header: {0}")]
    MalformedHeader(String),
    #[error("invalid base64: {0}")]
    InvalidBase64(String),
}

/// A decoded `data:<mime>;base64,<payload>` value.
///
/// Bare base64 payloads without the `data:` header are accepted too, since
/// older clients posted the raw payload only.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl DataUri {
    pub fn parse(input: &str) -> Result<Self, DataUriError> {
        let input = input.trim();
        let (mime_type, payload) = match input.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| DataUriError::MalformedHeader("missing ','".into()))?;
                let mime = header
                    .split(';')
                    .next()
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_MIME_TYPE);
                if !header.split(';').any(|p| p == "base64") {
                    return Err(DataUriError::MalformedHeader(format!(
                        "only base64 payloads are supported, got '{}'",
                        header
                    )));
                }
                (mime.to_string(), payload)
            }
            None => (DEFAULT_MIME_TYPE.to_string(), input),
        };

        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(DataUriError::Empty);
        }

        let data = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| DataUriError::InvalidBase64(e.to_string()))?;
        if data.is_empty() {
            return Err(DataUriError::Empty);
        }

        Ok(Self { mime_type, data })
    }

    pub fn encode(mime_type: &str, data: &[u8]) -> String {
        format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
    }

    pub fn to_uri_string(&self) -> String {
        Self::encode(&self.mime_type, &self.data)
    }
}
