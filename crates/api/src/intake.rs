use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;
use serde_json::Value;

const FILE_FIELD: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionSource {
    File,
    Json,
}

/// A document ready for simplification. `text` is never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub text: String,
    pub filename: Option<String>,
    pub source: SubmissionSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyFilename,
    UnsupportedContentType,
    InvalidJson,
    InvalidTextField,
    UnreadableUpload(String),
    UnreadableBody(String),
    EmptyDocument,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyFilename => write!(f, "No file selected"),
            ValidationError::UnsupportedContentType => {
                write!(f, "Provide file or JSON with 'text'")
            }
            ValidationError::InvalidJson => write!(f, "Invalid JSON body"),
            ValidationError::InvalidTextField => write!(f, "Field 'text' must be a string"),
            ValidationError::UnreadableUpload(detail) => {
                write!(f, "Error reading file: {}", detail)
            }
            ValidationError::UnreadableBody(detail) => {
                write!(f, "Error reading request body: {}", detail)
            }
            ValidationError::EmptyDocument => write!(f, "Document text is empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Reduces a multipart upload or a JSON body to a single [`Submission`].
pub async fn normalize(req: Request) -> Result<Submission, ValidationError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_default();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|err| ValidationError::UnreadableUpload(err.body_text()))?;
        return from_multipart(multipart).await;
    }

    if is_json_content_type(&content_type) {
        let body = Bytes::from_request(req, &())
            .await
            .map_err(|err| ValidationError::UnreadableBody(err.body_text()))?;
        return from_json_body(&body);
    }

    Err(ValidationError::UnsupportedContentType)
}

async fn from_multipart(mut multipart: Multipart) -> Result<Submission, ValidationError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ValidationError::UnreadableUpload(err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        // A part without a filename is a plain form value, not an upload.
        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };

        let bytes = field
            .bytes()
            .await
            .map_err(|err| ValidationError::UnreadableUpload(err.body_text()))?;
        return from_file_part(&filename, &bytes);
    }

    Err(ValidationError::UnsupportedContentType)
}

/// Undecodable byte sequences become U+FFFD; decoding never fails.
pub fn from_file_part(filename: &str, bytes: &[u8]) -> Result<Submission, ValidationError> {
    if filename.is_empty() {
        return Err(ValidationError::EmptyFilename);
    }

    let text = String::from_utf8_lossy(bytes).into_owned();
    ensure_not_blank(Submission {
        text,
        filename: Some(filename.to_string()),
        source: SubmissionSource::File,
    })
}

pub fn from_json_body(body: &[u8]) -> Result<Submission, ValidationError> {
    let value = serde_json::from_slice::<Value>(body).map_err(|_| ValidationError::InvalidJson)?;
    let Value::Object(map) = value else {
        return Err(ValidationError::InvalidJson);
    };

    let text = match map.get("text") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(ValidationError::InvalidTextField),
    };

    ensure_not_blank(Submission {
        text,
        filename: None,
        source: SubmissionSource::Json,
    })
}

fn ensure_not_blank(submission: Submission) -> Result<Submission, ValidationError> {
    if submission.text.trim().is_empty() {
        return Err(ValidationError::EmptyDocument);
    }
    Ok(submission)
}

fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}
