//! Upload-service endpoint templates.
//!
//! Paths are relative to the upload domain; the transport joins them with
//! `/` and appends the auth token when the call requires it.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters left untouched by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encodes a single URI component.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// A logical upload-service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint<'a> {
    SetMetadata {
        file_name: &'a str,
        file_size: u64,
        content_type: Option<&'a str>,
    },
    UploadChunk {
        block_number: u32,
    },
    UploadFinished {
        callback: &'a str,
    },
    Restart,
    Cancel,
    Status,
}

impl Endpoint<'_> {
    /// Path prefix shared by every call of this kind.
    pub fn base(&self) -> &'static str {
        match self {
            Endpoint::SetMetadata { .. } => "upload/set_metadata/",
            Endpoint::UploadChunk { .. } => "upload/upload_chunk/",
            Endpoint::UploadFinished { .. } => "upload/finished/",
            Endpoint::Restart => "upload/restart/",
            Endpoint::Cancel => "upload/cancel/",
            Endpoint::Status => "upload/status/",
        }
    }

    /// Builds the relative path (with query string) for `asset_id`.
    pub fn path(&self, asset_id: &str) -> String {
        let mut path = format!("{}{}", self.base(), encode_component(asset_id));
        match self {
            Endpoint::SetMetadata {
                file_name,
                file_size,
                content_type,
            } => {
                path.push_str(&format!(
                    "?file_name={}&file_size={}",
                    encode_component(file_name),
                    file_size
                ));
                if let Some(ct) = content_type {
                    path.push_str(&format!("&content_type={}", encode_component(ct)));
                }
            }
            Endpoint::UploadChunk { block_number } => {
                path.push_str(&format!("?block_number={block_number}"));
            }
            Endpoint::UploadFinished { callback } => {
                path.push_str(&format!("?callback={}", encode_component(callback)));
            }
            Endpoint::Restart | Endpoint::Cancel | Endpoint::Status => {}
        }
        path
    }
}

/// Builds the fully qualified completion-callback URL.
///
/// `location` is forwarded verbatim as the service already returns it
/// encoded.
pub fn callback_url(
    callback_base: &str,
    asset_id: &str,
    file_name: &str,
    file_size: u64,
    location: &str,
) -> String {
    format!(
        "{}/{}?file_name={}&file_size={}&location={}",
        callback_base,
        encode_component(asset_id),
        encode_component(file_name),
        file_size,
        location
    )
}
