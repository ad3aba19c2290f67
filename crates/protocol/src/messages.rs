use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::FINISHED_STATE_DONE;

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Reply to `upload/set_metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetMetadataResponse {
    #[serde(default, deserialize_with = "truthy")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub chunk_size: u64,
    #[serde(default)]
    pub blob_partitions: u32,
    #[serde(default)]
    pub chunk_list: Vec<u32>,
    /// Set when the service already holds part of this asset.
    #[serde(default, deserialize_with = "truthy")]
    pub resume_restart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_location: Option<String>,
}

/// Reply to `upload/finished`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinishedResponse {
    #[serde(default, deserialize_with = "truthy")]
    pub error: bool,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_chunks: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_location: Option<String>,
}

impl FinishedResponse {
    /// Returns `true` once the service has assembled every chunk.
    pub fn is_done(&self) -> bool {
        !self.error && self.state == FINISHED_STATE_DONE
    }
}

/// Reply to the restart/cancel/status control calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    #[serde(default, deserialize_with = "truthy")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Reply to `upload/upload_chunk`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkResponse {
    #[serde(default, deserialize_with = "truthy")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Accepts the loose error markers the service emits (`true`, a message,
/// a non-zero code, an object) and folds them into a flag.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_metadata_parses_minimal_body() {
        let json = r#"{"chunk_size":100,"blob_partitions":1,"chunk_list":[1,2,3]}"#;
        let resp: SetMetadataResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.error);
        assert!(!resp.resume_restart);
        assert_eq!(resp.chunk_size, 100);
        assert_eq!(resp.chunk_list, vec![1, 2, 3]);
    }

    #[test]
    fn set_metadata_empty_object_defaults() {
        let resp: SetMetadataResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(resp, SetMetadataResponse::default());
    }

    #[test]
    fn finished_done_detection() {
        let done: FinishedResponse =
            serde_json::from_str(r#"{"error":false,"state":"Done","message":"ok"}"#).unwrap();
        assert!(done.is_done());

        let missing: FinishedResponse = serde_json::from_str(
            r#"{"error":true,"state":"Missing","message":"","missing_chunks":[5,9]}"#,
        )
        .unwrap();
        assert!(!missing.is_done());
        assert_eq!(missing.missing_chunks, vec![5, 9]);
    }

    #[test]
    fn truthy_error_markers() {
        let cases = [
            (r#"{"error":"boom"}"#, true),
            (r#"{"error":""}"#, false),
            (r#"{"error":1}"#, true),
            (r#"{"error":0}"#, false),
            (r#"{"error":null}"#, false),
            (r#"{"error":{"code":3}}"#, true),
        ];
        for (json, expected) in cases {
            let resp: ChunkResponse = serde_json::from_str(json).unwrap();
            assert_eq!(resp.error, expected, "{json}");
        }
    }
}
