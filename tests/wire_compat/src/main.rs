fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use fus_protocol::{
        ChunkResponse, FinishedResponse, MessageLevel, Progress, ResumeRestartInfo,
        SetMetadataResponse, UploadState, UploadStats,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// The service writes `42` where Rust serializes an `f64` as `42.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, float-normalized comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    // --- Service responses ---

    #[test]
    fn fixture_set_metadata_response() {
        let resp: SetMetadataResponse = roundtrip_test("set_metadata_response.json");
        assert_eq!(resp.chunk_size, 4 * 1024 * 1024);
        assert!(!resp.resume_restart);
    }

    #[test]
    fn fixture_set_metadata_resume() {
        let resp: SetMetadataResponse = roundtrip_test("set_metadata_resume.json");
        assert!(resp.resume_restart);
        assert_eq!(resp.chunk_list, vec![3, 4]);
    }

    #[test]
    fn fixture_set_metadata_error_marker() {
        // Error markers arrive as strings and fold into a flag, so this one
        // cannot roundtrip.
        let resp: SetMetadataResponse =
            serde_json::from_value(load_fixture("set_metadata_error.json")).unwrap();
        assert!(resp.error);
        assert_eq!(resp.chunk_size, 0);
        assert_eq!(
            resp.message.as_deref(),
            Some("The asset is locked by another upload.")
        );
    }

    #[test]
    fn fixture_finished_done() {
        let resp: FinishedResponse = roundtrip_test("finished_done.json");
        assert!(resp.is_done());
    }

    #[test]
    fn fixture_finished_missing() {
        let resp: FinishedResponse = roundtrip_test("finished_missing.json");
        assert!(!resp.is_done());
        assert_eq!(resp.missing_chunks, vec![5, 9]);
    }

    #[test]
    fn fixture_chunk_response() {
        let resp: ChunkResponse = roundtrip_test("chunk_response.json");
        assert!(!resp.error);
    }

    // --- Host-facing payloads ---

    #[test]
    fn fixture_progress() {
        let progress: Progress = roundtrip_test("progress.json");
        assert_eq!(progress.percent_completed, 42.0);
    }

    #[test]
    fn fixture_upload_stats() {
        let stats: UploadStats = roundtrip_test("upload_stats.json");
        assert_eq!(stats.asset_id, "a1");
    }

    #[test]
    fn fixture_resume_restart_info() {
        let info: ResumeRestartInfo = roundtrip_test("resume_restart_info.json");
        assert_eq!(info.number_of_chunks_remaining, 2);
    }

    #[test]
    fn state_and_level_codes() {
        let states = [
            (UploadState::New, 0),
            (UploadState::Initialized, 10),
            (UploadState::Uploading, 20),
            (UploadState::ResumeOrRestart, 40),
            (UploadState::Paused, 50),
            (UploadState::Error, 60),
            (UploadState::Cancelled, 80),
            (UploadState::Verifying, 90),
            (UploadState::Completed, 100),
            (UploadState::FatalError, 500),
        ];
        for (state, code) in states {
            assert_eq!(serde_json::to_value(state).unwrap(), serde_json::json!(code));
        }

        let levels = [
            (MessageLevel::Information, 0),
            (MessageLevel::Verbose, 1),
            (MessageLevel::Error, 2),
        ];
        for (level, code) in levels {
            assert_eq!(serde_json::to_value(level).unwrap(), serde_json::json!(code));
        }
    }
}
