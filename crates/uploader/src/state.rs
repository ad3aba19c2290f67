//! Upload state transition table.

use fus_protocol::UploadState;

/// Returns `true` when the coordinator may move from `from` to `to`.
///
/// `Error` and `FatalError` are reachable from anywhere, as is `New`
/// (reset). Everything else follows the upload lifecycle.
pub fn transition_allowed(from: UploadState, to: UploadState) -> bool {
    use UploadState::*;

    match to {
        New | Error | FatalError => true,
        Initialized => matches!(from, New | Error | FatalError | Cancelled | Completed),
        ResumeOrRestart => from == Initialized,
        Uploading => matches!(
            from,
            Initialized | ResumeOrRestart | Uploading | Paused | Verifying | Error
        ),
        Paused => from == Uploading,
        Verifying => from == Uploading,
        Completed => from == Verifying,
        Cancelled => matches!(
            from,
            Initialized | ResumeOrRestart | Uploading | Paused | Verifying | Error
        ),
    }
}

/// Returns `true` while a started upload has not reached a resting state.
///
/// Wider than [`UploadState::is_active`]: a paused upload is still in
/// progress and cannot be replaced by a new one.
pub fn in_progress(state: UploadState) -> bool {
    state.is_active() || matches!(state, UploadState::Paused | UploadState::ResumeOrRestart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use UploadState::*;

    const ALL: [UploadState; 10] = [
        New,
        Initialized,
        Uploading,
        ResumeOrRestart,
        Paused,
        Error,
        Cancelled,
        Verifying,
        Completed,
        FatalError,
    ];

    #[test]
    fn happy_path_is_allowed() {
        let path = [New, Initialized, Uploading, Verifying, Completed];
        for pair in path.windows(2) {
            assert!(transition_allowed(pair[0], pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn resume_path_is_allowed() {
        assert!(transition_allowed(Initialized, ResumeOrRestart));
        assert!(transition_allowed(ResumeOrRestart, Uploading));
        assert!(!transition_allowed(Uploading, ResumeOrRestart));
    }

    #[test]
    fn error_sinks_and_reset_reachable_from_everywhere() {
        for from in ALL {
            assert!(transition_allowed(from, Error));
            assert!(transition_allowed(from, FatalError));
            assert!(transition_allowed(from, New));
        }
    }

    #[test]
    fn pause_only_from_uploading() {
        for from in ALL {
            assert_eq!(transition_allowed(from, Paused), from == Uploading, "{from:?}");
        }
        assert!(transition_allowed(Paused, Uploading));
    }

    #[test]
    fn completion_requires_verification() {
        for from in ALL {
            assert_eq!(transition_allowed(from, Completed), from == Verifying, "{from:?}");
        }
    }

    #[test]
    fn verify_can_fall_back_to_uploading() {
        assert!(transition_allowed(Verifying, Uploading));
    }

    #[test]
    fn cannot_start_over_an_upload_in_progress() {
        for from in [Initialized, Uploading, Verifying, Paused, ResumeOrRestart] {
            assert!(!transition_allowed(from, Initialized), "{from:?}");
            assert!(in_progress(from));
        }
        for from in [New, Error, FatalError, Cancelled, Completed] {
            assert!(transition_allowed(from, Initialized), "{from:?}");
            assert!(!in_progress(from));
        }
    }

    #[test]
    fn terminal_states_cannot_be_cancelled() {
        for from in [New, Cancelled, Completed, FatalError] {
            assert!(!transition_allowed(from, Cancelled), "{from:?}");
        }
    }
}
