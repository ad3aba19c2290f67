use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Free-form structured properties attached to every emitted message.
pub type LogProperties = serde_json::Map<String, serde_json::Value>;

/// Upload lifecycle state.
///
/// The numeric codes are part of the host contract and are what hosts
/// receive when the state is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum UploadState {
    New = 0,
    Initialized = 10,
    Uploading = 20,
    ResumeOrRestart = 40,
    Paused = 50,
    Error = 60,
    Cancelled = 80,
    Verifying = 90,
    Completed = 100,
    FatalError = 500,
}

impl UploadState {
    /// Numeric code of the state.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Returns `true` while an upload is being negotiated, sent, or verified.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            UploadState::Initialized | UploadState::Uploading | UploadState::Verifying
        )
    }

    /// Returns `true` for states no upload leaves without an explicit reset.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Cancelled | UploadState::FatalError
        )
    }
}

impl From<UploadState> for u16 {
    fn from(state: UploadState) -> Self {
        state.code()
    }
}

impl TryFrom<u16> for UploadState {
    type Error = ProtocolError;

    fn try_from(code: u16) -> Result<Self, ProtocolError> {
        Ok(match code {
            0 => UploadState::New,
            10 => UploadState::Initialized,
            20 => UploadState::Uploading,
            40 => UploadState::ResumeOrRestart,
            50 => UploadState::Paused,
            60 => UploadState::Error,
            80 => UploadState::Cancelled,
            90 => UploadState::Verifying,
            100 => UploadState::Completed,
            500 => UploadState::FatalError,
            other => return Err(ProtocolError::UnknownState(other)),
        })
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Severity of a message delivered to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MessageLevel {
    Information = 0,
    Verbose = 1,
    Error = 2,
}

impl From<MessageLevel> for u8 {
    fn from(level: MessageLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for MessageLevel {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(MessageLevel::Information),
            1 => Ok(MessageLevel::Verbose),
            2 => Ok(MessageLevel::Error),
            other => Err(ProtocolError::UnknownLevel(other)),
        }
    }
}

/// Progress snapshot delivered to `on_progress_changed`.
///
/// Rate, speed, and time remaining are preformatted strings; they are
/// empty on the ambiguous updates sent before chunk data flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(rename = "percentCompleted")]
    pub percent_completed: f64,
    #[serde(rename = "Rate")]
    pub rate: String,
    #[serde(rename = "AverageSpeed")]
    pub average_speed: String,
    #[serde(rename = "TimeRemaining")]
    pub time_remaining: String,
}

impl Progress {
    /// A progress tick carrying only a percentage.
    pub fn ambiguous(percent_completed: f64) -> Self {
        Self {
            percent_completed,
            rate: String::new(),
            average_speed: String::new(),
            time_remaining: String::new(),
        }
    }
}

/// Summary delivered to `on_completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadStats {
    pub asset_id: String,
    pub total_time_in_seconds: String,
    pub average_speed_in_mbps: f64,
}

/// Payload delivered to `on_resume_restart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResumeRestartInfo {
    pub number_of_chunks_remaining: usize,
}
