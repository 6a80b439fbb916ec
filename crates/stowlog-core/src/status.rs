//! Engine status codes
//!
//! Codes keep the numbering of the native write-side engine so that
//! existing dashboards and listeners keep working: `-1xxx` init, `-2xxx`
//! open, `-3xxx` flush and `-4xxx` write.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine command a status code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolCommand {
    Init,
    Open,
    Flush,
    Write,
}

impl ProtocolCommand {
    /// Native command name used in status notifications
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "clogan_init",
            Self::Open => "clogan_open",
            Self::Flush => "clogan_flush",
            Self::Write => "clogan_write",
        }
    }
}

impl fmt::Display for ProtocolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result code of an engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StatusCode {
    /// Initialized with a memory-mapped cache journal
    InitSuccessMmap = -1010,
    /// Initialized with a heap buffer (cache journal unavailable)
    InitSuccessMemory = -1020,
    /// Existing log state could not be recovered
    InitFailHeader = -1050,
    InitFailAlreadyInitialized = -1070,
    InitFailInvalidPath = -1080,
    InitFailInvalidKey = -1090,

    OpenSuccess = -2010,
    OpenFailIo = -2020,
    OpenFailNoInit = -2050,
    OpenFailInvalidName = -2080,

    FlushSuccess = -3010,
    FlushFailIo = -3020,
    FlushFailNoInit = -3050,

    WriteSuccess = -4010,
    WriteFailParam = -4020,
    WriteFailMaxFile = -4030,
    WriteFailIo = -4050,
    WriteFailNoInit = -4070,
    WriteFailQueueFull = -4080,
    WriteFailQuit = -4090,
}

impl StatusCode {
    /// Numeric code as reported to listeners
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Command this code belongs to
    pub fn command(self) -> ProtocolCommand {
        match self.code() / 1000 {
            -2 => ProtocolCommand::Open,
            -3 => ProtocolCommand::Flush,
            -4 => ProtocolCommand::Write,
            _ => ProtocolCommand::Init,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::InitSuccessMmap
                | Self::InitSuccessMemory
                | Self::OpenSuccess
                | Self::FlushSuccess
                | Self::WriteSuccess
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Status notification delivered to a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub command: ProtocolCommand,
    pub code: StatusCode,
}

impl StatusEvent {
    pub fn new(code: StatusCode) -> Self {
        Self {
            command: code.command(),
            code,
        }
    }
}
