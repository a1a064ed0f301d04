use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    UnsupportedVersion(u32),
    EmptyField(&'static str),
    BadTimeOfDay(String),
    BadRunPeriod(String),
    ConflictingDeadline,
    MissingDeadline,
    NotInRange(&'static str, String),
}

impl ConfigError {
    /// Name of the configuration field the error is about, when there is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::EmptyField(field) | ConfigError::NotInRange(field, _) => Some(field),
            ConfigError::BadTimeOfDay(_) => Some("until"),
            ConfigError::BadRunPeriod(_) => Some("run_for"),
            ConfigError::ConflictingDeadline | ConfigError::MissingDeadline => {
                Some("until/run_for")
            }
            ConfigError::UnsupportedVersion(_) => Some("version"),
            ConfigError::IoError(_) | ConfigError::TomlError(_) => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::UnsupportedVersion(v) => {
                write!(f, "Unsupported configuration version: {}", v)
            }
            ConfigError::EmptyField(field) => write!(f, "Field `{}` must not be empty", field),
            ConfigError::BadTimeOfDay(e) => {
                write!(f, "Field `until` is not a valid HH:MM time: {}", e)
            }
            ConfigError::BadRunPeriod(e) => {
                write!(f, "Field `run_for` is not a valid run period: {}", e)
            }
            ConfigError::ConflictingDeadline => {
                write!(f, "Fields `until` and `run_for` are mutually exclusive")
            }
            ConfigError::MissingDeadline => {
                write!(f, "One of the fields `until` or `run_for` is required")
            }
            ConfigError::NotInRange(field, e) => {
                write!(f, "Field `{}` value out of range: {}", field, e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum CaptureError {
    InterfaceNotFound(String),
    InterfaceUnavailable(String, std::io::Error),
    UnsupportedChannel(String),
    ReadFailed(std::io::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InterfaceNotFound(name) => write!(f, "Interface not found: {}", name),
            CaptureError::InterfaceUnavailable(name, e) => {
                write!(f, "Unable to open interface {}: {}", name, e)
            }
            CaptureError::UnsupportedChannel(name) => {
                write!(f, "Interface {} does not provide an ethernet channel", name)
            }
            CaptureError::ReadFailed(e) => write!(f, "Capture read error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug)]
pub enum StorageError {
    ResolveFailed(std::io::Error),
    CreateFailed(std::io::Error),
    WriteFailed(std::io::Error),
    ReadFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ResolveFailed(e) => write!(f, "Storage path resolution failed: {}", e),
            StorageError::CreateFailed(e) => write!(f, "Storage creation failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    NotApplicable,
    Malformed(String),
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::NotApplicable => write!(f, "Record does not carry this dimension"),
            ExtractionError::Malformed(e) => write!(f, "Malformed record: {}", e),
        }
    }
}

impl std::error::Error for ExtractionError {}

#[derive(Debug)]
pub enum SessionError {
    NotConfigured,
    AlreadyStarted,
    Configuration(ConfigError),
    Capture {
        error: CaptureError,
        last_sequence: u64,
    },
    Storage {
        error: StorageError,
        last_sequence: u64,
    },
    ProducerPanicked(String),
}

impl SessionError {
    /// Sequence number of the last record known to be durable, for errors
    /// raised after records started flowing.
    pub fn last_sequence(&self) -> Option<u64> {
        match self {
            SessionError::Capture { last_sequence, .. }
            | SessionError::Storage { last_sequence, .. } => Some(*last_sequence),
            _ => None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotConfigured => write!(f, "Session has not been configured"),
            SessionError::AlreadyStarted => write!(f, "Session has already been started"),
            SessionError::Configuration(e) => write!(f, "Configuration error: {}", e),
            SessionError::Capture {
                error,
                last_sequence,
            } => write!(
                f,
                "Capture error after record #{}: {}",
                last_sequence, error
            ),
            SessionError::Storage {
                error,
                last_sequence,
            } => write!(
                f,
                "Storage error after record #{}: {}",
                last_sequence, error
            ),
            SessionError::ProducerPanicked(e) => write!(f, "Capture producer panicked: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::Configuration(err)
    }
}

#[derive(Debug)]
pub enum AnalysisError {
    Storage(StorageError),
    InvalidWindowCount(usize),
    Report(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Storage(e) => write!(f, "Analysis storage error: {}", e),
            AnalysisError::InvalidWindowCount(n) => {
                write!(f, "Window count must be at least 1, got {}", n)
            }
            AnalysisError::Report(e) => write!(f, "Report error: {}", e),
        }
    }
}

impl std::error::Error for AnalysisError {}

impl From<StorageError> for AnalysisError {
    fn from(err: StorageError) -> Self {
        AnalysisError::Storage(err)
    }
}
