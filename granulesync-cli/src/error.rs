//! CLI error type.

use granulesync::config::ConfigError;
use granulesync::logging::LoggingError;
use granulesync::payload::PayloadError;
use granulesync::transport::TransportError;
use granulesync::ManagerError;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// The config file could not be read.
    Config(ConfigError),

    /// Logging could not be initialized.
    Logging(LoggingError),

    /// The payload file could not be loaded.
    Payload(PayloadError),

    /// The HTTP client could not be built.
    Transport(TransportError),

    /// The download manager failed.
    Manager(ManagerError),

    /// The operation was aborted before any download.
    Aborted(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{}", e),
            Self::Logging(e) => write!(f, "{}", e),
            Self::Payload(e) => write!(f, "{}", e),
            Self::Transport(e) => write!(f, "{}", e),
            Self::Manager(e) => write!(f, "{}", e),
            Self::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Logging(e) => Some(e),
            Self::Payload(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Manager(e) => Some(e),
            Self::Aborted(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        Self::Logging(e)
    }
}

impl From<PayloadError> for CliError {
    fn from(e: PayloadError) -> Self {
        Self::Payload(e)
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ManagerError> for CliError {
    fn from(e: ManagerError) -> Self {
        Self::Manager(e)
    }
}
