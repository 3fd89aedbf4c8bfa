//! Unified error types for the MEO node firmware.
//!
//! Each subsystem has its own small error enum; the top-level [`Error`]
//! wraps them so bring-up code can funnel everything through one type.
//! Protocol failures are reported through these values and logged, never
//! turned into panics.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Storage(StorageError),
    Connectivity(ConnectivityError),
    Registration(RegistrationError),
    Session(SessionError),
    Registry(RegistryError),
    /// Configuration is invalid.
    Config(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Connectivity(e) => write!(f, "network: {e}"),
            Self::Registration(e) => write!(f, "registration: {e}"),
            Self::Session(e) => write!(f, "session: {e}"),
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors from [`StoragePort`](crate::app::ports::StoragePort) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Stored value is larger than the caller's buffer.
    BufferTooSmall,
    /// Stored value is not of the requested type (e.g. not UTF-8).
    InvalidData,
    /// Storage partition is full.
    Full,
    /// Generic I/O error from the backend.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::InvalidData => write!(f, "stored value has wrong type"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Network link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    /// Association did not complete within the configured wait.
    Timeout,
    ConnectionFailed,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be at most 64 bytes)"),
            Self::Timeout => write!(f, "WiFi connect timed out"),
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
        }
    }
}

impl From<ConnectivityError> for Error {
    fn from(e: ConnectivityError) -> Self {
        Self::Connectivity(e)
    }
}

// ---------------------------------------------------------------------------
// Registration errors
// ---------------------------------------------------------------------------

/// Failure modes of one broadcast-then-listen registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    /// No usable network interface (link down or no address).
    NoNetworkInterface,
    /// A socket could not be created or bound.
    Socket,
    /// The discovery datagram could not be sent.
    BroadcastFailed,
    /// No gateway connected within the accept window.
    AcceptTimeout,
    /// The stream ended or timed out before a line terminator.
    IncompleteResponse,
    /// The reply was not JSON or lacked string `device_id`/`transmit_key`.
    MalformedResponse,
    /// The discovery descriptor could not be serialized.
    Encode,
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNetworkInterface => write!(f, "no network interface"),
            Self::Socket => write!(f, "socket setup failed"),
            Self::BroadcastFailed => write!(f, "discovery broadcast failed"),
            Self::AcceptTimeout => write!(f, "timed out waiting for gateway"),
            Self::IncompleteResponse => write!(f, "incomplete response"),
            Self::MalformedResponse => write!(f, "malformed response"),
            Self::Encode => write!(f, "descriptor encoding failed"),
        }
    }
}

impl From<RegistrationError> for Error {
    fn from(e: RegistrationError) -> Self {
        Self::Registration(e)
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Broker host is not configured.
    EmptyHost,
    /// Operation requires a live session.
    NotConnected,
    /// The transport refused to start a connection attempt.
    ConnectFailed,
    PublishFailed,
    SubscribeFailed,
    /// Payload could not be serialised.
    Encode,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyHost => write!(f, "broker host is empty"),
            Self::NotConnected => write!(f, "not connected"),
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::PublishFailed => write!(f, "publish failed"),
            Self::SubscribeFailed => write!(f, "subscribe failed"),
            Self::Encode => write!(f, "payload encode failed"),
        }
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

// ---------------------------------------------------------------------------
// Feature registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    EmptyName,
    /// A feature of the same kind is already registered under this name.
    Duplicate,
    /// The configured capacity for this kind is exhausted.
    Full,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "feature name is empty"),
            Self::Duplicate => write!(f, "feature already registered"),
            Self::Full => write!(f, "feature registry full"),
        }
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}
