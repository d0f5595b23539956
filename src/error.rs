//! Error taxonomy for the emulator, split into the two families a real BLE stack
//! distinguishes (attribute-protocol errors and connection/GAP errors), unified behind
//! the [`EmulatorError`] the Bus actually returns to façades.

use thiserror::Error;

/// Attribute-protocol errors, raised from read/write/subscribe operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    #[error("invalid handle")]
    InvalidHandle,
    #[error("read not permitted")]
    ReadNotPermitted,
    #[error("write not permitted")]
    WriteNotPermitted,
    #[error("invalid PDU")]
    InvalidPdu,
    #[error("insufficient authentication")]
    InsufficientAuthentication,
    #[error("request not supported")]
    RequestNotSupported,
    #[error("invalid offset")]
    InvalidOffset,
    #[error("insufficient authorization")]
    InsufficientAuthorization,
    #[error("prepare queue full")]
    PrepareQueueFull,
    #[error("attribute not found")]
    AttributeNotFound,
    #[error("attribute not long")]
    AttributeNotLong,
    #[error("insufficient encryption key size")]
    InsufficientEncryptionKeySize,
    #[error("invalid attribute value length")]
    InvalidAttributeValueLength,
    #[error("unlikely error")]
    UnlikelyError,
    #[error("insufficient encryption")]
    InsufficientEncryption,
    #[error("unsupported group type")]
    UnsupportedGroupType,
    #[error("insufficient resources")]
    InsufficientResources,
}

/// Connection and GAP-level errors, raised from connect/disconnect and routing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection failed")]
    ConnectionFailed,
    #[error("connection timed out")]
    ConnectionTimeout,
    #[error("peripheral disconnected")]
    PeripheralDisconnected,
    #[error("not connected")]
    NotConnected,
    #[error("connection limit reached")]
    ConnectionLimitReached,
    #[error("unknown device")]
    UnknownDevice,
    #[error("operation not supported")]
    OperationNotSupported,
    #[error("peer removed pairing information")]
    PeerRemovedPairingInformation,
    #[error("encryption timed out")]
    EncryptionTimedOut,
    #[error("too many LE paired devices")]
    TooManyLEPairedDevices,
    #[error("already advertising")]
    AlreadyAdvertising,
    #[error("UUID not allowed")]
    UuidNotAllowed,
    #[error("out of space")]
    OutOfSpace,
    #[error("invalid parameters")]
    InvalidParameters,
    #[error("operation cancelled")]
    OperationCancelled,
    #[error("L2CAP PSM not published")]
    L2capPsmNotPublished,
    #[error("L2CAP channel rejected")]
    L2capChannelRejected,
}

/// The error type returned by every Bus operation and delivered through delegate callbacks.
///
/// The Bus never panics: invariant violations it cannot otherwise classify are logged
/// and surfaced as [`EmulatorError::Internal`] wrapping `unknown`/`unknownDevice` semantics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    #[error(transparent)]
    Att(#[from] AttError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl EmulatorError {
    /// Build a non-panicking fallback error for an invariant that should be unreachable.
    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::warn!("internal invariant violation: {msg}");
        EmulatorError::Internal(msg)
    }
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
