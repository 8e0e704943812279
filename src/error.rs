//! Error types for the relay
//!
//! `RelayError` covers the room/client core, `SendError` the outbox
//! channel, and `AppError` everything a socket session can run into.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::{ClientId, RoomId};

/// Errors returned by the room and client operations
///
/// None of these are retried inside the core. A message dropped because
/// the recipient has not registered is not an error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A connection is already bound to this client
    #[error("Duplicated registration of client {0}")]
    DuplicateRegistration(ClientId),

    /// The room already holds the maximum number of clients
    #[error("Room {0} is full")]
    RoomFull(RoomId),

    /// A client tried to send to itself
    #[error("Invalid target: client {0} cannot send to itself")]
    InvalidTarget(ClientId),

    /// Writing to a registered connection failed
    #[error("Delivery failed: {0}")]
    Delivery(#[from] SendError),
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Session-level errors
///
/// Covers both fatal errors (connection termination) and protocol errors
/// that are reported back to the endpoint.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Register command without a room or client id
    #[error("Invalid register request: missing 'client_id' or 'room_id'")]
    InvalidRegister,

    /// Send command before the socket registered
    #[error("Client not registered")]
    NotRegistered,

    /// Second register command on the same socket
    #[error("Duplicated register request")]
    AlreadyRegistered,

    /// No register command within the registration timeout
    #[error("Client did not register in time")]
    RegistrationTimeout,

    /// Error from the room core
    #[error(transparent)]
    Relay(#[from] RelayError),
}
