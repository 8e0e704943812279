//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enums.
//! Client commands are tagged by `cmd`, server messages by `type`.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, RelayError};

/// Client → Server message
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this socket to a client id in a room (must come first)
    Register { room_id: String, client_id: String },
    /// Relay an opaque payload to the other clients of the room
    Send {
        msg: String,
        #[serde(default)]
        to: String,
    },
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted
    Registered { room_id: String, client_id: String },
    /// Relayed payload; `to` is the receiver id the sender addressed
    Message { to: String, msg: String },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Register command without room or client id
    InvalidRegister,
    /// Send attempted before registering
    NotRegistered,
    /// Register sent twice on one socket
    AlreadyRegistered,
    /// Client id already bound to another socket
    DuplicateRegistration,
    /// Room already has 4 clients
    RoomFull,
    /// Client addressed itself
    InvalidTarget,
    /// Writing to a peer failed
    DeliveryFailed,
    /// No register command within the timeout
    RegistrationTimeout,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let code = match &err {
            AppError::InvalidRegister => ErrorCode::InvalidRegister,
            AppError::NotRegistered => ErrorCode::NotRegistered,
            AppError::AlreadyRegistered => ErrorCode::AlreadyRegistered,
            AppError::RegistrationTimeout => ErrorCode::RegistrationTimeout,
            AppError::Relay(RelayError::DuplicateRegistration(_)) => {
                ErrorCode::DuplicateRegistration
            }
            AppError::Relay(RelayError::RoomFull(_)) => ErrorCode::RoomFull,
            AppError::Relay(RelayError::InvalidTarget(_)) => ErrorCode::InvalidTarget,
            AppError::Relay(RelayError::Delivery(_)) => ErrorCode::DeliveryFailed,
            AppError::Json(_) => ErrorCode::InvalidMessage,
            // Fatal errors are not typically converted (connection closes)
            _ => {
                return ServerMessage::Error {
                    code: ErrorCode::InvalidMessage,
                    message: "Internal error".to_string(),
                }
            }
        };
        ServerMessage::Error {
            code,
            message: err.to_string(),
        }
    }
}
