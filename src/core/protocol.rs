use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::core::FileAdvertisement;
use crate::utils::{ErrorKind, P2PError};

/// Envelope for every tracker frame. Replies echo the request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message<T> {
    pub id: Uuid,
    pub timestamp: i64,
    pub body: T,
}

impl<T> Message<T> {
    pub fn new(body: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now().timestamp(),
            body,
        }
    }

    /// Response envelope for the request with `id`.
    pub fn reply_to(id: Uuid, body: T) -> Self {
        Self {
            id,
            timestamp: Utc::now().timestamp(),
            body,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TrackerRequest {
    Register {
        username: String,
        password: String,
        address: SocketAddr,
    },
    Login {
        username: String,
        password: String,
        address: SocketAddr,
    },
    Heartbeat {
        username: String,
        address: SocketAddr,
    },
    Disconnect {
        username: String,
    },
    Publish {
        username: String,
        filenames: Vec<String>,
        address: SocketAddr,
    },
    /// `search` is the same operation with filters set.
    #[serde(alias = "search")]
    Query {
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        username: Option<String>,
    },
}

impl TrackerRequest {
    pub fn op_name(&self) -> &'static str {
        match self {
            TrackerRequest::Register { .. } => "register",
            TrackerRequest::Login { .. } => "login",
            TrackerRequest::Heartbeat { .. } => "heartbeat",
            TrackerRequest::Disconnect { .. } => "disconnect",
            TrackerRequest::Publish { .. } => "publish",
            TrackerRequest::Query { .. } => "query",
        }
    }
}

// Hand-written so passwords never reach the logs.
impl std::fmt::Debug for TrackerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerRequest::Register { username, address, .. }
            | TrackerRequest::Login { username, address, .. }
            | TrackerRequest::Heartbeat { username, address } => f
                .debug_struct(self.op_name())
                .field("username", username)
                .field("address", address)
                .finish(),
            TrackerRequest::Disconnect { username } => f
                .debug_struct("disconnect")
                .field("username", username)
                .finish(),
            TrackerRequest::Publish {
                username,
                filenames,
                address,
            } => f
                .debug_struct("publish")
                .field("username", username)
                .field("files", &filenames.len())
                .field("address", address)
                .finish(),
            TrackerRequest::Query { filename, username } => f
                .debug_struct("query")
                .field("filename", filename)
                .field("username", username)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrackerResponse {
    Ok { message: String },
    LoggedIn { username: String },
    Files { files: Vec<FileAdvertisement> },
    Error { kind: ErrorKind, message: String },
}

impl TrackerResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        TrackerResponse::Ok {
            message: message.into(),
        }
    }

    pub fn error(err: &P2PError) -> Self {
        TrackerResponse::Error {
            kind: err.kind(),
            message: err.detail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_alias_decodes_as_query() {
        let raw = r#"{"op":"search","filename":"note"}"#;
        let request: TrackerRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(
            request,
            TrackerRequest::Query {
                filename: Some("note".to_string()),
                username: None,
            }
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let request = TrackerRequest::Login {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            address: "127.0.0.1:7000".parse().unwrap(),
        };
        let printed = format!("{:?}", request);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_reply_keeps_id() {
        let request = Message::new(TrackerRequest::Disconnect {
            username: "alice".to_string(),
        });
        let reply = Message::reply_to(request.id, TrackerResponse::ok("bye"));
        assert_eq!(reply.id, request.id);

        let wire = serde_json::to_string(&reply).unwrap();
        assert!(wire.contains(r#""status":"ok""#));
    }
}
