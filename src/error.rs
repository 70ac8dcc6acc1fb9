use std::result::Result as StdResult;
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::Error as WebSocketError;

pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No node has been added to the manager yet.
    #[error("no nodes available, add a node first")]
    NoNodes,
    /// A node with this name is already registered with the manager.
    #[error("a node named {0:?} is already registered")]
    DuplicateNode(String),
    /// The given node name is not registered with the manager.
    #[error("no node named {0:?} is registered")]
    UnknownNode(String),
    /// No connected node matches the requested selector.
    #[error("no connected node matches the selector")]
    NotFound,
    /// The node exists but is not in the connected state.
    #[error("node {0:?} is not ready yet")]
    NodeNotReady(String),
    /// The node has not received a session id yet.
    #[error("node {0:?} has no session yet")]
    NoSession(String),
    /// The bot user id is not known, the gateway has not become ready yet.
    #[error("client user id is not known yet")]
    ClientNotReady,
    /// No voice server update and session id have been recorded.
    #[error("no server update or session id present")]
    NoVoiceData,
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
    #[error("websocket error: {0}")]
    WebSocket(Box<WebSocketError>),
    /// A REST call returned a non-2xx status.
    #[error("rest request failed with response code: {status}{}", message_suffix(.message))]
    Request { status: u16, message: Option<String> },
    #[error("rest request timed out")]
    RequestTimeout,
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons a voice connection could not be established.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("the voice connection is not established due to missing session id")]
    SessionIdMissing,
    #[error("the voice connection is not established due to missing connection endpoint")]
    EndpointMissing,
    #[error("the voice connection is not established in {} seconds", .0.as_secs())]
    Timeout(Duration),
    /// Another join for the same guild took over the pending handshake.
    #[error("the voice connection attempt was superseded by a newer one")]
    Superseded,
}

fn message_suffix(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(" | message: {}", message),
        None => String::new(),
    }
}

impl From<WebSocketError> for Error {
    fn from(err: WebSocketError) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::RequestTimeout
        } else {
            Error::Http(err)
        }
    }
}
