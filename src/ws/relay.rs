use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, error, info};

use crate::conversation::ChatMessage;
use crate::inference::EngineError;
use crate::server::Server;

/// Envelope sent to the client for every generation update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseFrame {
    pub completed: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ResponseFrame {
    pub fn progress(output: impl Into<String>) -> Self {
        Self {
            completed: false,
            output: output.into(),
            error: None,
        }
    }

    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            completed: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            completed: false,
            output: String::new(),
            error: Some(message.into()),
        }
    }
}

/// How a relay session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The final `completed` frame was sent.
    Completed,
    /// The prompt rendered empty; nothing was generated or sent.
    Empty,
    /// The client went away.
    Disconnected,
    /// One error frame was sent.
    Failed(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("client disconnected")]
    Disconnected,

    #[error("{0}")]
    Failed(String),
}

impl From<minijinja::Error> for RelayError {
    fn from(err: minijinja::Error) -> Self {
        RelayError::Failed(format!("chat template error: {err}"))
    }
}

impl From<EngineError> for RelayError {
    fn from(err: EngineError) -> Self {
        RelayError::Failed(err.to_string())
    }
}

/// Client side of a relay session.
pub trait RelaySocket: Send {
    /// Waits for the next text frame. Control frames are skipped; a close or a
    /// broken transport is `Disconnected`.
    fn recv_text(&mut self) -> impl Future<Output = Result<String, RelayError>> + Send;

    /// A failed send means the client is gone.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), RelayError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Runs one receive → render → generate → stream exchange and closes the
/// socket exactly once, whatever the outcome.
pub async fn run_relay<S: RelaySocket>(socket: &mut S, server: &Server) -> RelayOutcome {
    let outcome = match relay(socket, server).await {
        Ok(outcome) => outcome,
        Err(RelayError::Disconnected) => RelayOutcome::Disconnected,
        Err(RelayError::Failed(message)) => {
            error!(error = message.as_str(), "generation relay failed");
            if send_frame(socket, &ResponseFrame::error(message.as_str()))
                .await
                .is_err()
            {
                debug!("client left before the error frame was sent");
            }
            RelayOutcome::Failed(message)
        }
    };

    socket.close().await;
    outcome
}

async fn relay<S: RelaySocket>(socket: &mut S, server: &Server) -> Result<RelayOutcome, RelayError> {
    // Awaiting message
    let incoming = socket.recv_text().await?;
    let messages = parse_messages(&incoming)?;

    // Rendering prompt
    let prompt = server.template().render(&messages)?;
    if prompt.is_empty() {
        debug!(messages = messages.len(), "empty prompt, nothing to generate");
        return Ok(RelayOutcome::Empty);
    }

    // Streaming
    let request_id = server.next_request_id();
    info!(
        request_id = request_id.as_str(),
        messages = messages.len(),
        prompt_chars = prompt.len(),
        "generation started"
    );

    let mut stream = server
        .engine()
        .generate(request_id.clone(), prompt, server.sampling_params());

    while let Some(update) = stream.next().await {
        let update = update?;
        send_frame(socket, &ResponseFrame::progress(update.text.as_str())).await?;

        if update.finished {
            send_frame(socket, &ResponseFrame::completed(update.text)).await?;
            info!(request_id = request_id.as_str(), "generation completed");
            return Ok(RelayOutcome::Completed);
        }
    }

    Err(RelayError::Failed(
        "generation stream ended before completion".into(),
    ))
}

/// Any JSON array of objects with a `role`; other fields are kept for the template.
fn parse_messages(text: &str) -> Result<Vec<ChatMessage>, RelayError> {
    serde_json::from_str(text)
        .map_err(|err| RelayError::Failed(format!("invalid message list: {err}")))
}

fn encode_frame(frame: &impl Serialize) -> Result<String, RelayError> {
    serde_json::to_string(frame)
        .map_err(|err| RelayError::Failed(format!("failed to encode response frame: {err}")))
}

async fn send_frame<S: RelaySocket>(socket: &mut S, frame: &ResponseFrame) -> Result<(), RelayError> {
    let text = encode_frame(frame)?;
    socket.send_text(text).await
}
