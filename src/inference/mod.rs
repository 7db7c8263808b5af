pub mod candle_engine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

pub use candle_engine::CandleEngine;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: usize,
}

/// One incremental engine update. `text` is the full output so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub text: String,
    pub finished: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("prompt of {prompt_tokens} tokens exceeds the context length of {context} tokens")]
    ContextOverflow { prompt_tokens: usize, context: usize },
}

/// Streaming generation backend shared by every connection.
pub trait GenerationEngine: Send + Sync {
    fn generate(&self, request_id: String, prompt: String, params: SamplingParams)
        -> GenerationStream;
}

/// Receiving half of one generation request.
///
/// Dropping the stream raises the cancel flag, so the engine stops working on
/// a request nobody is listening to anymore.
pub struct GenerationStream {
    rx: mpsc::Receiver<Result<GenerationOutput, EngineError>>,
    cancel: Arc<AtomicBool>,
}

/// Producer side handed to the engine worker.
#[derive(Clone)]
pub struct GenerationSender {
    tx: mpsc::Sender<Result<GenerationOutput, EngineError>>,
    cancel: Arc<AtomicBool>,
}

impl GenerationStream {
    pub fn channel(buffer: usize) -> (GenerationSender, GenerationStream) {
        let (tx, rx) = mpsc::channel(buffer);
        let cancel = Arc::new(AtomicBool::new(false));
        (
            GenerationSender {
                tx,
                cancel: cancel.clone(),
            },
            GenerationStream { rx, cancel },
        )
    }

    /// Next update, or `None` once the engine has dropped its sender.
    pub async fn next(&mut self) -> Option<Result<GenerationOutput, EngineError>> {
        self.rx.recv().await
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

impl GenerationSender {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    /// Sends from async code. Returns `false` when the stream is gone.
    pub async fn send(&self, item: Result<GenerationOutput, EngineError>) -> bool {
        self.tx.send(item).await.is_ok()
    }

    /// Sends from a blocking worker thread. Returns `false` when the stream is gone.
    pub fn blocking_send(&self, item: Result<GenerationOutput, EngineError>) -> bool {
        self.tx.blocking_send(item).is_ok()
    }
}
