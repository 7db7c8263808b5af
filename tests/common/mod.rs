#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use webserve::assets::StaticAssets;
use webserve::config::ServerConfig;
use webserve::conversation::ChatTemplate;
use webserve::inference::{
    EngineError, GenerationEngine, GenerationOutput, GenerationSender, GenerationStream,
    SamplingParams,
};
use webserve::ws::{RelayError, RelaySocket, ResponseFrame};
use webserve::Server;

/// Renders nothing for an empty conversation.
pub const TEST_TEMPLATE: &str =
    "{% for m in messages %}<{{ m.role }}>{{ m.content }}\n{% endfor %}";

pub type Script = Vec<Result<GenerationOutput, EngineError>>;

pub fn update(text: &str, finished: bool) -> Result<GenerationOutput, EngineError> {
    Ok(GenerationOutput {
        text: text.to_string(),
        finished,
    })
}

/// Plays back a fixed list of updates for every request.
#[derive(Default)]
pub struct ScriptedEngine {
    script: Script,
    /// Keep every sender so tests can observe cancellation.
    retain_senders: bool,
    pub requests: Mutex<Vec<(String, String, SamplingParams)>>,
    pub senders: Mutex<Vec<GenerationSender>>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn retaining(script: Script) -> Self {
        Self {
            script,
            retain_senders: true,
            ..Default::default()
        }
    }

    pub fn request_ids(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect()
    }
}

impl GenerationEngine for ScriptedEngine {
    fn generate(
        &self,
        request_id: String,
        prompt: String,
        params: SamplingParams,
    ) -> GenerationStream {
        self.requests
            .lock()
            .unwrap()
            .push((request_id, prompt, params));

        let (tx, stream) = GenerationStream::channel(self.script.len().max(1));
        if self.retain_senders {
            self.senders.lock().unwrap().push(tx.clone());
        }

        let script = self.script.clone();
        tokio::spawn(async move {
            for item in script {
                if !tx.send(item).await {
                    break;
                }
            }
        });
        stream
    }
}

/// In-memory client: queued inbound frames, recorded outbound frames.
#[derive(Default)]
pub struct ScriptedSocket {
    incoming: VecDeque<Result<String, RelayError>>,
    /// Sends start failing once this many frames were delivered.
    pub fail_after: Option<usize>,
    pub sent: Vec<ResponseFrame>,
    pub closes: usize,
}

impl ScriptedSocket {
    pub fn with_text(text: &str) -> Self {
        let mut socket = Self::default();
        socket.incoming.push_back(Ok(text.to_string()));
        socket
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}

impl RelaySocket for ScriptedSocket {
    async fn recv_text(&mut self) -> Result<String, RelayError> {
        self.incoming
            .pop_front()
            .unwrap_or(Err(RelayError::Disconnected))
    }

    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        if self.fail_after.is_some_and(|n| self.sent.len() >= n) {
            return Err(RelayError::Disconnected);
        }
        self.sent
            .push(serde_json::from_str(&text).expect("frame is valid json"));
        Ok(())
    }

    async fn close(&mut self) {
        self.closes += 1;
    }
}

pub fn test_config() -> ServerConfig {
    let mut cfg = ServerConfig::new("acme/tiny-chat");
    cfg.temperature = 0.4;
    cfg.max_tokens = 32;
    cfg
}

pub fn server_with(config: ServerConfig, engine: Arc<ScriptedEngine>) -> Arc<Server> {
    let template = ChatTemplate::new(TEST_TEMPLATE, "", "").unwrap();
    server_with_template(config, template, engine)
}

pub fn server_with_template(
    config: ServerConfig,
    template: ChatTemplate,
    engine: Arc<ScriptedEngine>,
) -> Arc<Server> {
    Arc::new(Server::from_parts(config, template, engine, shipped_assets()))
}

pub fn shipped_assets() -> StaticAssets {
    StaticAssets::load(Path::new(env!("CARGO_MANIFEST_DIR")).join("static")).unwrap()
}

pub fn test_server(engine: Arc<ScriptedEngine>) -> Arc<Server> {
    server_with(test_config(), engine)
}

pub fn chat(text: &str) -> String {
    serde_json::json!([{"role": "user", "content": text}]).to_string()
}
