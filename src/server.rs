use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::assets::StaticAssets;
use crate::config::ServerConfig;
use crate::config_script::UiConfig;
use crate::conversation::ChatTemplate;
use crate::inference::candle_engine::{EngineOptions, ModelFiles};
use crate::inference::{CandleEngine, GenerationEngine, SamplingParams};
use crate::ws::{retrieve_response, RETRIEVE_RESPONSE_PATH};

const REQUEST_ID_PREFIX: &str = "webserve-request-";
const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_CSS: &str = "text/css; charset=utf-8";
const APPLICATION_JS: &str = "application/javascript";

/// Everything a running webserve instance owns: model handles, sampling
/// settings, UI flags, static assets and the request-id counter.
pub struct Server {
    config: ServerConfig,
    template: ChatTemplate,
    engine: Arc<dyn GenerationEngine>,
    assets: StaticAssets,
    next_id: AtomicU64,
}

impl Server {
    /// Loads the chat template, the engine and the static assets for `config.model`.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let assets = StaticAssets::load(StaticAssets::default_dir()?)?;

        let files = ModelFiles::resolve(&config.model)
            .with_context(|| format!("failed to resolve model {}", config.model))?;

        let template = match &files.tokenizer_config {
            Some(path) => ChatTemplate::from_tokenizer_config(path)?,
            None => {
                warn!("no tokenizer_config.json, using the ChatML template");
                ChatTemplate::chatml()?
            }
        };

        let engine = CandleEngine::load(
            &files,
            EngineOptions {
                gpu_count: config.gpu_count,
                max_model_len: config.max_model_len,
            },
        )
        .with_context(|| format!("failed to load model {}", config.model))?;

        Ok(Self::from_parts(config, template, Arc::new(engine), assets))
    }

    pub fn from_parts(
        config: ServerConfig,
        template: ChatTemplate,
        engine: Arc<dyn GenerationEngine>,
        assets: StaticAssets,
    ) -> Self {
        Self {
            config,
            template,
            engine,
            assets,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }

    pub fn engine(&self) -> &dyn GenerationEngine {
        self.engine.as_ref()
    }

    pub fn assets(&self) -> &StaticAssets {
        &self.assets
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Fresh id for every generation; never reused by this instance.
    pub fn next_request_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{REQUEST_ID_PREFIX}{n}")
    }

    pub fn config_script(&self) -> String {
        UiConfig::from(&self.config)
            .to_script()
            .unwrap_or_else(|err| {
                error!(error = %err, "failed to serialize UI config");
                String::new()
            })
    }

    /// Binds `host:port` and serves on a fresh tokio runtime.
    ///
    /// With `daemon` the runtime lives on its own OS thread and this returns
    /// as soon as the socket is bound; otherwise it blocks until the server stops.
    pub fn listen(self: Arc<Self>, host: &str, port: u16, daemon: bool) -> Result<()> {
        let listener = StdTcpListener::bind((host, port))
            .with_context(|| format!("failed to bind {host}:{port}"))?;
        listener.set_nonblocking(true)?;
        info!(host, port, daemon, "listening");

        if daemon {
            thread::Builder::new()
                .name("webserve-http".into())
                .spawn(move || {
                    if let Err(err) = self.run(listener) {
                        error!(error = %err, "http server stopped");
                    }
                })
                .context("failed to spawn http thread")?;
            Ok(())
        } else {
            self.run(listener)
        }
    }

    fn run(self: Arc<Self>, listener: StdTcpListener) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener)?;
            axum::serve(listener, create_router(self)).await?;
            Ok::<(), anyhow::Error>(())
        })
    }
}

// ------------------------------------------------------------
// ROUTER
// ------------------------------------------------------------
pub fn create_router(server: Arc<Server>) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/version", get(version))
        .route("/robots.txt", get(robots_txt))
        .route("/main.css", get(main_css))
        .route("/display.js", get(display_js))
        .route("/stream.js", get(stream_js))
        .route("/config.js", get(config_js))
        .route(RETRIEVE_RESPONSE_PATH, get(retrieve_response));

    let router = if server.config.verbose {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };

    router.with_state(server)
}

fn typed(content_type: &'static str, body: impl Into<String>) -> Response {
    ([(CONTENT_TYPE, content_type)], body.into()).into_response()
}

async fn index(State(server): State<Arc<Server>>) -> Html<String> {
    Html(server.assets.file("index.html").to_owned())
}

async fn version() -> Response {
    typed(TEXT_PLAIN, format!("webserve v{}", crate::VERSION))
}

async fn robots_txt() -> Response {
    typed(TEXT_PLAIN, ROBOTS_TXT)
}

async fn main_css(State(server): State<Arc<Server>>) -> Response {
    typed(TEXT_CSS, server.assets.file("main.css"))
}

async fn display_js(State(server): State<Arc<Server>>) -> Response {
    typed(APPLICATION_JS, server.assets.file("display.js"))
}

async fn stream_js(State(server): State<Arc<Server>>) -> Response {
    typed(APPLICATION_JS, server.assets.file("stream.js"))
}

async fn config_js(State(server): State<Arc<Server>>) -> Response {
    typed(APPLICATION_JS, server.config_script())
}
