use clap::Parser;

/// Serve a chat UI for a Hugging Face model.
#[derive(Parser, Debug, Clone)]
#[command(name = "webserve")]
#[command(version)]
pub struct Args {
    /// Model's Hugging Face path (or a local snapshot directory)
    pub model: String,

    // -----------------------------
    // Server
    // -----------------------------
    /// Server host address
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Server port; the first free port in 8010-8099 is used when omitted
    #[arg(long)]
    pub port: Option<u16>,

    // -----------------------------
    // UI
    // -----------------------------
    /// Launch the UI in dark mode
    #[arg(long)]
    pub darkmode: bool,

    /// Compile LaTeX in real time
    #[arg(long)]
    pub latex: bool,

    // -----------------------------
    // Model
    // -----------------------------
    /// Context length (prompt + generated tokens)
    #[arg(long, default_value_t = 2048)]
    pub context: usize,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.6)]
    pub temperature: f32,

    /// Maximum number of new tokens per generation
    #[arg(long, default_value_t = 2048)]
    pub max_tokens: usize,

    // -----------------------------
    // Environment
    // -----------------------------
    /// Number of GPUs to use (0 runs on CPU)
    #[arg(long, default_value_t = 1)]
    pub gpu_count: usize,

    /// Log HTTP requests and debug output
    #[arg(long)]
    pub verbose: bool,
}

/// Runtime configuration of a [`crate::Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub model: String,
    pub gpu_count: usize,
    pub max_model_len: usize,
    pub max_tokens: usize,
    pub temperature: f32,
    pub latex: bool,
    pub darkmode: bool,
    pub verbose: bool,
}

impl ServerConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            gpu_count: 1,
            max_model_len: 2048,
            max_tokens: 2048,
            temperature: 0.6,
            latex: false,
            darkmode: false,
            verbose: false,
        }
    }
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            model: args.model.clone(),
            gpu_count: args.gpu_count,
            max_model_len: args.context,
            max_tokens: args.max_tokens,
            temperature: args.temperature,
            latex: args.latex,
            darkmode: args.darkmode,
            verbose: args.verbose,
        }
    }
}

/// Tracing filter directive for the given verbosity.
pub fn log_directive(verbose: bool) -> &'static str {
    if verbose {
        "webserve=debug,tower_http=debug"
    } else {
        "webserve=info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli() {
        let args = Args::parse_from(["webserve", "mistralai/Mistral-7B-Instruct-v0.2"]);
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(args.port, None);
        assert_eq!(args.context, 2048);
        assert_eq!(args.max_tokens, 2048);
        assert_eq!(args.gpu_count, 1);
        assert!((args.temperature - 0.6).abs() < f32::EPSILON);
        assert!(!args.darkmode && !args.latex && !args.verbose);
    }

    #[test]
    fn flags_flow_into_server_config() {
        let args = Args::parse_from([
            "webserve",
            "some/model",
            "--port",
            "9000",
            "--darkmode",
            "--latex",
            "--context",
            "4096",
            "--temperature",
            "0.2",
            "--max-tokens",
            "64",
            "--gpu-count",
            "0",
        ]);
        let cfg = ServerConfig::from(&args);
        assert_eq!(args.port, Some(9000));
        assert_eq!(cfg.model, "some/model");
        assert_eq!(cfg.max_model_len, 4096);
        assert_eq!(cfg.max_tokens, 64);
        assert_eq!(cfg.gpu_count, 0);
        assert!(cfg.darkmode);
        assert!(cfg.latex);
    }

    #[test]
    fn missing_model_is_rejected() {
        assert!(Args::try_parse_from(["webserve"]).is_err());
    }
}
