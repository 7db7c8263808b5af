use anyhow::{anyhow, Context, Result};
use minijinja::{context, Environment, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::warn;

const CHAT_TEMPLATE_NAME: &str = "hf_chat_template";

/// Used when a model ships no chat template of its own.
pub const CHATML_TEMPLATE: &str = "{% for message in messages %}\
{{ '<|im_start|>' ~ message['role'] ~ '\\n' ~ message['content'] ~ '<|im_end|>\\n' }}\
{% endfor %}\
{% if add_generation_prompt %}{{ '<|im_start|>assistant\\n' }}{% endif %}";

/// One entry of the client's message list.
///
/// `content` may be a string or a list of parts, and any other field
/// (`name`, `tool_calls`, ...) is handed to the template untouched.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
            extra: Map::new(),
        }
    }
}

/// A compiled Hugging Face chat template.
pub struct ChatTemplate {
    env: Environment<'static>,
    bos_token: String,
    eos_token: String,
}

// ---------------------------------------------------------
// tokenizer_config.json
// ---------------------------------------------------------
#[derive(Deserialize, Default)]
struct TokenizerConfig {
    #[serde(default)]
    chat_template: Option<TemplateField>,
    #[serde(default)]
    bos_token: Option<TokenField>,
    #[serde(default)]
    eos_token: Option<TokenField>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateField {
    Single(String),
    Named(Vec<NamedTemplate>),
}

#[derive(Deserialize)]
struct NamedTemplate {
    name: String,
    template: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenField {
    Plain(String),
    Added { content: String },
}

impl TokenField {
    fn into_content(self) -> String {
        match self {
            TokenField::Plain(s) => s,
            TokenField::Added { content } => content,
        }
    }
}

impl TemplateField {
    fn into_source(self) -> Option<String> {
        match self {
            TemplateField::Single(s) => Some(s),
            TemplateField::Named(mut named) => {
                let idx = named.iter().position(|t| t.name == "default").unwrap_or(0);
                if named.is_empty() {
                    None
                } else {
                    Some(named.swap_remove(idx).template)
                }
            }
        }
    }
}

impl ChatTemplate {
    pub fn new(
        source: impl Into<String>,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
    ) -> Result<Self> {
        // Templates live for the whole process.
        let template_src: &'static str = Box::leak(source.into().into_boxed_str());

        let mut env = Environment::new();
        env.add_function("raise_exception", raise_exception);
        env.add_template(CHAT_TEMPLATE_NAME, template_src)
            .map_err(|err| anyhow!("failed to compile chat template: {err}"))?;

        Ok(Self {
            env,
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        })
    }

    pub fn chatml() -> Result<Self> {
        Self::new(CHATML_TEMPLATE, "", "<|im_end|>")
    }

    /// Reads `chat_template`, `bos_token` and `eos_token` from a Hugging Face
    /// `tokenizer_config.json`, falling back to ChatML when no template is set.
    pub fn from_tokenizer_config(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg: TokenizerConfig = serde_json::from_slice(&raw)
            .with_context(|| format!("invalid tokenizer config {}", path.display()))?;
        Self::from_config(cfg)
    }

    fn from_config(cfg: TokenizerConfig) -> Result<Self> {
        let bos = cfg.bos_token.map(TokenField::into_content).unwrap_or_default();
        let eos = cfg.eos_token.map(TokenField::into_content).unwrap_or_default();

        match cfg.chat_template.and_then(TemplateField::into_source) {
            Some(source) => Self::new(source, bos, eos),
            None => {
                warn!("model has no chat template, using ChatML");
                Self::new(CHATML_TEMPLATE, bos, eos)
            }
        }
    }

    /// Renders the conversation with the assistant generation prompt appended.
    pub fn render(&self, messages: &[ChatMessage]) -> Result<String, minijinja::Error> {
        self.env.get_template(CHAT_TEMPLATE_NAME)?.render(context! {
            messages => messages,
            bos_token => self.bos_token.as_str(),
            eos_token => self.eos_token.as_str(),
            add_generation_prompt => true,
        })
    }
}

fn raise_exception(msg: String) -> Result<String, minijinja::Error> {
    Err(minijinja::Error::new(ErrorKind::InvalidOperation, msg))
}
