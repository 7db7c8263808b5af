use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::config::ServerConfig;

/// Global the UI scripts read their settings from.
pub const CONFIG_VARIABLE: &str = "config";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UiConfig {
    pub mode: ThemeMode,
    pub model: String,
    pub temperature: f32,
    pub latex: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
}

impl From<&ServerConfig> for UiConfig {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            mode: if cfg.darkmode {
                ThemeMode::Dark
            } else {
                ThemeMode::Light
            },
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            latex: cfg.latex,
        }
    }
}

impl UiConfig {
    /// `const config = {...}` with the object pretty-printed at four spaces.
    pub fn to_script(&self) -> serde_json::Result<String> {
        let mut buf = Vec::new();
        let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.serialize(&mut ser)?;
        // serde_json only ever writes UTF-8.
        let json = String::from_utf8_lossy(&buf);
        Ok(format!("const {CONFIG_VARIABLE} = {json}"))
    }
}
