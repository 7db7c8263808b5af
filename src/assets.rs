use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files served by the UI. All of them must exist at startup.
pub const STATIC_FILES: &[&str] = &["index.html", "main.css", "display.js", "stream.js"];

/// Static UI assets, read once and kept in memory.
#[derive(Debug, Clone)]
pub struct StaticAssets {
    files: HashMap<&'static str, String>,
}

impl StaticAssets {
    /// The `static/` directory shipped with the running executable.
    pub fn default_dir() -> Result<PathBuf> {
        let exe = env::current_exe().context("failed to locate the webserve executable")?;
        let start = exe.parent().unwrap_or(exe.as_path());
        Self::find_dir(start).ok_or_else(|| {
            anyhow!(
                "no static/ directory with the UI files beside {} or its parents",
                exe.display()
            )
        })
    }

    /// First `static/` holding `index.html` in `start` or one of its ancestors.
    ///
    /// Covers an installed layout (`bin/webserve` + `bin/static/`) as well as
    /// `target/<profile>/webserve` run from a source checkout.
    pub fn find_dir(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join("static"))
            .find(|dir| dir.join(STATIC_FILES[0]).is_file())
    }

    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = HashMap::with_capacity(STATIC_FILES.len());

        for &name in STATIC_FILES {
            let path = dir.join(name);
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read static asset {}", path.display()))?;
            debug!(file = name, bytes = content.len(), "static asset loaded");
            files.insert(name, content);
        }

        Ok(Self { files })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Content of a file from [`STATIC_FILES`]; empty for anything else.
    pub fn file(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }
}
