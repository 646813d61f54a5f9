use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::render::RenderStyle;
use crate::secrets::InfisicalConfig;

const DEFAULT_POLLING_INTERVAL: u32 = 5;

/// Padding (in pixels) around rendered diagrams.
const RENDER_PADDING: u32 = 40;

/// Configuration file as written on disk (JSON, comments and trailing commas allowed).
#[derive(Debug, Deserialize, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub allowed_ids: Vec<String>,
    #[serde(default)]
    pub monitor_interval: i64,

    // d2 rendering style
    #[serde(default)]
    pub theme_id: i64,
    #[serde(default)]
    pub sketch: bool,

    #[serde(default)]
    pub is_verbose: bool,

    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub infisical: Option<InfisicalConfig>,

    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RendererConfig {
    /// Path to the `d2` binary
    #[serde(default = "default_d2_path")]
    pub d2_path: PathBuf,
    /// Layout engine passed to `d2 --layout`
    #[serde(default = "default_layout")]
    pub layout: String,
    #[serde(default)]
    pub rasterizer: RasterizerConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            d2_path: default_d2_path(),
            layout: default_layout(),
            rasterizer: RasterizerConfig::default(),
        }
    }
}

/// Command that reads SVG on stdin and writes PNG on stdout.
#[derive(Debug, Deserialize, Clone)]
pub struct RasterizerConfig {
    #[serde(default = "default_rasterizer_command")]
    pub command: String,
    #[serde(default = "default_rasterizer_args")]
    pub args: Vec<String>,
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            command: default_rasterizer_command(),
            args: default_rasterizer_args(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    #[serde(default = "default_render_seconds")]
    pub render_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: default_request_seconds(),
            render_seconds: default_render_seconds(),
        }
    }
}

fn default_d2_path() -> PathBuf {
    PathBuf::from("d2")
}

fn default_layout() -> String {
    "dagre".to_string()
}

fn default_rasterizer_command() -> String {
    "rsvg-convert".to_string()
}

fn default_rasterizer_args() -> Vec<String> {
    vec!["--format=png".to_string()]
}

fn default_request_seconds() -> u64 {
    10
}

fn default_render_seconds() -> u64 {
    60
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self> {
        json5::from_str(content).context("Failed to parse config file")
    }

    /// Returns the inline bot token, or fetches it from Infisical.
    pub async fn resolve_token(&self) -> Result<String> {
        if !self.bot_token.is_empty() {
            return Ok(self.bot_token.clone());
        }

        match &self.infisical {
            Some(infisical) => infisical.fetch_bot_token().await,
            None => anyhow::bail!("No bot token configured: set `bot_token` or `infisical`"),
        }
    }
}

/// Resolved, read-only process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub allowed_ids: HashSet<String>,
    pub poll_interval: Duration,
    pub theme_id: i64,
    pub sketch: bool,
    pub is_verbose: bool,
    pub bot_token: String,
    pub renderer: RendererConfig,
    pub request_timeout: Duration,
    pub render_timeout: Duration,
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let file = ConfigFile::parse(&content)?;
        let token = file.resolve_token().await?;

        Self::from_parts(file, token)
    }

    /// Builds the resolved configuration from a parsed file and its bot token.
    pub fn from_parts(file: ConfigFile, bot_token: String) -> Result<Self> {
        let bot_token = bot_token.trim().to_string();
        if bot_token.is_empty() {
            anyhow::bail!("Resolved bot token is empty");
        }

        let interval = u32::try_from(file.monitor_interval)
            .ok()
            .filter(|&secs| secs > 0)
            .unwrap_or(DEFAULT_POLLING_INTERVAL);

        Ok(Self {
            allowed_ids: file.allowed_ids.into_iter().collect(),
            poll_interval: Duration::from_secs(u64::from(interval)),
            theme_id: file.theme_id,
            sketch: file.sketch,
            is_verbose: file.is_verbose,
            bot_token,
            renderer: file.renderer,
            request_timeout: Duration::from_secs(file.timeouts.request_seconds.max(1)),
            render_timeout: Duration::from_secs(file.timeouts.render_seconds.max(1)),
        })
    }

    pub fn render_style(&self) -> RenderStyle {
        RenderStyle {
            pad: RENDER_PADDING,
            sketch: self.sketch,
            theme_id: self.theme_id,
            scale: 1.0,
        }
    }
}
