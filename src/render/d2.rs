use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{RenderError, RenderRequest, RenderStyle, Renderer, Stage};
use crate::config::{RasterizerConfig, RendererConfig};

const SOURCE_FILE: &str = "input.d2";
const SVG_FILE: &str = "output.svg";

/// Renders diagrams with the `d2` CLI and an external SVG rasterizer.
///
/// Every call works in its own scratch directory and starts its own
/// rasterizer process; nothing is shared between requests.
pub struct D2Renderer {
    config: RendererConfig,
}

impl D2Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    async fn compile(&self, source: &Path) -> Result<(), RenderError> {
        let mut cmd = Command::new(&self.config.d2_path);
        cmd.arg("validate").arg(source);
        run(&mut cmd, Stage::Compile).await
    }

    async fn export(
        &self,
        source: &Path,
        svg: &Path,
        style: &RenderStyle,
    ) -> Result<Vec<u8>, RenderError> {
        let mut cmd = Command::new(&self.config.d2_path);
        cmd.arg(format!("--layout={}", self.config.layout))
            .arg(format!("--theme={}", style.theme_id))
            .arg(format!("--pad={}", style.pad))
            .arg(format!("--scale={}", style.scale));
        if style.sketch {
            cmd.arg("--sketch");
        }
        cmd.arg(source).arg(svg);
        run(&mut cmd, Stage::Export).await?;

        let bytes = tokio::fs::read(svg).await.map_err(|e| {
            RenderError::stage(Stage::Export, format!("failed to read {}: {}", SVG_FILE, e))
        })?;
        if bytes.is_empty() {
            return Err(RenderError::stage(Stage::Export, "d2 produced an empty SVG"));
        }
        Ok(bytes)
    }

    async fn rasterize(&self, svg: &[u8]) -> Result<Vec<u8>, RenderError> {
        let mut engine = RasterEngine::acquire(&self.config.rasterizer)?;
        let result = engine.convert(svg).await;
        engine.release().await;
        result
    }
}

#[async_trait]
impl Renderer for D2Renderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        let workdir = tempfile::tempdir().map_err(|e| {
            RenderError::stage(
                Stage::Compile,
                format!("failed to create scratch directory: {}", e),
            )
        })?;
        let source = workdir.path().join(SOURCE_FILE);
        let svg_path = workdir.path().join(SVG_FILE);

        tokio::fs::write(&source, &request.source)
            .await
            .map_err(|e| {
                RenderError::stage(Stage::Compile, format!("failed to write source: {}", e))
            })?;

        self.compile(&source).await?;
        let svg = self.export(&source, &svg_path, &request.style).await?;
        let png = self.rasterize(&svg).await?;

        debug!(
            "Rendered {} bytes of source into {} bytes of PNG",
            request.source.len(),
            png.len()
        );
        Ok(png)
    }
}

/// Runs a pipeline command to completion; stderr becomes the failure message.
async fn run(command: &mut Command, stage: Stage) -> Result<(), RenderError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RenderError::stage(stage, format!("failed to run {}: {}", program, e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("{} exited with {}", program, output.status)
    } else {
        stderr
    };
    Err(RenderError::stage(stage, message))
}

/// A rasterizer process owned by exactly one render call.
///
/// The process is killed on drop if it is still running, so a timed out or
/// cancelled render cannot leave it behind.
struct RasterEngine {
    child: Child,
    command: String,
}

impl RasterEngine {
    fn acquire(config: &RasterizerConfig) -> Result<Self, RenderError> {
        let child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RenderError::stage(
                    Stage::Rasterize,
                    format!("failed to start {}: {}", config.command, e),
                )
            })?;

        debug!("Started rasterizer '{}' (pid {:?})", config.command, child.id());

        Ok(Self {
            child,
            command: config.command.clone(),
        })
    }

    async fn convert(&mut self, svg: &[u8]) -> Result<Vec<u8>, RenderError> {
        let fail = |message: String| RenderError::stage(Stage::Rasterize, message);

        let mut stdin = self
            .child
            .stdin
            .take()
            .ok_or_else(|| fail("rasterizer stdin is not available".to_string()))?;
        let mut stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| fail("rasterizer stdout is not available".to_string()))?;
        let mut stderr = self
            .child
            .stderr
            .take()
            .ok_or_else(|| fail("rasterizer stderr is not available".to_string()))?;

        // Feed stdin while draining both pipes so a chatty process cannot block.
        let write = async move {
            stdin.write_all(svg).await?;
            stdin.shutdown().await
        };
        let mut png = Vec::new();
        let mut errors = Vec::new();
        let (written, read, _) = tokio::join!(
            write,
            stdout.read_to_end(&mut png),
            stderr.read_to_end(&mut errors)
        );

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| fail(format!("failed to wait for {}: {}", self.command, e)))?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&errors).trim().to_string();
            return Err(fail(if stderr.is_empty() {
                format!("{} exited with {}", self.command, status)
            } else {
                stderr
            }));
        }
        written.map_err(|e| fail(format!("failed to write SVG: {}", e)))?;
        read.map_err(|e| fail(format!("failed to read PNG: {}", e)))?;

        if png.is_empty() {
            return Err(fail(format!("{} produced no output", self.command)));
        }
        Ok(png)
    }

    async fn release(mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill().await {
                warn!("Failed to stop rasterizer '{}': {}", self.command, e);
            }
        }
    }
}

impl Drop for RasterEngine {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.start_kill();
        }
    }
}
