pub mod d2;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub use d2::D2Renderer;

/// Visual options passed through to the diagram renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStyle {
    pub pad: u32,
    pub sketch: bool,
    pub theme_id: i64,
    pub scale: f64,
}

/// One diagram to render; lives for a single dispatch.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: String,
    pub style: RenderStyle,
}

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Export,
    Rasterize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => write!(f, "compile"),
            Stage::Export => write!(f, "layout/export"),
            Stage::Rasterize => write!(f, "rasterize"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{stage}: {message}")]
    Stage { stage: Stage, message: String },
    #[error("rendering timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("rendering was cancelled")]
    Cancelled,
}

impl RenderError {
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        RenderError::Stage {
            stage,
            message: message.into(),
        }
    }
}

/// Turns diagram source into PNG bytes.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError>;
}

/// Runs the whole pipeline under one deadline. Work still in flight when the
/// deadline passes is dropped, which kills any spawned processes.
pub async fn render_with_timeout(
    renderer: &dyn Renderer,
    request: &RenderRequest,
    limit: Duration,
) -> Result<Vec<u8>, RenderError> {
    match tokio::time::timeout(limit, renderer.render(request)).await {
        Ok(result) => result,
        Err(_) => Err(RenderError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowRenderer;

    #[async_trait]
    impl Renderer for SlowRenderer {
        async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![1])
        }
    }

    struct FailingRenderer;

    #[async_trait]
    impl Renderer for FailingRenderer {
        async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::stage(Stage::Compile, "err: unexpected token"))
        }
    }

    fn request() -> RenderRequest {
        RenderRequest {
            source: "x -> y".to_string(),
            style: RenderStyle {
                pad: 40,
                sketch: false,
                theme_id: 0,
                scale: 1.0,
            },
        }
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_failure() {
        let limit = Duration::from_millis(50);
        let err = render_with_timeout(&SlowRenderer, &request(), limit)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Timeout(d) if d == limit));
    }

    #[test]
    fn test_timeout_message() {
        let err = RenderError::Timeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "rendering timed out after 60s");
    }

    #[tokio::test]
    async fn test_stage_error_passes_through() {
        let err = render_with_timeout(&FailingRenderer, &request(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "compile: err: unexpected token");
    }
}
