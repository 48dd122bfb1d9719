//! Computer-use capability: dispatch UI actions and return deduplicated screenshots.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::registry::ToolSpec;
use crate::context::RunContext;
use crate::error::BatonError;
use crate::types::items::{ComputerAction, MouseButton, Point};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComputerEnvironment {
    Mac,
    Windows,
    Ubuntu,
    #[default]
    Browser,
}

/// A controllable screen.
#[async_trait]
pub trait Computer: Send + Sync {
    fn environment(&self) -> ComputerEnvironment;

    /// Screen size in pixels (width, height).
    fn dimensions(&self) -> (u32, u32);

    /// Capture the screen as PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, BatonError>;

    async fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<(), BatonError>;

    async fn double_click(&self, x: i32, y: i32) -> Result<(), BatonError>;

    async fn scroll(&self, x: i32, y: i32, scroll_x: i32, scroll_y: i32) -> Result<(), BatonError>;

    async fn type_text(&self, text: &str) -> Result<(), BatonError>;

    async fn wait(&self) -> Result<(), BatonError>;

    async fn move_to(&self, x: i32, y: i32) -> Result<(), BatonError>;

    async fn keypress(&self, keys: &[String]) -> Result<(), BatonError>;

    async fn drag(&self, path: &[Point]) -> Result<(), BatonError>;
}

/// Agent capability wrapping a [`Computer`].
#[derive(Clone)]
pub struct ComputerTool {
    computer: Arc<dyn Computer>,
}

impl std::fmt::Debug for ComputerTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputerTool")
            .field("environment", &self.computer.environment())
            .field("dimensions", &self.computer.dimensions())
            .finish()
    }
}

impl ComputerTool {
    pub const NAME: &'static str = "computer_use_preview";

    pub fn new(computer: Arc<dyn Computer>) -> Self {
        Self { computer }
    }

    pub fn spec(&self) -> ToolSpec {
        let (width, height) = self.computer.dimensions();
        ToolSpec::of_kind("computer", Self::NAME, "", serde_json::Value::Null).with_config(
            serde_json::json!({
                "environment": self.computer.environment(),
                "display_width": width,
                "display_height": height,
            }),
        )
    }

    /// Perform `action`, then capture the screen.
    ///
    /// A frame already sent during this run is returned as a hash reference
    /// instead of being re-encoded.
    pub async fn run(
        &self,
        action: &ComputerAction,
        ctx: &RunContext,
    ) -> Result<serde_json::Value, BatonError> {
        let computer = &self.computer;
        match action {
            ComputerAction::Click { x, y, button } => computer.click(*x, *y, *button).await?,
            ComputerAction::DoubleClick { x, y } => computer.double_click(*x, *y).await?,
            ComputerAction::Drag { path } => computer.drag(path).await?,
            ComputerAction::Keypress { keys } => computer.keypress(keys).await?,
            ComputerAction::Move { x, y } => computer.move_to(*x, *y).await?,
            ComputerAction::Screenshot => {}
            ComputerAction::Scroll {
                x,
                y,
                scroll_x,
                scroll_y,
            } => computer.scroll(*x, *y, *scroll_x, *scroll_y).await?,
            ComputerAction::Type { text } => computer.type_text(text).await?,
            ComputerAction::Wait => computer.wait().await?,
        }

        let frame = computer.screenshot().await?;
        let hash = frame_hash(&frame);
        if ctx.remember_screenshot(&hash) {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&frame);
            Ok(serde_json::json!({
                "type": "computer_screenshot",
                "image_url": format!("data:image/png;base64,{encoded}"),
                "screenshot_hash": hash,
            }))
        } else {
            tracing::debug!(hash = %hash, "Screenshot unchanged, sending reference");
            Ok(serde_json::json!({
                "type": "computer_screenshot_ref",
                "screenshot_hash": hash,
            }))
        }
    }
}

fn frame_hash(frame: &[u8]) -> String {
    Sha256::digest(frame)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeScreen {
        frames: Mutex<Vec<Vec<u8>>>,
        clicks: AtomicUsize,
    }

    #[async_trait]
    impl Computer for FakeScreen {
        fn environment(&self) -> ComputerEnvironment {
            ComputerEnvironment::Browser
        }
        fn dimensions(&self) -> (u32, u32) {
            (1024, 768)
        }
        async fn screenshot(&self) -> Result<Vec<u8>, BatonError> {
            let mut frames = self.frames.lock().expect("lock should succeed");
            Ok(if frames.len() > 1 {
                frames.remove(0)
            } else {
                frames[0].clone()
            })
        }
        async fn click(&self, _x: i32, _y: i32, _b: MouseButton) -> Result<(), BatonError> {
            self.clicks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn double_click(&self, _x: i32, _y: i32) -> Result<(), BatonError> {
            Ok(())
        }
        async fn scroll(&self, _x: i32, _y: i32, _sx: i32, _sy: i32) -> Result<(), BatonError> {
            Ok(())
        }
        async fn type_text(&self, _text: &str) -> Result<(), BatonError> {
            Ok(())
        }
        async fn wait(&self) -> Result<(), BatonError> {
            Ok(())
        }
        async fn move_to(&self, _x: i32, _y: i32) -> Result<(), BatonError> {
            Ok(())
        }
        async fn keypress(&self, _keys: &[String]) -> Result<(), BatonError> {
            Ok(())
        }
        async fn drag(&self, _path: &[Point]) -> Result<(), BatonError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn identical_frames_are_sent_once_per_run() {
        let screen = Arc::new(FakeScreen {
            frames: Mutex::new(vec![b"frame-a".to_vec(), b"frame-a".to_vec(), b"frame-b".to_vec()]),
            ..Default::default()
        });
        let tool = ComputerTool::new(screen.clone());
        let ctx = RunContext::new();

        let first = tool
            .run(&ComputerAction::Click { x: 1, y: 2, button: MouseButton::Left }, &ctx)
            .await
            .expect("click should succeed");
        let second = tool
            .run(&ComputerAction::Screenshot, &ctx)
            .await
            .expect("screenshot should succeed");
        let third = tool
            .run(&ComputerAction::Wait, &ctx)
            .await
            .expect("wait should succeed");

        assert_eq!(first["type"], "computer_screenshot");
        assert!(first["image_url"]
            .as_str()
            .is_some_and(|url| url.starts_with("data:image/png;base64,")));
        assert_eq!(second["type"], "computer_screenshot_ref");
        assert_eq!(second["screenshot_hash"], first["screenshot_hash"]);
        assert_eq!(third["type"], "computer_screenshot");
        assert_eq!(screen.clicks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_fresh_run_resends_the_frame() {
        let screen = Arc::new(FakeScreen {
            frames: Mutex::new(vec![b"same".to_vec()]),
            ..Default::default()
        });
        let tool = ComputerTool::new(screen);

        let a = tool
            .run(&ComputerAction::Screenshot, &RunContext::new())
            .await
            .expect("screenshot should succeed");
        let b = tool
            .run(&ComputerAction::Screenshot, &RunContext::new())
            .await
            .expect("screenshot should succeed");

        assert_eq!(a["type"], "computer_screenshot");
        assert_eq!(b["type"], "computer_screenshot");
    }
}
