// Hands loop events to whatever performs or relays the action.
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::agent_engine::state::LoopEvent;
use crate::errors::{BubbleError, BubbleResult};

#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn emit(&self, event: &LoopEvent) -> BubbleResult<()>;
}

/// One JSON object per line on any async writer (stdout in `bubble run`).
pub struct JsonLineSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLineSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> ActionSink for JsonLineSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&self, event: &LoopEvent) -> BubbleResult<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Forwards events into a channel; the bridge and tests consume the other end.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ActionSink for ChannelSink {
    async fn emit(&self, event: &LoopEvent) -> BubbleResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| BubbleError::Protocol("event receiver dropped".into()))
    }
}
