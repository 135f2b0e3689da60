use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Producer half. Cheap to clone; fires are coalesced while one is pending.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

/// Consumer half, owned by the resolution loop.
pub struct TriggerListener {
    rx: mpsc::Receiver<()>,
}

/// Single-slot wakeup channel between a trigger source and the loop.
pub fn trigger_channel() -> (TriggerHandle, TriggerListener) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerHandle { tx }, TriggerListener { rx })
}

impl TriggerHandle {
    /// Returns false once the listener is gone.
    pub fn fire(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::debug!("trigger already pending, coalesced");
                true
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

impl TriggerListener {
    /// Suspend until the next trigger. `false` means every handle was dropped.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Drop triggers that arrived while an iteration was running.
    pub fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "discarded triggers fired mid-iteration");
        }
        dropped
    }
}

/// Fire once per input line until EOF; the handle is dropped at EOF so the
/// listener observes the source closing.
pub fn spawn_line_trigger<R>(reader: R, handle: TriggerHandle) -> tokio::task::JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(_)) => {
                    if !handle.fire() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("trigger input closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!("trigger input read failed: {e}");
                    break;
                }
            }
        }
    })
}
