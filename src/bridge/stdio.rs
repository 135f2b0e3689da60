// Line-delimited JSON server for running as a subordinate process.
use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::agent_engine::engine::{Components, ResolutionLoop};
use crate::agent_engine::state::{IterationOutcome, LoopConfig};
use crate::bridge::protocol::{BridgeRequest, BridgeResponse, PROCESS_SCREENSHOT};
use crate::config::ProposalErrorPolicy;
use crate::errors::BubbleResult;
use crate::perception::screenshot::FileCapture;

/// Each request is one trigger. Consecutive requests with the same prompt
/// share a session and its history.
pub struct BridgeServer {
    components: Components,
    loop_config: LoopConfig,
    on_proposal_error: ProposalErrorPolicy,
    session: Option<ResolutionLoop>,
}

impl BridgeServer {
    pub fn new(components: Components, loop_config: LoopConfig, on_proposal_error: ProposalErrorPolicy) -> Self {
        Self {
            components,
            loop_config,
            on_proposal_error,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&ResolutionLoop> {
        self.session.as_ref()
    }

    /// `None` for blank lines, which get no response.
    pub async fn handle_line(&mut self, line: &str) -> Option<BridgeResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let request: BridgeRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                return Some(BridgeResponse::error("protocol", format!("Invalid JSON: {e}")));
            }
        };
        Some(self.handle_request(request).await)
    }

    pub async fn handle_request(&mut self, request: BridgeRequest) -> BridgeResponse {
        if request.action.as_deref() != Some(PROCESS_SCREENSHOT) {
            let action = request.action.as_deref().unwrap_or("null");
            return BridgeResponse::error("protocol", format!("Unknown action: {action}"));
        }
        let path = match request.screenshot_path {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => path,
            other => {
                let shown = other.map(|p| p.display().to_string()).unwrap_or_else(|| "None".into());
                return BridgeResponse::error("capture", format!("Screenshot file not found: {shown}"));
            }
        };

        let policy = self.on_proposal_error;
        let session = self.session_for(&request.prompt);
        let outcome = session.run_iteration(&FileCapture::new(&path)).await;
        let mut end_session = match session.should_stop() {
            Some(reason) => {
                tracing::warn!(reason = ?reason, "session limit reached, next request starts a new session");
                true
            }
            None => false,
        };

        let response = match outcome {
            Ok(IterationOutcome::Done) => {
                end_session = true;
                BridgeResponse::completed()
            }
            Ok(IterationOutcome::Resolved {
                step,
                proposed_action,
                grounding,
            }) => BridgeResponse::success(step, proposed_action, &grounding),
            Ok(IterationOutcome::Failed { error, .. }) => error.into(),
            Ok(IterationOutcome::ProposalFailed { error }) => {
                if session.proposal_error_is_fatal(&error.kind) {
                    tracing::error!(policy = ?policy, "malformed proposal ends the session");
                    end_session = true;
                }
                error.into()
            }
            Err(e) => e.report().into(),
        };
        if end_session {
            self.session = None;
        }
        response
    }

    fn session_for(&mut self, prompt: &str) -> &mut ResolutionLoop {
        let reuse = self.session.as_ref().is_some_and(|s| s.goal() == prompt);
        if !reuse {
            if let Some(previous) = self.session.take() {
                tracing::info!(session = %previous.session_id(), "prompt changed, new session");
            }
        }
        self.session.get_or_insert_with(|| {
            ResolutionLoop::new(
                prompt,
                self.components.clone(),
                self.loop_config.clone(),
                self.on_proposal_error,
            )
        })
    }

    /// Serve until the reader hits EOF or `shutdown` resolves, then announce shutdown.
    /// A request already being processed is finished before shutdown is honoured.
    pub async fn serve<R, W, S>(&mut self, reader: R, mut writer: W, shutdown: S) -> BubbleResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        let mut shutdown = std::pin::pin!(shutdown);
        tracing::info!("bridge ready");
        loop {
            let line = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                tracing::info!("request stream closed");
                break;
            };
            if let Some(response) = self.handle_line(&line).await {
                write_response(&mut writer, &response).await?;
            }
        }
        write_response(&mut writer, &BridgeResponse::shutdown()).await
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &BridgeResponse) -> BubbleResult<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
