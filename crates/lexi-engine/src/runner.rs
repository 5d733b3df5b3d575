use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lexi_core::errors::GatewayError;
use lexi_core::events::TurnEvent;
use lexi_core::ids::{SessionId, TurnId};
use lexi_core::messages::{ContentBlock, Message, ToolCall};
use lexi_core::provider::{LlmProvider, ModelRequest, StreamOptions};
use lexi_core::tools::ToolContext;
use lexi_llm::{decode, DecodedEvent, DecodedRound};
use lexi_store::{DocumentStore, HistoryStore};

use crate::error::EngineError;
use crate::prompt::SYSTEM_PROMPT;
use crate::registry::{ToolOutcome, ToolRegistry};
use crate::structured;

pub const DEFAULT_MAX_ROUNDS: u32 = 10;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on model calls in one turn.
    pub max_rounds: u32,
    pub system_prompt: String,
    pub stream_options: StreamOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            system_prompt: SYSTEM_PROMPT.to_string(),
            stream_options: StreamOptions::default(),
        }
    }
}

/// Result of a turn that committed.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    /// Text of the final round.
    pub text: String,
    pub rounds: u32,
    /// Messages appended to the session history.
    pub committed: usize,
    /// Document versions recorded during the turn.
    pub artifacts: Vec<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionCleared {
    pub history: bool,
    pub documents: bool,
}

/// Forwards turn events to one client. A dropped receiver is not a
/// cancellation: the turn keeps running and later events are discarded.
struct EventSink<'a> {
    tx: &'a mpsc::Sender<TurnEvent>,
    closed: bool,
}

impl<'a> EventSink<'a> {
    fn new(tx: &'a mpsc::Sender<TurnEvent>) -> Self {
        Self { tx, closed: false }
    }

    async fn emit(&mut self, event: TurnEvent) {
        if self.closed {
            return;
        }
        if self.tx.send(event).await.is_err() {
            self.closed = true;
            warn!("event receiver dropped, finishing turn without streaming");
        }
    }
}

/// Runs turns: streams model rounds, dispatches tool calls, records
/// document versions and commits each completed turn to history.
pub struct TurnOrchestrator {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    history: Arc<dyn HistoryStore>,
    documents: Arc<dyn DocumentStore>,
    config: EngineConfig,
    session_locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        history: Arc<dyn HistoryStore>,
        documents: Arc<dyn DocumentStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            history,
            documents,
            config,
            session_locks: DashMap::new(),
        }
    }

    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// The mutex that serializes turns for one session.
    fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.session_locks.entry(session_id.clone()).or_default().clone()
    }

    /// Drop a session's history and documents once no turn is running for it.
    pub async fn clear_session(&self, session_id: &SessionId) -> SessionCleared {
        let cleared = {
            let lock = self.session_lock(session_id);
            let _guard = lock.lock().await;
            SessionCleared {
                history: self.history.clear(session_id),
                documents: self.documents.clear(session_id),
            }
        };
        // Keep the entry while another turn still holds or waits on it.
        self.session_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
        info!(session_id = %session_id, ?cleared, "session cleared");
        cleared
    }

    /// One-shot extraction of `fields` from `source_text` as a JSON object.
    pub async fn extract(&self, source_text: &str, fields: &[String]) -> Result<Value, EngineError> {
        structured::extract_fields(
            self.provider.as_ref(),
            &self.config.stream_options,
            source_text,
            fields,
        )
        .await
    }

    /// Run one user turn to completion.
    ///
    /// Every turn ends with exactly one terminal event on `events`: `Done`
    /// on success, `Error` otherwise. History is only written when the turn
    /// succeeds, and then all of the turn's messages are appended at once.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn run_turn(
        &self,
        session_id: &SessionId,
        message: String,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut sink = EventSink::new(events);

        let lock = self.session_lock(session_id);
        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let error = EngineError::Aborted;
                sink.emit(error_event(&error)).await;
                return Err(error);
            }
            guard = lock.lock() => guard,
        };

        let turn_id = TurnId::new();
        sink.emit(TurnEvent::TurnStart {
            session_id: session_id.clone(),
            turn_id: turn_id.clone(),
        })
        .await;

        match self.drive(session_id, &turn_id, message, &mut sink, cancel).await {
            Ok(outcome) => {
                info!(
                    turn_id = %turn_id,
                    rounds = outcome.rounds,
                    committed = outcome.committed,
                    "turn complete"
                );
                sink.emit(TurnEvent::Done {
                    turn_id,
                    rounds: outcome.rounds,
                })
                .await;
                Ok(outcome)
            }
            Err(error) => {
                warn!(turn_id = %turn_id, kind = error.kind(), error = %error, "turn failed");
                sink.emit(error_event(&error)).await;
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        session_id: &SessionId,
        turn_id: &TurnId,
        message: String,
        sink: &mut EventSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut messages = self.history.get(session_id);
        let history_len = messages.len();
        messages.push(Message::user_text(message));

        let tools = self.registry.definitions();
        let mut artifacts = Vec::new();
        let mut round = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }
            if round >= self.config.max_rounds {
                return Err(EngineError::MaxRoundsExceeded(self.config.max_rounds));
            }
            round += 1;

            // 1. Stream one model response
            let request = ModelRequest {
                system: self.config.system_prompt.clone(),
                tools: tools.clone(),
                messages: messages.clone(),
            };
            let decoded = self.stream_round(&request, sink, cancel).await?;
            let stop_reason = decoded.stop_reason();
            debug!(round, ?stop_reason, usage = ?decoded.usage, "round decoded");
            sink.emit(TurnEvent::RoundComplete { round, stop_reason }).await;

            // 2. Final round: commit the turn
            if !decoded.requests_tools() {
                let text = decoded.text();
                let total = decoded.content.len();
                let content: Vec<ContentBlock> =
                    decoded.content.into_iter().filter(|b| !b.is_tool_use()).collect();
                if content.len() < total {
                    warn!(dropped = total - content.len(), "discarding unresolved tool_use blocks");
                }
                if !content.is_empty() {
                    messages.push(Message::assistant(content));
                }

                let turn_messages = messages.split_off(history_len);
                let committed = turn_messages.len();
                self.history.append_turn(session_id, turn_messages);

                return Ok(TurnOutcome {
                    turn_id: turn_id.clone(),
                    text,
                    rounds: round,
                    committed,
                    artifacts,
                });
            }

            // 3. Tool round: run every call in order, then answer them together.
            // Results from the last allowed round could never reach the model.
            if round >= self.config.max_rounds {
                return Err(EngineError::MaxRoundsExceeded(self.config.max_rounds));
            }
            let calls = decoded.tool_calls();
            messages.push(Message::assistant(decoded.content));

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                if cancel.is_cancelled() {
                    return Err(EngineError::Aborted);
                }
                let outcome = self.run_tool(session_id, call, sink, cancel).await;
                if let Some(body) = &outcome.artifact {
                    artifacts.push(self.record_artifact(session_id, body.clone(), sink).await);
                }
                results.push(outcome.to_block());
            }
            messages.push(Message::tool_results(results));
        }
    }

    async fn stream_round(
        &self,
        request: &ModelRequest,
        sink: &mut EventSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<DecodedRound, EngineError> {
        let events = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Aborted),
            stream = self.provider.stream(request, &self.config.stream_options) => stream?,
        };

        let decoded = decode(events);
        futures::pin_mut!(decoded);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Aborted),
                next = decoded.next() => next,
            };
            match next {
                Some(Ok(DecodedEvent::TextDelta(delta))) => {
                    sink.emit(TurnEvent::TextDelta { delta }).await;
                }
                Some(Ok(DecodedEvent::ToolUseStarted { id, name })) => {
                    sink.emit(TurnEvent::ToolStart { tool_use_id: id, name }).await;
                }
                Some(Ok(DecodedEvent::ToolUseReady(call))) => {
                    debug!(tool = %call.name, tool_use_id = %call.id, "tool input complete");
                }
                Some(Ok(DecodedEvent::Finished(round))) => return Ok(round),
                Some(Err(error)) => return Err(error.into()),
                None => {
                    return Err(GatewayError::StreamInterrupted("stream ended without a result".into()).into())
                }
            }
        }
    }

    async fn run_tool(
        &self,
        session_id: &SessionId,
        call: &ToolCall,
        sink: &mut EventSink<'_>,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        sink.emit(TurnEvent::ToolExecuting {
            tool_use_id: call.id.clone(),
            name: call.name.clone(),
        })
        .await;

        let ctx = ToolContext {
            session_id: session_id.clone(),
            tool_use_id: call.id.clone(),
            cancel: cancel.child_token(),
        };
        let outcome = self.registry.dispatch(call, &ctx).await;

        sink.emit(TurnEvent::ToolResult {
            tool_use_id: outcome.tool_use_id.clone(),
            name: outcome.name.clone(),
            is_error: outcome.is_error,
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
        })
        .await;
        outcome
    }

    async fn record_artifact(&self, session_id: &SessionId, body: String, sink: &mut EventSink<'_>) -> u32 {
        let recorded = self.documents.add_version(session_id, body);
        sink.emit(TurnEvent::ArtifactUpdate {
            version: recorded.version,
            content: recorded.content,
            created_at: recorded.created_at,
        })
        .await;
        if let Some(diff) = recorded.diff {
            sink.emit(TurnEvent::ArtifactDiff {
                version: recorded.version,
                diff,
            })
            .await;
        }
        recorded.version
    }
}

fn error_event(error: &EngineError) -> TurnEvent {
    TurnEvent::Error {
        kind: error.kind().to_string(),
        message: error.to_string(),
    }
}
