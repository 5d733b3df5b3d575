use dashmap::DashMap;
use tracing::debug;

use lexi_core::ids::SessionId;
use lexi_core::messages::Message;

pub const DEFAULT_HISTORY_CAP: usize = 20;

/// Conversation log per session. Turns are appended as a unit so a reader
/// never observes half of a tool round.
pub trait HistoryStore: Send + Sync {
    /// The retained messages for a session. An unknown session starts empty.
    fn get(&self, session_id: &SessionId) -> Vec<Message>;

    /// Like `get`, but an unknown session is left untracked.
    fn snapshot(&self, session_id: &SessionId) -> Vec<Message>;

    /// Append every message of one turn, then apply the trim policy.
    fn append_turn(&self, session_id: &SessionId, messages: Vec<Message>);

    /// Drop the session's log. Returns whether it held any messages.
    fn clear(&self, session_id: &SessionId) -> bool;

    fn session_count(&self) -> usize;
}

/// Index of the first message to keep when `messages` is cut to `cap`.
///
/// Starts at the naive cutoff and moves forward past tool-result messages,
/// which would otherwise be orphaned from the tool_use that produced them.
/// Returns `messages.len()` when nothing after the cutoff may lead the log.
pub fn trim_start(messages: &[Message], cap: usize) -> usize {
    if messages.len() <= cap {
        return 0;
    }
    let naive = messages.len() - cap;
    messages[naive..]
        .iter()
        .position(|m| !m.starts_with_tool_result())
        .map_or(messages.len(), |offset| naive + offset)
}

pub struct InMemoryHistoryStore {
    sessions: DashMap<SessionId, Vec<Message>>,
    cap: usize,
}

impl InMemoryHistoryStore {
    pub fn new(cap: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            cap,
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn get(&self, session_id: &SessionId) -> Vec<Message> {
        self.sessions.entry(session_id.clone()).or_default().clone()
    }

    fn snapshot(&self, session_id: &SessionId) -> Vec<Message> {
        self.sessions
            .get(session_id)
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn append_turn(&self, session_id: &SessionId, messages: Vec<Message>) {
        let mut log = self.sessions.entry(session_id.clone()).or_default();
        log.extend(messages);

        let start = trim_start(&log, self.cap);
        if start > 0 {
            log.drain(..start);
            debug!(
                session_id = %session_id,
                dropped = start,
                retained = log.len(),
                "trimmed session history"
            );
        }
    }

    fn clear(&self, session_id: &SessionId) -> bool {
        self.sessions
            .remove(session_id)
            .is_some_and(|(_, log)| !log.is_empty())
    }

    fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
