//! In-process session state: conversation history and document revisions.

pub mod diff;
pub mod documents;
pub mod history;

pub use diff::{compute_diff, DiffConfig};
pub use documents::{DocumentStore, InMemoryDocumentStore};
pub use history::{trim_start, HistoryStore, InMemoryHistoryStore, DEFAULT_HISTORY_CAP};
