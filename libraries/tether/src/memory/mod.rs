//! In-process stand-ins for the collaborators the synchronizers depend on: a record store, an auth session and browser
//! history. They behave like the real things closely enough to drive the synchronizers in tests and demos, and they let
//! a test decide exactly when fetches resolve and which calls fail.

mod history;
mod session;
mod store;

pub use history::MemoryHistory;
pub use session::MemorySession;
pub use store::{MemoryCollection, MemoryStore};
