//! This is a library for keeping local, observable state in step with a remote record store that pushes realtime change events.
//! It was created for the proxy admin console, so it doesn't include much that was not needed for that project.
//!
//! Syncing strategy:
//! 1. A synchronizer is activated for one resource type (a "collection" in the store), either for every record of that type or for a single record.
//! 2. On activation it issues a bulk fetch, and at the same time opens a live subscription to the same resource.
//! 3. Both paths write into the same `Observable`, so consumers never wait for the fetch and still see every live update.
//! 4. When the fetch resolves, its result replaces whatever is in the observable. Events that arrived before that are overwritten.
//! 5. Deactivating releases the subscription right away, and makes a still-running fetch a no-op.
//!
//! Everything runs on a single thread. State lives behind `Rc<RefCell<_>>`, and fetches are spawned onto a `LocalSpawn`.
//! We never hold a borrow across an `.await` or while calling a listener, so "already borrowed" panics can't happen.

#[cfg(feature = "memory")]
pub mod memory;

pub mod collection;
pub mod data_model;
pub mod error;
pub mod filter;
pub mod identity;
mod lifecycle;
pub mod navigation;
pub mod pending;
pub mod single;
pub mod source;

pub use collection::CollectionSync;
pub use data_model::{ChangeEvent, ListenerKey, Observable, Record, Transform, Watch};
pub use error::{SourceError, SyncError};
pub use identity::{Identity, IdentityObserver, Session};
pub use navigation::{History, Navigation, Route};
pub use pending::{FetchStatus, PendingFetch};
pub use single::SingleSync;
pub use source::{EventHandler, RecordSource, RecordStore, Scope, Subscription};
