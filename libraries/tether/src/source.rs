//! The contract between the synchronizers and whatever talks to the remote store.
//!
//! A record source covers one resource type and can do exactly three things: fetch everything (optionally filtered),
//! fetch one record by id, and open a live subscription. The connection behind it is shared and owned elsewhere; we
//! only ever open and close logical subscriptions against it.

use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::data_model::{ChangeEvent, Record};
use crate::error::SourceError;

/// What a subscription listens to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every record of the resource type.
    All,
    /// One record.
    Record(String),
}

impl Scope {
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Record(scoped) => scoped == id,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("*"),
            Scope::Record(id) => f.write_str(id),
        }
    }
}

pub type EventHandler<R> = Rc<dyn Fn(ChangeEvent<R>)>;

pub trait RecordSource<R: Record> {
    /// Name of the resource type, used in errors and logs.
    fn resource(&self) -> &str;

    fn fetch_all(&self, filter: Option<&str>) -> LocalBoxFuture<'static, Result<Vec<R>, SourceError>>;

    /// Fails with [`SourceError::NotFound`] if there is no such record.
    fn fetch_one(&self, id: &str) -> LocalBoxFuture<'static, Result<R, SourceError>>;

    fn subscribe(
        &self,
        scope: Scope,
        handler: EventHandler<R>,
    ) -> LocalBoxFuture<'static, Result<Subscription, SourceError>>;
}

/// Hands out typed sources by resource name.
pub trait RecordStore {
    fn collection<R>(&self, name: &str) -> Rc<dyn RecordSource<R>>
    where
        R: Record + Serialize + DeserializeOwned;
}

/// An active live feed. Releasing it stops delivery; dropping it releases it too, so every exit path cleans up.
#[must_use = "dropping a Subscription releases it immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_release_runs_once() {
        let released = Rc::new(Cell::new(0));
        let counter = released.clone();
        let subscription = Subscription::new(move || counter.set(counter.get() + 1));

        subscription.release();
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let released = Rc::new(Cell::new(false));
        let flag = released.clone();
        {
            let _subscription = Subscription::new(move || flag.set(true));
        }
        assert!(released.get());
    }

    #[test]
    fn test_scope_matching() {
        assert!(Scope::All.matches("anything"));
        assert!(Scope::Record("a".to_string()).matches("a"));
        assert!(!Scope::Record("a".to_string()).matches("b"));
        assert_eq!(Scope::All.to_string(), "*");
    }
}
