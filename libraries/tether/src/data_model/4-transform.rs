//! # Transform
//! A transform is a pure function that post-processes a collection (filtering, sorting, trimming). The collection
//! synchronizer re-runs it after every mutation, including the fetch result, so derived views never drift from the raw data.
//! It receives an owned persistent vector, so there is nothing for it to hold on to that someone else could mutate.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use im::Vector;

use crate::data_model::Record;

pub struct Transform<R>(Option<Rc<dyn Fn(Vector<R>) -> Vector<R>>>);

impl<R> Clone for Transform<R> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<R> Default for Transform<R> {
    fn default() -> Self {
        Self(None)
    }
}

impl<R> fmt::Debug for Transform<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("Transform::identity"),
            Some(_) => f.write_str("Transform(..)"),
        }
    }
}

impl<R: Record> Transform<R> {
    pub fn identity() -> Self {
        Self(None)
    }

    pub fn new(f: impl Fn(Vector<R>) -> Vector<R> + 'static) -> Self {
        Self(Some(Rc::new(f)))
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_none()
    }

    pub fn apply(&self, items: Vector<R>) -> Vector<R> {
        match &self.0 {
            None => items,
            Some(f) => f(items),
        }
    }

    /// Run `self`, then `next` on its output.
    pub fn then(self, next: Transform<R>) -> Self {
        match (self.0, next.0) {
            (None, None) => Self(None),
            (Some(f), None) | (None, Some(f)) => Self(Some(f)),
            (Some(first), Some(second)) => Self::new(move |items| second(first(items))),
        }
    }

    pub fn filter(predicate: impl Fn(&R) -> bool + 'static) -> Self {
        Self::new(move |mut items| {
            items.retain(|item| predicate(item));
            items
        })
    }

    pub fn sort_by(compare: impl Fn(&R, &R) -> std::cmp::Ordering + 'static) -> Self {
        Self::new(move |mut items| {
            items.sort_by(|a, b| compare(a, b));
            items
        })
    }

    pub fn sort_by_key<K: Ord>(key: impl Fn(&R) -> K + 'static) -> Self {
        Self::sort_by(move |a, b| key(a).cmp(&key(b)))
    }

    pub fn take(count: usize) -> Self {
        Self::new(move |items| {
            if items.len() > count {
                items.take(count)
            } else {
                items
            }
        })
    }

    /// Keeps the first record seen for each id.
    pub fn dedup_by_id() -> Self {
        Self::new(|items: Vector<R>| {
            let mut seen = HashSet::new();
            items
                .into_iter()
                .filter(|item| seen.insert(item.id().to_string()))
                .collect()
        })
    }
}
