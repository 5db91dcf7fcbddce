//! # ChangeEvent
//! The store pushes one of three kinds of events for a resource. Delivery is asynchronous and unordered with respect to any
//! bulk fetch, but the store promises causal order per id (it never sends an update before the matching create).
//! We assume that promise rather than enforce it.

use im::Vector;
use serde::de::DeserializeOwned;

use crate::data_model::{Record, Transform};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent<R> {
    Created(R),
    Updated(R),
    Deleted(String),
}

impl<R: Record> ChangeEvent<R> {
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Created(record) | ChangeEvent::Updated(record) => record.id(),
            ChangeEvent::Deleted(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Created(_) => "create",
            ChangeEvent::Updated(_) => "update",
            ChangeEvent::Deleted(_) => "delete",
        }
    }

    /// Apply the event to a collection, then run the transform over the result.
    ///
    /// A create is appended even if a record with that id is already present. Use [`Transform::dedup_by_id`] if that matters.
    pub fn apply_to_collection(self, current: &Vector<R>, transform: &Transform<R>) -> Vector<R> {
        let next = match self {
            ChangeEvent::Created(record) => {
                let mut next = current.clone();
                next.push_back(record);
                next
            }
            ChangeEvent::Updated(record) => current
                .iter()
                .map(|item| {
                    if item.id() == record.id() {
                        record.clone()
                    } else {
                        item.clone()
                    }
                })
                .collect(),
            ChangeEvent::Deleted(id) => current.iter().filter(|item| item.id() != id.as_str()).cloned().collect(),
        };
        transform.apply(next)
    }

    /// A single-record view has no notion of a record appearing, so creates leave it alone.
    pub fn apply_to_single(self, current: Option<R>) -> Option<R> {
        match self {
            ChangeEvent::Updated(record) => Some(record),
            ChangeEvent::Deleted(_) => None,
            ChangeEvent::Created(_) => current,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Create,
    Update,
    Delete,
}

#[derive(serde::Deserialize)]
struct Message {
    action: Action,
    record: serde_json::Value,
}

#[derive(serde::Deserialize)]
struct DeletedRecord {
    id: String,
}

impl<R: Record + DeserializeOwned> ChangeEvent<R> {
    /// Decodes a realtime message of the form `{"action": "create", "record": {...}}`.
    /// Deletes carry the whole record on the wire, but only its id is kept.
    pub fn from_message(json: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let message = serde_json::from_value::<Message>(json.clone())?;
        match message.action {
            Action::Create => serde_json::from_value(message.record).map(ChangeEvent::Created),
            Action::Update => serde_json::from_value(message.record).map(ChangeEvent::Updated),
            Action::Delete => serde_json::from_value::<DeletedRecord>(message.record)
                .map(|deleted| ChangeEvent::Deleted(deleted.id)),
        }
    }
}
