use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use futures::FutureExt as _;
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::data_model::{ChangeEvent, Record};
use crate::error::SourceError;
use crate::filter::Filter;
use crate::source::{EventHandler, RecordSource, RecordStore, Scope, Subscription};

/// A record as the store keeps it: its id plus the JSON document.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(try_from = "serde_json::Value")]
struct Document {
    id: String,
    body: serde_json::Value,
}

impl Record for Document {
    fn id(&self) -> &str {
        &self.id
    }
}

impl TryFrom<serde_json::Value> for Document {
    type Error = String;

    fn try_from(body: serde_json::Value) -> Result<Self, Self::Error> {
        let id = body
            .get("id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| "record has no string `id` field".to_string())?
            .to_string();
        Ok(Document { id, body })
    }
}

type Deliver = Rc<dyn Fn(&ChangeEvent<Document>)>;

struct Subscriber {
    scope: Scope,
    deliver: Deliver,
}

#[derive(Default)]
struct Table {
    documents: Vec<Document>,
    subscribers: slotmap::SlotMap<slotmap::DefaultKey, Subscriber>,
    fail_next_fetch: Option<SourceError>,
    fail_next_subscribe: Option<SourceError>,
}

#[derive(Default)]
struct StoreState {
    tables: HashMap<String, Table>,
    hold_fetches: bool,
    held: Vec<oneshot::Sender<()>>,
}

/// A record store that lives in memory. Writes push change events to matching subscribers synchronously, the way the
/// real store would push them over its realtime channel.
///
/// Fetches compute their result when they are issued. With [`MemoryStore::hold_fetches`] the result is only handed
/// back once [`MemoryStore::release_fetches`] is called, which is how tests line up events against an in-flight fetch.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Rc<RefCell<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A typed handle on one collection, for writes and for use as a [`RecordSource`].
    pub fn table<R>(&self, name: &str) -> MemoryCollection<R>
    where
        R: Record + Serialize + DeserializeOwned,
    {
        MemoryCollection {
            store: self.clone(),
            name: name.to_string(),
            _record: PhantomData,
        }
    }

    pub fn hold_fetches(&self) {
        self.state.borrow_mut().hold_fetches = true;
    }

    /// Lets every held fetch resolve, and stops holding new ones.
    pub fn release_fetches(&self) {
        let held = {
            let mut state = self.state.borrow_mut();
            state.hold_fetches = false;
            std::mem::take(&mut state.held)
        };
        log::debug!("Releasing {} held fetches", held.len());
        for gate in held {
            // a dropped receiver means the fetch future itself was dropped
            let _ = gate.send(());
        }
    }

    pub fn fail_next_fetch(&self, collection: &str, error: SourceError) {
        self.with_table(collection, |table| table.fail_next_fetch = Some(error));
    }

    pub fn fail_next_subscribe(&self, collection: &str, error: SourceError) {
        self.with_table(collection, |table| table.fail_next_subscribe = Some(error));
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.with_table(collection, |table| table.subscribers.len())
    }

    /// Applies a realtime message (`{"action": ..., "record": ...}`) as if the remote store had sent it.
    pub fn apply_message(&self, collection: &str, message: &serde_json::Value) -> Result<(), SourceError> {
        let event = ChangeEvent::<Document>::from_message(message)
            .map_err(|e| SourceError::Rejected(format!("malformed message: {e}")))?;
        match event {
            ChangeEvent::Created(document) => self.insert_document(collection, document),
            ChangeEvent::Updated(document) => self.update_document(collection, document),
            ChangeEvent::Deleted(id) => self.delete_document(collection, &id),
        }
    }

    fn with_table<O>(&self, collection: &str, f: impl FnOnce(&mut Table) -> O) -> O {
        let mut state = self.state.borrow_mut();
        f(state.tables.entry(collection.to_string()).or_default())
    }

    fn insert_document(&self, collection: &str, document: Document) -> Result<(), SourceError> {
        self.with_table(collection, |table| {
            if table.documents.iter().any(|d| d.id == document.id) {
                return Err(SourceError::Rejected(format!(
                    "{collection} record {} already exists",
                    document.id
                )));
            }
            table.documents.push(document.clone());
            Ok(())
        })?;
        self.publish(collection, ChangeEvent::Created(document));
        Ok(())
    }

    fn update_document(&self, collection: &str, document: Document) -> Result<(), SourceError> {
        self.with_table(collection, |table| {
            let existing = table
                .documents
                .iter_mut()
                .find(|d| d.id == document.id)
                .ok_or_else(|| SourceError::NotFound(document.id.clone()))?;
            *existing = document.clone();
            Ok(())
        })?;
        self.publish(collection, ChangeEvent::Updated(document));
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> Result<(), SourceError> {
        self.with_table(collection, |table| {
            let before = table.documents.len();
            table.documents.retain(|d| d.id != id);
            if table.documents.len() == before {
                Err(SourceError::NotFound(id.to_string()))
            } else {
                Ok(())
            }
        })?;
        self.publish(collection, ChangeEvent::Deleted(id.to_string()));
        Ok(())
    }

    fn publish(&self, collection: &str, event: ChangeEvent<Document>) {
        let targets: Vec<Deliver> = self.with_table(collection, |table| {
            table
                .subscribers
                .values()
                .filter(|subscriber| subscriber.scope.matches(event.id()))
                .map(|subscriber| subscriber.deliver.clone())
                .collect()
        });
        log::debug!(
            "Delivering {} event for {collection} record {} to {} subscribers",
            event.kind(),
            event.id(),
            targets.len()
        );
        for deliver in targets {
            deliver(&event);
        }
    }

    fn gate(&self) -> Option<oneshot::Receiver<()>> {
        let mut state = self.state.borrow_mut();
        if !state.hold_fetches {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        state.held.push(sender);
        Some(receiver)
    }

    fn respond<T: 'static>(&self, result: Result<T, SourceError>) -> LocalBoxFuture<'static, Result<T, SourceError>> {
        let gate = self.gate();
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            result
        }
        .boxed_local()
    }
}

impl RecordStore for MemoryStore {
    fn collection<R>(&self, name: &str) -> Rc<dyn RecordSource<R>>
    where
        R: Record + Serialize + DeserializeOwned,
    {
        Rc::new(self.table::<R>(name))
    }
}

fn decode<R: DeserializeOwned>(collection: &str, document: &Document) -> Result<R, SourceError> {
    serde_json::from_value(document.body.clone())
        .inspect_err(|e| log::error!("Error deserializing {collection} record {}: {e:?}", document.id))
        .map_err(|e| SourceError::Rejected(e.to_string()))
}

fn encode<R: Record + Serialize>(record: &R) -> Result<Document, SourceError> {
    let body = serde_json::to_value(record).map_err(|e| SourceError::Rejected(e.to_string()))?;
    Ok(Document {
        id: record.id().to_string(),
        body,
    })
}

/// One collection of a [`MemoryStore`], typed.
pub struct MemoryCollection<R> {
    store: MemoryStore,
    name: String,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for MemoryCollection<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record + Serialize + DeserializeOwned> MemoryCollection<R> {
    pub fn insert(&self, record: R) -> Result<(), SourceError> {
        self.store.insert_document(&self.name, encode(&record)?)
    }

    /// Mints a fresh id the way the store does and inserts the record built from it.
    pub fn create_with(&self, build: impl FnOnce(String) -> R) -> Result<R, SourceError> {
        let record = build(eyedee::get_record_id());
        self.insert(record.clone())?;
        Ok(record)
    }

    pub fn update(&self, record: R) -> Result<(), SourceError> {
        self.store.update_document(&self.name, encode(&record)?)
    }

    pub fn delete(&self, id: &str) -> Result<(), SourceError> {
        self.store.delete_document(&self.name, id)
    }

    pub fn len(&self) -> usize {
        self.store.with_table(&self.name, |table| table.documents.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn query(&self, filter: Option<&str>) -> Result<Vec<R>, SourceError> {
        if let Some(error) = self.store.with_table(&self.name, |table| table.fail_next_fetch.take()) {
            return Err(error);
        }
        let filter = match filter {
            Some(expression) => Filter::parse(expression)
                .map_err(|e| SourceError::Rejected(format!("invalid filter {expression:?}: {e}")))?,
            None => Filter::Always,
        };
        let documents: Vec<Document> = self.store.with_table(&self.name, |table| {
            table
                .documents
                .iter()
                .filter(|document| filter.matches(&document.body))
                .cloned()
                .collect()
        });
        documents
            .iter()
            .map(|document| decode(&self.name, document))
            .collect()
    }

    fn find(&self, id: &str) -> Result<R, SourceError> {
        if let Some(error) = self.store.with_table(&self.name, |table| table.fail_next_fetch.take()) {
            return Err(error);
        }
        let document = self.store.with_table(&self.name, |table| {
            table.documents.iter().find(|document| document.id == id).cloned()
        });
        match document {
            Some(document) => decode(&self.name, &document),
            None => Err(SourceError::NotFound(id.to_string())),
        }
    }
}

impl<R: Record + Serialize + DeserializeOwned> RecordSource<R> for MemoryCollection<R> {
    fn resource(&self) -> &str {
        &self.name
    }

    fn fetch_all(&self, filter: Option<&str>) -> LocalBoxFuture<'static, Result<Vec<R>, SourceError>> {
        self.store.respond(self.query(filter))
    }

    fn fetch_one(&self, id: &str) -> LocalBoxFuture<'static, Result<R, SourceError>> {
        self.store.respond(self.find(id))
    }

    fn subscribe(
        &self,
        scope: Scope,
        handler: EventHandler<R>,
    ) -> LocalBoxFuture<'static, Result<Subscription, SourceError>> {
        let failure = self
            .store
            .with_table(&self.name, |table| table.fail_next_subscribe.take());
        if let Some(error) = failure {
            return futures::future::ready(Err(error)).boxed_local();
        }

        let name = self.name.clone();
        let deliver: Deliver = Rc::new(move |event: &ChangeEvent<Document>| {
            let typed = match event {
                ChangeEvent::Created(document) => decode(&name, document).map(ChangeEvent::Created),
                ChangeEvent::Updated(document) => decode(&name, document).map(ChangeEvent::Updated),
                ChangeEvent::Deleted(id) => Ok(ChangeEvent::Deleted(id.clone())),
            };
            // decode already logged the failure, and a bad document must not stop delivery to others
            if let Ok(event) = typed {
                handler(event);
            }
        });

        let key = self.store.with_table(&self.name, |table| {
            table.subscribers.insert(Subscriber {
                scope: scope.clone(),
                deliver,
            })
        });
        log::debug!("Subscribed to {} ({scope})", self.name);

        let state: Weak<RefCell<StoreState>> = Rc::downgrade(&self.store.state);
        let name = self.name.clone();
        let subscription = Subscription::new(move || {
            if let Some(owner) = state.upgrade()
                && let Some(table) = owner.borrow_mut().tables.get_mut(&name)
            {
                table.subscribers.remove(key);
                log::debug!("Unsubscribed from {name} ({scope})");
            }
        });
        futures::future::ready(Ok(subscription)).boxed_local()
    }
}
