//! Synchronizes one record, looked up by id.

use std::rc::Rc;

use futures::task::LocalSpawn;

use crate::data_model::{ChangeEvent, Observable, Record};
use crate::error::SyncError;
use crate::lifecycle::Activation;
use crate::pending::PendingFetch;
use crate::source::{EventHandler, RecordSource, Scope};

pub struct SingleSync<R: Record> {
    resource: String,
    id: String,
    item: Observable<Option<R>>,
    fetch: PendingFetch,
    activation: Activation,
}

impl<R: Record> SingleSync<R> {
    pub async fn activate<S, Sp>(source: &S, spawner: &Sp, id: &str) -> Result<Self, SyncError>
    where
        S: RecordSource<R> + ?Sized,
        Sp: LocalSpawn + ?Sized,
    {
        let item = Observable::new(None);
        let (activation, fetch) = start(source, spawner, &item, id).await?;
        Ok(Self {
            resource: source.resource().to_string(),
            id: id.to_string(),
            item,
            fetch,
            activation,
        })
    }

    /// Follows another id. The previous record stays visible until the new fetch lands.
    ///
    /// If the subscription can't be opened the synchronizer stays inactive, [`Self::id`] names the id that failed, and
    /// [`Self::fetch`] reports the error.
    pub async fn reactivate<S, Sp>(&mut self, source: &S, spawner: &Sp, id: &str) -> Result<(), SyncError>
    where
        S: RecordSource<R> + ?Sized,
        Sp: LocalSpawn + ?Sized,
    {
        self.deactivate();
        self.resource = source.resource().to_string();
        self.id = id.to_string();
        match start(source, spawner, &self.item, id).await {
            Ok((activation, fetch)) => {
                self.activation = activation;
                self.fetch = fetch;
                Ok(())
            }
            Err(e) => {
                self.fetch = PendingFetch::failed(e.clone());
                Err(e)
            }
        }
    }

    pub fn deactivate(&mut self) {
        if self.activation.is_active() {
            log::debug!("Deactivating {}/{}", self.resource, self.id);
        }
        self.activation.stop();
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    pub fn item(&self) -> Observable<Option<R>> {
        self.item.clone()
    }

    pub fn snapshot(&self) -> Option<R> {
        self.item.get()
    }

    pub fn fetch(&self) -> &PendingFetch {
        &self.fetch
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

async fn start<R, S, Sp>(
    source: &S,
    spawner: &Sp,
    item: &Observable<Option<R>>,
    id: &str,
) -> Result<(Activation, PendingFetch), SyncError>
where
    R: Record,
    S: RecordSource<R> + ?Sized,
    Sp: LocalSpawn + ?Sized,
{
    let resource = source.resource().to_string();
    let mut activation = Activation::new();
    log::debug!("Activating {resource}/{id}");

    let task = {
        let request = source.fetch_one(id);
        let live = activation.liveness();
        let item = item.clone();
        let resource = resource.clone();
        async move {
            let record = request
                .await
                .map_err(|e| SyncError::fetch(&resource, e))
                .inspect_err(|e| log::warn!("{e}"))?;
            if live.is_live() {
                item.set(Some(record));
            }
            Ok(())
        }
    };
    let fetch = PendingFetch::spawn(spawner, &resource, task)?;

    let handler: EventHandler<R> = {
        let live = activation.liveness();
        let item = item.clone();
        let tracked = id.to_string();
        let resource = resource.clone();
        Rc::new(move |event: ChangeEvent<R>| {
            if !live.is_live() {
                return;
            }
            if event.id() != tracked.as_str() {
                log::warn!(
                    "Ignoring {} event for {resource}/{} while tracking {tracked}",
                    event.kind(),
                    event.id()
                );
                return;
            }
            item.update(|current| event.apply_to_single(current.clone()));
        })
    };

    let subscription = source
        .subscribe(Scope::Record(id.to_string()), handler)
        .await
        .map_err(|e| SyncError::subscription_open(&resource, e))
        .inspect_err(|e| log::error!("{e}"))?;
    activation.attach(subscription);

    Ok((activation, fetch))
}
