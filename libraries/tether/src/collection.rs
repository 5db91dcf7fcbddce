//! Synchronizes every record of one resource type.
//!
//! The bulk fetch is filtered, but the live subscription always covers the whole resource type. A live create for a
//! record the filter would have excluded is still appended. If that matters, pass a [`Transform::filter`] that
//! mirrors the filter.
//!
//! The fetch result replaces the collection when it lands, so events that were applied before it are lost. Only events
//! arriving after the fetch resolved are guaranteed to survive.

use std::rc::Rc;

use futures::task::LocalSpawn;
use im::Vector;

use crate::data_model::{ChangeEvent, Observable, Record, Transform};
use crate::error::SyncError;
use crate::lifecycle::Activation;
use crate::pending::PendingFetch;
use crate::source::{EventHandler, RecordSource, Scope};

pub struct CollectionSync<R: Record> {
    resource: String,
    filter: Option<String>,
    transform: Transform<R>,
    items: Observable<Vector<R>>,
    fetch: PendingFetch,
    activation: Activation,
}

impl<R: Record> CollectionSync<R> {
    /// Starts the fetch on `spawner` and waits for the subscription to open.
    ///
    /// A subscription failure is returned here and nothing is retried; the fetch that was already started is then
    /// ignored when it lands.
    pub async fn activate<S, Sp>(
        source: &S,
        spawner: &Sp,
        filter: Option<&str>,
        transform: Option<Transform<R>>,
    ) -> Result<Self, SyncError>
    where
        S: RecordSource<R> + ?Sized,
        Sp: LocalSpawn + ?Sized,
    {
        let items = Observable::new(Vector::new());
        let transform = transform.unwrap_or_default();
        let (activation, fetch) = start(source, spawner, &items, filter, &transform).await?;

        Ok(Self {
            resource: source.resource().to_string(),
            filter: filter.map(str::to_string),
            transform,
            items,
            fetch,
            activation,
        })
    }

    /// Tears the current activation down and starts a new one with another filter. Observers of [`Self::items`] stay
    /// attached and keep seeing the old records until the new fetch lands.
    ///
    /// If the subscription can't be opened the synchronizer stays inactive, [`Self::filter`] names the filter that
    /// failed, and [`Self::fetch`] reports the error.
    pub async fn reactivate<S, Sp>(
        &mut self,
        source: &S,
        spawner: &Sp,
        filter: Option<&str>,
    ) -> Result<(), SyncError>
    where
        S: RecordSource<R> + ?Sized,
        Sp: LocalSpawn + ?Sized,
    {
        self.deactivate();
        self.resource = source.resource().to_string();
        self.filter = filter.map(str::to_string);
        match start(source, spawner, &self.items, filter, &self.transform).await {
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

    /// Releases the subscription. A fetch still in flight will not touch the collection anymore.
    pub fn deactivate(&mut self) {
        if self.activation.is_active() {
            log::debug!("Deactivating {}", self.resource);
        }
        self.activation.stop();
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    pub fn items(&self) -> Observable<Vector<R>> {
        self.items.clone()
    }

    pub fn snapshot(&self) -> Vector<R> {
        self.items.get()
    }

    pub fn fetch(&self) -> &PendingFetch {
        &self.fetch
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}

async fn start<R, S, Sp>(
    source: &S,
    spawner: &Sp,
    items: &Observable<Vector<R>>,
    filter: Option<&str>,
    transform: &Transform<R>,
) -> Result<(Activation, PendingFetch), SyncError>
where
    R: Record,
    S: RecordSource<R> + ?Sized,
    Sp: LocalSpawn + ?Sized,
{
    let resource = source.resource().to_string();
    let mut activation = Activation::new();
    log::debug!("Activating {resource} with filter {filter:?}");

    let task = {
        let request = source.fetch_all(filter);
        let live = activation.liveness();
        let items = items.clone();
        let transform = transform.clone();
        let resource = resource.clone();
        async move {
            let records = request
                .await
                .map_err(|e| SyncError::fetch(&resource, e))
                .inspect_err(|e| log::warn!("{e}"))?;
            if live.is_live() {
                log::debug!("Fetched {} {resource} records", records.len());
                items.set(transform.apply(records.into_iter().collect()));
            } else {
                log::debug!("Ignoring {resource} fetch that landed after deactivation");
            }
            Ok(())
        }
    };
    let fetch = PendingFetch::spawn(spawner, &resource, task)?;

    let handler: EventHandler<R> = {
        let live = activation.liveness();
        let items = items.clone();
        let transform = transform.clone();
        Rc::new(move |event: ChangeEvent<R>| {
            if !live.is_live() {
                return;
            }
            items.update(|current| event.apply_to_collection(current, &transform));
        })
    };

    let subscription = source
        .subscribe(Scope::All, handler)
        .await
        .map_err(|e| SyncError::subscription_open(&resource, e))
        .inspect_err(|e| log::error!("{e}"))?;
    activation.attach(subscription);

    Ok((activation, fetch))
}
