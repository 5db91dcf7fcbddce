//! The handle for a synchronizer's initial fetch. A failed fetch never throws into whoever is rendering the state;
//! instead it shows up here, both as an observable status and as a future anyone can await.

use std::fmt;
use std::future::Future;

use futures::FutureExt as _;
use futures::channel::oneshot;
use futures::future::{LocalBoxFuture, Shared};
use futures::task::{LocalSpawn, LocalSpawnExt as _};

use crate::data_model::Observable;
use crate::error::SyncError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchStatus {
    Pending,
    Loaded,
    Failed(SyncError),
}

#[derive(Clone)]
pub struct PendingFetch {
    status: Observable<FetchStatus>,
    done: Shared<LocalBoxFuture<'static, Result<(), SyncError>>>,
}

impl PendingFetch {
    pub(crate) fn spawn<Sp>(
        spawner: &Sp,
        resource: &str,
        task: impl Future<Output = Result<(), SyncError>> + 'static,
    ) -> Result<Self, SyncError>
    where
        Sp: LocalSpawn + ?Sized,
    {
        let status = Observable::new(FetchStatus::Pending);
        let (sender, receiver) = oneshot::channel();

        let reporter = status.clone();
        spawner
            .spawn_local(async move {
                let result = task.await;
                reporter.set(match &result {
                    Ok(()) => FetchStatus::Loaded,
                    Err(e) => FetchStatus::Failed(e.clone()),
                });
                // nobody waiting is fine, the status above still records the outcome
                let _ = sender.send(result);
            })
            .map_err(|e| SyncError::Spawn(e.to_string()))
            .inspect_err(|e| log::error!("{e}"))?;

        let resource = resource.to_string();
        let done = receiver
            .map(move |result| result.unwrap_or_else(|_canceled| Err(SyncError::Abandoned { resource })))
            .boxed_local()
            .shared();

        Ok(Self { status, done })
    }

    /// A fetch that never started because its activation failed.
    pub(crate) fn failed(error: SyncError) -> Self {
        let done = futures::future::ready(Err(error.clone())).boxed_local().shared();
        Self {
            status: Observable::new(FetchStatus::Failed(error)),
            done,
        }
    }

    pub fn status(&self) -> FetchStatus {
        self.status.get()
    }

    pub fn status_observable(&self) -> Observable<FetchStatus> {
        self.status.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.status.with(|status| *status == FetchStatus::Pending)
    }

    /// Resolves once the fetch has finished, with its outcome. Can be awaited any number of times.
    pub async fn wait(&self) -> Result<(), SyncError> {
        self.done.clone().await
    }
}

impl fmt::Debug for PendingFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFetch")
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;

    #[test]
    fn test_outcome_is_recorded_and_shared() {
        let mut pool = LocalPool::new();
        let pending = PendingFetch::spawn(&pool.spawner(), "things", async {
            Err(SyncError::Fetch {
                resource: "things".to_string(),
                reason: crate::SourceError::Transport("offline".to_string()),
            })
        })
        .unwrap();
        assert!(pending.is_pending());

        pool.run_until_stalled();
        assert!(matches!(pending.status(), FetchStatus::Failed(SyncError::Fetch { .. })));

        let first = pool.run_until(pending.wait());
        let second = pool.run_until(pending.clone().wait());
        assert_eq!(first, second);
        assert!(first.is_err());
    }

    #[test]
    fn test_dropped_task_is_abandoned() {
        let pool = LocalPool::new();
        let never = futures::future::pending::<Result<(), SyncError>>();
        let pending = PendingFetch::spawn(&pool.spawner(), "things", never).unwrap();
        drop(pool);

        let result = futures::executor::block_on(pending.wait());
        assert_eq!(
            result,
            Err(SyncError::Abandoned {
                resource: "things".to_string()
            })
        );
        assert!(pending.is_pending());
    }
}
