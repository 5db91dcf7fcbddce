/// What a record source can report back.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("record {0} not found")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by the store: {0}")]
    Rejected(String),
}

/// Errors surfaced by synchronizers. Fetch failures end up on the `PendingFetch` handle, subscription failures are
/// returned from `activate`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("fetching {resource} failed: {reason}")]
    Fetch { resource: String, reason: SourceError },
    #[error("{resource} record {id} not found")]
    NotFound { resource: String, id: String },
    #[error("subscribing to {resource} failed: {reason}")]
    SubscriptionOpen { resource: String, reason: SourceError },
    #[error("could not spawn fetch task: {0}")]
    Spawn(String),
    #[error("fetch for {resource} was dropped before it finished")]
    Abandoned { resource: String },
}

impl SyncError {
    pub(crate) fn fetch(resource: &str, reason: SourceError) -> Self {
        match reason {
            SourceError::NotFound(id) => SyncError::NotFound {
                resource: resource.to_string(),
                id,
            },
            reason => SyncError::Fetch {
                resource: resource.to_string(),
                reason,
            },
        }
    }

    pub(crate) fn subscription_open(resource: &str, reason: SourceError) -> Self {
        SyncError::SubscriptionOpen {
            resource: resource.to_string(),
            reason,
        }
    }
}
