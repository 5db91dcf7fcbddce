use std::cell::Cell;
use std::rc::Rc;

use crate::source::Subscription;

/// Shared flag that every deferred write checks before touching state.
#[derive(Clone, Debug)]
pub(crate) struct Liveness(Rc<Cell<bool>>);

impl Liveness {
    pub(crate) fn is_live(&self) -> bool {
        self.0.get()
    }
}

/// One activation of a synchronizer: the liveness flag plus the subscription it opened.
/// Stopping is idempotent, and dropping an activation stops it, including when setup bails out halfway.
#[derive(Debug)]
pub(crate) struct Activation {
    live: Liveness,
    subscription: Option<Subscription>,
}

impl Activation {
    pub(crate) fn new() -> Self {
        Self {
            live: Liveness(Rc::new(Cell::new(true))),
            subscription: None,
        }
    }

    pub(crate) fn liveness(&self) -> Liveness {
        self.live.clone()
    }

    pub(crate) fn attach(&mut self, subscription: Subscription) {
        if self.is_active() {
            self.subscription = Some(subscription);
        } else {
            subscription.release();
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.live.is_live()
    }

    pub(crate) fn stop(&mut self) {
        self.live.0.set(false);
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }
    }
}

impl Drop for Activation {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_releases_and_kills() {
        let released = Rc::new(Cell::new(false));
        let flag = released.clone();

        let mut activation = Activation::new();
        let live = activation.liveness();
        activation.attach(Subscription::new(move || flag.set(true)));
        assert!(live.is_live());

        activation.stop();
        assert!(!live.is_live());
        assert!(released.get());
    }

    #[test]
    fn test_drop_kills() {
        let live = {
            let activation = Activation::new();
            activation.liveness()
        };
        assert!(!live.is_live());
    }
}
