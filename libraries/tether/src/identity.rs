//! Tracks who is signed in.
//!
//! The principal and the validity flag are published as one [`Identity`] value, so nobody can observe a fresh principal
//! next to a stale flag. The observer is an ordinary value with a start/stop lifecycle: create one when the app starts,
//! hand clones of its state to whatever needs it, stop it on shutdown.

use std::rc::Rc;

use crate::data_model::Observable;
use crate::source::Subscription;

/// Where the identity comes from. Implemented by the auth store of the record store client.
pub trait Session<P> {
    fn current_principal(&self) -> Option<P>;
    fn current_validity(&self) -> bool;
    /// The callback fires after every sign-in, sign-out or token change.
    fn on_auth_change(&self, callback: Rc<dyn Fn()>) -> Subscription;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity<P> {
    pub principal: Option<P>,
    pub valid: bool,
}

impl<P> Identity<P> {
    pub fn signed_in(&self) -> bool {
        self.valid && self.principal.is_some()
    }
}

fn read<P>(session: &dyn Session<P>) -> Identity<P> {
    Identity {
        principal: session.current_principal(),
        valid: session.current_validity(),
    }
}

pub struct IdentityObserver<P> {
    state: Observable<Identity<P>>,
    subscription: Option<Subscription>,
}

impl<P: Clone + 'static> IdentityObserver<P> {
    /// Reads the session once, then follows its change notifications until stopped.
    pub fn start(session: Rc<dyn Session<P>>) -> Self {
        let state = Observable::new(read(session.as_ref()));

        let target = state.clone();
        let source = Rc::downgrade(&session);
        let subscription = session.on_auth_change(Rc::new(move || {
            let Some(session) = source.upgrade() else {
                return;
            };
            let identity = read(session.as_ref());
            log::debug!(
                "Auth changed: signed in = {}, valid = {}",
                identity.principal.is_some(),
                identity.valid
            );
            target.set(identity);
        }));

        Self {
            state,
            subscription: Some(subscription),
        }
    }

    pub fn state(&self) -> Observable<Identity<P>> {
        self.state.clone()
    }

    pub fn current(&self) -> Identity<P> {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.subscription.is_some()
    }

    /// Stops following the session. The last published identity stays readable.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
            log::debug!("Identity observer stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySession;
    use chrono::{Duration, Utc};
    use std::cell::RefCell;

    #[test]
    fn test_starts_from_current_session() {
        let session = Rc::new(MemorySession::<String>::new());
        session.sign_in("root".to_string(), Utc::now() + Duration::hours(1));

        let observer = IdentityObserver::start(session.clone());
        assert_eq!(
            observer.current(),
            Identity {
                principal: Some("root".to_string()),
                valid: true
            }
        );
        assert!(observer.current().signed_in());
    }

    #[test]
    fn test_sign_out_publishes_both_fields_together() {
        let session = Rc::new(MemorySession::<String>::new());
        session.sign_in("root".to_string(), Utc::now() + Duration::hours(1));
        let observer = IdentityObserver::start(session.clone());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        observer
            .state()
            .subscribe(move |identity: &Identity<String>| sink.borrow_mut().push(identity.clone()));

        session.sign_out();

        assert_eq!(
            *seen.borrow(),
            vec![Identity {
                principal: None,
                valid: false
            }]
        );
        assert!(
            seen.borrow()
                .iter()
                .all(|identity| !(identity.principal.is_none() && identity.valid))
        );
    }

    #[test]
    fn test_stop_detaches_from_session() {
        let session = Rc::new(MemorySession::<String>::new());
        let mut observer = IdentityObserver::start(session.clone());
        assert!(observer.is_running());

        observer.stop();
        session.sign_in("root".to_string(), Utc::now() + Duration::hours(1));

        assert!(!observer.is_running());
        assert_eq!(
            observer.current(),
            Identity {
                principal: None,
                valid: false
            }
        );
    }

    #[test]
    fn test_expired_token_is_not_valid() {
        let session = Rc::new(MemorySession::<String>::new());
        let observer = IdentityObserver::start(session.clone());
        session.sign_in("root".to_string(), Utc::now() - Duration::minutes(5));

        let identity = observer.current();
        assert_eq!(identity.principal, Some("root".to_string()));
        assert!(!identity.valid);
        assert!(!identity.signed_in());
    }
}
