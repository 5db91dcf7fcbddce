use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::identity::Session;
use crate::source::Subscription;

type Listeners = Rc<RefCell<slotmap::SlotMap<slotmap::DefaultKey, Rc<dyn Fn()>>>>;

struct SessionState<P> {
    principal: Option<P>,
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// An auth store kept in memory. It holds the signed-in principal and a token with an expiry, and notifies listeners
/// after every change. The session counts as valid while a token is present and not expired.
pub struct MemorySession<P> {
    state: RefCell<SessionState<P>>,
    listeners: Listeners,
}

impl<P> Default for MemorySession<P> {
    fn default() -> Self {
        Self {
            state: RefCell::new(SessionState {
                principal: None,
                token: None,
                expires_at: None,
            }),
            listeners: Default::default(),
        }
    }
}

impl<P: Clone + 'static> MemorySession<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the principal together with a freshly minted token. Returns the token.
    pub fn sign_in(&self, principal: P, expires_at: DateTime<Utc>) -> String {
        let token = eyedee::get_uuid();
        {
            let mut state = self.state.borrow_mut();
            state.principal = Some(principal);
            state.token = Some(token.clone());
            state.expires_at = Some(expires_at);
        }
        log::info!("Signed in, token valid until {expires_at}");
        self.notify();
        token
    }

    pub fn sign_out(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.principal = None;
            state.token = None;
            state.expires_at = None;
        }
        log::info!("Signed out");
        self.notify();
    }

    /// Pushes the expiry without touching the principal, like a token refresh.
    pub fn refresh(&self, expires_at: DateTime<Utc>) {
        self.state.borrow_mut().expires_at = Some(expires_at);
        self.notify();
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    fn notify(&self) {
        let listeners: Vec<Rc<dyn Fn()>> = self.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}

impl<P: Clone + 'static> Session<P> for MemorySession<P> {
    fn current_principal(&self) -> Option<P> {
        self.state.borrow().principal.clone()
    }

    fn current_validity(&self) -> bool {
        let state = self.state.borrow();
        state.token.is_some() && state.expires_at.is_some_and(|expires_at| expires_at > Utc::now())
    }

    fn on_auth_change(&self, callback: Rc<dyn Fn()>) -> Subscription {
        let key = self.listeners.borrow_mut().insert(callback);
        let listeners = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.borrow_mut().remove(key);
            }
        })
    }
}
