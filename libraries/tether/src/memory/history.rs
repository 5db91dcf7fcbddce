use std::cell::RefCell;
use std::rc::Rc;

use crate::navigation::History;
use crate::source::Subscription;

type Listeners = Rc<RefCell<slotmap::SlotMap<slotmap::DefaultKey, Rc<dyn Fn()>>>>;

struct Entries {
    urls: Vec<String>,
    index: usize,
}

/// Browser history without a browser. `push` and `replace` are silent, like `pushState`/`replaceState`;
/// `back` and `forward` move through the entries and fire the pop listeners.
pub struct MemoryHistory {
    entries: RefCell<Entries>,
    listeners: Listeners,
}

impl MemoryHistory {
    pub fn new(initial_url: &str) -> Self {
        Self {
            entries: RefCell::new(Entries {
                urls: vec![initial_url.to_string()],
                index: 0,
            }),
            listeners: Default::default(),
        }
    }

    /// Returns false (and notifies nobody) if there is nothing to go back to.
    pub fn back(&self) -> bool {
        let moved = {
            let mut entries = self.entries.borrow_mut();
            if entries.index == 0 {
                false
            } else {
                entries.index -= 1;
                true
            }
        };
        if moved {
            self.pop();
        }
        moved
    }

    pub fn forward(&self) -> bool {
        let moved = {
            let mut entries = self.entries.borrow_mut();
            if entries.index + 1 >= entries.urls.len() {
                false
            } else {
                entries.index += 1;
                true
            }
        };
        if moved {
            self.pop();
        }
        moved
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) {
        let listeners: Vec<Rc<dyn Fn()>> = self.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}

impl History for MemoryHistory {
    fn location(&self) -> String {
        let entries = self.entries.borrow();
        entries.urls[entries.index].clone()
    }

    fn push(&self, url: &str) {
        let mut entries = self.entries.borrow_mut();
        let keep = entries.index + 1;
        entries.urls.truncate(keep);
        entries.urls.push(url.to_string());
        entries.index = keep;
    }

    fn replace(&self, url: &str) {
        let mut entries = self.entries.borrow_mut();
        let index = entries.index;
        entries.urls[index] = url.to_string();
    }

    fn on_pop(&self, callback: Rc<dyn Fn()>) -> Subscription {
        let key = self.listeners.borrow_mut().insert(callback);
        let listeners = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.borrow_mut().remove(key);
            }
        })
    }
}
