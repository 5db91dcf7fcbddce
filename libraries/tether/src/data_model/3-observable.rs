//! # Observable
//! An `Observable` is a value plus the listeners that want to hear about it. It's what synchronizers hand to the UI.
//! Consumers can read and listen, but only this crate can write, which is how each synchronizer keeps exclusive ownership
//! of the state it publishes.
//!
//! Listeners are always called after the internal borrow is released, and always with a complete value, so an observer
//! never sees half of a mutation. A listener may write to the observable it listens to. The nested write notifies
//! everyone with the newer value, and the round that was interrupted stops there, so nobody is left holding the older one.

use std::cell::RefCell;
use std::fmt;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use futures::StreamExt as _;
use futures::channel::mpsc;

use crate::data_model::ListenerKey;

type Listener<T> = Rc<dyn Fn(&T)>;

struct Slot<T> {
    value: T,
    /// Bumped on every write.
    version: u64,
    listeners: slotmap::SlotMap<slotmap::DefaultKey, Listener<T>>,
    /// Runs when the last handle is gone. Derived observables use it to leave their parent.
    on_drop: Option<Box<dyn FnOnce()>>,
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        if let Some(release) = self.on_drop.take() {
            release();
        }
    }
}

pub struct Observable<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.try_borrow() {
            Ok(slot) => f.debug_tuple("Observable").field(&slot.value).finish(),
            Err(_) => f.write_str("Observable(<borrowed>)"),
        }
    }
}

impl<T: Clone + 'static> Observable<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot {
                value,
                version: 0,
                listeners: Default::default(),
                on_drop: None,
            })),
        }
    }

    pub fn get(&self) -> T {
        self.slot.borrow().value.clone()
    }

    /// Borrow the current value without cloning it. Don't trigger writes from inside `f`.
    pub fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        f(&self.slot.borrow().value)
    }

    /// The listener is invoked with the new value every time the value is replaced.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> ListenerKey {
        let key = self.slot.borrow_mut().listeners.insert(Rc::new(listener));
        ListenerKey(key)
    }

    /// Unregister a previously registered listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, key: ListenerKey) -> bool {
        self.slot.borrow_mut().listeners.remove(key.0).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.slot.borrow().listeners.len()
    }

    pub(crate) fn set(&self, value: T) {
        let (version, keys) = {
            let mut slot = self.slot.borrow_mut();
            slot.value = value.clone();
            slot.version += 1;
            (slot.version, slot.listeners.keys().collect::<Vec<_>>())
        };

        for key in keys {
            let listener = {
                let slot = self.slot.borrow();
                if slot.version != version {
                    // a listener wrote a newer value, and that write already notified everyone
                    return;
                }
                match slot.listeners.get(key) {
                    Some(listener) => listener.clone(),
                    None => continue,
                }
            };
            listener(&value);
        }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with(f);
        self.set(next);
    }

    /// A stream of every value set from now on. It ends when the observable's owner is gone, and unregisters itself on drop.
    pub fn watch(&self) -> Watch<T> {
        let (sender, receiver) = mpsc::unbounded();
        let key = self.subscribe(move |value: &T| {
            // the receiver may already be gone, in which case Watch::drop is about to unsubscribe us
            let _ = sender.unbounded_send(value.clone());
        });
        Watch {
            receiver,
            key,
            slot: Rc::downgrade(&self.slot),
        }
    }

    /// Derive a new observable that is recomputed whenever this one changes. Its listener on this observable is
    /// removed once the derived observable is dropped.
    pub fn map<U: Clone + 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Observable<U> {
        let derived = Observable::new(self.with(&f));
        let target = Rc::downgrade(&derived.slot);
        let key = self.subscribe(move |value: &T| {
            if let Some(slot) = target.upgrade() {
                Observable { slot }.set(f(value));
            }
        });

        let parent = Rc::downgrade(&self.slot);
        derived.slot.borrow_mut().on_drop = Some(Box::new(move || {
            if let Some(owner) = parent.upgrade()
                && let Ok(mut slot) = owner.try_borrow_mut()
            {
                slot.listeners.remove(key.0);
            }
        }));
        derived
    }
}

pub struct Watch<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    key: ListenerKey,
    slot: Weak<RefCell<Slot<T>>>,
}

impl<T> Stream for Watch<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().receiver.poll_next_unpin(cx)
    }
}

impl<T> Drop for Watch<T> {
    fn drop(&mut self) {
        if let Some(owner) = self.slot.upgrade()
            && let Ok(mut slot) = owner.try_borrow_mut()
        {
            slot.listeners.remove(self.key.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::executor::block_on;
    use std::cell::Cell;

    #[test]
    fn test_listeners_see_whole_values() {
        let observable = Observable::new((0, 0));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        observable.subscribe(move |pair: &(i32, i32)| sink.borrow_mut().push(*pair));

        observable.set((1, 1));
        observable.update(|(a, b)| (a + 1, b + 1));

        assert_eq!(*seen.borrow(), vec![(1, 1), (2, 2)]);
        assert_eq!(observable.get(), (2, 2));
    }

    #[test]
    fn test_listener_can_read_during_notification() {
        let observable = Observable::new(1);
        let reader = observable.clone();
        let read_back = Rc::new(Cell::new(0));
        let sink = read_back.clone();
        observable.subscribe(move |_| sink.set(reader.get()));

        observable.set(7);
        assert_eq!(read_back.get(), 7);
    }

    #[test]
    fn test_unsubscribe() {
        let observable = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let sink = calls.clone();
        let key = observable.subscribe(move |_| sink.set(sink.get() + 1));

        observable.set(1);
        assert!(observable.unsubscribe(key));
        assert!(!observable.unsubscribe(key));
        observable.set(2);

        assert_eq!(calls.get(), 1);
        assert_eq!(observable.listener_count(), 0);
    }

    #[test]
    fn test_watch_yields_values_and_cleans_up() {
        let observable = Observable::new(0);
        let mut watch = observable.watch();
        observable.set(1);
        observable.set(2);

        assert_eq!(block_on(watch.next()), Some(1));
        assert_eq!(block_on(watch.next()), Some(2));
        assert_eq!(observable.listener_count(), 1);

        drop(watch);
        assert_eq!(observable.listener_count(), 0);
    }

    #[test]
    fn test_watch_ends_with_owner() {
        let observable = Observable::new(0);
        let mut watch = observable.watch();
        observable.set(5);
        drop(observable);

        assert_eq!(block_on(watch.next()), Some(5));
        assert_eq!(block_on(watch.next()), None);
    }

    #[test]
    fn test_listener_writing_back_leaves_nobody_stale() {
        let observable = Observable::new(0);
        let writer = observable.clone();
        observable.subscribe(move |value: &i32| {
            if *value == 1 {
                writer.set(2);
            }
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        observable.subscribe(move |value: &i32| sink.borrow_mut().push(*value));

        observable.set(1);

        assert_eq!(observable.get(), 2);
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn test_listener_removed_mid_round_is_skipped() {
        let observable = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let later_key = Rc::new(Cell::new(None));

        let remover = observable.clone();
        let target = later_key.clone();
        observable.subscribe(move |_| {
            if let Some(key) = target.get() {
                remover.unsubscribe(key);
            }
        });
        let sink = calls.clone();
        later_key.set(Some(observable.subscribe(move |_| sink.set(sink.get() + 1))));

        observable.set(1);
        assert_eq!(calls.get(), 0);
        assert_eq!(observable.listener_count(), 1);
    }

    #[test]
    fn test_dropped_map_leaves_parent() {
        let observable = Observable::new(1);
        for _ in 0..100 {
            let doubled = observable.map(|value: &i32| value * 2);
            assert_eq!(doubled.get(), 2);
        }
        assert_eq!(observable.listener_count(), 0);

        let kept = observable.map(|value: &i32| value * 2);
        let alias = kept.clone();
        drop(kept);
        observable.set(2);
        assert_eq!(alias.get(), 4);
        assert_eq!(observable.listener_count(), 1);

        drop(alias);
        assert_eq!(observable.listener_count(), 0);
    }

    #[test]
    fn test_map_follows_parent() {
        let observable = Observable::new(vec![1, 2, 3]);
        let total = observable.map(|values: &Vec<i32>| values.iter().sum::<i32>());
        assert_eq!(total.get(), 6);

        observable.set(vec![10, 20]);
        assert_eq!(total.get(), 30);
    }
}
