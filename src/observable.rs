//! A value holder that notifies its subscribers whenever it changes.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

type Listener<T> = Rc<dyn Fn(&T)>;

/// Handle returned by every `subscribe` of this crate.
///
/// Dropping the handle does not unsubscribe, call [`Subscription::unsubscribe`].
/// Unsubscribing more than once has no effect.
#[must_use]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// a subscription with nothing to release, returned when the source
    /// already delivered its final value.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel()
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A shared, observable value.
///
/// Cloning an `Observable` gives another handle to the same value. New
/// subscribers receive the current value straight away; every [`set`]
/// notifies all subscribers synchronously, in subscription order.
///
/// [`set`]: Observable::set
pub struct Observable<T> {
    shared: Rc<Shared<T>>,
}

struct Shared<T> {
    value: RefCell<T>,
    listeners: RefCell<Vec<(u64, Listener<T>)>>,
    next_id: Cell<u64>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: Clone + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Rc::new(Shared {
                value: RefCell::new(value),
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.shared.value.borrow().clone()
    }

    /// borrow the current value without cloning it
    ///
    /// The closure must not call [`Observable::set`] on this observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.value.borrow())
    }

    pub fn set(&self, value: T) {
        *self.shared.value.borrow_mut() = value;
        self.emit();
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.shared.value.borrow());
        self.set(next);
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let listener: Listener<T> = Rc::new(listener);
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);
        self.shared
            .listeners
            .borrow_mut()
            .push((id, Rc::clone(&listener)));

        let current = self.get();
        listener(&current);

        let shared: Weak<Shared<T>> = Rc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared
                    .listeners
                    .borrow_mut()
                    .retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.listeners.borrow().len()
    }

    /// drop every subscriber without notifying them
    pub(crate) fn clear_subscribers(&self) {
        self.shared.listeners.borrow_mut().clear();
    }

    fn emit(&self) {
        let listeners: Vec<(u64, Listener<T>)> = self.shared.listeners.borrow().clone();

        for (id, listener) in listeners {
            let still_registered = self
                .shared
                .listeners
                .borrow()
                .iter()
                .any(|(listener_id, _)| *listener_id == id);
            if still_registered {
                // a listener may have set a newer value meanwhile
                let current = self.get();
                listener(&current);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.shared.value.borrow())
            .field("subscribers", &self.shared.listeners.borrow().len())
            .finish()
    }
}
