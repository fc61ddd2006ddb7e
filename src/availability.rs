//! Detection of wallets injected into the page.
//!
//! Browser extensions inject their provider objects at an unspecified time
//! after page load. An [`Availability`] polls a cheap precondition until it
//! holds, then builds the adapter instance exactly once and hands it to
//! every subscriber.

use crate::{
    error::WalletAdapterError,
    observable::Subscription,
    runtime::{Runtime, spawn_abortable},
};
use futures::future::{AbortHandle, FutureExt as _, LocalBoxFuture};
use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::{Rc, Weak},
    time::Duration,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

type Initialization<T> = LocalBoxFuture<'static, Result<T, WalletAdapterError>>;
type Probe<T> = Rc<dyn Fn() -> Option<Initialization<T>>>;
type Listener<T> = Rc<dyn Fn(T)>;

pub struct Availability<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Availability<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    runtime: Rc<dyn Runtime>,
    probe: Probe<T>,
    poll_interval: Cell<Duration>,
    state: RefCell<State<T>>,
}

struct State<T> {
    resolved: Option<T>,
    creating: bool,
    disposed: bool,
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
    polling: Option<AbortHandle>,
}

/// clears the `creating` flag however the initialization ends, including
/// when the polling task is cancelled mid-way.
struct CreatingGuard<'a, T>(&'a Inner<T>);

impl<'a, T> CreatingGuard<'a, T> {
    fn new(inner: &'a Inner<T>) -> Self {
        inner.state.borrow_mut().creating = true;
        Self(inner)
    }
}

impl<T> Drop for CreatingGuard<'_, T> {
    fn drop(&mut self) {
        self.0.state.borrow_mut().creating = false;
    }
}

impl<T: Clone + 'static> Availability<T> {
    /// `precondition` must be cheap and side effect free, it is called on
    /// every poll. `initializer` runs once `precondition` returns a value
    /// and may fail, in which case the detection is retried on a later poll.
    pub fn new<P, Pre, I, F>(runtime: Rc<dyn Runtime>, precondition: Pre, initializer: I) -> Self
    where
        P: 'static,
        Pre: Fn() -> Option<P> + 'static,
        I: Fn(P) -> F + 'static,
        F: Future<Output = Result<T, WalletAdapterError>> + 'static,
    {
        let probe: Probe<T> =
            Rc::new(move || precondition().map(|input| initializer(input).boxed_local()));
        Self::from_probe(runtime, probe)
    }

    fn from_probe(runtime: Rc<dyn Runtime>, probe: Probe<T>) -> Self {
        Self {
            inner: Rc::new(Inner {
                runtime,
                probe,
                poll_interval: Cell::new(DEFAULT_POLL_INTERVAL),
                state: RefCell::new(State {
                    resolved: None,
                    creating: false,
                    disposed: false,
                    listeners: Vec::new(),
                    next_id: 0,
                    polling: None,
                }),
            }),
        }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        self.inner.poll_interval.set(poll_interval);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval.get()
    }

    /// the instance, if it was built already
    pub fn current(&self) -> Option<T> {
        self.inner.state.borrow().resolved.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.state.borrow().polling.is_some()
    }

    /// `listener` receives the instance once it is available.
    ///
    /// An already available instance is delivered before this returns, and
    /// the returned subscription does nothing. Detection stops when the last
    /// pending subscription is released and resumes on the next `subscribe`.
    pub fn subscribe(&self, listener: impl Fn(T) + 'static) -> Subscription {
        let resolved = {
            let state = self.inner.state.borrow();
            if state.disposed {
                return Subscription::noop();
            }
            state.resolved.clone()
        };
        if let Some(instance) = resolved {
            listener(instance);
            return Subscription::noop();
        }

        let id = {
            let mut state = self.inner.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, Rc::new(listener)));
            id
        };
        Inner::ensure_polling(&self.inner);

        let inner = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove_listener(id);
            }
        })
    }

    /// stop detecting and drop the instance, if any. Later subscriptions
    /// never receive anything.
    pub fn dispose(&self) {
        let polling = {
            let mut state = self.inner.state.borrow_mut();
            state.disposed = true;
            state.listeners.clear();
            state.resolved = None;
            state.polling.take()
        };
        if let Some(polling) = polling {
            polling.abort();
        }
    }

    /// a new detector with the same precondition and initializer, whose
    /// instances are transformed by `f`.
    pub fn map<U, M>(&self, f: M) -> Availability<U>
    where
        U: Clone + 'static,
        M: Fn(T) -> U + 'static,
    {
        let probe = Rc::clone(&self.inner.probe);
        let f = Rc::new(f);
        let mapped: Probe<U> = Rc::new(move || {
            let f = Rc::clone(&f);
            probe().map(|initialization| {
                async move { initialization.await.map(|instance| f(instance)) }.boxed_local()
            })
        });

        Availability::from_probe(Rc::clone(&self.inner.runtime), mapped)
            .with_poll_interval(self.poll_interval())
    }
}

impl<T: Clone + 'static> Inner<T> {
    fn ensure_polling(this: &Rc<Self>) {
        {
            let state = this.state.borrow();
            if state.resolved.is_some() || state.polling.is_some() || state.disposed {
                return;
            }
        }

        let inner: Weak<Self> = Rc::downgrade(this);
        let handle = spawn_abortable(&*this.runtime, async move {
            loop {
                let Some(this) = inner.upgrade() else {
                    return;
                };
                if this.attempt().await {
                    return;
                }
                let tick = this.runtime.sleep(this.poll_interval.get());
                drop(this);
                tick.await;
            }
        });
        this.state.borrow_mut().polling = Some(handle);
    }

    /// returns `true` once the instance is available
    async fn attempt(&self) -> bool {
        {
            let state = self.state.borrow();
            if state.resolved.is_some() {
                return true;
            }
            if state.creating || state.disposed {
                return false;
            }
        }

        let Some(initialization) = (self.probe)() else {
            return false;
        };

        let guard = CreatingGuard::new(self);
        let outcome = initialization.await;
        drop(guard);

        match outcome {
            Ok(instance) => {
                self.resolve(instance);
                true
            }
            Err(error) => {
                tracing::warn!(%error, "failed to initialize wallet adapter");
                false
            }
        }
    }

    fn resolve(&self, instance: T) {
        let listeners = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.resolved = Some(instance.clone());
            state.polling = None;
            std::mem::take(&mut state.listeners)
        };

        for (_, listener) in listeners {
            listener(instance.clone());
        }
    }

    fn remove_listener(&self, id: u64) {
        let polling = {
            let mut state = self.state.borrow_mut();
            state.listeners.retain(|(listener_id, _)| *listener_id != id);
            if state.listeners.is_empty() {
                state.polling.take()
            } else {
                None
            }
        };
        if let Some(polling) = polling {
            polling.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ManualRuntime;

    struct Fixture {
        runtime: Rc<ManualRuntime>,
        injected: Rc<Cell<bool>>,
        built: Rc<Cell<usize>>,
        availability: Availability<usize>,
    }

    /// a detector whose precondition holds once `injected` is set and whose
    /// initializer takes `build_time` and fails `failures` times first.
    fn fixture(build_time: Duration, failures: usize) -> Fixture {
        let runtime = Rc::new(ManualRuntime::new());
        let injected = Rc::new(Cell::new(false));
        let built = Rc::new(Cell::new(0));
        let remaining_failures = Rc::new(Cell::new(failures));

        let precondition = {
            let injected = Rc::clone(&injected);
            move || injected.get().then_some(())
        };
        let initializer = {
            let runtime = Rc::clone(&runtime);
            let built = Rc::clone(&built);
            move |()| {
                let sleep = runtime.sleep(build_time);
                let built = Rc::clone(&built);
                let remaining_failures = Rc::clone(&remaining_failures);
                async move {
                    sleep.await;
                    if remaining_failures.get() > 0 {
                        remaining_failures.set(remaining_failures.get() - 1);
                        return Err(WalletAdapterError::Adapter("not ready".to_owned()));
                    }
                    built.set(built.get() + 1);
                    Ok(built.get())
                }
            }
        };

        let availability = Availability::new(runtime.clone(), precondition, initializer);
        Fixture {
            runtime,
            injected,
            built,
            availability,
        }
    }

    fn collector() -> (Rc<RefCell<Vec<usize>>>, impl Fn(usize) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |instance| sink.borrow_mut().push(instance))
    }

    #[test]
    fn builds_once_and_delivers_to_every_listener() {
        let fixture = fixture(Duration::ZERO, 0);
        let (first, listener) = collector();
        let _first = fixture.availability.subscribe(listener);
        let (second, listener) = collector();
        let _second = fixture.availability.subscribe(listener);

        fixture.runtime.advance(Duration::from_millis(900));
        assert!(first.borrow().is_empty());
        assert!(fixture.availability.is_polling());

        fixture.injected.set(true);
        fixture.runtime.advance(DEFAULT_POLL_INTERVAL);

        assert_eq!(*first.borrow(), vec![1]);
        assert_eq!(*second.borrow(), vec![1]);
        assert_eq!(fixture.built.get(), 1);
        assert!(!fixture.availability.is_polling());
        assert_eq!(fixture.runtime.pending_timers(), 0);

        let (late, listener) = collector();
        let subscription = fixture.availability.subscribe(listener);
        assert_eq!(*late.borrow(), vec![1]);
        assert!(!subscription.is_active());
        assert_eq!(fixture.availability.current(), Some(1));
    }

    #[test]
    fn already_injected_provider_is_probed_immediately() {
        let fixture = fixture(Duration::ZERO, 0);
        fixture.injected.set(true);
        let (seen, listener) = collector();
        let _subscription = fixture.availability.subscribe(listener);

        fixture.runtime.advance(Duration::ZERO);

        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn slow_initializer_is_not_started_twice() {
        let fixture = fixture(Duration::from_secs(2), 0);
        fixture.injected.set(true);
        let (seen, listener) = collector();
        let _subscription = fixture.availability.subscribe(listener);

        fixture.runtime.advance(Duration::from_secs(5));

        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(fixture.built.get(), 1);
    }

    #[test]
    fn failed_initialization_is_retried() {
        let fixture = fixture(Duration::ZERO, 2);
        fixture.injected.set(true);
        let (seen, listener) = collector();
        let _subscription = fixture.availability.subscribe(listener);

        fixture.runtime.run_until_stalled();
        assert!(seen.borrow().is_empty());

        fixture.runtime.advance(DEFAULT_POLL_INTERVAL * 2);
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn releasing_the_last_listener_stops_polling() {
        let fixture = fixture(Duration::ZERO, 0);
        let (seen, listener) = collector();
        let mut first = fixture.availability.subscribe(listener);
        let (_, listener) = collector();
        let mut second = fixture.availability.subscribe(listener);
        fixture.runtime.advance(DEFAULT_POLL_INTERVAL);

        first.unsubscribe();
        assert!(fixture.availability.is_polling());
        second.unsubscribe();
        fixture.runtime.run_until_stalled();
        assert!(!fixture.availability.is_polling());
        assert_eq!(fixture.runtime.pending_timers(), 0);

        fixture.injected.set(true);
        fixture.runtime.advance(DEFAULT_POLL_INTERVAL * 3);
        assert_eq!(fixture.built.get(), 0);
        assert!(seen.borrow().is_empty());

        let (resumed, listener) = collector();
        let _resumed = fixture.availability.subscribe(listener);
        fixture.runtime.advance(Duration::ZERO);
        assert_eq!(*resumed.borrow(), vec![1]);
    }

    #[test]
    fn cancelled_initialization_can_restart() {
        let fixture = fixture(Duration::from_secs(1), 0);
        fixture.injected.set(true);
        let (_, listener) = collector();
        let mut subscription = fixture.availability.subscribe(listener);
        fixture.runtime.advance(Duration::from_millis(500));
        subscription.unsubscribe();
        fixture.runtime.run_until_stalled();

        let (seen, listener) = collector();
        let _subscription = fixture.availability.subscribe(listener);
        fixture.runtime.advance(Duration::from_secs(1));

        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(fixture.built.get(), 1);
    }

    #[test]
    fn custom_poll_interval() {
        let fixture = fixture(Duration::ZERO, 0);
        let availability = fixture
            .availability
            .clone()
            .with_poll_interval(Duration::from_millis(10));
        let (seen, listener) = collector();
        let _subscription = availability.subscribe(listener);
        fixture.runtime.run_until_stalled();

        fixture.injected.set(true);
        fixture.runtime.advance(Duration::from_millis(10));
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn mapped_detector_builds_its_own_instance() {
        let fixture = fixture(Duration::ZERO, 0);
        fixture.injected.set(true);
        let mapped = fixture.availability.map(|instance| instance * 100);

        let (seen, listener) = collector();
        let _subscription = mapped.subscribe(listener);
        fixture.runtime.advance(Duration::ZERO);

        assert_eq!(*seen.borrow(), vec![100]);
        assert_eq!(fixture.availability.current(), None);
    }

    #[test]
    fn disposed_detector_delivers_nothing() {
        let fixture = fixture(Duration::ZERO, 0);
        let (seen, listener) = collector();
        let _subscription = fixture.availability.subscribe(listener);
        fixture.availability.dispose();
        fixture.injected.set(true);
        fixture.runtime.advance(DEFAULT_POLL_INTERVAL * 2);

        let (late, listener) = collector();
        let _late = fixture.availability.subscribe(listener);
        fixture.runtime.advance(DEFAULT_POLL_INTERVAL);

        assert!(seen.borrow().is_empty());
        assert!(late.borrow().is_empty());
        assert_eq!(fixture.runtime.pending_timers(), 0);
    }
}
