//! Task spawning and timers.
//!
//! Everything in this crate runs on a single cooperative event loop. The
//! [`Runtime`] trait is the only way the crate schedules work, so that the
//! browser event loop can be swapped for [`ManualRuntime`] in tests.

use futures::{
    channel::oneshot,
    executor::{LocalPool, LocalSpawner},
    future::{AbortHandle, FutureExt as _, LocalBoxFuture, abortable},
    task::LocalSpawnExt as _,
};
use std::{
    cell::{Cell, RefCell},
    future::Future,
    time::Duration,
};

pub trait Runtime {
    /// run `task` to completion in the background
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>);

    /// a future completing once `duration` elapsed. Dropping the future
    /// cancels the underlying timer.
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// spawn `task` and return the handle to cancel it
pub(crate) fn spawn_abortable<F>(runtime: &dyn Runtime, task: F) -> AbortHandle
where
    F: Future<Output = ()> + 'static,
{
    let (task, handle) = abortable(task);
    runtime.spawn_local(
        async move {
            let _ = task.await;
        }
        .boxed_local(),
    );
    handle
}

/// A deterministic [`Runtime`] driven by hand.
///
/// Tasks run on a [`LocalPool`] and time only moves forward when
/// [`ManualRuntime::advance`] is called.
///
/// ```
/// use bitcoin_connector::runtime::{ManualRuntime, Runtime};
/// use std::{cell::Cell, rc::Rc, time::Duration};
///
/// let runtime = ManualRuntime::new();
/// let fired = Rc::new(Cell::new(false));
///
/// let sleep = runtime.sleep(Duration::from_millis(300));
/// let flag = Rc::clone(&fired);
/// runtime.spawn_local(Box::pin(async move {
///     sleep.await;
///     flag.set(true);
/// }));
///
/// runtime.advance(Duration::from_millis(299));
/// assert!(!fired.get());
/// runtime.advance(Duration::from_millis(1));
/// assert!(fired.get());
/// ```
pub struct ManualRuntime {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    now: Cell<Duration>,
    timers: RefCell<Vec<Timer>>,
    next_timer: Cell<u64>,
}

struct Timer {
    deadline: Duration,
    sequence: u64,
    wake: oneshot::Sender<()>,
}

impl ManualRuntime {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: RefCell::new(pool),
            spawner,
            now: Cell::new(Duration::ZERO),
            timers: RefCell::new(Vec::new()),
            next_timer: Cell::new(0),
        }
    }

    /// time elapsed since the runtime was created
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// run every task that can make progress without time passing
    pub fn run_until_stalled(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    /// move the clock forward by `duration`, firing the timers that expire
    /// on the way in deadline order.
    pub fn advance(&self, duration: Duration) {
        let target = self.now.get() + duration;

        loop {
            self.run_until_stalled();

            let due = {
                let mut timers = self.timers.borrow_mut();
                timers.retain(|timer| !timer.wake.is_canceled());
                let Some(next) = timers
                    .iter()
                    .map(|timer| timer.deadline)
                    .filter(|deadline| *deadline <= target)
                    .min()
                else {
                    break;
                };
                self.now.set(next.max(self.now.get()));

                let (mut due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut *timers)
                    .into_iter()
                    .partition(|timer| timer.deadline <= next);
                *timers = pending;
                due.sort_by_key(|timer| timer.sequence);
                due
            };

            for timer in due {
                let _ = timer.wake.send(());
            }
        }

        self.now.set(target);
        self.run_until_stalled();
    }

    /// number of timers still awaited by a live task
    pub fn pending_timers(&self) -> usize {
        self.timers
            .borrow()
            .iter()
            .filter(|timer| !timer.wake.is_canceled())
            .count()
    }
}

impl Default for ManualRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for ManualRuntime {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(error) = self.spawner.spawn_local(task) {
            tracing::error!(%error, "failed to spawn task");
        }
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let (wake, woken) = oneshot::channel();
        let sequence = self.next_timer.get();
        self.next_timer.set(sequence + 1);
        self.timers.borrow_mut().push(Timer {
            deadline: self.now.get() + duration,
            sequence,
            wake,
        });

        async move {
            let _ = woken.await;
        }
        .boxed_local()
    }
}
