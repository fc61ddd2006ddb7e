use crate::{
    adapter::{AddressesChangedCallback, WalletAdapter},
    btc::WalletAddress,
    error::WalletAdapterError,
    observable::Subscription,
    runtime::{Runtime, spawn_abortable},
};
use futures::future::{AbortHandle, FutureExt as _, LocalBoxFuture};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

/// polling period of wallets without change notifications
pub const ADDRESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) type FetchAddresses =
    Rc<dyn Fn() -> LocalBoxFuture<'static, Result<Vec<WalletAddress>, WalletAdapterError>>>;

/// fetch the addresses of `adapter` without keeping it alive
pub(crate) fn fetcher<A: WalletAdapter + 'static>(adapter: &Rc<A>) -> FetchAddresses {
    let adapter = Rc::downgrade(adapter);
    Rc::new(move || {
        let adapter = adapter.upgrade();
        async move {
            match adapter {
                Some(adapter) => adapter.addresses().await,
                None => Err(WalletAdapterError::Disposed),
            }
        }
        .boxed_local()
    })
}

fn is_final(error: &WalletAdapterError) -> bool {
    error.is_not_connected() || matches!(error, WalletAdapterError::Disposed)
}

/// Fetches the addresses again each time the wallet signals a change.
/// Only the latest fetch is kept, an older one still running is cancelled.
struct Refresh {
    runtime: Rc<dyn Runtime>,
    wallet: &'static str,
    fetch: FetchAddresses,
    callback: AddressesChangedCallback,
    in_flight: RefCell<Option<AbortHandle>>,
    closed: Cell<bool>,
}

impl Refresh {
    fn trigger(&self) {
        if self.closed.get() {
            return;
        }

        let fetch = Rc::clone(&self.fetch);
        let callback = Rc::clone(&self.callback);
        let wallet = self.wallet;
        let handle = spawn_abortable(&*self.runtime, async move {
            match fetch().await {
                Ok(addresses) => callback(addresses),
                Err(error) => {
                    tracing::warn!(wallet, %error, "failed to get addresses on change")
                }
            }
        });

        if let Some(previous) = self.in_flight.replace(Some(handle)) {
            previous.abort();
        }
    }

    fn close(&self) {
        self.closed.set(true);
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.abort();
        }
    }
}

/// Watch the addresses of a wallet.
///
/// `listen` registers the change handler for one of `events`. When the
/// provider cannot register listeners (`listen` returns `None` for any of
/// them, or there is no event at all) the addresses are polled every
/// [`ADDRESS_POLL_INTERVAL`] instead.
pub(crate) fn watch_addresses(
    runtime: &Rc<dyn Runtime>,
    wallet: &'static str,
    events: &[&str],
    listen: impl Fn(&str, Rc<dyn Fn()>) -> Option<Subscription>,
    fetch: FetchAddresses,
    callback: AddressesChangedCallback,
) -> Subscription {
    if events.is_empty() {
        return poll_addresses(runtime, wallet, fetch, callback);
    }

    let refresh = Rc::new(Refresh {
        runtime: Rc::clone(runtime),
        wallet,
        fetch: Rc::clone(&fetch),
        callback: Rc::clone(&callback),
        in_flight: RefCell::new(None),
        closed: Cell::new(false),
    });
    let trigger: Rc<dyn Fn()> = {
        let refresh = Rc::downgrade(&refresh);
        Rc::new(move || {
            if let Some(refresh) = refresh.upgrade() {
                refresh.trigger();
            }
        })
    };

    let mut listeners = Vec::with_capacity(events.len());
    for event in events {
        match listen(event, Rc::clone(&trigger)) {
            Some(listener) => listeners.push(listener),
            None => {
                for mut listener in listeners {
                    listener.unsubscribe();
                }
                tracing::debug!(wallet, "no change events, polling the addresses");
                return poll_addresses(runtime, wallet, fetch, callback);
            }
        }
    }

    Subscription::new(move || {
        for listener in &mut listeners {
            listener.unsubscribe();
        }
        refresh.close();
    })
}

/// Fetch the addresses every [`ADDRESS_POLL_INTERVAL`] and report them.
/// Stops on its own once the wallet reports it is not connected anymore.
pub(crate) fn poll_addresses(
    runtime: &Rc<dyn Runtime>,
    wallet: &'static str,
    fetch: FetchAddresses,
    callback: AddressesChangedCallback,
) -> Subscription {
    let clock = Rc::clone(runtime);
    let handle = spawn_abortable(&**runtime, async move {
        loop {
            clock.sleep(ADDRESS_POLL_INTERVAL).await;
            match fetch().await {
                Ok(addresses) => callback(addresses),
                Err(error) if is_final(&error) => {
                    tracing::debug!(wallet, %error, "stopped polling the addresses");
                    return;
                }
                Err(error) => tracing::warn!(wallet, %error, "failed to poll the addresses"),
            }
        }
    });

    Subscription::new(move || handle.abort())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        btc::{AddressPurpose, BitcoinNetwork},
        runtime::ManualRuntime,
    };

    const ADDRESS: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    struct Fixture {
        runtime: Rc<ManualRuntime>,
        calls: Rc<Cell<usize>>,
        reported: Rc<RefCell<Vec<usize>>>,
        connected: Rc<Cell<bool>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                runtime: Rc::new(ManualRuntime::new()),
                calls: Rc::new(Cell::new(0)),
                reported: Rc::new(RefCell::new(Vec::new())),
                connected: Rc::new(Cell::new(true)),
            }
        }

        fn runtime(&self) -> Rc<dyn Runtime> {
            self.runtime.clone()
        }

        fn fetch(&self) -> FetchAddresses {
            let calls = Rc::clone(&self.calls);
            let connected = Rc::clone(&self.connected);
            Rc::new(move || {
                calls.set(calls.get() + 1);
                let connected = connected.get();
                async move {
                    if !connected {
                        return Err(WalletAdapterError::not_connected("Test"));
                    }
                    WalletAddress::derive(
                        BitcoinNetwork::Mainnet,
                        ADDRESS,
                        vec![AddressPurpose::Payment],
                        None,
                    )
                    .map(|address| vec![address])
                }
                .boxed_local()
            })
        }

        fn callback(&self) -> AddressesChangedCallback {
            let reported = Rc::clone(&self.reported);
            Rc::new(move |addresses: Vec<WalletAddress>| reported.borrow_mut().push(addresses.len()))
        }
    }

    #[test]
    fn polling_reports_every_second_until_disconnected() {
        let fixture = Fixture::new();
        let _watch = poll_addresses(&fixture.runtime(), "Test", fixture.fetch(), fixture.callback());

        fixture.runtime.advance(Duration::from_millis(2500));
        assert_eq!(*fixture.reported.borrow(), vec![1, 1]);

        fixture.connected.set(false);
        fixture.runtime.advance(Duration::from_secs(5));
        assert_eq!(fixture.calls.get(), 3);
        assert_eq!(fixture.runtime.pending_timers(), 0);
    }

    #[test]
    fn unsubscribing_stops_polling() {
        let fixture = Fixture::new();
        let mut watch =
            poll_addresses(&fixture.runtime(), "Test", fixture.fetch(), fixture.callback());

        watch.unsubscribe();
        fixture.runtime.advance(Duration::from_secs(3));

        assert_eq!(fixture.calls.get(), 0);
        assert_eq!(fixture.runtime.pending_timers(), 0);
    }

    #[test]
    fn events_trigger_a_refresh() {
        let fixture = Fixture::new();
        let handlers: Rc<RefCell<Vec<(String, Rc<dyn Fn()>)>>> = Rc::default();
        let registry = Rc::clone(&handlers);
        let mut watch = watch_addresses(
            &fixture.runtime(),
            "Test",
            &["accountsChanged", "networkChanged"],
            move |event, handler| {
                registry.borrow_mut().push((event.to_owned(), handler));
                let registry = Rc::clone(&registry);
                let event = event.to_owned();
                Some(Subscription::new(move || {
                    registry.borrow_mut().retain(|(name, _)| *name != event)
                }))
            },
            fixture.fetch(),
            fixture.callback(),
        );
        assert_eq!(handlers.borrow().len(), 2);

        let fire = |event: &str| {
            let handler = handlers
                .borrow()
                .iter()
                .find(|(name, _)| name == event)
                .map(|(_, handler)| Rc::clone(handler));
            if let Some(handler) = handler {
                handler()
            }
        };

        fire("networkChanged");
        fixture.runtime.run_until_stalled();
        assert_eq!(*fixture.reported.borrow(), vec![1]);

        watch.unsubscribe();
        assert!(handlers.borrow().is_empty());
        fixture.runtime.advance(Duration::from_secs(3));
        assert_eq!(fixture.calls.get(), 1);
    }

    #[test]
    fn missing_event_support_falls_back_to_polling() {
        let fixture = Fixture::new();
        let _watch = watch_addresses(
            &fixture.runtime(),
            "Test",
            &["accountChanged"],
            |_, _| None,
            fixture.fetch(),
            fixture.callback(),
        );

        fixture.runtime.advance(ADDRESS_POLL_INTERVAL);
        assert_eq!(*fixture.reported.borrow(), vec![1]);
    }
}
