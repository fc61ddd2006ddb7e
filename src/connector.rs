//! The connection orchestrator.
//!
//! A [`Connector`] subscribes to the availability of every registered wallet
//! kind, keeps the list of detected adapters in registration order and owns
//! the connection: at most one wallet is connected at a time, its id is
//! persisted so that the next page load reconnects to it without prompting
//! the user.

use crate::{
    adapter::{AdapterDescriptor, AdapterFactory, AdapterId, WalletAdapter},
    btc::{AddressPurpose, WalletAddress},
    error::WalletAdapterError,
    observable::{Observable, Subscription},
    runtime::{Runtime, spawn_abortable},
    storage::{DEFAULT_SESSION_KEY, SessionStore, Storage},
};
use core::fmt;
use futures::future::AbortHandle;
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
};

/// receives the errors the user should be told about
pub type ErrorReporter = Rc<dyn Fn(&WalletAdapterError)>;

/// A detected wallet: its registry id and its adapter.
pub type AdapterEntry = (AdapterId, Rc<dyn WalletAdapter>);

#[derive(Clone)]
pub struct ConnectorConfig {
    runtime: Rc<dyn Runtime>,
    storage: Rc<dyn Storage>,
    session_key: String,
    report_error: ErrorReporter,
}

impl ConnectorConfig {
    /// By default the session is kept under [`DEFAULT_SESSION_KEY`] and
    /// reported errors are logged.
    pub fn new(runtime: Rc<dyn Runtime>, storage: Rc<dyn Storage>) -> Self {
        Self {
            runtime,
            storage,
            session_key: DEFAULT_SESSION_KEY.to_owned(),
            report_error: Rc::new(|error: &WalletAdapterError| {
                tracing::warn!(%error, "wallet operation failed")
            }),
        }
    }

    /// use a different key, to run more than one connector on the same page
    pub fn with_session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = session_key.into();
        self
    }

    pub fn with_error_reporter(mut self, report: impl Fn(&WalletAdapterError) + 'static) -> Self {
        self.report_error = Rc::new(report);
        self
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("session_key", &self.session_key)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ConnectionInfo {
    pub adapter_id: AdapterId,
    pub adapter: Rc<dyn WalletAdapter>,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("adapter_id", &self.adapter_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting {
        adapter_id: AdapterId,
    },
    Connected(ConnectionInfo),
}

impl ConnectionState {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. })
    }

    pub fn connected(&self) -> Option<&ConnectionInfo> {
        match self {
            Self::Connected(info) => Some(info),
            _ => None,
        }
    }

    pub fn adapter_id(&self) -> Option<&AdapterId> {
        match self {
            Self::Disconnected => None,
            Self::Connecting { adapter_id } => Some(adapter_id),
            Self::Connected(info) => Some(&info.adapter_id),
        }
    }
}

/// The connected wallet together with the addresses it currently grants.
#[derive(Clone)]
pub struct WalletSession {
    pub adapter_id: AdapterId,
    pub adapter: Rc<dyn WalletAdapter>,
    pub addresses: Vec<WalletAddress>,
}

impl WalletSession {
    /// the first address serving `purpose`
    pub fn address_for(&self, purpose: AddressPurpose) -> Option<&WalletAddress> {
        self.addresses
            .iter()
            .find(|address| address.has_purpose(purpose))
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("adapter_id", &self.adapter_id)
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    User,
    Auto,
}

struct Inner {
    factories: Vec<AdapterFactory>,
    order: HashMap<AdapterId, usize>,
    runtime: Rc<dyn Runtime>,
    session_store: SessionStore,
    report_error: ErrorReporter,

    available: Observable<Vec<AdapterEntry>>,
    connection: Observable<ConnectionState>,
    session: Observable<Option<WalletSession>>,

    availability: RefCell<Vec<Subscription>>,
    watch: RefCell<Option<Subscription>>,
    reconnect_task: RefCell<Option<AbortHandle>>,
    reconnecting: Cell<bool>,
    disposed: Cell<bool>,
}

/// Marks an auto-reconnect attempt as running for as long as it is alive.
struct Reconnecting(Weak<Inner>);

impl Reconnecting {
    fn start(inner: &Rc<Inner>) -> Self {
        inner.reconnecting.set(true);
        Self(Rc::downgrade(inner))
    }
}

impl Drop for Reconnecting {
    fn drop(&mut self) {
        if let Some(inner) = self.0.upgrade() {
            inner.reconnecting.set(false);
        }
    }
}

impl Inner {
    fn rank(&self, adapter_id: &AdapterId) -> usize {
        self.order.get(adapter_id).copied().unwrap_or(usize::MAX)
    }

    fn add_available(this: &Rc<Self>, adapter_id: AdapterId, adapter: Rc<dyn WalletAdapter>) {
        if this.disposed.get() {
            return;
        }

        tracing::debug!(adapter = %adapter_id, "wallet available");
        this.available.update(|current| {
            let mut next = current.clone();
            match next.iter_mut().find(|(id, _)| *id == adapter_id) {
                Some(entry) => entry.1 = adapter,
                None => next.push((adapter_id, adapter)),
            }
            next.sort_by_key(|(id, _)| this.rank(id));
            next
        });

        Self::spawn_auto_reconnect(this);
    }

    /// the previously connected wallet, if reconnecting to it makes sense now
    fn reconnect_candidate(&self) -> Option<AdapterEntry> {
        if self.disposed.get()
            || self.reconnecting.get()
            || !self.connection.with(ConnectionState::is_disconnected)
        {
            return None;
        }

        let previous = self.session_store.last_connected()?;
        if !self.order.contains_key(&previous) {
            return None;
        }
        self.available
            .with(|available| available.iter().find(|(id, _)| *id == previous).cloned())
    }

    fn spawn_auto_reconnect(this: &Rc<Self>) {
        let Some((adapter_id, adapter)) = this.reconnect_candidate() else {
            return;
        };

        let running = Reconnecting::start(this);
        let inner = Rc::downgrade(this);
        let task = spawn_abortable(&*this.runtime, async move {
            let _running = running;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match Self::reconnect(&inner, adapter_id.clone(), adapter).await {
                Ok(true) => tracing::info!(adapter = %adapter_id, "reconnected"),
                Ok(false) => {}
                Err(error) => tracing::error!(adapter = %adapter_id, %error, "auto-reconnect failed"),
            }
        });

        // a previous task has completed, the flag would be set otherwise
        this.reconnect_task.replace(Some(task));
    }

    async fn auto_reconnect(this: &Rc<Self>) -> Result<bool, WalletAdapterError> {
        let Some((adapter_id, adapter)) = this.reconnect_candidate() else {
            return Ok(false);
        };
        let _running = Reconnecting::start(this);
        Self::reconnect(this, adapter_id, adapter).await
    }

    async fn reconnect(
        this: &Rc<Self>,
        adapter_id: AdapterId,
        adapter: Rc<dyn WalletAdapter>,
    ) -> Result<bool, WalletAdapterError> {
        // only reconnect if the wallet still grants access without a prompt
        match adapter.addresses().await {
            Ok(_) => {}
            Err(error) if error.is_not_connected() => {
                tracing::debug!(adapter = %adapter_id, "previous wallet no longer connected");
                return Ok(false);
            }
            Err(error) => return Err(error),
        }

        if this.disposed.get() || !this.connection.with(ConnectionState::is_disconnected) {
            return Ok(false);
        }
        Self::connect(this, adapter_id, adapter, Origin::Auto).await
    }

    /// `Ok(false)` when the attempt failed with an error reported to the user
    async fn connect(
        this: &Rc<Self>,
        adapter_id: AdapterId,
        adapter: Rc<dyn WalletAdapter>,
        origin: Origin,
    ) -> Result<bool, WalletAdapterError> {
        if this.disposed.get() {
            return Err(WalletAdapterError::Disposed);
        }
        let previous = this.connection.get();
        if previous.is_connecting() {
            return Err(WalletAdapterError::ConnectInProgress);
        }

        tracing::debug!(adapter = %adapter_id, ?origin, "connecting");
        this.connection.set(ConnectionState::Connecting {
            adapter_id: adapter_id.clone(),
        });

        let result = Self::establish(this, &adapter).await;
        if this.disposed.get() {
            return Err(WalletAdapterError::Disposed);
        }

        match result {
            Ok(addresses) => {
                this.session_store.remember(&adapter_id);
                if let Some(mut watch) = this.watch.take() {
                    watch.unsubscribe();
                }

                this.session.set(Some(WalletSession {
                    adapter_id: adapter_id.clone(),
                    adapter: Rc::clone(&adapter),
                    addresses,
                }));
                this.connection
                    .set(ConnectionState::Connected(ConnectionInfo {
                        adapter_id: adapter_id.clone(),
                        adapter: Rc::clone(&adapter),
                    }));

                let watch = Self::watch(this, adapter_id.clone(), adapter);
                *this.watch.borrow_mut() = Some(watch);
                tracing::info!(adapter = %adapter_id, "connected");
                Ok(true)
            }
            Err(error) => {
                this.connection.set(previous);
                if !error.is_user_facing() {
                    return Err(error);
                }

                match origin {
                    Origin::User => (this.report_error)(&error),
                    Origin::Auto => {
                        tracing::info!(adapter = %adapter_id, %error, "auto-reconnect declined")
                    }
                }
                Ok(false)
            }
        }
    }

    async fn establish(
        this: &Rc<Self>,
        adapter: &Rc<dyn WalletAdapter>,
    ) -> Result<Vec<WalletAddress>, WalletAdapterError> {
        adapter.connect().await?;
        adapter.addresses().await.inspect_err(|_| {
            // connected but unusable, do not try it again on the next load
            this.session_store.forget();
        })
    }

    fn watch(this: &Rc<Self>, adapter_id: AdapterId, adapter: Rc<dyn WalletAdapter>) -> Subscription {
        let inner = Rc::downgrade(this);
        adapter.on_addresses_changed(Rc::new(move |addresses: Vec<WalletAddress>| {
            if let Some(inner) = inner.upgrade() {
                inner.apply_address_change(&adapter_id, addresses);
            }
        }))
    }

    fn apply_address_change(&self, adapter_id: &AdapterId, addresses: Vec<WalletAddress>) {
        let current = !self.disposed.get()
            && self.session.with(|session| {
                session
                    .as_ref()
                    .is_some_and(|session| session.adapter_id == *adapter_id)
            });
        if !current {
            tracing::warn!(adapter = %adapter_id, "addresses changed while disconnected, ignoring");
            return;
        }

        tracing::debug!(adapter = %adapter_id, count = addresses.len(), "addresses changed");
        self.session.update(|session| {
            session.as_ref().map(|session| WalletSession {
                addresses,
                ..session.clone()
            })
        });
    }

    async fn disconnect(this: &Rc<Self>) -> Result<(), WalletAdapterError> {
        let Some(info) = this.connection.with(|state| state.connected().cloned()) else {
            return Ok(());
        };

        let result = info.adapter.disconnect().await;
        let still_connected = this
            .connection
            .with(|state| state.adapter_id() == Some(&info.adapter_id));
        if this.disposed.get() || !still_connected {
            return result;
        }

        if let Some(mut watch) = this.watch.take() {
            watch.unsubscribe();
        }
        this.session_store.forget();
        this.session.set(None);
        this.connection.set(ConnectionState::Disconnected);
        tracing::info!(adapter = %info.adapter_id, "disconnected");
        result
    }

    /// stop everything running on behalf of the connector
    fn release(&self) {
        for mut subscription in self.availability.take() {
            subscription.unsubscribe();
        }
        if let Some(mut watch) = self.watch.take() {
            watch.unsubscribe();
        }
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }

        self.release();
        self.available.set(Vec::new());
        self.session.set(None);
        self.connection.set(ConnectionState::Disconnected);
        self.available.clear_subscribers();
        self.session.clear_subscribers();
        self.connection.clear_subscribers();
        tracing::debug!("connector disposed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Orchestrates the detection of the registered wallets and the connection
/// to one of them.
///
/// Cloning gives another handle on the same connector.
#[derive(Clone)]
pub struct Connector {
    inner: Rc<Inner>,
}

impl Connector {
    /// register `factories`, their order is the order wallets are listed in.
    ///
    /// Detection starts right away. Fails if two factories share an id.
    pub fn new(
        factories: Vec<AdapterFactory>,
        config: ConnectorConfig,
    ) -> Result<Self, WalletAdapterError> {
        let mut order = HashMap::with_capacity(factories.len());
        for (index, factory) in factories.iter().enumerate() {
            if order.insert(factory.id().clone(), index).is_some() {
                return Err(WalletAdapterError::DuplicateAdapterId(factory.id().clone()));
            }
        }

        let inner = Rc::new(Inner {
            factories,
            order,
            runtime: config.runtime,
            session_store: SessionStore::new(config.storage, config.session_key),
            report_error: config.report_error,
            available: Observable::new(Vec::new()),
            connection: Observable::new(ConnectionState::Disconnected),
            session: Observable::new(None),
            availability: RefCell::new(Vec::new()),
            watch: RefCell::new(None),
            reconnect_task: RefCell::new(None),
            reconnecting: Cell::new(false),
            disposed: Cell::new(false),
        });

        let subscriptions: Vec<Subscription> = inner
            .factories
            .iter()
            .map(|factory| {
                let connector = Rc::downgrade(&inner);
                let adapter_id = factory.id().clone();
                factory.availability().subscribe(move |adapter| {
                    if let Some(connector) = connector.upgrade() {
                        Inner::add_available(&connector, adapter_id.clone(), adapter);
                    }
                })
            })
            .collect();
        inner.availability.borrow_mut().extend(subscriptions);

        Ok(Self { inner })
    }

    pub fn factories(&self) -> &[AdapterFactory] {
        &self.inner.factories
    }

    pub fn descriptors(&self) -> Vec<AdapterDescriptor> {
        self.inner
            .factories
            .iter()
            .map(|factory| factory.descriptor().clone())
            .collect()
    }

    /// the detected wallets, in registration order
    pub fn available_adapters(&self) -> Vec<AdapterEntry> {
        self.inner.available.get()
    }

    pub fn subscribe_available_adapters(
        &self,
        listener: impl Fn(&Vec<AdapterEntry>) + 'static,
    ) -> Subscription {
        self.inner.available.subscribe(listener)
    }

    pub fn connection(&self) -> ConnectionState {
        self.inner.connection.get()
    }

    pub fn subscribe_connection(&self, listener: impl Fn(&ConnectionState) + 'static) -> Subscription {
        self.inner.connection.subscribe(listener)
    }

    /// the connected wallet and its addresses
    pub fn session(&self) -> Option<WalletSession> {
        self.inner.session.get()
    }

    pub fn subscribe_session(
        &self,
        listener: impl Fn(&Option<WalletSession>) + 'static,
    ) -> Subscription {
        self.inner.session.subscribe(listener)
    }

    /// connect to `adapter`, replacing the current connection if any.
    ///
    /// Errors the user can act upon (a rejected prompt, an unsupported
    /// address) are handed to the configured error reporter and the previous
    /// connection state is restored: they do not fail the call.
    pub async fn connect(
        &self,
        adapter_id: &AdapterId,
        adapter: Rc<dyn WalletAdapter>,
    ) -> Result<(), WalletAdapterError> {
        Inner::connect(&self.inner, adapter_id.clone(), adapter, Origin::User)
            .await
            .map(|_| ())
    }

    pub async fn disconnect(&self) -> Result<(), WalletAdapterError> {
        Inner::disconnect(&self.inner).await
    }

    /// reconnect to the wallet of the previous session if it still grants
    /// access without prompting. Returns whether a connection was made.
    ///
    /// This runs on its own each time a wallet becomes available.
    pub async fn auto_reconnect(&self) -> Result<bool, WalletAdapterError> {
        Inner::auto_reconnect(&self.inner).await
    }

    /// stop the detection and the address watching and reset the state.
    /// Subscribers receive the reset values, then are dropped.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("factories", &self.inner.factories)
            .field("connection", &self.inner.connection.get())
            .finish_non_exhaustive()
    }
}
