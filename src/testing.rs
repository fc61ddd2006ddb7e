//! Scriptable adapter shared by the connector tests.

use crate::{
    adapter::{
        AddressesChangedCallback, FeeRateCapability, SendBitcoinOptions, SignInput,
        SignMessageResult, WalletAdapter,
    },
    btc::{AddressPurpose, BitcoinNetwork, WalletAddress},
    error::WalletAdapterError,
    observable::Subscription,
};
use async_trait::async_trait;
use bitcoin::Amount;
use futures::future::LocalBoxFuture;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

pub(crate) const PAYMENT: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";
pub(crate) const NATIVE: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
pub(crate) const TAPROOT: &str = "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";

pub(crate) fn address(address: &str, purposes: impl Into<Vec<AddressPurpose>>) -> WalletAddress {
    WalletAddress::derive(BitcoinNetwork::Mainnet, address, purposes, None).unwrap()
}

/// a payment and an ordinals address
pub(crate) fn two_addresses() -> Vec<WalletAddress> {
    vec![
        address(PAYMENT, [AddressPurpose::Payment]),
        address(TAPROOT, AddressPurpose::INSCRIPTIONS),
    ]
}

pub(crate) struct FakeAdapter {
    pub name: &'static str,
    /// permission granted, `addresses` fails with `NotConnected` without it
    pub granted: Cell<bool>,
    pub connect_error: RefCell<Option<WalletAdapterError>>,
    /// awaited by the next `connect`, to keep it pending
    pub connect_delay: RefCell<Option<LocalBoxFuture<'static, ()>>>,
    pub addresses: RefCell<Result<Vec<WalletAddress>, WalletAdapterError>>,
    pub fee_rate: FeeRateCapability,
    pub connects: Cell<usize>,
    pub disconnects: Cell<usize>,
    pub address_calls: Cell<usize>,
    pub watchers: RefCell<Vec<AddressesChangedCallback>>,
    pub unwatched: Rc<Cell<usize>>,
}

impl FakeAdapter {
    pub fn new(name: &'static str) -> Rc<Self> {
        Rc::new(Self::with_addresses(name, Ok(two_addresses())))
    }

    pub fn with_addresses(
        name: &'static str,
        addresses: Result<Vec<WalletAddress>, WalletAdapterError>,
    ) -> Self {
        Self {
            name,
            granted: Cell::new(false),
            connect_error: RefCell::new(None),
            connect_delay: RefCell::new(None),
            addresses: RefCell::new(addresses),
            fee_rate: FeeRateCapability::Available,
            connects: Cell::new(0),
            disconnects: Cell::new(0),
            address_calls: Cell::new(0),
            watchers: RefCell::new(Vec::new()),
            unwatched: Rc::new(Cell::new(0)),
        }
    }

    /// as if the wallet changed its accounts
    pub fn emit(&self, addresses: Vec<WalletAddress>) {
        let watchers: Vec<_> = self.watchers.borrow().iter().cloned().collect();
        for watcher in watchers {
            watcher(addresses.clone());
        }
    }
}

#[async_trait(?Send)]
impl WalletAdapter for FakeAdapter {
    async fn connect(&self) -> Result<(), WalletAdapterError> {
        self.connects.set(self.connects.get() + 1);
        let delay = self.connect_delay.borrow_mut().take();
        if let Some(delay) = delay {
            delay.await;
        }
        if let Some(error) = self.connect_error.borrow().clone() {
            return Err(error);
        }
        self.granted.set(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WalletAdapterError> {
        self.disconnects.set(self.disconnects.get() + 1);
        self.granted.set(false);
        Ok(())
    }

    async fn addresses(&self) -> Result<Vec<WalletAddress>, WalletAdapterError> {
        self.address_calls.set(self.address_calls.get() + 1);
        if !self.granted.get() {
            return Err(WalletAdapterError::not_connected(self.name));
        }
        self.addresses.borrow().clone()
    }

    fn on_addresses_changed(self: Rc<Self>, callback: AddressesChangedCallback) -> Subscription {
        self.watchers.borrow_mut().push(callback);
        let unwatched = Rc::clone(&self.unwatched);
        Subscription::new(move || unwatched.set(unwatched.get() + 1))
    }

    async fn sign_message(
        &self,
        address: &str,
        message: &str,
    ) -> Result<SignMessageResult, WalletAdapterError> {
        Ok(SignMessageResult::Bip322 {
            signature: format!("signed:{message}"),
            address: address.to_owned(),
        })
    }

    async fn sign_and_finalize_psbt(
        &self,
        psbt_hex: &str,
        _sign_inputs: &[SignInput],
    ) -> Result<String, WalletAdapterError> {
        Ok(psbt_hex.to_owned())
    }

    fn send_bitcoin_fee_rate(&self) -> FeeRateCapability {
        self.fee_rate
    }

    async fn send_bitcoin(
        &self,
        _from_address: &str,
        _receiver_address: &str,
        _amount: Amount,
        _options: SendBitcoinOptions,
    ) -> Result<String, WalletAdapterError> {
        Ok("txid".to_owned())
    }
}
