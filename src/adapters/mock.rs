//! Substitute addresses of a real wallet, to try an application with an
//! account one does not own. Only the addresses are mocked: nothing can be
//! signed or sent through the mock.

use crate::{
    adapter::{
        AdapterDescriptor, AdapterFactory, AddressesChangedCallback, FeeRateCapability,
        SendBitcoinOptions, SignInput, SignMessageResult, WalletAdapter,
    },
    btc::{AddressPurpose, AddressType, BitcoinNetwork, SpendInfo, WalletAddress},
    error::WalletAdapterError,
    observable::Subscription,
};
use async_trait::async_trait;
use bitcoin::Amount;
use std::rc::Rc;

/// placeholder for the keys of mocked addresses
const PLACEHOLDER_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// `OP_1 <placeholder key> OP_1 OP_CHECKMULTISIG`
fn placeholder_redeem_script() -> String {
    format!("5120{PLACEHOLDER_KEY}51ae")
}

/// The addresses to report instead of the wallet's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockAddresses {
    pub payment: Option<String>,
    pub ordinals: Option<String>,
}

pub struct MockAddressAdapter {
    network: BitcoinNetwork,
    inner: Rc<dyn WalletAdapter>,
    mocked: MockAddresses,
}

impl MockAddressAdapter {
    pub fn new(network: BitcoinNetwork, inner: Rc<dyn WalletAdapter>, mocked: MockAddresses) -> Self {
        Self {
            network,
            inner,
            mocked,
        }
    }

    fn mock_address(
        &self,
        name: &str,
        address: &str,
        purposes: Vec<AddressPurpose>,
    ) -> Result<WalletAddress, WalletAdapterError> {
        let network = match self.network {
            BitcoinNetwork::Testnet => BitcoinNetwork::Testnet,
            BitcoinNetwork::Mainnet | BitcoinNetwork::Unknown => BitcoinNetwork::Mainnet,
        };
        let address = WalletAddress::derive(network, address, purposes, None).map_err(|_| {
            WalletAdapterError::Adapter(format!("Please provide a supported {name} address"))
        })?;

        let spend = match address.address_type() {
            AddressType::P2pkh => SpendInfo::P2pkh,
            AddressType::P2wpkh => SpendInfo::P2wpkh,
            AddressType::P2shP2wpkh => SpendInfo::P2shP2wpkh {
                redeem_script: Some(placeholder_redeem_script()),
            },
            AddressType::P2tr => SpendInfo::P2tr {
                tap_internal_key: Some(PLACEHOLDER_KEY.to_owned()),
            },
        };
        Ok(address
            .with_public_key(Some(PLACEHOLDER_KEY.to_owned()))
            .with_spend_info(spend))
    }

    fn refused(operation: &str) -> WalletAdapterError {
        WalletAdapterError::Adapter(format!("it's a mock adapter, can't {operation}"))
    }
}

#[async_trait(?Send)]
impl WalletAdapter for MockAddressAdapter {
    async fn connect(&self) -> Result<(), WalletAdapterError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), WalletAdapterError> {
        self.inner.disconnect().await
    }

    async fn addresses(&self) -> Result<Vec<WalletAddress>, WalletAdapterError> {
        let addresses = self.inner.addresses().await?;

        let payment = self
            .mocked
            .payment
            .as_deref()
            .map(|address| self.mock_address("payment", address, vec![AddressPurpose::Payment]))
            .transpose()?;
        let ordinals = self
            .mocked
            .ordinals
            .as_deref()
            .map(|address| {
                self.mock_address("ordinals", address, AddressPurpose::INSCRIPTIONS.into())
            })
            .transpose()?;

        let mut merged = Vec::with_capacity(addresses.len());
        for address in addresses {
            let mut rest = address.purposes().to_vec();
            for (mock, purpose) in [
                (&payment, AddressPurpose::Payment),
                (&ordinals, AddressPurpose::Ordinals),
            ] {
                if let Some(mock) = mock
                    && rest.contains(&purpose)
                {
                    merged.push(mock.clone());
                    rest.retain(|p| *p != purpose);
                }
            }
            if !rest.is_empty() {
                merged.push(address.with_purposes(rest));
            }
        }
        Ok(merged)
    }

    fn on_addresses_changed(self: Rc<Self>, _callback: AddressesChangedCallback) -> Subscription {
        Subscription::noop()
    }

    async fn sign_message(
        &self,
        _address: &str,
        _message: &str,
    ) -> Result<SignMessageResult, WalletAdapterError> {
        Err(Self::refused("sign message"))
    }

    async fn sign_and_finalize_psbt(
        &self,
        _psbt_hex: &str,
        _sign_inputs: &[SignInput],
    ) -> Result<String, WalletAdapterError> {
        Err(Self::refused("sign transaction"))
    }

    fn send_bitcoin_fee_rate(&self) -> FeeRateCapability {
        self.inner.send_bitcoin_fee_rate()
    }

    async fn send_bitcoin(
        &self,
        _from_address: &str,
        _receiver_address: &str,
        _amount: Amount,
        _options: SendBitcoinOptions,
    ) -> Result<String, WalletAdapterError> {
        Err(Self::refused("send bitcoin"))
    }
}

/// wrap `factory` so that its adapters report the `mocked` addresses.
///
/// The new factory is registered as `mocked.<id>`.
pub fn mock_address_factory(
    network: BitcoinNetwork,
    factory: &AdapterFactory,
    mocked: MockAddresses,
) -> AdapterFactory {
    let source = factory.descriptor();
    let descriptor = AdapterDescriptor {
        id: format!("mocked.{}", source.id).into(),
        name: format!("Mocked {}", source.name),
        ..source.clone()
    };

    let availability = factory.availability().map(move |inner| {
        Rc::new(MockAddressAdapter::new(network, inner, mocked.clone())) as Rc<dyn WalletAdapter>
    });
    AdapterFactory::new(descriptor, availability)
}
