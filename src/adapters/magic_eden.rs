//! Wallets still on the callback based sats-connect API: Magic Eden.
//!
//! Every call opens a prompt which either finishes with a value or is
//! cancelled by the user. Addresses are only handed out by such a prompt, so
//! the granted ones are cached like Leather's.

use super::{
    watch::{fetcher, watch_addresses},
    xverse::{SatsConnectAddress, SatsConnectNetwork, SatsConnectPurpose},
};
use crate::{
    adapter::{
        AddressesChangedCallback, FeeRateCapability, SendBitcoinOptions, SignInput,
        SignMessageResult, WalletAdapter,
    },
    btc::{AddressPurpose, BitcoinNetwork, WalletAddress},
    error::{ProviderError, WalletAdapterError, XverseRpcErrorCode},
    observable::Subscription,
    psbt::{self, PsbtFinalizer},
    runtime::Runtime,
    storage::{AddressCache, Storage},
};
use async_trait::async_trait;
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::rc::{Rc, Weak};

pub const MAGIC_EDEN_PROVIDER_ID: &str = "magiceden.bitcoin";

/// Outcome of a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt<T> {
    Finished(T),
    Cancelled,
}

impl<T> Prompt<T> {
    pub fn finished(self) -> Result<T, WalletAdapterError> {
        match self {
            Self::Finished(value) => Ok(value),
            Self::Cancelled => Err(WalletAdapterError::UserRejected),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromptNetwork {
    #[serde(rename = "type")]
    pub kind: SatsConnectNetwork,
}

impl From<BitcoinNetwork> for PromptNetwork {
    fn from(network: BitcoinNetwork) -> Self {
        let kind = match network {
            BitcoinNetwork::Mainnet => SatsConnectNetwork::Mainnet,
            BitcoinNetwork::Testnet | BitcoinNetwork::Unknown => SatsConnectNetwork::Testnet,
        };
        Self { kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GetAddressRequest {
    pub purposes: Vec<SatsConnectPurpose>,
    pub message: String,
    pub network: PromptNetwork,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignMessageRequest {
    pub network: PromptNetwork,
    pub address: String,
    pub message: String,
    pub protocol: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub address: String,
    pub amount_sats: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBtcTransactionRequest {
    pub network: PromptNetwork,
    pub message: String,
    pub recipients: Vec<Recipient>,
    pub sender_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputToSign {
    pub address: String,
    pub signing_indexes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionRequest {
    pub network: PromptNetwork,
    pub message: String,
    pub psbt_base64: String,
    pub inputs_to_sign: Vec<InputToSign>,
    pub broadcast: bool,
}

pub type AccountsChangedHandler = Rc<dyn Fn(Vec<SatsConnectAddress>)>;

#[async_trait(?Send)]
pub trait LegacySatsConnectProvider {
    async fn get_address(
        &self,
        request: &GetAddressRequest,
    ) -> Result<Prompt<Vec<SatsConnectAddress>>, ProviderError>;

    /// finishes with the signature
    async fn sign_message(&self, request: &SignMessageRequest)
    -> Result<Prompt<String>, ProviderError>;

    /// finishes with the transaction id
    async fn send_btc_transaction(
        &self,
        request: &SendBtcTransactionRequest,
    ) -> Result<Prompt<String>, ProviderError>;

    /// finishes with the signed PSBT, base64 encoded
    async fn sign_transaction(
        &self,
        request: &SignTransactionRequest,
    ) -> Result<Prompt<String>, ProviderError>;

    /// `handler` receives the accounts selected in the wallet
    fn on_accounts_changed(&self, handler: AccountsChangedHandler) -> Option<Subscription>;
}

#[derive(Debug, Clone, Copy)]
pub struct LegacySatsConnectFlavor {
    pub wallet_name: &'static str,
    /// key of the address cache
    pub storage_id: &'static str,
    pub parse_addresses:
        fn(&[SatsConnectAddress]) -> Result<Vec<WalletAddress>, WalletAdapterError>,
}

pub const MAGIC_EDEN: LegacySatsConnectFlavor = LegacySatsConnectFlavor {
    wallet_name: "Magic Eden",
    storage_id: MAGIC_EDEN_PROVIDER_ID,
    parse_addresses: parse_magic_eden_addresses,
};

/// Magic Eden hands one payment and one ordinals address. The network is
/// read from the ordinals address.
fn parse_magic_eden_addresses(
    addresses: &[SatsConnectAddress],
) -> Result<Vec<WalletAddress>, WalletAdapterError> {
    let network = match addresses
        .iter()
        .find(|entry| entry.purpose == SatsConnectPurpose::Ordinals)
    {
        Some(entry) if entry.address.starts_with("bc") => BitcoinNetwork::Mainnet,
        _ => BitcoinNetwork::Testnet,
    };

    addresses
        .iter()
        .filter_map(|entry| {
            let purposes: Vec<AddressPurpose> = match entry.purpose {
                SatsConnectPurpose::Payment => vec![AddressPurpose::Payment],
                SatsConnectPurpose::Ordinals => AddressPurpose::INSCRIPTIONS.into(),
                _ => return None,
            };
            Some(WalletAddress::derive(
                network,
                &entry.address,
                purposes,
                Some(&entry.public_key),
            ))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Grant {
    addresses: Vec<SatsConnectAddress>,
}

impl Grant {
    /// a grant without an ordinals address cannot be used
    fn is_usable(&self) -> bool {
        self.addresses
            .iter()
            .any(|entry| entry.purpose == SatsConnectPurpose::Ordinals)
    }
}

const CHANGE_EVENTS: &[&str] = &["accountsChanged"];

pub struct LegacySatsConnectAdapter {
    provider: Rc<dyn LegacySatsConnectProvider>,
    flavor: LegacySatsConnectFlavor,
    network: BitcoinNetwork,
    runtime: Rc<dyn Runtime>,
    finalizer: Rc<dyn PsbtFinalizer>,
    cache: AddressCache<Grant>,
}

impl LegacySatsConnectAdapter {
    pub fn new(
        provider: Rc<dyn LegacySatsConnectProvider>,
        flavor: LegacySatsConnectFlavor,
        network: BitcoinNetwork,
        runtime: Rc<dyn Runtime>,
        storage: Rc<dyn Storage>,
        finalizer: Rc<dyn PsbtFinalizer>,
    ) -> Self {
        Self {
            provider,
            flavor,
            network,
            runtime,
            finalizer,
            cache: AddressCache::new(storage, flavor.storage_id),
        }
    }

    /// the network prompts are opened for
    pub fn network(&self) -> BitcoinNetwork {
        self.network
    }

    fn error(&self, error: ProviderError) -> WalletAdapterError {
        WalletAdapterError::from_provider(
            self.flavor.wallet_name,
            error,
            XverseRpcErrorCode::is_user_rejection,
        )
    }

    fn granted(&self) -> Result<Grant, WalletAdapterError> {
        match self.cache.load() {
            Some(grant) if grant.is_usable() => Ok(grant),
            Some(_) => {
                self.cache.clear();
                Err(WalletAdapterError::not_connected(self.flavor.wallet_name))
            }
            None => Err(WalletAdapterError::not_connected(self.flavor.wallet_name)),
        }
    }

    fn replace_grant(&self, grant: Grant) {
        if grant.is_usable() {
            self.cache.store(grant);
        } else {
            tracing::warn!(
                wallet = self.flavor.wallet_name,
                "accounts changed without an ordinals address, dropping the grant"
            );
            self.cache.clear();
        }
    }
}

#[async_trait(?Send)]
impl WalletAdapter for LegacySatsConnectAdapter {
    async fn connect(&self) -> Result<(), WalletAdapterError> {
        if self.granted().is_ok() {
            return Ok(());
        }

        let request = GetAddressRequest {
            purposes: vec![SatsConnectPurpose::Ordinals, SatsConnectPurpose::Payment],
            message: "Address for receiving Ordinals and payments".to_owned(),
            network: self.network.into(),
        };
        let addresses = self
            .provider
            .get_address(&request)
            .await
            .map_err(|e| self.error(e))?
            .finished()?;

        self.cache.store(Grant { addresses });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WalletAdapterError> {
        self.cache.clear();
        Ok(())
    }

    async fn addresses(&self) -> Result<Vec<WalletAddress>, WalletAdapterError> {
        (self.flavor.parse_addresses)(&self.granted()?.addresses)
    }

    fn on_addresses_changed(self: Rc<Self>, callback: AddressesChangedCallback) -> Subscription {
        let adapter: Weak<Self> = Rc::downgrade(&self);
        let provider = Rc::clone(&self.provider);
        watch_addresses(
            &self.runtime,
            self.flavor.wallet_name,
            CHANGE_EVENTS,
            move |_, refresh| {
                let adapter = adapter.clone();
                provider.on_accounts_changed(Rc::new(move |addresses: Vec<SatsConnectAddress>| {
                    // the event carries the new accounts, they replace the grant
                    if let Some(adapter) = adapter.upgrade() {
                        adapter.replace_grant(Grant { addresses });
                    }
                    refresh();
                }))
            },
            fetcher(&self),
            callback,
        )
    }

    async fn sign_message(
        &self,
        address: &str,
        message: &str,
    ) -> Result<SignMessageResult, WalletAdapterError> {
        let request = SignMessageRequest {
            network: self.network.into(),
            address: address.to_owned(),
            message: message.to_owned(),
            protocol: "BIP322",
        };
        let signature = self
            .provider
            .sign_message(&request)
            .await
            .map_err(|e| self.error(e))?
            .finished()?;

        Ok(SignMessageResult::Bip322 {
            signature,
            address: address.to_owned(),
        })
    }

    async fn sign_and_finalize_psbt(
        &self,
        psbt_hex: &str,
        sign_inputs: &[SignInput],
    ) -> Result<String, WalletAdapterError> {
        let mut inputs_to_sign: Vec<InputToSign> = Vec::new();
        for input in sign_inputs {
            match inputs_to_sign
                .iter_mut()
                .find(|entry| entry.address == input.address)
            {
                Some(entry) => entry.signing_indexes.push(input.index),
                None => inputs_to_sign.push(InputToSign {
                    address: input.address.clone(),
                    signing_indexes: vec![input.index],
                }),
            }
        }

        let request = SignTransactionRequest {
            network: self.network.into(),
            message: "Sign transaction".to_owned(),
            psbt_base64: psbt::hex_to_base64(psbt_hex)?,
            inputs_to_sign,
            broadcast: false,
        };
        let signed = self
            .provider
            .sign_transaction(&request)
            .await
            .map_err(|e| self.error(e))?
            .finished()?;

        psbt::finalize(&*self.finalizer, psbt::decode_base64(&signed)?)
    }

    fn send_bitcoin_fee_rate(&self) -> FeeRateCapability {
        FeeRateCapability::Unavailable
    }

    async fn send_bitcoin(
        &self,
        _from_address: &str,
        receiver_address: &str,
        amount: Amount,
        options: SendBitcoinOptions,
    ) -> Result<String, WalletAdapterError> {
        FeeRateCapability::Unavailable.check(self.flavor.wallet_name, options.fee_rate)?;

        let addresses = self.addresses().await?;
        let sender = addresses
            .iter()
            .find(|address| address.has_purpose(AddressPurpose::Payment))
            .ok_or_else(|| WalletAdapterError::Adapter("Bitcoin address not found".to_owned()))?;

        let request = SendBtcTransactionRequest {
            network: self.network.into(),
            message: "Send Bitcoin".to_owned(),
            recipients: vec![Recipient {
                address: receiver_address.to_owned(),
                amount_sats: amount.to_sat(),
            }],
            sender_address: sender.address().to_owned(),
        };
        self.provider
            .send_btc_transaction(&request)
            .await
            .map_err(|e| self.error(e))?
            .finished()
    }
}
