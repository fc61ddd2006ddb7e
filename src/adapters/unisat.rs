//! UniSat and the wallets copying its injected API (Bitget, OKX).

use super::watch::{fetcher, watch_addresses};
use crate::{
    adapter::{
        AddressesChangedCallback, FeeRateCapability, SendBitcoinOptions, SignInput,
        SignMessageResult, WalletAdapter,
    },
    btc::{AddressPurpose, BitcoinNetwork, DetectedAddressType, WalletAddress, detect_address_type},
    error::{ProviderError, RpcErrorCode, WalletAdapterError},
    observable::Subscription,
    psbt::{self, PsbtFinalizer},
    runtime::Runtime,
};
use async_trait::async_trait;
use bitcoin::Amount;
use serde::Serialize;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnisatMessageKind {
    Ecdsa,
    Bip322Simple,
}

impl UnisatMessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ecdsa => "ecdsa",
            Self::Bip322Simple => "bip322-simple",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnisatSignPsbtOptions {
    pub auto_finalized: bool,
    pub to_sign_inputs: Vec<UnisatToSignInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnisatToSignInput {
    pub index: u32,
    pub address: String,
}

/// The API injected by UniSat, `window.unisat`.
///
/// Rejections carry an EIP-1193 style `{ code, message }` body.
#[async_trait(?Send)]
pub trait UnisatProvider {
    async fn get_accounts(&self) -> Result<Vec<String>, ProviderError>;

    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError>;

    /// provider level connection, only some copies of the API have it
    async fn connect(&self) -> Result<(), ProviderError> {
        self.request_accounts().await.map(|_| ())
    }

    /// public key of the current account, hex encoded
    async fn get_public_key(&self) -> Result<String, ProviderError>;

    /// `"livenet"` or `"testnet"`
    async fn get_network(&self) -> Result<String, ProviderError>;

    async fn sign_message(
        &self,
        message: &str,
        kind: UnisatMessageKind,
    ) -> Result<String, ProviderError>;

    async fn send_bitcoin(
        &self,
        receiver_address: &str,
        satoshis: u64,
        fee_rate: Option<f64>,
    ) -> Result<String, ProviderError>;

    async fn send_inscription(
        &self,
        receiver_address: &str,
        inscription_id: &str,
        fee_rate: Option<f64>,
    ) -> Result<String, ProviderError>;

    /// returns the signed PSBT, hex encoded
    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: &UnisatSignPsbtOptions,
    ) -> Result<String, ProviderError>;

    /// register `handler` for `event`, `None` if the provider has no events
    fn on(&self, event: &str, handler: Rc<dyn Fn()>) -> Option<Subscription>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMethod {
    /// `requestAccounts` unless accounts are already granted
    RequestAccounts,
    /// the provider's own `connect`
    ProviderConnect,
}

/// What differs between the copies of the UniSat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnisatFlavor {
    pub wallet_name: &'static str,
    pub connect: ConnectMethod,
    pub send_bitcoin_fee_rate: FeeRateCapability,
    pub send_inscription_fee_rate: FeeRateCapability,
    pub change_events: &'static [&'static str],
}

pub const UNISAT: UnisatFlavor = UnisatFlavor {
    wallet_name: "UniSat",
    connect: ConnectMethod::RequestAccounts,
    send_bitcoin_fee_rate: FeeRateCapability::Required,
    // its default fee rate does not follow mempool.space
    send_inscription_fee_rate: FeeRateCapability::Unavailable,
    change_events: &["accountsChanged", "networkChanged"],
};

pub const BITGET: UnisatFlavor = UnisatFlavor {
    wallet_name: "Bitget",
    connect: ConnectMethod::RequestAccounts,
    send_bitcoin_fee_rate: FeeRateCapability::Available,
    send_inscription_fee_rate: FeeRateCapability::Available,
    change_events: &["accountsChanged", "networkChanged"],
};

/// OKX names its account event `accountChanged`
pub const OKX: UnisatFlavor = UnisatFlavor {
    wallet_name: "OKX Wallet",
    connect: ConnectMethod::ProviderConnect,
    send_bitcoin_fee_rate: FeeRateCapability::Available,
    send_inscription_fee_rate: FeeRateCapability::Available,
    change_events: &["accountChanged", "networkChanged"],
};

pub struct UnisatCompatibleAdapter {
    provider: Rc<dyn UnisatProvider>,
    flavor: UnisatFlavor,
    runtime: Rc<dyn Runtime>,
    finalizer: Rc<dyn PsbtFinalizer>,
}

impl UnisatCompatibleAdapter {
    pub fn new(
        provider: Rc<dyn UnisatProvider>,
        flavor: UnisatFlavor,
        runtime: Rc<dyn Runtime>,
        finalizer: Rc<dyn PsbtFinalizer>,
    ) -> Self {
        Self {
            provider,
            flavor,
            runtime,
            finalizer,
        }
    }

    pub fn flavor(&self) -> &UnisatFlavor {
        &self.flavor
    }

    fn error(&self, error: ProviderError) -> WalletAdapterError {
        WalletAdapterError::from_provider(
            self.flavor.wallet_name,
            error,
            RpcErrorCode::is_user_rejection,
        )
    }

    /// send an inscription of the wallet to `receiver_address`
    ///
    /// Experimental: not every copy of the API supports it.
    pub async fn send_inscription(
        &self,
        receiver_address: &str,
        inscription_id: &str,
        options: SendBitcoinOptions,
    ) -> Result<String, WalletAdapterError> {
        let fee_rate = self
            .flavor
            .send_inscription_fee_rate
            .check(self.flavor.wallet_name, options.fee_rate)?;
        self.provider
            .send_inscription(receiver_address, inscription_id, fee_rate)
            .await
            .map_err(|error| self.error(error))
    }
}

#[async_trait(?Send)]
impl WalletAdapter for UnisatCompatibleAdapter {
    async fn connect(&self) -> Result<(), WalletAdapterError> {
        match self.flavor.connect {
            ConnectMethod::ProviderConnect => {
                self.provider.connect().await.map_err(|e| self.error(e))
            }
            ConnectMethod::RequestAccounts => {
                let accounts = self
                    .provider
                    .get_accounts()
                    .await
                    .map_err(|e| self.error(e))?;
                if accounts.is_empty() {
                    self.provider
                        .request_accounts()
                        .await
                        .map_err(|e| self.error(e))?;
                }
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), WalletAdapterError> {
        Ok(())
    }

    async fn addresses(&self) -> Result<Vec<WalletAddress>, WalletAdapterError> {
        let accounts = self
            .provider
            .get_accounts()
            .await
            .map_err(|e| self.error(e))?;
        let Some(address) = accounts.into_iter().next() else {
            return Err(WalletAdapterError::not_connected(self.flavor.wallet_name));
        };

        let public_key = self
            .provider
            .get_public_key()
            .await
            .map_err(|e| self.error(e))?;
        let network = match self
            .provider
            .get_network()
            .await
            .map_err(|e| self.error(e))?
            .as_str()
        {
            "livenet" => BitcoinNetwork::Mainnet,
            _ => BitcoinNetwork::Testnet,
        };

        // the single account must be a segwit one
        let detected = detect_address_type(network, &address);
        if detected == DetectedAddressType::P2pkh {
            return Err(WalletAdapterError::UnsupportedAddress { address, detected });
        }

        let address = WalletAddress::derive(
            network,
            &address,
            AddressPurpose::ALL,
            Some(&public_key),
        )?;
        Ok(vec![address])
    }

    fn on_addresses_changed(self: Rc<Self>, callback: AddressesChangedCallback) -> Subscription {
        let provider = Rc::clone(&self.provider);
        watch_addresses(
            &self.runtime,
            self.flavor.wallet_name,
            self.flavor.change_events,
            move |event, handler| provider.on(event, handler),
            fetcher(&self),
            callback,
        )
    }

    async fn sign_message(
        &self,
        address: &str,
        message: &str,
    ) -> Result<SignMessageResult, WalletAdapterError> {
        let signature = self
            .provider
            .sign_message(message, UnisatMessageKind::Bip322Simple)
            .await
            .map_err(|e| self.error(e))?;

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
        psbt::decode_hex(psbt_hex)?;
        let options = UnisatSignPsbtOptions {
            auto_finalized: false,
            to_sign_inputs: sign_inputs
                .iter()
                .map(|input| UnisatToSignInput {
                    index: input.index,
                    address: input.address.clone(),
                })
                .collect(),
        };

        let signed = self
            .provider
            .sign_psbt(psbt_hex, &options)
            .await
            .map_err(|e| self.error(e))?;

        psbt::finalize(&*self.finalizer, psbt::decode_hex(&signed)?)
    }

    fn send_bitcoin_fee_rate(&self) -> FeeRateCapability {
        self.flavor.send_bitcoin_fee_rate
    }

    async fn send_bitcoin(
        &self,
        _from_address: &str,
        receiver_address: &str,
        amount: Amount,
        options: SendBitcoinOptions,
    ) -> Result<String, WalletAdapterError> {
        let fee_rate = self
            .flavor
            .send_bitcoin_fee_rate
            .check(self.flavor.wallet_name, options.fee_rate)?;

        self.provider
            .send_bitcoin(receiver_address, amount.to_sat(), fee_rate)
            .await
            .map_err(|e| self.error(e))
    }
}
