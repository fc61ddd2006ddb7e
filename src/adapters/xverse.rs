//! Wallets speaking the sats-connect `request` protocol: Xverse.

use super::{
    RpcProvider, decode_result,
    watch::{fetcher, watch_addresses},
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
};
use async_trait::async_trait;
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{collections::BTreeMap, rc::Rc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SatsConnectPurpose {
    Payment,
    Ordinals,
    Stacks,
    Starknet,
    Spark,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SatsConnectAddressType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
    Stacks,
    #[serde(other)]
    Other,
}

/// An address as listed by a sats-connect wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SatsConnectAddress {
    pub address: String,
    pub public_key: String,
    pub purpose: SatsConnectPurpose,
    #[serde(default)]
    pub address_type: Option<SatsConnectAddressType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatsConnectNetwork {
    Mainnet,
    Testnet,
    Testnet4,
    Signet,
    Regtest,
}

impl From<SatsConnectNetwork> for BitcoinNetwork {
    fn from(network: SatsConnectNetwork) -> Self {
        match network {
            SatsConnectNetwork::Mainnet => Self::Mainnet,
            SatsConnectNetwork::Testnet | SatsConnectNetwork::Testnet4 => Self::Testnet,
            SatsConnectNetwork::Signet | SatsConnectNetwork::Regtest => Self::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NetworkName {
    name: SatsConnectNetwork,
}

#[derive(Debug, Deserialize)]
struct WalletNetwork {
    bitcoin: NetworkName,
}

#[derive(Debug, Deserialize)]
struct GetAddressesResult {
    addresses: Vec<SatsConnectAddress>,
    #[serde(default)]
    network: Option<WalletNetwork>,
}

#[derive(Debug, Deserialize)]
struct SignMessageResponse {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct SendTransferResponse {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct SignPsbtResponse {
    psbt: String,
}

/// normalize sats-connect addresses
///
/// Ordinals addresses serve every inscription purpose, payment addresses
/// the payments. Addresses of other chains and P2WSH ones are skipped.
pub fn parse_addresses(
    network: BitcoinNetwork,
    addresses: &[SatsConnectAddress],
) -> Result<Vec<WalletAddress>, WalletAdapterError> {
    let mut parsed = Vec::with_capacity(addresses.len());
    for entry in addresses {
        let purposes: Vec<AddressPurpose> = match entry.purpose {
            SatsConnectPurpose::Ordinals => AddressPurpose::INSCRIPTIONS.into(),
            SatsConnectPurpose::Payment => vec![AddressPurpose::Payment],
            _ => continue,
        };
        match entry.address_type {
            Some(
                SatsConnectAddressType::P2pkh
                | SatsConnectAddressType::P2sh
                | SatsConnectAddressType::P2wpkh
                | SatsConnectAddressType::P2tr,
            ) => {}
            _ => continue,
        }

        parsed.push(WalletAddress::derive(
            network,
            &entry.address,
            purposes,
            Some(&entry.public_key),
        )?);
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy)]
pub struct SatsConnectFlavor {
    pub wallet_name: &'static str,
    pub parse_addresses:
        fn(BitcoinNetwork, &[SatsConnectAddress]) -> Result<Vec<WalletAddress>, WalletAdapterError>,
}

pub const XVERSE: SatsConnectFlavor = SatsConnectFlavor {
    wallet_name: "Xverse",
    parse_addresses,
};

const CHANGE_EVENTS: &[&str] = &["accountChange", "networkChange"];

pub struct SatsConnectAdapter {
    provider: Rc<dyn RpcProvider>,
    flavor: SatsConnectFlavor,
    runtime: Rc<dyn Runtime>,
    finalizer: Rc<dyn PsbtFinalizer>,
}

impl SatsConnectAdapter {
    pub fn new(
        provider: Rc<dyn RpcProvider>,
        flavor: SatsConnectFlavor,
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

    async fn request(&self, method: &str, params: Value) -> Result<Value, WalletAdapterError> {
        tracing::trace!(wallet = self.flavor.wallet_name, method, "request");
        self.provider
            .request(method, params)
            .await
            .map_err(|error| self.error(error))
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, WalletAdapterError> {
        let result = self.request(method, params).await?;
        decode_result(method, result).map_err(|error| self.error(error))
    }

    fn error(&self, error: ProviderError) -> WalletAdapterError {
        WalletAdapterError::from_provider(
            self.flavor.wallet_name,
            error,
            XverseRpcErrorCode::is_user_rejection,
        )
    }
}

/// network of a grant that does not name it, read from the ordinals address
fn network_of(addresses: &[SatsConnectAddress]) -> BitcoinNetwork {
    let address = addresses
        .iter()
        .find(|entry| entry.purpose == SatsConnectPurpose::Ordinals)
        .or_else(|| addresses.first());
    match address {
        Some(entry) if entry.address.starts_with("bc1") => BitcoinNetwork::Mainnet,
        _ => BitcoinNetwork::Testnet,
    }
}

#[async_trait(?Send)]
impl WalletAdapter for SatsConnectAdapter {
    async fn connect(&self) -> Result<(), WalletAdapterError> {
        self.request("wallet_connect", Value::Null).await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<(), WalletAdapterError> {
        Ok(())
    }

    async fn addresses(&self) -> Result<Vec<WalletAddress>, WalletAdapterError> {
        let result = self
            .request(
                "getAddresses",
                json!({ "purposes": [SatsConnectPurpose::Ordinals, SatsConnectPurpose::Payment] }),
            )
            .await?;
        if result.is_null() {
            return Err(WalletAdapterError::not_connected(self.flavor.wallet_name));
        }

        let result: GetAddressesResult =
            decode_result("getAddresses", result).map_err(|error| self.error(error))?;
        let network = match result.network {
            Some(network) => network.bitcoin.name.into(),
            None => network_of(&result.addresses),
        };

        (self.flavor.parse_addresses)(network, &result.addresses)
    }

    fn on_addresses_changed(self: Rc<Self>, callback: AddressesChangedCallback) -> Subscription {
        let provider = Rc::clone(&self.provider);
        watch_addresses(
            &self.runtime,
            self.flavor.wallet_name,
            CHANGE_EVENTS,
            move |event, handler| provider.add_listener(event, handler),
            fetcher(&self),
            callback,
        )
    }

    async fn sign_message(
        &self,
        address: &str,
        message: &str,
    ) -> Result<SignMessageResult, WalletAdapterError> {
        let SignMessageResponse { signature } = self
            .call(
                "signMessage",
                json!({ "address": address, "message": message, "protocol": "BIP322" }),
            )
            .await?;

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
        let mut to_sign: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for input in sign_inputs {
            to_sign.entry(input.address.as_str()).or_default().push(input.index);
        }

        let SignPsbtResponse { psbt: signed } = self
            .call(
                "signPsbt",
                json!({
                    "psbt": psbt::hex_to_base64(psbt_hex)?,
                    "signInputs": to_sign,
                    "broadcast": false,
                }),
            )
            .await?;

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

        // the wallet spends from its payment address, make sure there is one
        let addresses = self.addresses().await?;
        if !addresses
            .iter()
            .any(|address| address.has_purpose(AddressPurpose::Payment))
        {
            return Err(WalletAdapterError::Adapter(
                "Bitcoin address not found".to_owned(),
            ));
        }

        let SendTransferResponse { txid } = self
            .call(
                "sendTransfer",
                json!({
                    "recipients": [{ "address": receiver_address, "amount": amount.to_sat() }],
                }),
            )
            .await?;
        Ok(txid)
    }
}
