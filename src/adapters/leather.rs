//! Leather, `window.LeatherProvider`.
//!
//! Leather lists its addresses only through a prompting `getAddresses`, and
//! emits no change event. The granted addresses are cached at connection
//! time and the cache is what [`LeatherAdapter::addresses`] reads.

use super::{RpcProvider, decode_result, watch::{fetcher, poll_addresses}};
use crate::{
    adapter::{
        AddressesChangedCallback, FeeRateCapability, SendBitcoinOptions, SignInput,
        SignMessageResult, WalletAdapter,
    },
    btc::{AddressPurpose, AddressType, BitcoinNetwork, WalletAddress},
    error::{ProviderError, RpcErrorCode, WalletAdapterError},
    observable::Subscription,
    psbt::{self, PsbtFinalizer},
    runtime::Runtime,
    storage::{AddressCache, Storage},
};
use async_trait::async_trait;
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::rc::Rc;

pub const LEATHER_PROVIDER_ID: &str = "LeatherProvider.BitcoinProvider";

const WALLET_NAME: &str = "Leather";

/// An entry of the `getAddresses` result, Leather lists the addresses of
/// every chain it supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeatherAddress {
    pub symbol: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub address_type: Option<String>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeatherAddresses {
    pub addresses: Vec<LeatherAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignMessageResponse {
    signature: String,
    #[serde(default)]
    algorithm: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendTransferResponse {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct SignPsbtResponse {
    hex: String,
}

pub struct LeatherAdapter {
    provider: Rc<dyn RpcProvider>,
    runtime: Rc<dyn Runtime>,
    finalizer: Rc<dyn PsbtFinalizer>,
    cache: AddressCache<LeatherAddresses>,
}

impl LeatherAdapter {
    pub fn new(
        provider: Rc<dyn RpcProvider>,
        runtime: Rc<dyn Runtime>,
        storage: Rc<dyn Storage>,
        finalizer: Rc<dyn PsbtFinalizer>,
    ) -> Self {
        Self {
            provider,
            runtime,
            finalizer,
            cache: AddressCache::new(storage, LEATHER_PROVIDER_ID),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, WalletAdapterError> {
        tracing::trace!(wallet = WALLET_NAME, method, "request");
        let result = self.provider.request(method, params).await.map_err(error)?;
        decode_result(method, result).map_err(error)
    }
}

fn error(error: ProviderError) -> WalletAdapterError {
    WalletAdapterError::from_provider(WALLET_NAME, error, RpcErrorCode::is_user_rejection)
}

fn parse_addresses(granted: &LeatherAddresses) -> Result<Vec<WalletAddress>, WalletAdapterError> {
    let bitcoin: Vec<(&LeatherAddress, &str)> = granted
        .addresses
        .iter()
        .filter(|entry| entry.symbol == "BTC")
        .filter_map(|entry| entry.address_type.as_deref().map(|kind| (entry, kind)))
        .collect();

    // the network is read from the taproot address
    let reference = bitcoin
        .iter()
        .find(|(_, kind)| *kind == "p2tr")
        .or_else(|| bitcoin.first());
    let network = match reference {
        Some((entry, _)) if entry.address.starts_with("bc") => BitcoinNetwork::Mainnet,
        _ => BitcoinNetwork::Testnet,
    };

    bitcoin
        .into_iter()
        .map(|(entry, kind)| {
            let purposes: Vec<AddressPurpose> = if kind == "p2tr" {
                AddressPurpose::INSCRIPTIONS.into()
            } else {
                vec![AddressPurpose::Payment]
            };
            WalletAddress::derive(
                network,
                &entry.address,
                purposes,
                entry.public_key.as_deref(),
            )
        })
        .collect()
}

#[async_trait(?Send)]
impl WalletAdapter for LeatherAdapter {
    async fn connect(&self) -> Result<(), WalletAdapterError> {
        if self.cache.load().is_some() {
            return Ok(());
        }

        let granted: LeatherAddresses = self.call("getAddresses", Value::Null).await?;
        self.cache.store(granted);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WalletAdapterError> {
        self.cache.clear();
        Ok(())
    }

    async fn addresses(&self) -> Result<Vec<WalletAddress>, WalletAdapterError> {
        let granted = self
            .cache
            .load()
            .ok_or_else(|| WalletAdapterError::not_connected(WALLET_NAME))?;
        parse_addresses(&granted)
    }

    fn on_addresses_changed(self: Rc<Self>, callback: AddressesChangedCallback) -> Subscription {
        poll_addresses(&self.runtime, WALLET_NAME, fetcher(&self), callback)
    }

    async fn sign_message(
        &self,
        address: &str,
        message: &str,
    ) -> Result<SignMessageResult, WalletAdapterError> {
        let addresses = self.addresses().await?;
        let signer = addresses.iter().find(|entry| entry.address() == address);
        let payment_type = match signer.map(WalletAddress::address_type) {
            Some(AddressType::P2wpkh) => "p2wpkh",
            Some(AddressType::P2tr) => "p2tr",
            _ => {
                return Err(WalletAdapterError::Adapter(format!(
                    "Address {address} is not supported"
                )));
            }
        };

        let response: SignMessageResponse = self
            .call(
                "signMessage",
                json!({ "message": message, "paymentType": payment_type }),
            )
            .await?;

        let address = address.to_owned();
        Ok(match response.algorithm.as_deref() {
            Some("ecdsa") => SignMessageResult::Ecdsa {
                signature: response.signature,
                address,
                public_key: response
                    .public_key
                    .or_else(|| signer.and_then(|s| s.public_key()).map(str::to_owned))
                    .unwrap_or_default(),
            },
            _ => SignMessageResult::Bip322 {
                signature: response.signature,
                address,
            },
        })
    }

    async fn sign_and_finalize_psbt(
        &self,
        psbt_hex: &str,
        sign_inputs: &[SignInput],
    ) -> Result<String, WalletAdapterError> {
        psbt::decode_hex(psbt_hex)?;
        let sign_at_index: Vec<u32> = sign_inputs.iter().map(|input| input.index).collect();

        let SignPsbtResponse { hex: signed } = self
            .call(
                "signPsbt",
                json!({ "hex": psbt_hex, "signAtIndex": sign_at_index }),
            )
            .await?;

        psbt::finalize(&*self.finalizer, psbt::decode_hex(&signed)?)
    }

    fn send_bitcoin_fee_rate(&self) -> FeeRateCapability {
        FeeRateCapability::Unavailable
    }

    async fn send_bitcoin(
        &self,
        from_address: &str,
        receiver_address: &str,
        amount: Amount,
        options: SendBitcoinOptions,
    ) -> Result<String, WalletAdapterError> {
        FeeRateCapability::Unavailable.check(WALLET_NAME, options.fee_rate)?;

        let addresses = self.addresses().await?;
        let Some((account, sender)) = addresses
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.address() == from_address)
        else {
            return Err(WalletAdapterError::Adapter(format!(
                "Address {from_address} is not supported"
            )));
        };
        let network = match sender.network() {
            BitcoinNetwork::Mainnet => "mainnet",
            _ => "testnet",
        };

        let SendTransferResponse { txid } = self
            .call(
                "sendTransfer",
                json!({
                    "recipients": [{
                        "address": receiver_address,
                        "amount": amount.to_sat().to_string(),
                    }],
                    "account": account,
                    "network": network,
                }),
            )
            .await?;
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{runtime::ManualRuntime, storage::MemoryStorage};
    use futures::executor::block_on;
    use std::{cell::RefCell, time::Duration};

    const NATIVE: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
    const NATIVE_KEY: &str = "0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c";
    const TAPROOT: &str = "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";
    const TAPROOT_KEY: &str =
        "03cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115";

    struct FakeLeather {
        requests: RefCell<Vec<(String, Value)>>,
        reject: bool,
    }

    impl FakeLeather {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                requests: RefCell::new(Vec::new()),
                reject: false,
            })
        }

        fn count(&self, method: &str) -> usize {
            self.requests
                .borrow()
                .iter()
                .filter(|(name, _)| name == method)
                .count()
        }

        fn params(&self, method: &str) -> Option<Value> {
            self.requests
                .borrow()
                .iter()
                .find(|(name, _)| name == method)
                .map(|(_, params)| params.clone())
        }
    }

    #[async_trait(?Send)]
    impl RpcProvider for FakeLeather {
        async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
            self.requests.borrow_mut().push((method.to_owned(), params));
            if self.reject {
                return Err(ProviderError::new("User rejected request").with_code(4001));
            }

            match method {
                "getAddresses" => Ok(json!({
                    "addresses": [
                        {
                            "symbol": "BTC",
                            "type": "p2wpkh",
                            "address": NATIVE,
                            "publicKey": NATIVE_KEY,
                            "derivationPath": "m/84'/0'/0'/0/0",
                        },
                        {
                            "symbol": "BTC",
                            "type": "p2tr",
                            "address": TAPROOT,
                            "publicKey": TAPROOT_KEY,
                            "derivationPath": "m/86'/0'/0'/0/0",
                        },
                        {
                            "symbol": "STX",
                            "address": "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
                        },
                    ],
                })),
                "signMessage" => Ok(json!({
                    "signature": "sig",
                    "algorithm": "ecdsa",
                })),
                "sendTransfer" => Ok(json!({ "txid": "txid" })),
                "signPsbt" => Ok(json!({ "hex": "70736274ff0000" })),
                _ => Ok(Value::Null),
            }
        }
    }

    struct Fixture {
        runtime: Rc<ManualRuntime>,
        storage: Rc<MemoryStorage>,
        provider: Rc<FakeLeather>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                runtime: Rc::new(ManualRuntime::new()),
                storage: Rc::new(MemoryStorage::new()),
                provider: FakeLeather::new(),
            }
        }

        fn adapter(&self) -> Rc<LeatherAdapter> {
            let finalizer =
                |psbt: &[u8]| -> Result<Vec<u8>, WalletAdapterError> { Ok(psbt.to_vec()) };
            Rc::new(LeatherAdapter::new(
                self.provider.clone(),
                self.runtime.clone(),
                self.storage.clone(),
                Rc::new(finalizer),
            ))
        }
    }

    #[test]
    fn not_connected_until_addresses_are_granted() {
        let fixture = Fixture::new();
        let adapter = fixture.adapter();

        assert_eq!(
            block_on(adapter.addresses()),
            Err(WalletAdapterError::not_connected("Leather"))
        );

        block_on(adapter.connect()).unwrap();
        let addresses = block_on(adapter.addresses()).unwrap();

        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].address_type(), AddressType::P2wpkh);
        assert_eq!(addresses[0].purposes(), &[AddressPurpose::Payment]);
        assert_eq!(addresses[1].address_type(), AddressType::P2tr);
        assert_eq!(addresses[1].network(), BitcoinNetwork::Mainnet);
        assert_eq!(
            addresses[1].tap_internal_key(),
            Some("cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115")
        );
    }

    #[test]
    fn grant_survives_a_reload() {
        let fixture = Fixture::new();
        block_on(fixture.adapter().connect()).unwrap();

        // a new adapter over the same storage, as after a page reload
        let reloaded = fixture.adapter();
        assert_eq!(block_on(reloaded.addresses()).unwrap().len(), 2);
        block_on(reloaded.connect()).unwrap();
        assert_eq!(fixture.provider.count("getAddresses"), 1);

        block_on(reloaded.disconnect()).unwrap();
        assert!(fixture.storage.is_empty());
        assert!(block_on(fixture.adapter().addresses()).unwrap_err().is_not_connected());
    }

    #[test]
    fn rejected_connection() {
        let fixture = Fixture {
            provider: Rc::new(FakeLeather {
                requests: RefCell::new(Vec::new()),
                reject: true,
            }),
            ..Fixture::new()
        };

        assert_eq!(
            block_on(fixture.adapter().connect()),
            Err(WalletAdapterError::UserRejected)
        );
        assert!(fixture.storage.is_empty());
    }

    #[test]
    fn sign_message_with_payment_type() {
        let fixture = Fixture::new();
        let adapter = fixture.adapter();
        block_on(adapter.connect()).unwrap();

        assert_eq!(
            block_on(adapter.sign_message(NATIVE, "hello")).unwrap(),
            SignMessageResult::Ecdsa {
                signature: "sig".to_owned(),
                address: NATIVE.to_owned(),
                public_key: NATIVE_KEY.to_owned(),
            }
        );
        assert_eq!(
            fixture.provider.params("signMessage"),
            Some(json!({ "message": "hello", "paymentType": "p2wpkh" }))
        );

        assert_eq!(
            block_on(adapter.sign_message("bc1qunknown", "hello")),
            Err(WalletAdapterError::Adapter(
                "Address bc1qunknown is not supported".to_owned()
            ))
        );
    }

    #[test]
    fn send_bitcoin_from_account() {
        let fixture = Fixture::new();
        let adapter = fixture.adapter();
        block_on(adapter.connect()).unwrap();

        let txid = block_on(adapter.send_bitcoin(
            TAPROOT,
            NATIVE,
            Amount::from_sat(10_000),
            SendBitcoinOptions::default(),
        ))
        .unwrap();

        assert_eq!(txid, "txid");
        assert_eq!(
            fixture.provider.params("sendTransfer"),
            Some(json!({
                "recipients": [{ "address": NATIVE, "amount": "10000" }],
                "account": 1,
                "network": "mainnet",
            }))
        );
    }

    #[test]
    fn psbt_inputs_by_index() {
        let fixture = Fixture::new();
        let adapter = fixture.adapter();

        let finalized = block_on(adapter.sign_and_finalize_psbt(
            "70736274ff00",
            &[SignInput::new(NATIVE, 0), SignInput::new(TAPROOT, 3)],
        ))
        .unwrap();

        assert_eq!(finalized, "70736274ff0000");
        assert_eq!(
            fixture.provider.params("signPsbt"),
            Some(json!({ "hex": "70736274ff00", "signAtIndex": [0, 3] }))
        );
    }

    #[test]
    fn addresses_are_polled() {
        let fixture = Fixture::new();
        let adapter = fixture.adapter();
        block_on(adapter.connect()).unwrap();
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reported);

        let _watch = adapter
            .clone()
            .on_addresses_changed(Rc::new(move |addresses: Vec<WalletAddress>| {
                sink.borrow_mut().push(addresses.len())
            }));
        fixture.runtime.advance(Duration::from_millis(1500));
        assert_eq!(*reported.borrow(), vec![2]);

        block_on(adapter.disconnect()).unwrap();
        fixture.runtime.advance(Duration::from_secs(3));
        assert_eq!(*reported.borrow(), vec![2]);
        assert_eq!(fixture.runtime.pending_timers(), 0);
    }
}
