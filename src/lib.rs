/*!

# Bitcoin Connector for browser wallets

This library is meant to be used by web applications that need to interact
with the Bitcoin wallets injected in the page by browser extensions (UniSat,
Xverse, OKX Wallet, Bitget, Leather and Magic Eden).

Every wallet speaks its own dialect. This crate normalizes them behind a
single [`WalletAdapter`] interface and orchestrates the connection.

## Features

- Detect the wallets as they get injected in the page
- Connect to one of them and remember it for the next visit
- Canonical addresses, with their purposes and what is needed to spend them
- Sign messages and PSBTs, send bitcoin

## Usage

Register the wallet kinds to support with a [`Connector`]. They are listed
in that order once detected:

```no_run
use bitcoin_connector::{Connector, ConnectorConfig};
# use bitcoin_connector::{AdapterFactory, WalletAdapterError, wallets::WalletEnv};
# fn test(env: WalletEnv, factories: Vec<AdapterFactory>) -> Result<(), WalletAdapterError> {
// in the browser: `ffi::browser_factories(&ffi::browser_env(finalizer), network)`
let connector = Connector::new(
    factories,
    ConnectorConfig::new(env.runtime.clone(), env.storage.clone()),
)?;

let _subscription = connector.subscribe_available_adapters(|available| {
    for (id, _) in available {
        println!("Wallet available: {id}");
    }
});
# Ok(()) }
```

The user then picks one of them, the previous wallet is reconnected on its
own if it still grants access:

```no_run
# use bitcoin_connector::{Connector, AddressPurpose};
# async fn test(connector: Connector) -> anyhow::Result<()> {
let (id, adapter) = connector.available_adapters().remove(0);
connector.connect(&id, adapter).await?;

if let Some(session) = connector.session() {
    let payment = session.address_for(AddressPurpose::Payment);
}
# Ok(()) }
```

*/

pub mod adapter;
pub mod adapters;
pub mod availability;
pub mod btc;
pub mod connector;
pub mod error;
#[cfg(target_arch = "wasm32")]
pub mod ffi;
pub mod observable;
pub mod psbt;
pub mod runtime;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod wallets;

pub use self::{
    adapter::{
        AdapterDescriptor, AdapterFactory, AdapterId, FeeRateCapability, Icon, SendBitcoinOptions,
        SignInput, SignMessageResult, WalletAdapter,
    },
    availability::Availability,
    btc::{AddressPurpose, AddressType, BitcoinNetwork, WalletAddress},
    connector::{ConnectionState, Connector, ConnectorConfig, WalletSession},
    error::{ProviderError, WalletAdapterError},
    observable::{Observable, Subscription},
    psbt::PsbtFinalizer,
    runtime::Runtime,
    storage::Storage,
};
