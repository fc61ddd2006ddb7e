//! The wallet kinds supported out of the box.
//!
//! Every function here returns an [`AdapterFactory`] for one wallet kind. The
//! `detect` closure is the precondition of its [`Availability`]: it looks for
//! the raw provider the wallet injects and must not have side effects. The
//! browser bindings provide them for the real page, see `ffi`.

use crate::{
    adapter::{AdapterDescriptor, AdapterFactory, WalletAdapter},
    adapters::{
        RpcProvider,
        leather::{LEATHER_PROVIDER_ID, LeatherAdapter},
        magic_eden::{
            LegacySatsConnectAdapter, LegacySatsConnectProvider, MAGIC_EDEN, MAGIC_EDEN_PROVIDER_ID,
        },
        unisat::{BITGET, OKX, UNISAT, UnisatCompatibleAdapter, UnisatFlavor, UnisatProvider},
        xverse::{SatsConnectAdapter, XVERSE},
    },
    availability::Availability,
    btc::BitcoinNetwork,
    psbt::PsbtFinalizer,
    runtime::Runtime,
    storage::Storage,
};
use std::rc::Rc;

pub const UNISAT_ID: &str = "unisat";
pub const XVERSE_ID: &str = "XverseProviders.BitcoinProvider";
pub const OKX_ID: &str = "okxwallet.bitcoin";
pub const BITGET_ID: &str = "bitget.bitcoin";
pub const LEATHER_ID: &str = LEATHER_PROVIDER_ID;
pub const MAGIC_EDEN_ID: &str = MAGIC_EDEN_PROVIDER_ID;

pub fn unisat_descriptor() -> AdapterDescriptor {
    AdapterDescriptor::new(
        UNISAT_ID,
        "UniSat",
        "https://unisat.io/",
        "https://unisat.io/download",
    )
}

pub fn xverse_descriptor() -> AdapterDescriptor {
    AdapterDescriptor::new(
        XVERSE_ID,
        "Xverse",
        "https://xverse.app/",
        "https://www.xverse.app/download",
    )
}

pub fn okx_descriptor() -> AdapterDescriptor {
    AdapterDescriptor::new(
        OKX_ID,
        "OKX Wallet",
        "https://web3.okx.com/",
        "https://web3.okx.com/download",
    )
}

pub fn bitget_descriptor() -> AdapterDescriptor {
    AdapterDescriptor::new(
        BITGET_ID,
        "Bitget",
        "https://web3.bitget.com/",
        "https://web3.bitget.com/en/wallet-download",
    )
}

pub fn leather_descriptor() -> AdapterDescriptor {
    AdapterDescriptor::new(
        LEATHER_ID,
        "Leather",
        "https://leather.io/",
        "https://leather.io/wallet",
    )
}

pub fn magic_eden_descriptor() -> AdapterDescriptor {
    AdapterDescriptor::new(
        MAGIC_EDEN_ID,
        "Magic Eden",
        "https://wallet.magiceden.io/",
        "https://wallet.magiceden.io/download",
    )
}

/// all the supported kinds, to render a wallet picker before detection
pub fn descriptors() -> Vec<AdapterDescriptor> {
    vec![
        unisat_descriptor(),
        xverse_descriptor(),
        okx_descriptor(),
        bitget_descriptor(),
        leather_descriptor(),
        magic_eden_descriptor(),
    ]
}

/// What the adapters are built with.
#[derive(Clone)]
pub struct WalletEnv {
    pub runtime: Rc<dyn Runtime>,
    pub storage: Rc<dyn Storage>,
    pub finalizer: Rc<dyn PsbtFinalizer>,
}

impl WalletEnv {
    pub fn new(
        runtime: Rc<dyn Runtime>,
        storage: Rc<dyn Storage>,
        finalizer: Rc<dyn PsbtFinalizer>,
    ) -> Self {
        Self {
            runtime,
            storage,
            finalizer,
        }
    }
}

fn unisat_compatible<D>(
    env: &WalletEnv,
    descriptor: AdapterDescriptor,
    flavor: UnisatFlavor,
    detect: D,
) -> AdapterFactory
where
    D: Fn() -> Option<Rc<dyn UnisatProvider>> + 'static,
{
    let env = env.clone();
    let availability = Availability::new(Rc::clone(&env.runtime), detect, move |provider| {
        let env = env.clone();
        async move {
            let adapter: Rc<dyn WalletAdapter> = Rc::new(UnisatCompatibleAdapter::new(
                provider,
                flavor,
                env.runtime,
                env.finalizer,
            ));
            Ok(adapter)
        }
    });
    AdapterFactory::new(descriptor, availability)
}

pub fn unisat<D>(env: &WalletEnv, detect: D) -> AdapterFactory
where
    D: Fn() -> Option<Rc<dyn UnisatProvider>> + 'static,
{
    unisat_compatible(env, unisat_descriptor(), UNISAT, detect)
}

pub fn okx<D>(env: &WalletEnv, detect: D) -> AdapterFactory
where
    D: Fn() -> Option<Rc<dyn UnisatProvider>> + 'static,
{
    unisat_compatible(env, okx_descriptor(), OKX, detect)
}

pub fn bitget<D>(env: &WalletEnv, detect: D) -> AdapterFactory
where
    D: Fn() -> Option<Rc<dyn UnisatProvider>> + 'static,
{
    unisat_compatible(env, bitget_descriptor(), BITGET, detect)
}

pub fn xverse<D>(env: &WalletEnv, detect: D) -> AdapterFactory
where
    D: Fn() -> Option<Rc<dyn RpcProvider>> + 'static,
{
    let env = env.clone();
    let availability = Availability::new(Rc::clone(&env.runtime), detect, move |provider| {
        let env = env.clone();
        async move {
            let adapter: Rc<dyn WalletAdapter> = Rc::new(SatsConnectAdapter::new(
                provider,
                XVERSE,
                env.runtime,
                env.finalizer,
            ));
            Ok(adapter)
        }
    });
    AdapterFactory::new(xverse_descriptor(), availability)
}

pub fn leather<D>(env: &WalletEnv, detect: D) -> AdapterFactory
where
    D: Fn() -> Option<Rc<dyn RpcProvider>> + 'static,
{
    let env = env.clone();
    let availability = Availability::new(Rc::clone(&env.runtime), detect, move |provider| {
        let env = env.clone();
        async move {
            let adapter: Rc<dyn WalletAdapter> = Rc::new(LeatherAdapter::new(
                provider,
                env.runtime,
                env.storage,
                env.finalizer,
            ));
            Ok(adapter)
        }
    });
    AdapterFactory::new(leather_descriptor(), availability)
}

/// Magic Eden prompts are opened for `network`, chosen by the application.
pub fn magic_eden<D>(env: &WalletEnv, network: BitcoinNetwork, detect: D) -> AdapterFactory
where
    D: Fn() -> Option<Rc<dyn LegacySatsConnectProvider>> + 'static,
{
    let env = env.clone();
    let availability = Availability::new(Rc::clone(&env.runtime), detect, move |provider| {
        let env = env.clone();
        async move {
            let adapter: Rc<dyn WalletAdapter> = Rc::new(LegacySatsConnectAdapter::new(
                provider,
                MAGIC_EDEN,
                network,
                env.runtime,
                env.storage,
                env.finalizer,
            ));
            Ok(adapter)
        }
    });
    AdapterFactory::new(magic_eden_descriptor(), availability)
}
