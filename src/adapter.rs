use crate::{
    availability::Availability,
    btc::WalletAddress,
    error::WalletAdapterError,
    observable::Subscription,
};
use async_trait::async_trait;
use bitcoin::Amount;
use core::fmt;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use std::rc::Rc;

/// Stable identifier of a wallet kind, `"unisat"` for example.
///
/// Used as the ordering key of the registry and as the persisted value of
/// the last connected wallet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AdapterId(String);

impl AdapterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AdapterId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for AdapterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for AdapterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type IconResolver = Rc<dyn Fn() -> LocalBoxFuture<'static, Option<String>>>;

/// Icon of a wallet, ready to be used as an HTML `img` source.
#[derive(Clone, Default)]
pub enum Icon {
    #[default]
    None,
    Url(String),
    /// resolved on demand, bundled assets for example
    Lazy(IconResolver),
}

impl Icon {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn lazy<F>(resolve: F) -> Self
    where
        F: Fn() -> LocalBoxFuture<'static, Option<String>> + 'static,
    {
        Self::Lazy(Rc::new(resolve))
    }

    pub async fn resolve(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Url(url) => Some(url.clone()),
            Self::Lazy(resolve) => resolve().await,
        }
    }
}

impl fmt::Debug for Icon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Icon::None"),
            Self::Url(url) => f.debug_tuple("Icon::Url").field(url).finish(),
            Self::Lazy(_) => f.write_str("Icon::Lazy"),
        }
    }
}

/// Static description of a wallet kind, available before the wallet is
/// detected in the page.
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    pub id: AdapterId,
    pub name: String,
    pub icon: Icon,
    pub website_url: String,
    pub download_url: String,
}

impl AdapterDescriptor {
    pub fn new(
        id: impl Into<AdapterId>,
        name: impl Into<String>,
        website_url: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: Icon::None,
            website_url: website_url.into(),
            download_url: download_url.into(),
        }
    }

    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icon = icon;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignMessageAlgorithm {
    Ecdsa,
    Bip322,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "algorithm", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SignMessageResult {
    Ecdsa {
        signature: String,
        address: String,
        public_key: String,
    },
    Bip322 {
        signature: String,
        address: String,
    },
}

impl SignMessageResult {
    pub fn algorithm(&self) -> SignMessageAlgorithm {
        match self {
            Self::Ecdsa { .. } => SignMessageAlgorithm::Ecdsa,
            Self::Bip322 { .. } => SignMessageAlgorithm::Bip322,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            Self::Ecdsa { signature, .. } | Self::Bip322 { signature, .. } => signature,
        }
    }
}

/// Whether [`WalletAdapter::send_bitcoin`] takes a fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeRateCapability {
    /// the wallet picks the fee rate, one must not be given
    Unavailable,
    /// a fee rate may be given
    Available,
    /// a fee rate must be given
    Required,
}

impl FeeRateCapability {
    /// validate the `fee_rate` option against the capability
    pub fn check(self, wallet: &str, fee_rate: Option<f64>) -> Result<Option<f64>, WalletAdapterError> {
        match (self, fee_rate) {
            (Self::Required, None) => Err(WalletAdapterError::FeeRateRequired {
                wallet: wallet.to_owned(),
            }),
            (Self::Unavailable, Some(_)) => Err(WalletAdapterError::FeeRateUnavailable {
                wallet: wallet.to_owned(),
            }),
            (_, fee_rate) => Ok(fee_rate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SendBitcoinOptions {
    /// in sat/vB
    pub fee_rate: Option<f64>,
}

/// An input of a PSBT the wallet is asked to sign, with the address owning it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SignInput {
    pub address: String,
    pub index: u32,
}

impl SignInput {
    pub fn new(address: impl Into<String>, index: u32) -> Self {
        Self {
            address: address.into(),
            index,
        }
    }
}

pub type AddressesChangedCallback = Rc<dyn Fn(Vec<WalletAddress>)>;

/// The operations every wallet kind exposes once normalized.
#[async_trait(?Send)]
pub trait WalletAdapter {
    /// ask the wallet for permission, may prompt the user
    async fn connect(&self) -> Result<(), WalletAdapterError>;

    async fn disconnect(&self) -> Result<(), WalletAdapterError>;

    /// the granted addresses, without prompting the user.
    ///
    /// Fails with [`WalletAdapterError::NotConnected`] when no permission was
    /// granted yet.
    async fn addresses(&self) -> Result<Vec<WalletAddress>, WalletAdapterError>;

    /// `callback` receives the complete new address list whenever it changes
    fn on_addresses_changed(self: Rc<Self>, callback: AddressesChangedCallback) -> Subscription;

    async fn sign_message(
        &self,
        address: &str,
        message: &str,
    ) -> Result<SignMessageResult, WalletAdapterError>;

    /// sign the listed inputs of `psbt_hex` and return the finalized PSBT
    /// as hex.
    async fn sign_and_finalize_psbt(
        &self,
        psbt_hex: &str,
        sign_inputs: &[SignInput],
    ) -> Result<String, WalletAdapterError>;

    fn send_bitcoin_fee_rate(&self) -> FeeRateCapability;

    /// returns the transaction id
    async fn send_bitcoin(
        &self,
        from_address: &str,
        receiver_address: &str,
        amount: Amount,
        options: SendBitcoinOptions,
    ) -> Result<String, WalletAdapterError>;
}

/// One entry of the wallet registry: what the wallet is and how to detect it.
#[derive(Clone)]
pub struct AdapterFactory {
    descriptor: AdapterDescriptor,
    availability: Availability<Rc<dyn WalletAdapter>>,
}

impl AdapterFactory {
    pub fn new(
        descriptor: AdapterDescriptor,
        availability: Availability<Rc<dyn WalletAdapter>>,
    ) -> Self {
        Self {
            descriptor,
            availability,
        }
    }

    pub fn id(&self) -> &AdapterId {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    pub fn availability(&self) -> &Availability<Rc<dyn WalletAdapter>> {
        &self.availability
    }
}

impl fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterFactory")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
