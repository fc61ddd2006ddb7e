use crate::{adapter::AdapterId, btc::DetectedAddressType};

/// Errors raised by the connector and by every wallet adapter.
///
/// Provider-native failures are translated into this taxonomy at the
/// normalization boundary. A recognised rejection code becomes
/// [`WalletAdapterError::UserRejected`], everything else is kept as a
/// [`WalletAdapterError::Provider`] with the raw [`ProviderError`] attached.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletAdapterError {
    /// The wallet has no active permission for this origin.
    ///
    /// This is the one error auto-reconnect treats as a silent abort.
    #[error("Wallet {wallet} is not connected")]
    NotConnected { wallet: String },
    #[error("User rejected the operation")]
    UserRejected,
    #[error("Unsupported address `{address}' ({detected})")]
    UnsupportedAddress {
        address: String,
        detected: DetectedAddressType,
    },
    #[error("Invalid public key `{public_key}': {reason}")]
    InvalidPublicKey { public_key: String, reason: String },
    #[error("{wallet} requires a fee rate to send bitcoin")]
    FeeRateRequired { wallet: String },
    #[error("{wallet} does not accept a fee rate when sending bitcoin")]
    FeeRateUnavailable { wallet: String },
    #[error("Invalid PSBT: {0}")]
    InvalidPsbt(String),
    #[error("{wallet} wallet error: {source}")]
    Provider {
        wallet: String,
        #[source]
        source: ProviderError,
    },
    /// A domain error raised by an adapter itself (missing address,
    /// unsupported operation...). Meant to be shown to the user as is.
    #[error("{0}")]
    Adapter(String),
    #[error("A connection attempt is already in progress")]
    ConnectInProgress,
    #[error("Adapter id `{0}' is registered more than once")]
    DuplicateAdapterId(AdapterId),
    #[error("The connector has been disposed")]
    Disposed,
}

impl WalletAdapterError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }

    /// errors the user can act upon. A connect failing with one of these is
    /// reported to the user instead of being propagated to the caller.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::UserRejected | Self::UnsupportedAddress { .. } | Self::Adapter(_)
        )
    }

    pub(crate) fn not_connected(wallet: impl Into<String>) -> Self {
        Self::NotConnected {
            wallet: wallet.into(),
        }
    }

    /// translate a raw provider error, `is_rejection` tells which native
    /// codes mean the user declined the request.
    pub(crate) fn from_provider(
        wallet: &str,
        error: ProviderError,
        is_rejection: impl Fn(i64) -> bool,
    ) -> Self {
        match error.code {
            Some(code) if is_rejection(code) => Self::UserRejected,
            _ => Self::Provider {
                wallet: wallet.to_owned(),
                source: error,
            },
        }
    }
}

/// The error body providers reject their requests with.
///
/// All fields are optional on the wire. Providers are not consistent about
/// what they put in their errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Deserialize)]
#[error("{message}")]
pub struct ProviderError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// error for a response that did not have the expected shape
    pub(crate) fn decode(what: &str, error: impl std::fmt::Display) -> Self {
        Self::new(format!("Couldn't decode the {what}: {error}"))
    }
}

/// JSON-RPC 2.0 and EIP-1193 error codes, as used by UniSat-like wallets
/// and by Leather.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum RpcErrorCode {
    #[error("Invalid JSON received by the wallet.")]
    ParseError,
    #[error("The request is not a valid request object.")]
    InvalidRequest,
    #[error("The method does not exist or is not available.")]
    MethodNotFound,
    #[error("Invalid method parameters.")]
    InvalidParams,
    #[error("Internal wallet error.")]
    InternalError,
    #[error("The user rejected the request.")]
    UserRejection,
    #[error("The requested method and/or account has not been authorized.")]
    Unauthorized,
    #[error("The wallet does not support the requested method.")]
    UnsupportedMethod,
    #[error("The wallet is disconnected.")]
    Disconnected,
    #[error("Unknown error code `{0}'")]
    Unknown(i64),
}

impl RpcErrorCode {
    pub fn is_user_rejection(code: i64) -> bool {
        Self::from(code) == Self::UserRejection
    }
}

impl From<i64> for RpcErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            4001 => Self::UserRejection,
            4100 => Self::Unauthorized,
            4200 => Self::UnsupportedMethod,
            4900 => Self::Disconnected,
            unknown => Self::Unknown(unknown),
        }
    }
}

/// Error codes of the sats-connect request API (Xverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum XverseRpcErrorCode {
    #[error("Invalid JSON received by the wallet.")]
    ParseError,
    #[error("The request is not a valid request object.")]
    InvalidRequest,
    #[error("The method does not exist or is not available.")]
    MethodNotFound,
    #[error("Invalid method parameters.")]
    InvalidParams,
    #[error("Internal wallet error.")]
    InternalError,
    #[error("The user rejected the request.")]
    UserRejection,
    #[error("The wallet does not support the requested method.")]
    MethodNotSupported,
    #[error("The origin is not allowed to call this method.")]
    AccessDenied,
    #[error("Unknown error code `{0}'")]
    Unknown(i64),
}

impl XverseRpcErrorCode {
    pub fn is_user_rejection(code: i64) -> bool {
        Self::from(code) == Self::UserRejection
    }
}

impl From<i64> for XverseRpcErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::UserRejection,
            -32001 => Self::MethodNotSupported,
            -32002 => Self::AccessDenied,
            unknown => Self::Unknown(unknown),
        }
    }
}

struct CodeVisitor<T>(std::marker::PhantomData<T>);

impl<T: From<i64>> serde::de::Visitor<'_> for CodeVisitor<T> {
    type Value = T;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "Expecting an integer error code")
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(T::from(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        i64::try_from(v)
            .map(T::from)
            .map_err(|_| E::custom(format!("error code `{v}' is out of range")))
    }
}

impl<'de> serde::Deserialize<'de> for RpcErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_i64(CodeVisitor(std::marker::PhantomData))
    }
}

impl<'de> serde::Deserialize<'de> for XverseRpcErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_i64(CodeVisitor(std::marker::PhantomData))
    }
}
