//! Normalization of the wallet providers into [`WalletAdapter`]s.
//!
//! Each module wraps one protocol family. A family is implemented once and
//! parameterized by a small flavor value per wallet kind (capabilities,
//! event names, address parsing) rather than by a type per wallet.
//!
//! [`WalletAdapter`]: crate::WalletAdapter

pub mod leather;
pub mod magic_eden;
pub mod mock;
pub mod unisat;
mod watch;
pub mod xverse;

pub use self::watch::ADDRESS_POLL_INTERVAL;
use crate::{error::ProviderError, observable::Subscription};
use async_trait::async_trait;
use std::rc::Rc;

/// A provider speaking JSON requests: `request(method, params)` resolving
/// with the `result` of the response or rejecting with its `error`.
#[async_trait(?Send)]
pub trait RpcProvider {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// register `handler` for `event`, `None` when the provider has no
    /// event support.
    fn add_listener(&self, event: &str, handler: Rc<dyn Fn()>) -> Option<Subscription> {
        let _ = (event, handler);
        None
    }
}

/// decode a `result` the way a provider documents it
pub(crate) fn decode_result<T: serde::de::DeserializeOwned>(
    method: &str,
    result: serde_json::Value,
) -> Result<T, ProviderError> {
    serde_json::from_value(result)
        .map_err(|error| ProviderError::decode(&format!("`{method}' response"), error))
}
