use super::{call, from_js, listen, lookup, provider_error};
use crate::{
    adapters::{
        magic_eden::{
            AccountsChangedHandler, GetAddressRequest, LegacySatsConnectProvider, Prompt,
            SendBtcTransactionRequest, SignMessageRequest, SignTransactionRequest,
        },
        xverse::SatsConnectAddress,
    },
    error::ProviderError,
    observable::Subscription,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::rc::Rc;
use wasm_bindgen::JsValue;

/// header of an unsecured JWT, `{"typ":"JWT","alg":"none"}`
const UNSECURED_HEADER: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOiJub25lIn0";

#[derive(Deserialize)]
struct GetAddressResponse {
    addresses: Vec<SatsConnectAddress>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignTransactionResponse {
    psbt_base64: String,
}

#[derive(Deserialize)]
struct AccountsChanged {
    accounts: Vec<SatsConnectAddress>,
}

/// `window.magicEden.bitcoin`
///
/// Every prompt takes its request as an unsecured JWT. A rejected prompt
/// means the user closed it.
#[derive(Debug, Clone)]
pub struct BrowserMagicEden {
    provider: JsValue,
}

impl BrowserMagicEden {
    pub fn detect() -> Option<Rc<dyn LegacySatsConnectProvider>> {
        let provider = lookup(&["magicEden", "bitcoin"])?;
        lookup(&["magicEden", "bitcoin", "isMagicEden"])?
            .is_truthy()
            .then(|| Rc::new(Self { provider }) as Rc<dyn LegacySatsConnectProvider>)
    }

    async fn prompt<T: DeserializeOwned>(
        &self,
        method: &str,
        request: &impl Serialize,
    ) -> Result<Prompt<T>, ProviderError> {
        let token = unsecured_token(request)?;
        match call(&self.provider, method, &[JsValue::from_str(&token)]).await {
            Ok(response) => from_js(&format!("`{method}' response"), response).map(Prompt::Finished),
            Err(error) => {
                tracing::debug!(method, error = %provider_error(error), "prompt cancelled");
                Ok(Prompt::Cancelled)
            }
        }
    }
}

fn unsecured_token(payload: &impl Serialize) -> Result<String, ProviderError> {
    let payload = serde_json::to_vec(payload)
        .map_err(|error| ProviderError::new(format!("Couldn't encode the request: {error}")))?;
    Ok(format!(
        "{UNSECURED_HEADER}.{}.",
        URL_SAFE_NO_PAD.encode(payload)
    ))
}

#[async_trait(?Send)]
impl LegacySatsConnectProvider for BrowserMagicEden {
    async fn get_address(
        &self,
        request: &GetAddressRequest,
    ) -> Result<Prompt<Vec<SatsConnectAddress>>, ProviderError> {
        let prompt: Prompt<GetAddressResponse> = self.prompt("connect", request).await?;
        Ok(match prompt {
            Prompt::Finished(response) => Prompt::Finished(response.addresses),
            Prompt::Cancelled => Prompt::Cancelled,
        })
    }

    async fn sign_message(
        &self,
        request: &SignMessageRequest,
    ) -> Result<Prompt<String>, ProviderError> {
        self.prompt("signMessage", request).await
    }

    async fn send_btc_transaction(
        &self,
        request: &SendBtcTransactionRequest,
    ) -> Result<Prompt<String>, ProviderError> {
        self.prompt("sendBtcTransaction", request).await
    }

    async fn sign_transaction(
        &self,
        request: &SignTransactionRequest,
    ) -> Result<Prompt<String>, ProviderError> {
        let prompt: Prompt<SignTransactionResponse> =
            self.prompt("signTransaction", request).await?;
        Ok(match prompt {
            Prompt::Finished(response) => Prompt::Finished(response.psbt_base64),
            Prompt::Cancelled => Prompt::Cancelled,
        })
    }

    fn on_accounts_changed(&self, handler: AccountsChangedHandler) -> Option<Subscription> {
        listen(
            &self.provider,
            "on",
            "removeListener",
            "accountsChanged",
            move |event| match from_js::<AccountsChanged>("`accountsChanged' event", event) {
                Ok(event) => handler(event.accounts),
                Err(error) => tracing::warn!(%error, "ignoring account change"),
            },
        )
    }
}
