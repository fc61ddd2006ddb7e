use super::{call, from_js, listen, lookup, provider_error, to_js};
use crate::{
    adapters::unisat::{UnisatMessageKind, UnisatProvider, UnisatSignPsbtOptions},
    error::ProviderError,
    observable::Subscription,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::rc::Rc;
use wasm_bindgen::JsValue;

pub(crate) const UNISAT_PATH: &[&str] = &["unisat"];
pub(crate) const OKX_PATH: &[&str] = &["okxwallet", "bitcoin"];
pub(crate) const BITGET_PATH: &[&str] = &["bitkeep", "unisat"];

/// A copy of the UniSat API injected in the page: `window.unisat`,
/// `window.okxwallet.bitcoin` or `window.bitkeep.unisat`.
#[derive(Debug, Clone)]
pub struct BrowserUnisat {
    provider: JsValue,
}

impl BrowserUnisat {
    pub fn detect(path: &[&str]) -> Option<Rc<dyn UnisatProvider>> {
        let provider = lookup(path)?;
        provider
            .is_object()
            .then(|| Rc::new(Self { provider }) as Rc<dyn UnisatProvider>)
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        method: &str,
        args: &[JsValue],
    ) -> Result<T, ProviderError> {
        let result = call(&self.provider, method, args)
            .await
            .map_err(provider_error)?;
        from_js(&format!("`{method}' response"), result)
    }
}

fn fee_rate_options(fee_rate: Option<f64>) -> Result<JsValue, ProviderError> {
    match fee_rate {
        Some(fee_rate) => to_js(&json!({ "feeRate": fee_rate })),
        None => Ok(JsValue::UNDEFINED),
    }
}

#[async_trait(?Send)]
impl UnisatProvider for BrowserUnisat {
    async fn get_accounts(&self) -> Result<Vec<String>, ProviderError> {
        self.invoke("getAccounts", &[]).await
    }

    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        self.invoke("requestAccounts", &[]).await
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        call(&self.provider, "connect", &[])
            .await
            .map(|_| ())
            .map_err(provider_error)
    }

    async fn get_public_key(&self) -> Result<String, ProviderError> {
        self.invoke("getPublicKey", &[]).await
    }

    async fn get_network(&self) -> Result<String, ProviderError> {
        self.invoke("getNetwork", &[]).await
    }

    async fn sign_message(
        &self,
        message: &str,
        kind: UnisatMessageKind,
    ) -> Result<String, ProviderError> {
        self.invoke(
            "signMessage",
            &[JsValue::from_str(message), JsValue::from_str(kind.as_str())],
        )
        .await
    }

    async fn send_bitcoin(
        &self,
        receiver_address: &str,
        satoshis: u64,
        fee_rate: Option<f64>,
    ) -> Result<String, ProviderError> {
        self.invoke(
            "sendBitcoin",
            &[
                JsValue::from_str(receiver_address),
                JsValue::from_f64(satoshis as f64),
                fee_rate_options(fee_rate)?,
            ],
        )
        .await
    }

    async fn send_inscription(
        &self,
        receiver_address: &str,
        inscription_id: &str,
        fee_rate: Option<f64>,
    ) -> Result<String, ProviderError> {
        self.invoke(
            "sendInscription",
            &[
                JsValue::from_str(receiver_address),
                JsValue::from_str(inscription_id),
                fee_rate_options(fee_rate)?,
            ],
        )
        .await
    }

    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: &UnisatSignPsbtOptions,
    ) -> Result<String, ProviderError> {
        self.invoke("signPsbt", &[JsValue::from_str(psbt_hex), to_js(options)?])
            .await
    }

    fn on(&self, event: &str, handler: Rc<dyn Fn()>) -> Option<Subscription> {
        listen(&self.provider, "on", "removeListener", event, move |_| handler())
    }
}
