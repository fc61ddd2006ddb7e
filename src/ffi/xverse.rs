use super::{call, from_js, lookup, provider_error, to_js};
use crate::{
    adapters::RpcProvider, error::ProviderError, observable::Subscription, wallets::XVERSE_ID,
};
use async_trait::async_trait;
use js_sys::{Array, Function, Reflect};
use serde::Deserialize;
use std::rc::Rc;
use wasm_bindgen::{JsCast as _, prelude::*};

#[derive(Deserialize)]
#[serde(untagged)]
enum Response {
    Error { error: ProviderError },
    Result { result: serde_json::Value },
}

/// `window.XverseProviders.BitcoinProvider`, announced in
/// `window.btc_providers`.
#[derive(Debug, Clone)]
pub struct BrowserXverse {
    provider: JsValue,
}

impl BrowserXverse {
    pub fn detect() -> Option<Rc<dyn RpcProvider>> {
        let announced = lookup(&["btc_providers"])?.dyn_into::<Array>().ok()?;
        let listed = announced.iter().any(|entry| {
            Reflect::get(&entry, &JsValue::from_str("id"))
                .ok()
                .and_then(|id| id.as_string())
                .is_some_and(|id| id == XVERSE_ID)
        });
        if !listed {
            return None;
        }

        let provider = lookup(&XVERSE_ID.split('.').collect::<Vec<_>>())?;
        Some(Rc::new(Self { provider }))
    }
}

#[async_trait(?Send)]
impl RpcProvider for BrowserXverse {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let response = call(
            &self.provider,
            "request",
            &[JsValue::from_str(method), to_js(&params)?],
        )
        .await
        .map_err(provider_error)?;

        match from_js(&format!("`{method}' response"), response)? {
            Response::Error { error } => Err(error),
            Response::Result { result } => Ok(result),
        }
    }

    /// `addListener` hands back the function removing the listener
    fn add_listener(&self, event: &str, handler: Rc<dyn Fn()>) -> Option<Subscription> {
        let closure = Closure::<dyn Fn(JsValue)>::new(move |_| handler());
        let add: Function = Reflect::get(&self.provider, &JsValue::from_str("addListener"))
            .ok()?
            .dyn_into()
            .ok()?;
        let remove = match add.call2(&self.provider, &JsValue::from_str(event), closure.as_ref()) {
            Ok(remove) => remove.dyn_into::<Function>().ok(),
            Err(error) => {
                tracing::warn!(event, error = %provider_error(error), "failed to add the listener");
                return None;
            }
        };

        Some(Subscription::new(move || {
            if let Some(remove) = remove
                && let Err(error) = remove.call0(&JsValue::UNDEFINED)
            {
                tracing::warn!(error = %provider_error(error), "failed to remove the listener");
            }
            drop(closure);
        }))
    }
}
