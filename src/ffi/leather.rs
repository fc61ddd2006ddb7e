use super::{call, from_js, lookup, provider_error, to_js};
use crate::{adapters::RpcProvider, error::ProviderError};
use async_trait::async_trait;
use js_sys::Reflect;
use serde::Deserialize;
use std::rc::Rc;
use wasm_bindgen::JsValue;

#[derive(Deserialize)]
struct Response {
    result: serde_json::Value,
}

/// `window.LeatherProvider`
///
/// Requests resolve with `{ result }` and reject with `{ error }`.
#[derive(Debug, Clone)]
pub struct BrowserLeather {
    provider: JsValue,
}

impl BrowserLeather {
    pub fn detect() -> Option<Rc<dyn RpcProvider>> {
        let provider = lookup(&["LeatherProvider"])?;
        lookup(&["LeatherProvider", "request"])?;
        Some(Rc::new(Self { provider }))
    }
}

fn rejection(error: JsValue) -> ProviderError {
    match Reflect::get(&error, &JsValue::from_str("error")) {
        Ok(body) if body.is_object() => provider_error(body),
        _ => provider_error(error),
    }
}

#[async_trait(?Send)]
impl RpcProvider for BrowserLeather {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let params = match params {
            serde_json::Value::Null => JsValue::UNDEFINED,
            params => to_js(&params)?,
        };
        let response = call(&self.provider, "request", &[JsValue::from_str(method), params])
            .await
            .map_err(rejection)?;

        from_js::<Response>(&format!("`{method}' response"), response).map(|response| response.result)
    }
}
