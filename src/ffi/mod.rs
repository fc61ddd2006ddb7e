//! Browser bindings.
//!
//! The raw providers injected by the wallet extensions, the browser event
//! loop and `window.localStorage`. [`browser_factories`] registers every
//! supported wallet kind against the real page.

mod leather;
mod magic_eden;
mod runtime;
mod storage;
mod unisat;
mod xverse;

pub use self::{
    leather::BrowserLeather, magic_eden::BrowserMagicEden, runtime::BrowserRuntime,
    storage::LocalStorage, unisat::BrowserUnisat, xverse::BrowserXverse,
};
use crate::{
    adapter::AdapterFactory,
    btc::BitcoinNetwork,
    error::ProviderError,
    observable::Subscription,
    psbt::PsbtFinalizer,
    wallets::{self, WalletEnv},
};
use js_sys::{Array, Function, Promise, Reflect};
use serde::{Serialize, de::DeserializeOwned};
use std::rc::Rc;
use wasm_bindgen::{JsCast as _, prelude::*};
use wasm_bindgen_futures::JsFuture;

/// the value at `path` from the global object, `None` as soon as a step
/// is `undefined` or `null`
pub(crate) fn lookup(path: &[&str]) -> Option<JsValue> {
    let mut value: JsValue = js_sys::global().into();
    for key in path {
        value = Reflect::get(&value, &JsValue::from_str(key)).ok()?;
        if value.is_undefined() || value.is_null() {
            return None;
        }
    }
    Some(value)
}

pub(crate) fn provider_error(error: JsValue) -> ProviderError {
    if let Some(message) = error.as_string() {
        return ProviderError::new(message);
    }

    // the message of an `Error` is not enumerable
    if let Some(exception) = error.dyn_ref::<js_sys::Error>() {
        let error = ProviderError::new(String::from(exception.message()));
        return match Reflect::get(exception, &JsValue::from_str("code"))
            .ok()
            .and_then(|code| code.as_f64())
        {
            Some(code) => error.with_code(code as i64),
            None => error,
        };
    }

    serde_wasm_bindgen::from_value(error)
        .unwrap_or_else(|decode_error| ProviderError::decode("error content", decode_error))
}

/// call `target[method](...args)` and await the result if it is a promise
pub(crate) async fn call(target: &JsValue, method: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
    let function: Function = Reflect::get(target, &JsValue::from_str(method))?
        .dyn_into()
        .map_err(|_| JsValue::from_str(&format!("`{method}' is not a function")))?;

    let returned = function.apply(target, &args.iter().collect::<Array>())?;
    match returned.dyn_into::<Promise>() {
        Ok(promise) => JsFuture::from(promise).await,
        Err(value) => Ok(value),
    }
}

pub(crate) fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, ProviderError> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|error| ProviderError::new(format!("Couldn't encode the request: {error}")))
}

pub(crate) fn from_js<T: DeserializeOwned>(what: &str, value: JsValue) -> Result<T, ProviderError> {
    serde_wasm_bindgen::from_value(value).map_err(|error| ProviderError::decode(what, error))
}

/// `target[on](event, handler)`, undone with `target[off](event, handler)`
pub(crate) fn listen(
    target: &JsValue,
    on: &str,
    off: &str,
    event: &str,
    handler: impl Fn(JsValue) + 'static,
) -> Option<Subscription> {
    let add: Function = Reflect::get(target, &JsValue::from_str(on))
        .ok()?
        .dyn_into()
        .ok()?;
    let closure = Closure::<dyn Fn(JsValue)>::new(handler);
    if let Err(error) = add.call2(target, &JsValue::from_str(event), closure.as_ref()) {
        tracing::warn!(event, error = %provider_error(error), "failed to add the listener");
        return None;
    }

    let target = target.clone();
    let off = off.to_owned();
    let event = event.to_owned();
    Some(Subscription::new(move || {
        let remove = Reflect::get(&target, &JsValue::from_str(&off))
            .ok()
            .and_then(|remove| remove.dyn_into::<Function>().ok());
        if let Some(remove) = remove
            && let Err(error) = remove.call2(&target, &JsValue::from_str(&event), closure.as_ref())
        {
            tracing::warn!(%event, error = %provider_error(error), "failed to remove the listener");
        }
        drop(closure);
    }))
}

/// the page's event loop and local storage
pub fn browser_env(finalizer: Rc<dyn PsbtFinalizer>) -> WalletEnv {
    WalletEnv::new(Rc::new(BrowserRuntime), Rc::new(LocalStorage), finalizer)
}

/// every supported wallet kind, detected in the current page
///
/// Magic Eden prompts are opened for `network`.
pub fn browser_factories(env: &WalletEnv, network: BitcoinNetwork) -> Vec<AdapterFactory> {
    vec![
        wallets::unisat(env, || BrowserUnisat::detect(unisat::UNISAT_PATH)),
        wallets::xverse(env, BrowserXverse::detect),
        wallets::okx(env, || BrowserUnisat::detect(unisat::OKX_PATH)),
        wallets::bitget(env, || BrowserUnisat::detect(unisat::BITGET_PATH)),
        wallets::leather(env, BrowserLeather::detect),
        wallets::magic_eden(env, network, BrowserMagicEden::detect),
    ]
}
