use super::provider_error;
use crate::storage::Storage;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    #[derive(Clone)]
    type WebStorage;

    #[wasm_bindgen(thread_local_v2, js_namespace = ["window"], js_name = "localStorage")]
    static LOCAL_STORAGE: Option<WebStorage>;

    #[wasm_bindgen(method, catch, js_name = "getItem")]
    fn get_item(this: &WebStorage, key: &str) -> Result<Option<String>, JsValue>;

    #[wasm_bindgen(method, catch, js_name = "setItem")]
    fn set_item(this: &WebStorage, key: &str, value: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = "removeItem")]
    fn remove_item(this: &WebStorage, key: &str) -> Result<(), JsValue>;
}

/// `window.localStorage`
///
/// Behaves as an always empty storage when the page has none (private
/// browsing, sandboxed frames).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

fn with_storage<R>(f: impl FnOnce(&WebStorage) -> Result<R, JsValue>) -> Option<R> {
    LOCAL_STORAGE.with(|storage| {
        let storage = storage.as_ref()?;
        f(storage)
            .inspect_err(|error| {
                tracing::warn!(error = %provider_error(error.clone()), "local storage failure")
            })
            .ok()
    })
}

impl Storage for LocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        with_storage(|storage| storage.get_item(key)).flatten()
    }

    fn set(&self, key: &str, value: &str) {
        with_storage(|storage| storage.set_item(key, value));
    }

    fn remove(&self, key: &str) {
        with_storage(|storage| storage.remove_item(key));
    }
}
