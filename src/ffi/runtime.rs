use crate::runtime::Runtime;
use futures::{
    channel::oneshot,
    future::{FutureExt as _, LocalBoxFuture},
};
use std::time::Duration;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = "setTimeout")]
    fn set_timeout(handler: &Closure<dyn FnMut()>, timeout: i32) -> JsValue;

    #[wasm_bindgen(js_name = "clearTimeout")]
    fn clear_timeout(handle: &JsValue);
}

/// The browser event loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserRuntime;

/// a pending `setTimeout`, cleared when dropped
struct Timeout {
    handle: JsValue,
    _fire: Closure<dyn FnMut()>,
}

impl Drop for Timeout {
    fn drop(&mut self) {
        clear_timeout(&self.handle);
    }
}

impl Runtime for BrowserRuntime {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let (wake, woken) = oneshot::channel::<()>();
        let fire: Closure<dyn FnMut()> = Closure::once(move || {
            let _ = wake.send(());
        });
        let timeout = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let handle = set_timeout(&fire, timeout);
        let timeout = Timeout {
            handle,
            _fire: fire,
        };

        async move {
            let _timeout = timeout;
            let _ = woken.await;
        }
        .boxed_local()
    }
}
