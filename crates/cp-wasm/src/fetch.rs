//! Network and clock primitives supplied by the page script.
//!
//! The page passes a function `(request) => Promise<response>` where
//! `request` is `{ url, headers, timeoutMs }` and `response` is
//! `{ status, headers, body }`. The function is expected to enforce
//! `timeoutMs` and reject with an error named `TimeoutError` or
//! `AbortError` when it expires.

use cp_engine::http::{Clock, HttpClient, HttpError, HttpRequest, HttpResponse};
use js_sys::{Array, Function, Object, Promise, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use crate::storage::describe_js_error;

#[derive(Clone)]
pub struct JsFetch {
    callback: Function,
}

impl JsFetch {
    pub fn new(callback: Function) -> Self {
        Self { callback }
    }
}

impl HttpClient for JsFetch {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let js_request = request_object(request).map_err(|e| HttpError::Network(describe_js_error(&e)))?;
        let pending = self
            .callback
            .call1(&JsValue::NULL, &js_request)
            .map_err(|e| rejection(&e, request.timeout_ms))?;

        let promise = pending
            .dyn_into::<Promise>()
            .unwrap_or_else(|value| Promise::resolve(&value));
        let value = JsFuture::from(promise)
            .await
            .map_err(|e| rejection(&e, request.timeout_ms))?;

        response_from(&value).map_err(HttpError::Network)
    }
}

fn request_object(request: &HttpRequest) -> Result<Object, JsValue> {
    let headers = Object::new();
    for (name, value) in &request.headers {
        Reflect::set(&headers, &name.into(), &value.into())?;
    }

    let object = Object::new();
    Reflect::set(&object, &"url".into(), &request.url.as_str().into())?;
    Reflect::set(&object, &"headers".into(), &headers)?;
    Reflect::set(&object, &"timeoutMs".into(), &JsValue::from_f64(request.timeout_ms as f64))?;
    Ok(object)
}

fn response_from(value: &JsValue) -> Result<HttpResponse, String> {
    let status = Reflect::get(value, &"status".into())
        .ok()
        .and_then(|s| s.as_f64())
        .ok_or_else(|| "response has no numeric status".to_string())?;
    let body = Reflect::get(value, &"body".into())
        .ok()
        .and_then(|b| b.as_string())
        .unwrap_or_default();

    let mut response = HttpResponse::new(status as u16, &body);
    if let Ok(headers) = Reflect::get(value, &"headers".into()) {
        if let Some(headers) = headers.dyn_ref::<Object>() {
            for entry in Object::entries(headers).iter() {
                let pair = Array::from(&entry);
                if let (Some(name), Some(value)) = (pair.get(0).as_string(), pair.get(1).as_string()) {
                    response.headers.push((name, value));
                }
            }
        }
    }
    Ok(response)
}

fn rejection(error: &JsValue, timeout_ms: u64) -> HttpError {
    let name = Reflect::get(error, &"name".into())
        .ok()
        .and_then(|n| n.as_string())
        .unwrap_or_default();
    match name.as_str() {
        "TimeoutError" | "AbortError" => HttpError::Timeout(timeout_ms),
        _ => HttpError::Network(describe_js_error(error)),
    }
}

/// `Date.now()`; `SystemTime` is unavailable on wasm32-unknown-unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsClock;

impl Clock for JsClock {
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}
