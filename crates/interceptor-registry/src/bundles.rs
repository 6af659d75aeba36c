//! Per-feature descriptor bundles.
//!
//! The core bundle is always registered. The others are opt-in by name from
//! the feature configuration.

use storage_ns::{Namespacer, StorageKind};
use url_rewrite::UrlForm;

use crate::context::{ExposedContexts as Ctx, Supports};
use crate::descriptor::{EscapeFix, InterceptCx, InterceptorDescriptor as D};
use crate::host::{HostError, HostValue, NativeFn};

/// Names accepted in `special_interception_features`.
pub const SPECIAL_FEATURES: &[&str] = &["serviceWorker", "sharedStorage", "sql", "csp"];
/// Names accepted in `browser_extras`.
pub const BROWSER_EXTRAS: &[&str] = &["chromium", "firefox"];
/// Names accepted in `os_extras`.
pub const OS_EXTRAS: &[&str] = &["android"];

const WINDOW_AND_WORKERS: Ctx = Ctx::ALL;
const NON_SERVICE: Ctx = Ctx::NOT_SERVICE_WORKER;

pub fn core() -> Vec<D> {
    use UrlForm::{Full, Relative};

    vec![
        // Navigation and history
        D::call("open").exposed_in(Ctx::WINDOW).fix(EscapeFix::param(0, Full)),
        D::call("history.pushState")
            .exposed_in(Ctx::WINDOW)
            .fix(EscapeFix::param(2, Relative)),
        D::call("history.replaceState")
            .exposed_in(Ctx::WINDOW)
            .fix(EscapeFix::param(2, Relative)),
        D::getter("location.href")
            .exposed_in(WINDOW_AND_WORKERS)
            .fix(EscapeFix::returns(Full)),
        D::getter_with("location.origin", real_origin_getter).exposed_in(WINDOW_AND_WORKERS),
        D::value("origin", real_origin_value).exposed_in(WINDOW_AND_WORKERS),
        D::getter("document.URL")
            .exposed_in(Ctx::WINDOW)
            .fix(EscapeFix::returns(Full)),
        D::getter("document.referrer")
            .exposed_in(Ctx::WINDOW)
            .fix(EscapeFix::returns(Full)),
        // Network
        D::call("fetch").fix(EscapeFix::param(0, Full)),
        D::call("XMLHttpRequest.prototype.open")
            .exposed_in(NON_SERVICE)
            .fix(EscapeFix::param(1, Full)),
        D::call("navigator.sendBeacon")
            .exposed_in(Ctx::WINDOW)
            .fix(EscapeFix::param(0, Full)),
        D::construction("Request").fix(EscapeFix::constructor_param(0, Full)),
        D::construction("EventSource")
            .exposed_in(NON_SERVICE)
            .fix(EscapeFix::constructor_param(0, Full)),
        D::construction("Worker")
            .exposed_in(Ctx::WINDOW | Ctx::DEDICATED_WORKER)
            .fix(EscapeFix::constructor_param(0, Full)),
        D::construction("SharedWorker")
            .exposed_in(Ctx::WINDOW)
            .fix(EscapeFix::constructor_param(0, Full)),
        D::call("importScripts")
            .exposed_in(Ctx::WORKERS)
            .fix(EscapeFix::param(0, Full)),
        // Cookies
        D::getter_with("document.cookie", cookie_getter).exposed_in(Ctx::WINDOW),
        D::setter_with("document.cookie", cookie_setter).exposed_in(Ctx::WINDOW),
        // Storage
        D::call_with("localStorage.getItem", local_storage_key).exposed_in(Ctx::WINDOW),
        D::call_with("localStorage.setItem", local_storage_key).exposed_in(Ctx::WINDOW),
        D::call_with("localStorage.removeItem", local_storage_key).exposed_in(Ctx::WINDOW),
        D::call_with("localStorage.clear", local_storage_clear).exposed_in(Ctx::WINDOW),
        D::call_with("localStorage.key", local_storage_nth_key).exposed_in(Ctx::WINDOW),
        D::getter_with("localStorage.length", local_storage_length).exposed_in(Ctx::WINDOW),
        D::call_with("sessionStorage.getItem", session_storage_key).exposed_in(Ctx::WINDOW),
        D::call_with("sessionStorage.setItem", session_storage_key).exposed_in(Ctx::WINDOW),
        D::call_with("sessionStorage.removeItem", session_storage_key).exposed_in(Ctx::WINDOW),
        D::call_with("sessionStorage.clear", session_storage_clear).exposed_in(Ctx::WINDOW),
        D::call_with("sessionStorage.key", session_storage_nth_key).exposed_in(Ctx::WINDOW),
        D::getter_with("sessionStorage.length", session_storage_length).exposed_in(Ctx::WINDOW),
        D::call_with("indexedDB.open", indexed_db_name),
        D::call_with("indexedDB.deleteDatabase", indexed_db_name),
    ]
}

pub fn special_feature(name: &str) -> Option<Vec<D>> {
    use UrlForm::Full;

    let bundle = match name {
        "serviceWorker" => vec![
            D::call("navigator.serviceWorker.register")
                .exposed_in(Ctx::WINDOW)
                .fix(EscapeFix::param(0, Full)),
            D::call("clients.openWindow")
                .exposed_in(Ctx::SERVICE_WORKER)
                .fix(EscapeFix::param(0, Full)),
        ],
        "sharedStorage" => vec![
            D::call_with("sharedStorage.get", shared_storage_key)
                .exposed_in(Ctx::WINDOW)
                .supports(Supports::DRAFT | Supports::SHIPPING),
            D::call_with("sharedStorage.set", shared_storage_key)
                .exposed_in(Ctx::WINDOW)
                .supports(Supports::DRAFT | Supports::SHIPPING),
        ],
        "sql" => vec![D::call_with("openDatabase", sql_database_name)
            .exposed_in(Ctx::WINDOW)
            .supports(Supports::DEPRECATED | Supports::NONSTANDARD)],
        "csp" => vec![D::setter_with("HTMLScriptElement.prototype.src", csp_checked_script_src)
            .exposed_in(Ctx::WINDOW)
            .fix(EscapeFix::param(0, Full))],
        _ => return None,
    };
    Some(bundle)
}

pub fn browser_extra(name: &str) -> Option<Vec<D>> {
    use UrlForm::Full;

    let bundle = match name {
        "chromium" => vec![
            D::call("navigation.navigate")
                .exposed_in(Ctx::WINDOW)
                .supports(Supports::DRAFT | Supports::SHIPPING)
                .fix(EscapeFix::param(0, Full)),
            D::call("navigator.registerProtocolHandler")
                .exposed_in(Ctx::WINDOW)
                .fix(EscapeFix::param(1, Full)),
        ],
        "firefox" => vec![D::call("navigator.registerProtocolHandler")
            .exposed_in(Ctx::WINDOW)
            .supports(Supports::SHIPPING | Supports::WIDELY_AVAILABLE)
            .fix(EscapeFix::param(1, Full))],
        _ => return None,
    };
    Some(bundle)
}

pub fn os_extra(name: &str) -> Option<Vec<D>> {
    match name {
        "android" => Some(vec![D::call_with("navigator.share", share_data_url)
            .exposed_in(Ctx::WINDOW)
            .supports(Supports::SHIPPING)]),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

fn real_origin(cx: &InterceptCx, fallback: HostValue) -> HostValue {
    cx.codec()
        .location()
        .real_origin()
        .map(HostValue::from)
        .unwrap_or(fallback)
}

fn real_origin_getter(cx: &InterceptCx, original: HostValue) -> Result<HostValue, HostError> {
    Ok(real_origin(cx, original))
}

fn real_origin_value(cx: &InterceptCx, original: HostValue) -> Result<HostValue, HostError> {
    Ok(real_origin(cx, original))
}

fn cookie_getter(cx: &InterceptCx, original: HostValue) -> Result<HostValue, HostError> {
    Ok(match (cx.cookies(), &original) {
        (Some(rw), HostValue::String(header)) => HostValue::String(rw.rewrite_get_cookie(header)),
        _ => original,
    })
}

fn cookie_setter(cx: &InterceptCx, incoming: HostValue) -> Result<HostValue, HostError> {
    Ok(match (cx.cookies(), &incoming) {
        (Some(rw), HostValue::String(header)) => HostValue::String(rw.rewrite_set_cookie(header)),
        _ => incoming,
    })
}

fn namespacer(cx: &InterceptCx, kind: StorageKind) -> Result<&Namespacer, HostError> {
    cx.storage(kind)
        .ok_or_else(|| HostError::Blocked(format!("no `{kind}` namespace in this context")))
}

fn namespaced_first_arg(
    cx: &InterceptCx,
    kind: StorageKind,
    original: &NativeFn,
    mut args: Vec<HostValue>,
) -> Result<HostValue, HostError> {
    let ns = namespacer(cx, kind)?;
    if let Some(HostValue::String(key)) = args.first_mut() {
        *key = ns.derive_key(key);
    }
    original(&args)
}

fn local_storage_key(cx: &InterceptCx, original: &NativeFn, args: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_first_arg(cx, StorageKind::LocalStorage, original, args)
}

fn session_storage_key(cx: &InterceptCx, original: &NativeFn, args: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_first_arg(cx, StorageKind::SessionStorage, original, args)
}

// `clear`, `key` and `length` never reach the host: the host's view spans
// every namespace sharing the backend.

fn namespaced_clear(cx: &InterceptCx, kind: StorageKind) -> Result<HostValue, HostError> {
    let removed = namespacer(cx, kind)?.clear();
    tracing::debug!(%kind, removed, "namespace cleared");
    Ok(HostValue::Undefined)
}

fn namespaced_nth_key(cx: &InterceptCx, kind: StorageKind, args: &[HostValue]) -> Result<HostValue, HostError> {
    let ns = namespacer(cx, kind)?;
    let index = match args.first() {
        Some(HostValue::Number(n)) if n.is_finite() && *n >= 0.0 => *n as usize,
        Some(HostValue::Number(_)) => return Ok(HostValue::Null),
        _ => return Err(HostError::Type(format!("{kind}.key(index)"))),
    };
    Ok(ns.keys().into_iter().nth(index).map(HostValue::String).unwrap_or(HostValue::Null))
}

fn namespaced_length(cx: &InterceptCx, kind: StorageKind) -> Result<HostValue, HostError> {
    Ok(HostValue::Number(namespacer(cx, kind)?.len() as f64))
}

fn local_storage_clear(cx: &InterceptCx, _: &NativeFn, _: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_clear(cx, StorageKind::LocalStorage)
}

fn session_storage_clear(cx: &InterceptCx, _: &NativeFn, _: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_clear(cx, StorageKind::SessionStorage)
}

fn local_storage_nth_key(cx: &InterceptCx, _: &NativeFn, args: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_nth_key(cx, StorageKind::LocalStorage, &args)
}

fn session_storage_nth_key(cx: &InterceptCx, _: &NativeFn, args: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_nth_key(cx, StorageKind::SessionStorage, &args)
}

fn local_storage_length(cx: &InterceptCx, _: HostValue) -> Result<HostValue, HostError> {
    namespaced_length(cx, StorageKind::LocalStorage)
}

fn session_storage_length(cx: &InterceptCx, _: HostValue) -> Result<HostValue, HostError> {
    namespaced_length(cx, StorageKind::SessionStorage)
}

fn shared_storage_key(cx: &InterceptCx, original: &NativeFn, args: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_first_arg(cx, StorageKind::SharedStorage, original, args)
}

fn indexed_db_name(cx: &InterceptCx, original: &NativeFn, args: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_first_arg(cx, StorageKind::IndexedDb, original, args)
}

fn sql_database_name(cx: &InterceptCx, original: &NativeFn, args: Vec<HostValue>) -> Result<HostValue, HostError> {
    namespaced_first_arg(cx, StorageKind::Sql, original, args)
}

/// Runs after the escape fix, so `incoming` is already in proxy form.
fn csp_checked_script_src(cx: &InterceptCx, incoming: HostValue) -> Result<HostValue, HostError> {
    if let (Some(csp), HostValue::String(url)) = (cx.csp(), &incoming) {
        let origin = cx.codec().location().origin();
        if let Err(violation) = csp.validate(url, origin, "script-src-elem") {
            return Err(HostError::Blocked(violation.to_string()));
        }
    }
    Ok(incoming)
}

/// `navigator.share({url, ...})`: the URL lives inside the data object.
fn share_data_url(cx: &InterceptCx, original: &NativeFn, mut args: Vec<HostValue>) -> Result<HostValue, HostError> {
    if let Some(HostValue::Object(data)) = args.first_mut() {
        if let Some(url) = data.fields.remove("url") {
            data.fields
                .insert("url".to_string(), cx.encode(url, UrlForm::Full));
        }
    }
    original(&args)
}
