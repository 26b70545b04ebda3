//! Script text generation.
//!
//! Every script names its target by the registered name. Correlated calls
//! embed the correlation key so the callback can echo it back; event
//! listeners are parked on a sandbox-side table so teardown can detach the
//! exact function that was attached.

use viewer_types::{Coordinate, Orientation};

use crate::config::BridgeConfig;

/// Sandbox-side table holding attached event listeners.
const LISTENER_TABLE: &str = "window.__viewerBridgeListeners";

/// JS string literal for `text`.
pub fn quote(text: &str) -> String {
    // A JSON string is a valid JS string literal.
    serde_json::Value::String(text.to_string()).to_string()
}

pub fn js_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

pub fn js_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}

/// Trailing `,srs` argument, or nothing when no SRS is given.
pub fn srs_component(srs: Option<&str>) -> String {
    match srs {
        Some(srs) if !srs.is_empty() => format!(",{}", quote(srs)),
        _ => String::new(),
    }
}

/// Target names are spliced into scripts as identifiers.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$')
}

pub fn orientation_literal(orientation: &Orientation) -> String {
    let parts: Vec<String> = [
        ("yaw", orientation.yaw),
        ("pitch", orientation.pitch),
        ("hFov", orientation.h_fov),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.map(|value| format!("{name}:{}", js_number(value))))
    .collect();
    format!("{{{}}}", parts.join(","))
}

pub fn coordinate_literal(coordinate: &Coordinate) -> String {
    match coordinate.z {
        Some(z) => format!(
            "[{},{},{}]",
            js_number(coordinate.x),
            js_number(coordinate.y),
            js_number(z)
        ),
        None => format!("[{},{}]", js_number(coordinate.x), js_number(coordinate.y)),
    }
}

// ============================================================================
// Correlated Calls
// ============================================================================

fn result_call(config: &BridgeConfig, target: &str, value_expr: &str, key: &str) -> String {
    format!(
        "{}.{}({},{},{})",
        config.host_object,
        config.result_callback,
        quote(target),
        value_expr,
        quote(key)
    )
}

fn not_found_call(config: &BridgeConfig, target: &str, message_expr: &str, key: &str) -> String {
    format!(
        "{}.{}({},{},{})",
        config.host_object,
        config.not_found_callback,
        quote(target),
        message_expr,
        quote(key)
    )
}

/// Evaluate `value_expr` synchronously and report it under `key`.
pub fn result_script(config: &BridgeConfig, target: &str, value_expr: &str, key: &str) -> String {
    format!("{};", result_call(config, target, value_expr, key))
}

/// Evaluate `value_expr`, strip its thumbnails and report it under `key`.
pub fn stripped_result_script(
    config: &BridgeConfig,
    target: &str,
    value_expr: &str,
    key: &str,
) -> String {
    format!(
        "(function(){{var r={value_expr};if(r){{delete r.thumbs;}}{};}})();",
        result_call(config, target, "r", key)
    )
}

/// Await the promise `promise_expr`; fulfilment reports the recording,
/// rejection reports not-found with the error message.
pub fn promise_result_script(
    config: &BridgeConfig,
    target: &str,
    promise_expr: &str,
    key: &str,
) -> String {
    format!(
        "{promise_expr}.then(function(r){{if(r){{delete r.thumbs;}}{};}},function(e){{{};}});",
        result_call(config, target, "r", key),
        not_found_call(config, target, "(e&&e.message)||String(e)", key)
    )
}

// ============================================================================
// Event Listeners
// ============================================================================

/// Connect and teardown scripts for one event listener on `target`.
pub fn listener_scripts(config: &BridgeConfig, target: &str, event_name: &str) -> (String, String) {
    let slot = format!("{LISTENER_TABLE}[{}]", quote(&format!("{target}:{event_name}")));
    let event_expr = format!("{}.{event_name}", config.event_namespace);
    let connect = format!(
        "{LISTENER_TABLE}={LISTENER_TABLE}||{{}};{slot}=function(e){{{}.{}({},{},{{detail:e&&e.detail}});}};{target}.on({event_expr},{slot});",
        config.host_object,
        config.event_callback,
        quote(target),
        quote(event_name),
    );
    let teardown = format!(
        "if({LISTENER_TABLE}&&{slot}){{{target}.off({event_expr},{slot});delete {slot};}}"
    );
    (connect, teardown)
}
