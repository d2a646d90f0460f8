//! Conversions between host values and script values

use crate::error::{Result, ScriptError};
use crate::source::RouteParam;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use octopus_core::StateBag;
use rhai::{Dynamic, Map, INT};
use std::any::Any;
use tracing::warn;

/// First value of a header, or an empty string
pub fn header_get(headers: &HeaderMap, name: &str) -> Dynamic {
    let value = headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();
    Dynamic::from(value)
}

/// Replace a header; `()` or an empty string removes it
///
/// Other values are written in their string form. A name or value that is
/// not valid in HTTP is skipped with a warning and the map is left unchanged.
pub fn header_set(headers: &mut HeaderMap, name: &str, value: &Dynamic) -> Result<()> {
    let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
        warn!(header = name, "Skipping invalid header name");
        return Ok(());
    };

    let value = display_string(value);
    match value {
        None => {
            headers.remove(&name);
        }
        Some(value) if value.is_empty() => {
            headers.remove(&name);
        }
        Some(value) => match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => warn!(header = %name, "Skipping invalid header value"),
        },
    }
    Ok(())
}

/// String form of a script value; `None` for `()`
pub fn display_string(value: &Dynamic) -> Option<String> {
    if value.is_unit() {
        None
    } else if value.is_string() {
        value.clone().into_string().ok()
    } else {
        Some(value.to_string())
    }
}

/// Convert a stored state bag value to a script value
///
/// Strings and numbers convert; every other host type reads as `()`.
pub fn state_value_to_dynamic(value: &(dyn Any + Send + Sync)) -> Dynamic {
    if let Some(s) = value.downcast_ref::<String>() {
        Dynamic::from(s.clone())
    } else if let Some(s) = value.downcast_ref::<&'static str>() {
        Dynamic::from(s.to_string())
    } else if let Some(n) = value.downcast_ref::<isize>() {
        Dynamic::from(*n as INT)
    } else if let Some(n) = value.downcast_ref::<i32>() {
        Dynamic::from(*n as INT)
    } else if let Some(n) = value.downcast_ref::<i64>() {
        Dynamic::from(*n as INT)
    } else if let Some(n) = value.downcast_ref::<f64>() {
        Dynamic::from_float(*n)
    } else {
        Dynamic::UNIT
    }
}

/// Look up a state bag key; missing keys read as `()`
pub fn state_bag_get(bag: &StateBag, key: &str) -> Dynamic {
    bag.get(key)
        .map(|value| state_value_to_dynamic(&**value))
        .unwrap_or(Dynamic::UNIT)
}

/// Store a script value in the state bag
///
/// Strings are stored as `String`, numbers as `f64`; other types are
/// rejected and the bag is left untouched.
pub fn state_bag_set(bag: &mut StateBag, key: &str, value: &Dynamic) -> Result<()> {
    let stored: Box<dyn Any + Send + Sync> = if value.is_string() {
        Box::new(value.clone().into_string().unwrap_or_default())
    } else if let Ok(n) = value.as_int() {
        Box::new(n as f64)
    } else if let Ok(n) = value.as_float() {
        Box::new(n)
    } else {
        return Err(ScriptError::type_error(format!(
            "unsupported type for state bag: {}",
            value.type_name()
        )));
    };
    bag.insert(key.to_string(), stored);
    Ok(())
}

/// Build a fresh script map from route parameters; later duplicates win
pub fn route_params_to_map(params: &[RouteParam]) -> Map {
    params
        .iter()
        .map(|p| (p.key.as_str().into(), Dynamic::from(p.value.clone())))
        .collect()
}

/// Numeric script value as an integer
pub fn as_number(value: &Dynamic) -> Option<INT> {
    value
        .as_int()
        .ok()
        .or_else(|| value.as_float().ok().map(|f| f as INT))
}

/// Encode a structured value (map or array) as JSON
pub fn to_json(value: &Dynamic) -> Result<Vec<u8>> {
    let json: serde_json::Value = rhai::serde::from_dynamic(value)
        .map_err(|e| ScriptError::type_error(format!("cannot encode value: {e}")))?;
    serde_json::to_vec(&json).map_err(|e| ScriptError::type_error(e.to_string()))
}

/// Decode JSON into a script value
pub fn from_json(text: &str) -> Result<Dynamic> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ScriptError::type_error(format!("invalid JSON: {e}")))?;
    rhai::serde::to_dynamic(json).map_err(|e| ScriptError::type_error(e.to_string()))
}

/// Response body from a script value: strings verbatim, maps and arrays as
/// JSON, anything else empty
pub fn body_bytes(value: &Dynamic) -> Bytes {
    if value.is_string() {
        Bytes::from(value.clone().into_string().unwrap_or_default())
    } else if value.is_map() || value.is_array() {
        to_json(value).map(Bytes::from).unwrap_or_default()
    } else {
        Bytes::new()
    }
}
