//! `url` module

use super::{finish, FnResult};
use crate::marshal;
use rhai::{Array, Dynamic, Map, Module, INT};
use url::Url;

pub(super) fn module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("parse", parse);
    module.set_native_fn("build", |parts: Map| -> FnResult<String> { Ok(build(&parts)) });
    module.set_native_fn("build_query_string", |query: Map| -> FnResult<String> {
        Ok(build_query_string(&query))
    });
    module.set_native_fn("parse_query", |query: &str| -> FnResult<Map> { Ok(parse_query(query)) });
    module.set_native_fn("resolve", resolve);
    finish(module)
}

/// Split an absolute URL into `scheme`, `username`, `password`, `host`,
/// `port`, `path`, `query` and `fragment`
fn parse(text: &str) -> FnResult<Map> {
    let url = Url::parse(text).map_err(|e| format!("invalid url '{text}': {e}"))?;

    let mut host = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port() {
        host = format!("{host}:{port}");
    }

    let mut parts = Map::new();
    parts.insert("scheme".into(), url.scheme().into());
    parts.insert("username".into(), url.username().into());
    parts.insert("password".into(), url.password().unwrap_or_default().into());
    parts.insert("host".into(), host.into());
    parts.insert(
        "port".into(),
        url.port_or_known_default()
            .map(|p| Dynamic::from(p as INT))
            .unwrap_or(Dynamic::UNIT),
    );
    parts.insert("path".into(), url.path().into());
    parts.insert("query".into(), url.query().unwrap_or_default().into());
    parts.insert("fragment".into(), url.fragment().unwrap_or_default().into());
    Ok(parts)
}

/// Assemble a URL from the parts produced by `parse`
///
/// `query` may be a string or a map.
fn build(parts: &Map) -> String {
    let part = |name: &str| {
        parts
            .get(name)
            .and_then(marshal::display_string)
            .unwrap_or_default()
    };

    let mut out = String::new();
    let scheme = part("scheme");
    let host = part("host");
    if !scheme.is_empty() {
        out.push_str(&scheme);
        out.push(':');
    }
    if !host.is_empty() {
        out.push_str("//");
        let username = part("username");
        if !username.is_empty() {
            out.push_str(&username);
            let password = part("password");
            if !password.is_empty() {
                out.push(':');
                out.push_str(&password);
            }
            out.push('@');
        }
        out.push_str(&host);
    }

    let path = part("path");
    if !host.is_empty() && !path.is_empty() && !path.starts_with('/') {
        out.push('/');
    }
    out.push_str(&path);

    let query = match parts.get("query") {
        Some(q) if q.is_map() => q
            .read_lock::<Map>()
            .map(|q| build_query_string(&q))
            .unwrap_or_default(),
        _ => part("query"),
    };
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query);
    }

    let fragment = part("fragment");
    if !fragment.is_empty() {
        out.push('#');
        out.push_str(&fragment);
    }
    out
}

/// Encode a map as `application/x-www-form-urlencoded`; array values repeat
/// the key
pub(super) fn build_query_string(query: &Map) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in query {
        if let Some(values) = value.read_lock::<Array>() {
            for value in values.iter() {
                serializer.append_pair(key, &marshal::display_string(value).unwrap_or_default());
            }
        } else {
            serializer.append_pair(key, &marshal::display_string(value).unwrap_or_default());
        }
    }
    serializer.finish()
}

/// Decode a query string; repeated keys collect into an array
fn parse_query(query: &str) -> Map {
    let mut out = Map::new();
    for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
        let value = Dynamic::from(value.into_owned());
        match out.get_mut(&*key) {
            Some(existing) if existing.is_array() => {
                if let Some(mut values) = existing.write_lock::<Array>() {
                    values.push(value);
                }
            }
            Some(existing) => {
                let first = std::mem::take(existing);
                *existing = Dynamic::from_array(vec![first, value]);
            }
            None => {
                out.insert(key.into_owned().into(), value);
            }
        }
    }
    out
}

/// Resolve a reference against a base URL
fn resolve(base: &str, reference: &str) -> FnResult<String> {
    let base = Url::parse(base).map_err(|e| format!("invalid base url '{base}': {e}"))?;
    let joined = base
        .join(reference)
        .map_err(|e| format!("cannot resolve '{reference}': {e}"))?;
    Ok(joined.to_string())
}
