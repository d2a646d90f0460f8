//! JSON rendering of a filter context after hooks ran

use anyhow::Result;
use http::HeaderMap;
use http_body_util::BodyExt;
use octopus_core::{FilterContext, HttpFilterContext};
use serde_json::{json, Map, Value};

/// Request, state bag, backend response and any served response
pub async fn render(ctx: &HttpFilterContext) -> Result<Value> {
    let request = {
        let req = ctx.request().lock();
        json!({
            "method": req.method().as_str(),
            "url": req.uri().to_string(),
            "headers": headers(req.headers()),
        })
    };

    let response = {
        let res = ctx.response().lock();
        json!({
            "status_code": res.status().as_u16(),
            "headers": headers(res.headers()),
        })
    };

    let state_bag: Map<String, Value> = ctx
        .state_bag()
        .lock()
        .iter()
        .map(|(key, value)| {
            let value = if let Some(s) = value.downcast_ref::<String>() {
                json!(s)
            } else if let Some(n) = value.downcast_ref::<f64>() {
                json!(n)
            } else if let Some(n) = value.downcast_ref::<i64>() {
                json!(n)
            } else {
                Value::Null
            };
            (key.clone(), value)
        })
        .collect();

    let served = match ctx.take_served() {
        Some(res) => {
            let status = res.status().as_u16();
            let headers = headers(res.headers());
            let body = res.into_body().collect().await?.to_bytes();
            json!({
                "status_code": status,
                "headers": headers,
                "body": String::from_utf8_lossy(&body),
            })
        }
        None => Value::Null,
    };

    Ok(json!({
        "request": request,
        "outgoing_host": ctx.outgoing_host(),
        "state_bag": state_bag,
        "response": response,
        "served": served,
    }))
}

fn headers(map: &HeaderMap) -> Value {
    let mut out = Map::new();
    for name in map.keys() {
        let values: Vec<Value> = map
            .get_all(name)
            .iter()
            .map(|v| Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        out.insert(name.as_str().to_string(), Value::Array(values));
    }
    Value::Object(out)
}
