//! End-to-end tests of the script filter through the public API

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use octopus_core::{Body, Filter, FilterChain, FilterContext, FilterRegistry, HttpFilterContext};
use octopus_scripting::prelude::*;
use octopus_scripting::ScriptCompiler;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::thread;

fn compiler() -> ScriptCompiler {
    ScriptCompiler::new(ScriptingConfig::default()).unwrap()
}

fn request() -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri("http://example.org/items?id=1")
        .header("host", "example.org")
        .header("x-remove-me", "1")
        .body(Body::new(Bytes::new()))
        .unwrap()
}

fn context() -> (Arc<HttpFilterContext>, Arc<dyn FilterContext>) {
    let ctx = Arc::new(HttpFilterContext::new(request()).with_backend_url("http://10.0.0.1:9000"));
    let dyn_ctx: Arc<dyn FilterContext> = ctx.clone();
    (ctx, dyn_ctx)
}

fn header(ctx: &HttpFilterContext, name: &str) -> Option<String> {
    ctx.request()
        .lock()
        .headers()
        .get(name)
        .map(|v| v.to_str().unwrap().to_string())
}

async fn body_of(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

#[test]
fn test_empty_arguments_are_invalid() {
    assert!(matches!(compiler().build(&[]), Err(ScriptError::InvalidParameters)));
}

#[test]
fn test_non_string_route_parameter_is_invalid() {
    let result = compiler().build(&[json!("fn request(ctx) {}"), json!(1)]);
    assert!(matches!(result, Err(ScriptError::InvalidParameters)));
}

#[test]
fn test_missing_script_file_fails_build() {
    let result = compiler().build(&[json!("/definitely/not/here/filter.lua")]);
    assert!(matches!(result, Err(ScriptError::Io { .. })));
}

#[test]
fn test_script_without_hooks_fails_build() {
    let result = compiler().build(&[json!("let x = 1; fn helper() { x }")]);
    let err = result.unwrap_err();
    assert!(matches!(err, ScriptError::NoHook));
    assert_eq!(
        err.to_string(),
        "at least one of `request` and `response` function must be present"
    );
}

#[test]
fn test_syntax_error_fails_build() {
    let result = compiler().build(&[json!("fn request(ctx { }")]);
    assert!(matches!(result, Err(ScriptError::Compilation { .. })));
}

#[test]
fn test_response_only_script_skips_request_phase() {
    let filter = compiler()
        .build(&[json!(r#"fn response(ctx) { ctx.state_bag["seen"] = "response"; }"#)])
        .unwrap();
    assert!(!filter.has_request_hook());
    assert!(filter.has_response_hook());

    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);
    assert!(ctx.state_bag().lock().is_empty());

    filter.response(&dyn_ctx);
    assert_eq!(
        ctx.state_bag().lock()["seen"].downcast_ref::<String>().unwrap(),
        "response"
    );
}

#[test]
fn test_request_fields_and_params() {
    let filter = compiler()
        .build(&[
            json!(
                r#"fn request(ctx, params) {
                    let r = ctx.request;
                    r.header["X-Method"] = r.method;
                    r.header["X-Url"] = r.url;
                    r.header["X-Backend"] = r.backend_url;
                    r.header["X-Mode"] = params.mode;
                    r.header["X-Flag"] = "[" + params.flag + "]";
                    r.header["X-Remove-Me"] = "";
                    r.outgoing_host = "internal.example";
                    r.url = "/rewritten";
                }"#
            ),
            json!("mode=fast"),
            json!("flag"),
        ])
        .unwrap();

    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);

    assert_eq!(header(&ctx, "x-method").as_deref(), Some("GET"));
    assert_eq!(header(&ctx, "x-url").as_deref(), Some("http://example.org/items?id=1"));
    assert_eq!(header(&ctx, "x-backend").as_deref(), Some("http://10.0.0.1:9000"));
    assert_eq!(header(&ctx, "x-mode").as_deref(), Some("fast"));
    assert_eq!(header(&ctx, "x-flag").as_deref(), Some("[]"));
    assert_eq!(header(&ctx, "x-remove-me"), None);
    assert_eq!(ctx.outgoing_host(), "internal.example");
    assert_eq!(ctx.request().lock().uri(), "/rewritten");
}

#[test]
fn test_header_delete_then_read_is_empty() {
    let filter = compiler()
        .build(&[json!(
            r#"fn request(ctx) {
                ctx.request.header["x-remove-me"] = "";
                ctx.request.header["X-After"] = "<" + ctx.request.header["x-remove-me"] + ">";
            }"#
        )])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);
    assert_eq!(header(&ctx, "x-after").as_deref(), Some("<>"));
}

#[test]
fn test_invalid_url_stops_hook_but_keeps_earlier_mutations() {
    let filter = compiler()
        .build(&[json!(
            r#"fn request(ctx) {
                ctx.request.header["X-Before"] = "1";
                ctx.request.url = "http://bad host/";
                ctx.request.header["X-After"] = "1";
            }"#
        )])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);
    assert_eq!(header(&ctx, "x-before").as_deref(), Some("1"));
    assert_eq!(header(&ctx, "x-after"), None);
    assert_eq!(ctx.request().lock().uri(), "http://example.org/items?id=1");
}

#[test]
fn test_response_headers_are_read_only() {
    let filter = compiler()
        .build(&[json!(
            r#"fn response(ctx) {
                ctx.state_bag["server"] = ctx.response.header["Server"];
                ctx.response.header["Server"] = "changed";
            }"#
        )])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    ctx.set_response(
        Response::builder()
            .header("server", "backend")
            .body(Body::new(Bytes::new()))
            .unwrap(),
    );
    filter.response(&dyn_ctx);
    assert_eq!(ctx.response().lock().headers()["server"], "backend");
    assert_eq!(
        ctx.state_bag().lock()["server"].downcast_ref::<String>().unwrap(),
        "backend"
    );
}

#[test]
fn test_state_bag_round_trip_and_rejection() {
    let filter = compiler()
        .build(&[json!(
            r#"fn request(ctx) {
                let bag = ctx.state_bag;
                bag.set("name", "alice");
                bag.set("count", 3);
                let err = bag.set("count", #{ nested: true });
                bag.set("error", err);
                bag.set("count_again", bag.get("count"));
            }"#
        )])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    ctx.state_bag()
        .lock()
        .insert("opaque".into(), Box::new(vec![1u8]));
    filter.request(&dyn_ctx);

    let bag = ctx.state_bag().lock();
    assert_eq!(bag["name"].downcast_ref::<String>().unwrap(), "alice");
    assert_eq!(bag["count"].downcast_ref::<f64>(), Some(&3.0));
    assert_eq!(bag["count_again"].downcast_ref::<f64>(), Some(&3.0));
    assert!(bag["error"]
        .downcast_ref::<String>()
        .unwrap()
        .contains("unsupported type for state bag"));
    assert!(bag.contains_key("opaque"));
}

#[test]
fn test_state_bag_reads_host_values() {
    let filter = compiler()
        .build(&[json!(
            r#"fn request(ctx) {
                let bag = ctx.state_bag;
                ctx.request.header["X-User"] = bag["user"];
                ctx.request.header["X-Limit"] = bag["limit"];
                ctx.request.header["X-Opaque"] = type_of(bag["opaque"]);
            }"#
        )])
        .unwrap();
    let ctx = Arc::new(
        HttpFilterContext::new(request())
            .with_state("user", "bob".to_string())
            .with_state("limit", 10i64)
            .with_state("opaque", std::time::Duration::from_secs(1)),
    );
    let dyn_ctx: Arc<dyn FilterContext> = ctx.clone();
    filter.request(&dyn_ctx);
    assert_eq!(header(&ctx, "x-user").as_deref(), Some("bob"));
    assert_eq!(header(&ctx, "x-limit").as_deref(), Some("10"));
    assert_eq!(header(&ctx, "x-opaque").as_deref(), Some("()"));
}

#[tokio::test]
async fn test_serve_status_only() {
    let filter = compiler()
        .build(&[json!(r#"fn request(ctx) { ctx.serve(#{ status_code: 204 }); }"#)])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);

    let served = ctx.take_served().unwrap();
    assert_eq!(served.status(), StatusCode::NO_CONTENT);
    assert!(body_of(served).await.is_empty());
}

#[tokio::test]
async fn test_serve_headers_and_body() {
    let filter = compiler()
        .build(&[json!(
            r#"fn request(ctx) {
                ctx.serve(#{ status_code: 200, header: #{ "X-A": "1" }, body: "hi" });
            }"#
        )])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);

    let served = ctx.take_served().unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.headers()["x-a"], "1");
    assert_eq!(body_of(served).await, Bytes::from("hi"));
}

#[test]
fn test_serve_short_circuits_chain() {
    let registry = {
        let mut registry = FilterRegistry::new();
        registry.register(Arc::new(ScriptFilterSpec::new(ScriptingConfig::default()).unwrap()));
        registry
    };
    let deny = registry
        .create_filter(FILTER_NAME, &[json!(r#"fn request(ctx) { ctx.serve(#{ status_code: 403 }); }"#)])
        .unwrap();
    let mark = registry
        .create_filter(
            FILTER_NAME,
            &[json!(r#"fn request(ctx) { ctx.request.header["X-Reached"] = "1"; }"#)],
        )
        .unwrap();
    let chain = FilterChain::new(vec![deny, mark]);

    let (ctx, dyn_ctx) = context();
    let ran = chain.request(&dyn_ctx);
    assert_eq!(ran, 1);
    assert_eq!(header(&ctx, "x-reached"), None);
    assert_eq!(ctx.take_served().unwrap().status(), StatusCode::FORBIDDEN);
}

#[test]
fn test_runtime_error_keeps_prior_mutations() {
    let filter = compiler()
        .build(&[json!(
            r#"fn request(ctx) {
                ctx.request.header["X-Step"] = "1";
                throw "failed after step one";
            }"#
        )])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);
    assert_eq!(header(&ctx, "x-step").as_deref(), Some("1"));
    assert!(filter.call_hook(Hook::Request, &dyn_ctx).is_err());
}

#[test]
fn test_runaway_script_is_stopped_by_operation_limit() {
    let config = ScriptingConfig::default().with_sandbox(SandboxConfig {
        max_operations: 10_000,
        ..SandboxConfig::default()
    });
    let filter = ScriptCompiler::new(config)
        .unwrap()
        .build(&[json!("fn request(ctx) { loop { } }")])
        .unwrap();
    let (_, dyn_ctx) = context();
    assert!(filter.call_hook(Hook::Request, &dyn_ctx).is_err());
}

#[test]
fn test_concurrent_hooks_beyond_pool_capacity() {
    let config = ScriptingConfig::default().with_pool_size(2, 4);
    let filter = Arc::new(
        ScriptCompiler::new(config)
            .unwrap()
            .build(&[json!(
                r#"fn request(ctx, params) {
                    let n = ctx.state_bag["n"];
                    ctx.request.header["X-N"] = n + 1.0;
                }"#
            )])
            .unwrap(),
    );

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let filter = Arc::clone(&filter);
            thread::spawn(move || {
                for j in 0..10 {
                    let n = (i * 10 + j) as i64;
                    let ctx = Arc::new(HttpFilterContext::new(request()).with_state("n", n));
                    let dyn_ctx: Arc<dyn FilterContext> = ctx.clone();
                    filter.call_hook(Hook::Request, &dyn_ctx).unwrap();
                    assert_eq!(header(&ctx, "x-n"), Some(format!("{}.0", n + 1)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(filter.pool().idle() <= 4);
}

#[test]
fn test_closed_filter_skips_hooks() {
    let filter = compiler()
        .build(&[json!(r#"fn request(ctx) { ctx.request.header["X-Ran"] = "1"; }"#)])
        .unwrap();
    filter.close();
    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);
    assert_eq!(header(&ctx, "x-ran"), None);
    assert!(matches!(
        filter.call_hook(Hook::Request, &dyn_ctx),
        Err(ScriptError::PoolClosed)
    ));
}

#[test]
fn test_file_script_builds_identically_twice() {
    let mut file = tempfile::Builder::new().suffix(".lua").tempfile().unwrap();
    writeln!(
        file,
        r#"
        import "base64" as b64;

        fn request(ctx, params) {{
            ctx.request.header["Authorization"] = "Basic " + b64::encode(params.user + ":" + params.pass);
        }}
        "#
    )
    .unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let outputs: Vec<_> = (0..2)
        .map(|_| {
            let filter = compiler()
                .build(&[json!(path), json!("user=aladdin"), json!("pass=opensesame")])
                .unwrap();
            assert!(matches!(filter.source(), ScriptSource::File { .. }));
            let (ctx, dyn_ctx) = context();
            filter.request(&dyn_ctx);
            header(&ctx, "authorization")
        })
        .collect();

    assert_eq!(outputs[0].as_deref(), Some("Basic YWxhZGRpbjpvcGVuc2VzYW1l"));
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_json_module_builds_bodies() {
    let filter = compiler()
        .build(&[json!(
            r#"fn request(ctx) {
                let data = json::decode("{\"ok\": true}");
                ctx.request.header["X-Json"] = json::encode(data);
            }"#
        )])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    filter.request(&dyn_ctx);
    assert_eq!(header(&ctx, "x-json").as_deref(), Some(r#"{"ok":true}"#));
}

#[test]
fn test_hooks_see_top_level_imports_and_constants() {
    let filter = compiler()
        .build(&[
            json!(
                r#"import "json" as j;
                const PREFIX = "v1";

                fn request(ctx, params) {
                    ctx.request.header["X-J"] = j::encode(#{ a: 1 });
                    ctx.request.header["X-Path"] = "/" + global::PREFIX + "/" + params.svc;
                }"#
            ),
            json!("svc=items"),
        ])
        .unwrap();

    for _ in 0..2 {
        let (ctx, dyn_ctx) = context();
        filter.call_hook(Hook::Request, &dyn_ctx).unwrap();
        assert_eq!(header(&ctx, "x-j").as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(header(&ctx, "x-path").as_deref(), Some("/v1/items"));
    }
}

#[test]
fn test_functions_taking_more_than_two_params_are_not_hooks() {
    let result = compiler().build(&[json!("fn request(a, b, c) {} fn response(a, b, c) {}")]);
    assert!(matches!(result, Err(ScriptError::NoHook)));

    let filter = compiler()
        .build(&[json!("fn request(a, b, c) {} fn response(ctx) {}")])
        .unwrap();
    assert!(!filter.has_request_hook());
    assert!(filter.has_response_hook());
}

#[test]
fn test_invalid_header_value_is_skipped() {
    let filter = compiler()
        .build(&[json!(
            r#"fn request(ctx) {
                ctx.request.header["X-Bad"] = "line\nbreak";
                ctx.request.header["X-After"] = "set";
            }"#
        )])
        .unwrap();
    let (ctx, dyn_ctx) = context();
    filter.call_hook(Hook::Request, &dyn_ctx).unwrap();
    assert_eq!(header(&ctx, "x-bad"), None);
    assert_eq!(header(&ctx, "x-after").as_deref(), Some("set"));
}
