//! `base64` module

use super::{finish, FnResult};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use rhai::Module;

pub(super) fn module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("encode", |s: &str| -> FnResult<String> { Ok(STANDARD.encode(s)) });
    module.set_native_fn("decode", |s: &str| decode(&STANDARD, s));
    module.set_native_fn("encode_url", |s: &str| -> FnResult<String> { Ok(URL_SAFE.encode(s)) });
    module.set_native_fn("decode_url", |s: &str| decode(&URL_SAFE, s));
    finish(module)
}

fn decode(engine: &impl base64::Engine, s: &str) -> FnResult<String> {
    let bytes = engine
        .decode(s.trim())
        .map_err(|e| format!("base64 decode failed: {e}"))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
