//! `json` module

use super::{finish, FnResult};
use crate::marshal;
use rhai::{Dynamic, Module};

pub(super) fn module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("encode", |value: Dynamic| -> FnResult<String> {
        let bytes = marshal::to_json(&value)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    });
    module.set_native_fn("decode", |text: &str| -> FnResult<Dynamic> {
        Ok(marshal::from_json(text)?)
    });
    finish(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::{Engine, INT};

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.register_static_module("json", module().into());
        engine
    }

    #[test]
    fn test_decode_then_read() {
        let engine = engine();
        let n: INT = engine
            .eval(r#"let v = json::decode("{\"items\": [1, 2, 3]}"); v.items.len()"#)
            .unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn test_encode_scalars_and_arrays() {
        let engine = engine();
        let out: String = engine.eval(r#"json::encode([1, "a", true, ()])"#).unwrap();
        assert_eq!(out, r#"[1,"a",true,null]"#);
    }

    #[test]
    fn test_decode_error_is_catchable() {
        let engine = engine();
        let out: bool = engine
            .eval(
                r#"
                let caught = false;
                try {
                    json::decode("{");
                } catch {
                    caught = true;
                }
                caught
            "#,
            )
            .unwrap();
        assert!(out);
    }
}
