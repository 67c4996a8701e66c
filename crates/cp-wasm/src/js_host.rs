//! Scriptlet property host over the page's global object.
//!
//! Lookups read property descriptors along the prototype chain and never
//! call getters. Every mutation is a single `Reflect.defineProperty`.

use cp_core::scriptlet::{Literal, Lookup, PropertyHost, ScriptletError, Trap};
use js_sys::{Object, Reflect};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};

use crate::storage::describe_js_error;

pub struct WindowHost {
    global: Object,
}

impl WindowHost {
    pub fn new() -> Self {
        Self {
            global: js_sys::global(),
        }
    }
}

impl Default for WindowHost {
    fn default() -> Self {
        Self::new()
    }
}

fn host_error(value: JsValue) -> ScriptletError {
    ScriptletError::Host(describe_js_error(&value))
}

/// Own or inherited descriptor for `key`, without invoking accessors.
fn find_descriptor(owner: &Object, key: &JsValue) -> Result<Option<Object>, ScriptletError> {
    let mut current: JsValue = owner.clone().into();
    while current.is_object() {
        let target: &Object = current.unchecked_ref();
        let descriptor = Reflect::get_own_property_descriptor(target, key).map_err(host_error)?;
        if !descriptor.is_undefined() {
            return Ok(Some(descriptor.unchecked_into()));
        }
        current = Reflect::get_prototype_of(&current).map_err(host_error)?.into();
    }
    Ok(None)
}

fn define(owner: &Object, key: &str, descriptor: &Object) -> Result<(), ScriptletError> {
    let defined = Reflect::define_property(owner, &key.into(), descriptor).map_err(host_error)?;
    if defined {
        Ok(())
    } else {
        Err(ScriptletError::NotConfigurable(key.to_string()))
    }
}

fn descriptor(entries: &[(&str, &JsValue)]) -> Result<Object, ScriptletError> {
    let object = Object::new();
    for (name, value) in entries {
        Reflect::set(&object, &(*name).into(), value).map_err(host_error)?;
    }
    Ok(object)
}

fn literal_value(literal: &Literal) -> JsValue {
    match literal {
        Literal::Undefined => JsValue::UNDEFINED,
        Literal::Null => JsValue::NULL,
        Literal::Bool(b) => JsValue::from_bool(*b),
        Literal::Number(n) => JsValue::from_f64(*n),
        Literal::EmptyString => JsValue::from_str(""),
        Literal::EmptyArray => js_sys::Array::new().into(),
        Literal::EmptyObject => Object::new().into(),
        Literal::NoopFunc => Closure::<dyn Fn()>::new(|| {}).into_js_value(),
        Literal::TrueFunc => Closure::<dyn Fn() -> bool>::new(|| true).into_js_value(),
        Literal::FalseFunc => Closure::<dyn Fn() -> bool>::new(|| false).into_js_value(),
    }
}

fn throwing_accessor(key: &str, action: &'static str) -> JsValue {
    let message = format!("{} of '{}' blocked", action, key);
    Closure::<dyn Fn(JsValue) -> Result<JsValue, JsValue>>::new(move |_: JsValue| {
        Err(js_sys::ReferenceError::new(&message).into())
    })
    .into_js_value()
}

/// Getter that keeps reads working after a write trap: the existing accessor
/// getter when there is one, otherwise the current data value.
fn preserved_getter(existing: Option<&Object>) -> Result<JsValue, ScriptletError> {
    let Some(descriptor) = existing else {
        return Ok(Closure::<dyn Fn() -> JsValue>::new(|| JsValue::UNDEFINED).into_js_value());
    };
    let getter = Reflect::get(descriptor, &"get".into()).map_err(host_error)?;
    if getter.is_function() {
        return Ok(getter);
    }
    let value = Reflect::get(descriptor, &"value".into()).map_err(host_error)?;
    Ok(Closure::<dyn Fn() -> JsValue>::new(move || value.clone()).into_js_value())
}

impl PropertyHost for WindowHost {
    type Handle = Object;

    fn root(&self) -> Object {
        self.global.clone()
    }

    fn lookup(&self, owner: &Object, key: &str) -> Result<Lookup<Object>, ScriptletError> {
        let Some(descriptor) = find_descriptor(owner, &key.into())? else {
            return Ok(Lookup::Missing);
        };
        let is_accessor = Reflect::has(&descriptor, &"get".into()).map_err(host_error)?
            || Reflect::has(&descriptor, &"set".into()).map_err(host_error)?;
        if is_accessor {
            return Ok(Lookup::Value);
        }
        let value = Reflect::get(&descriptor, &"value".into()).map_err(host_error)?;
        if value.is_object() {
            Ok(Lookup::Object(value.unchecked_into()))
        } else {
            Ok(Lookup::Value)
        }
    }

    fn create_object(&mut self, owner: &Object, key: &str) -> Result<Object, ScriptletError> {
        let object = Object::new();
        let yes = JsValue::TRUE;
        define(
            owner,
            key,
            &descriptor(&[
                ("value", &object.clone().into()),
                ("writable", &yes),
                ("enumerable", &yes),
                ("configurable", &yes),
            ])?,
        )?;
        Ok(object)
    }

    fn define_value(&mut self, owner: &Object, key: &str, value: &Literal) -> Result<(), ScriptletError> {
        define(
            owner,
            key,
            &descriptor(&[
                ("value", &literal_value(value)),
                ("writable", &JsValue::FALSE),
                ("enumerable", &JsValue::TRUE),
                ("configurable", &JsValue::TRUE),
            ])?,
        )
    }

    fn define_trap(&mut self, owner: &Object, key: &str, trap: Trap) -> Result<(), ScriptletError> {
        let existing = find_descriptor(owner, &key.into())?;
        let (getter, setter) = match trap {
            Trap::ThrowOnRead => (
                throwing_accessor(key, "read"),
                Closure::<dyn Fn(JsValue)>::new(|_: JsValue| {}).into_js_value(),
            ),
            Trap::ThrowOnWrite => (preserved_getter(existing.as_ref())?, throwing_accessor(key, "write")),
        };
        define(
            owner,
            key,
            &descriptor(&[
                ("get", &getter),
                ("set", &setter),
                ("configurable", &JsValue::TRUE),
            ])?,
        )
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use cp_core::scriptlet::ScriptletExecutor;
    use cp_core::types::ScriptletInvocation;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_set_constant_creates_path() {
        let mut host = WindowHost::new();
        let report = ScriptletExecutor::new().apply(
            &mut host,
            &[ScriptletInvocation::new("set-constant", &["cpTest.flags.blocked", "false"])],
        );
        assert_eq!(report.applied, 1);
        let flags = Reflect::get(&js_sys::global(), &"cpTest".into()).unwrap();
        let flags = Reflect::get(&flags, &"flags".into()).unwrap();
        assert_eq!(Reflect::get(&flags, &"blocked".into()).unwrap(), JsValue::FALSE);
    }

    #[wasm_bindgen_test]
    fn test_abort_on_read_throws() {
        let mut host = WindowHost::new();
        ScriptletExecutor::new().apply(
            &mut host,
            &[ScriptletInvocation::new("abort-on-property-read", &["cpDetector"])],
        );
        assert!(Reflect::get(&js_sys::global(), &"cpDetector".into()).is_err());
    }

    #[wasm_bindgen_test]
    fn test_abort_on_write_keeps_accessor_getter() {
        let global = js_sys::global();
        let getter = Closure::<dyn Fn() -> JsValue>::new(|| JsValue::from_f64(7.0)).into_js_value();
        let accessor = descriptor(&[("get", &getter), ("configurable", &JsValue::TRUE)]).unwrap();
        Reflect::define_property(&global, &"cpAccessor".into(), &accessor).unwrap();

        let mut host = WindowHost::new();
        let report = ScriptletExecutor::new().apply(
            &mut host,
            &[ScriptletInvocation::new("abort-on-property-write", &["cpAccessor"])],
        );
        assert_eq!(report.applied, 1);
        assert_eq!(Reflect::get(&global, &"cpAccessor".into()).unwrap(), JsValue::from_f64(7.0));
        assert!(Reflect::set(&global, &"cpAccessor".into(), &JsValue::TRUE).is_err());
    }

    #[wasm_bindgen_test]
    fn test_abort_on_write_keeps_data_value() {
        let global = js_sys::global();
        Reflect::set(&global, &"cpPlain".into(), &JsValue::from_str("kept")).unwrap();

        let mut host = WindowHost::new();
        ScriptletExecutor::new().apply(
            &mut host,
            &[ScriptletInvocation::new("abort-on-property-write", &["cpPlain"])],
        );
        assert_eq!(Reflect::get(&global, &"cpPlain".into()).unwrap(), JsValue::from_str("kept"));
    }
}
