use super::assembly::ClassInfo;
use super::error::ScriptError;
use super::heap::OBJECT_ID_KEY;
use super::types::{Primitive, ScriptArg};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Scope, AST, FLOAT, INT};

/// Key holding the boxed type name inside a boxed argument's object map.
pub(crate) const BOXED_TYPE_KEY: &str = "__type";
/// Conventional message entry of a thrown object map.
const MESSAGE_KEY: &str = "_message";

/// Text of a script-side exception: the thrown map's `_message` entry when present, otherwise the
/// thrown value's string form.
pub fn render_exception(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => {
            if let Some(map) = value.read_lock::<Map>() {
                if let Some(message) = map.get(MESSAGE_KEY) {
                    return message.to_string();
                }
            }
            value.to_string()
        }
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => render_exception(inner),
        other => other.to_string(),
    }
}

pub(crate) fn char_to_code_unit(value: char) -> Result<INT, ScriptError> {
    let code = u32::from(value);
    if code > u32::from(u16::MAX) {
        log::warn!("[managed] character {value:?} (U+{code:X}) is outside the 16-bit range; rejected");
        return Err(ScriptError::CharOutOfRange(value));
    }
    Ok(INT::from(code))
}

pub(crate) fn arg_to_dynamic(arg: &ScriptArg) -> Result<Dynamic, ScriptError> {
    let value = match arg {
        ScriptArg::Primitive(primitive) => match *primitive {
            Primitive::Bool(value) => Dynamic::from_bool(value),
            Primitive::Int(value) => Dynamic::from_int(INT::from(value)),
            Primitive::Long(value) => Dynamic::from_int(value),
            Primitive::Float(value) => Dynamic::from_float(FLOAT::from(value)),
            Primitive::Double(value) => Dynamic::from_float(value),
            Primitive::Char(value) => Dynamic::from_int(char_to_code_unit(value)?),
        },
        ScriptArg::Str(value) => Dynamic::from(value.clone()),
        ScriptArg::Native(ptr) => Dynamic::from_int(ptr.0 as INT),
        ScriptArg::Boxed(boxed) => {
            let mut map = Map::new();
            map.insert(BOXED_TYPE_KEY.into(), Dynamic::from(boxed.type_name.clone()));
            for (name, field) in &boxed.fields {
                map.insert(name.as_str().into(), arg_to_dynamic(field)?);
            }
            Dynamic::from_map(map)
        }
    };
    Ok(value)
}

pub(crate) fn args_to_dynamic(args: &[ScriptArg]) -> Result<Vec<Dynamic>, ScriptError> {
    args.iter().map(arg_to_dynamic).collect()
}

/// Runs `method` with `this` bound to `state`. The method must exist with a matching arity.
pub(crate) fn call_method(
    engine: &Engine,
    class: &ClassInfo,
    state: &mut Dynamic,
    method: &str,
    args: Vec<Dynamic>,
) -> Result<Dynamic, ScriptError> {
    if !class.has_method(method, args.len()) {
        return Err(ScriptError::MethodNotFound {
            class: class.qualified_name().to_string(),
            method: method.to_string(),
            arity: args.len(),
        });
    }
    let identity = state.read_lock::<Map>().and_then(|map| map.get(OBJECT_ID_KEY).cloned());
    let options = CallFnOptions::new().eval_ast(false).rewind_scope(true).bind_this_ptr(state);
    let result = engine.call_fn_with_options::<Dynamic>(options, &mut Scope::new(), class.ast(), method, args);
    // Scripts cannot keep a rewritten identity past the call.
    if let Some(identity) = identity {
        if let Some(mut map) = state.write_lock::<Map>() {
            map.insert(OBJECT_ID_KEY.into(), identity);
        }
    }
    result.map_err(|err| ScriptError::ManagedException {
        class: class.qualified_name().to_string(),
        method: method.to_string(),
        message: render_exception(&err),
    })
}

/// Runs a function of `ast` without a bound object.
pub(crate) fn call_static(
    engine: &Engine,
    ast: &AST,
    class: &str,
    method: &str,
    args: Vec<Dynamic>,
) -> Result<Dynamic, ScriptError> {
    let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
    engine.call_fn_with_options::<Dynamic>(options, &mut Scope::new(), ast, method, args).map_err(|err| {
        ScriptError::ManagedException { class: class.to_string(), method: method.to_string(), message: render_exception(&err) }
    })
}
