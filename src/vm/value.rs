use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::builtins::Builtin;

/// Index of a user function in the compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u16);

/// Handle of a host function injected into the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

impl NativeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub type Array = Rc<RefCell<Vec<Value>>>;
pub type Object = Rc<RefCell<BTreeMap<String, Value>>>;

/// A value inside the sandbox. Arrays and objects are shared and mutable,
/// as in JavaScript; everything else is copied.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(Rc<str>),
    Array(Array),
    Object(Object),
    Function(FunctionId),
    Native(NativeId),
    Builtin(Builtin),
}

/// Strict equality, with reference identity for arrays and objects.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(Rc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(fields)))
    }
}

const JSON_DEPTH_LIMIT: usize = 64;
/// Values emitted by one `to_json` call before everything else becomes `null`.
const JSON_NODE_LIMIT: usize = 1 << 20;

thread_local! {
    /// Arrays currently being stringified on this thread.
    static OPEN_ARRAYS: RefCell<Vec<*const RefCell<Vec<Value>>>> = const { RefCell::new(Vec::new()) };
}

/// `Array.prototype.join`: nullish items print as empty, and an array that
/// is already being joined further up prints as empty instead of recursing.
pub fn join_array(items: &Array, sep: &str) -> String {
    let ptr = Rc::as_ptr(items);
    let entered = OPEN_ARRAYS.with(|open| {
        let mut open = open.borrow_mut();
        if open.contains(&ptr) {
            false
        } else {
            open.push(ptr);
            true
        }
    });
    if !entered {
        return String::new();
    }
    let mut out = String::new();
    for (i, item) in items.borrow().iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        if !item.is_nullish() {
            out.push_str(&item.to_string());
        }
    }
    OPEN_ARRAYS.with(|open| {
        open.borrow_mut().retain(|p| *p != ptr);
    });
    out
}

/// Bookkeeping for one `to_json` walk.
struct JsonWalk {
    /// Containers on the path from the root to the current value.
    path: Vec<*const ()>,
    emitted: usize,
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_) | Value::Builtin(_))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Text(s) => string_to_number(s),
            // Goes through the string form, so `[[]]` is 0 and `[a, b]` is NaN.
            Value::Array(items) => string_to_number(&join_array(items, ",")),
            _ => f64::NAN,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Function(_) | Value::Native(_) | Value::Builtin(_) => "function",
        }
    }

    /// JavaScript-style loose equality (`==`).
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Text(_))
            | (Value::Text(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if matches!(self, Value::Array(_) | Value::Object(_))
                    || matches!(other, Value::Array(_) | Value::Object(_))
                {
                    self.to_string() == other.to_string()
                } else {
                    self.to_number() == other.to_number()
                }
            }
            (Value::Array(_) | Value::Object(_), Value::Text(_) | Value::Number(_))
            | (Value::Text(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
                self.to_string() == other.to_string()
            }
            _ => self == other,
        }
    }

    /// Convert into plain JSON. Callables become `null`. So does a container
    /// that contains itself, anything nested too deeply, and anything past
    /// the node limit.
    pub fn to_json(&self) -> serde_json::Value {
        let mut walk = JsonWalk { path: Vec::new(), emitted: 0 };
        self.to_json_in(&mut walk)
    }

    fn to_json_in(&self, walk: &mut JsonWalk) -> serde_json::Value {
        if walk.emitted >= JSON_NODE_LIMIT {
            return serde_json::Value::Null;
        }
        walk.emitted += 1;
        let ptr = match self {
            Value::Array(items) => Rc::as_ptr(items) as *const (),
            Value::Object(fields) => Rc::as_ptr(fields) as *const (),
            Value::Undefined | Value::Null | Value::Function(_) | Value::Native(_) | Value::Builtin(_) => {
                return serde_json::Value::Null;
            }
            Value::Bool(b) => return serde_json::Value::Bool(*b),
            Value::Number(n) => return number_to_json(*n),
            Value::Text(s) => return serde_json::Value::String(s.to_string()),
        };
        if walk.path.len() >= JSON_DEPTH_LIMIT || walk.path.contains(&ptr) {
            return serde_json::Value::Null;
        }
        walk.path.push(ptr);
        let json = match self {
            Value::Array(items) => {
                serde_json::Value::Array(items.borrow().iter().map(|v| v.to_json_in(walk)).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields.borrow().iter().map(|(k, v)| (k.clone(), v.to_json_in(walk))).collect(),
            ),
            _ => serde_json::Value::Null,
        };
        walk.path.pop();
        json
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => Value::from(items.iter().map(Value::from_json).collect::<Vec<_>>()),
            serde_json::Value::Object(fields) => Value::from(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
}

/// `ToString` semantics: what `String(value)` or `'' + value` produce.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Text(s) => write!(f, "{}", s),
            Value::Array(items) => f.write_str(&join_array(items, ",")),
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(_) | Value::Native(_) | Value::Builtin(_) => write!(f, "function () {{ [native code] }}"),
        }
    }
}

/// Integral numbers serialize as JSON integers so `1` round-trips as `1`.
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{}", n)
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        if hex.is_empty() {
            return f64::NAN;
        }
        return hex
            .chars()
            .try_fold(0.0, |acc, c| c.to_digit(16).map(|d| acc * 16.0 + f64::from(d)))
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) => {
            trimmed.parse().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn large_integers_format_without_saturating() {
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(-1e20), "-100000000000000000000");
        assert_eq!(format_number(9007199254740993.0), "9007199254740992");
        assert_ne!(format_number(1e19), format_number(2e19));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(!Value::from("").truthy());
        assert!(Value::from("0").truthy());
        assert!(Value::from(Vec::new()).truthy());
    }

    #[test]
    fn string_conversion() {
        assert_eq!(Value::from("  12 ").to_number(), 12.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert!(Value::from("12px").to_number().is_nan());
        assert_eq!(Value::from("0x10").to_number(), 16.0);
    }

    #[test]
    fn long_hex_strings_convert_as_floats() {
        assert_eq!(Value::from("0x10000000000000000").to_number(), 18446744073709551616.0);
        assert_eq!(Value::from("0xffffffffffffffff").to_number(), 18446744073709551615.0);
        assert!(Value::from("0x").to_number().is_nan());
        assert!(Value::from("0x1g").to_number().is_nan());
    }

    #[test]
    fn array_display_joins_with_commas() {
        let arr = Value::from(vec![Value::Number(1.0), Value::Null, Value::from("a")]);
        assert_eq!(arr.to_string(), "1,,a");
    }

    fn self_containing(fan_out: usize) -> Value {
        let arr = Value::from(Vec::new());
        if let Value::Array(items) = &arr {
            for _ in 0..fan_out {
                items.borrow_mut().push(arr.clone());
            }
        }
        arr
    }

    #[test]
    fn cyclic_arrays_stringify_as_empty() {
        assert_eq!(self_containing(1).to_string(), "");
        assert_eq!(self_containing(3).to_string(), ",,");
        assert_eq!(self_containing(1).to_number(), 0.0);

        let outer = Value::from(vec![Value::Number(1.0)]);
        let inner = Value::from(vec![outer.clone(), Value::Number(2.0)]);
        if let Value::Array(items) = &outer {
            items.borrow_mut().push(inner);
        }
        assert_eq!(outer.to_string(), "1,,2");
        // Nothing is left marked once stringifying returns.
        assert_eq!(outer.to_string(), "1,,2");
    }

    #[test]
    fn shared_arrays_are_not_cycles() {
        let shared = Value::from(vec![Value::Number(7.0)]);
        let pair = Value::from(vec![shared.clone(), shared]);
        assert_eq!(pair.to_string(), "7,7");
        assert_eq!(pair.to_json(), serde_json::json!([[7], [7]]));
    }

    #[test]
    fn array_to_number_goes_through_strings() {
        assert_eq!(Value::from(vec![Value::Undefined]).to_number(), 0.0);
        assert_eq!(Value::from(vec![Value::from(" 4 ")]).to_number(), 4.0);
        assert!(Value::from(vec![Value::Number(1.0), Value::Number(2.0)]).to_number().is_nan());
    }

    #[test]
    fn loose_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(Value::Number(1.0).loose_equals(&Value::from("1")));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
        assert!(Value::from(vec![Value::Number(2.0)]).loose_equals(&Value::from("2")));
    }

    #[test]
    fn strict_equality_uses_identity_for_arrays() {
        let a = Value::from(vec![Value::Number(1.0)]);
        let b = Value::from(vec![Value::Number(1.0)]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn json_conversion() {
        let json = serde_json::json!({"pos": [1, 2], "name": "robot", "alive": true, "pet": null});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn cyclic_values_do_not_overflow_json() {
        let arr = Value::from(Vec::new());
        if let Value::Array(items) = &arr {
            items.borrow_mut().push(arr.clone());
        }
        assert_eq!(arr.to_json(), serde_json::json!([null]));
    }

    #[test]
    fn wide_cycles_serialize_quickly() {
        assert_eq!(self_containing(3).to_json(), serde_json::json!([null, null, null]));

        let a = Value::from(vec![Value::Number(1.0)]);
        let b = Value::from(vec![a.clone(), a.clone(), a.clone()]);
        if let Value::Array(items) = &a {
            items.borrow_mut().extend([b.clone(), b.clone(), b]);
        }
        assert_eq!(a.to_json()[1][0], serde_json::Value::Null);
        assert_eq!(a.to_json()[1][1], serde_json::Value::Null);
    }

    #[test]
    fn doubling_dags_are_cut_off() {
        let mut v = Value::from(vec![Value::Number(1.0)]);
        for _ in 0..40 {
            v = Value::from(vec![v.clone(), v]);
        }
        // Would be 2^40 leaves without the node limit.
        assert!(v.to_json().is_array());
    }
}
