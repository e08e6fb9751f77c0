use std::collections::BTreeMap;

use super::value::{self, Value, format_number};
use super::VmError;

/// Host-independent functions every program can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    MathTrunc,
    MathSqrt,
    MathPow,
    MathMin,
    MathMax,
    MathRandom,
    String,
    Number,
    ParseInt,
    ParseFloat,
    IsNaN,
    Error,
}

/// Populate a fresh global scope with the builtin bindings.
pub fn install(globals: &mut BTreeMap<String, Value>) {
    let math: BTreeMap<String, Value> = [
        ("abs", Builtin::MathAbs),
        ("floor", Builtin::MathFloor),
        ("ceil", Builtin::MathCeil),
        ("round", Builtin::MathRound),
        ("trunc", Builtin::MathTrunc),
        ("sqrt", Builtin::MathSqrt),
        ("pow", Builtin::MathPow),
        ("min", Builtin::MathMin),
        ("max", Builtin::MathMax),
        ("random", Builtin::MathRandom),
    ]
    .into_iter()
    .map(|(name, b)| (name.to_string(), Value::Builtin(b)))
    .chain([
        ("PI".to_string(), Value::Number(std::f64::consts::PI)),
        ("E".to_string(), Value::Number(std::f64::consts::E)),
    ])
    .collect();

    globals.insert("Math".into(), Value::from(math));
    globals.insert("undefined".into(), Value::Undefined);
    globals.insert("NaN".into(), Value::Number(f64::NAN));
    globals.insert("Infinity".into(), Value::Number(f64::INFINITY));
    globals.insert("String".into(), Value::Builtin(Builtin::String));
    globals.insert("Number".into(), Value::Builtin(Builtin::Number));
    globals.insert("parseInt".into(), Value::Builtin(Builtin::ParseInt));
    globals.insert("parseFloat".into(), Value::Builtin(Builtin::ParseFloat));
    globals.insert("isNaN".into(), Value::Builtin(Builtin::IsNaN));
    globals.insert("Error".into(), Value::Builtin(Builtin::Error));
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn num(args: &[Value], i: usize) -> f64 {
    args.get(i).map(Value::to_number).unwrap_or(f64::NAN)
}

pub fn call(builtin: Builtin, args: &[Value], rng: &mut fastrand::Rng) -> Result<Value, VmError> {
    let n = match builtin {
        Builtin::MathAbs => num(args, 0).abs(),
        Builtin::MathFloor => num(args, 0).floor(),
        Builtin::MathCeil => num(args, 0).ceil(),
        Builtin::MathRound => round_half_up(num(args, 0)),
        Builtin::MathTrunc => num(args, 0).trunc(),
        Builtin::MathSqrt => num(args, 0).sqrt(),
        Builtin::MathPow => num(args, 0).powf(num(args, 1)),
        Builtin::MathMin => args.iter().map(Value::to_number).fold(f64::INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
        }),
        Builtin::MathMax => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
        }),
        Builtin::MathRandom => rng.f64(),
        Builtin::Number => args.first().map(Value::to_number).unwrap_or(0.0),
        Builtin::ParseInt => parse_int(&arg(args, 0).to_string(), args.get(1).map(Value::to_number)),
        Builtin::ParseFloat => parse_float(&arg(args, 0).to_string()),
        Builtin::IsNaN => return Ok(Value::Bool(num(args, 0).is_nan())),
        Builtin::String => {
            return Ok(Value::from(args.first().map(Value::to_string).unwrap_or_default()));
        }
        Builtin::Error => {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), Value::from("Error"));
            let message = args.first().filter(|v| !matches!(v, Value::Undefined));
            fields.insert("message".to_string(), Value::from(message.map(Value::to_string).unwrap_or_default()));
            return Ok(Value::from(fields));
        }
    };
    Ok(Value::Number(n))
}

/// JavaScript rounds halves towards +Infinity; `f64::round` rounds them away
/// from zero. Adding 0.5 first would be off for 0.49999999999999994.
fn round_half_up(x: f64) -> f64 {
    let r = x.round();
    if x - r == 0.5 { r + 1.0 } else { r }
}

fn parse_int(text: &str, radix: Option<f64>) -> f64 {
    let trimmed = text.trim_start();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let mut radix = radix.filter(|r| *r != 0.0 && !r.is_nan()).map(|r| r as u32).unwrap_or(10);
    let mut digits = rest;
    if radix == 16 || (radix == 10 && (rest.starts_with("0x") || rest.starts_with("0X"))) {
        if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
            digits = hex;
            radix = 16;
        }
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let end = digits.find(|c: char| !c.is_digit(radix)).unwrap_or(digits.len());
    if end == 0 {
        return f64::NAN;
    }
    let magnitude = digits[..end]
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    sign * magnitude
}

fn parse_float(text: &str) -> f64 {
    let trimmed = text.trim_start();
    if trimmed.starts_with("Infinity") || trimmed.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if trimmed.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    // Longest prefix that still parses as a float.
    (1..=trimmed.len())
        .rev()
        .filter(|&end| trimmed.is_char_boundary(end))
        .find_map(|end| trimmed[..end].parse::<f64>().ok().filter(|_| !trimmed[..end].ends_with(['e', 'E'])))
        .unwrap_or(f64::NAN)
}

/// Clamp a relative index (negative counts from the end) into `0..=len`.
fn relative_index(value: Option<&Value>, len: usize, default: usize) -> usize {
    match value {
        None | Some(Value::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            if n < 0.0 {
                (len as f64 + n).max(0.0) as usize
            } else {
                (n as usize).min(len)
            }
        }
    }
}

/// Methods on arrays and strings. `None` when the receiver has no such method.
pub fn call_method(receiver: &Value, name: &str, args: &[Value]) -> Option<Value> {
    match receiver {
        Value::Array(items) => {
            let result = match name {
                "push" => {
                    let mut items = items.borrow_mut();
                    items.extend(args.iter().cloned());
                    Value::Number(items.len() as f64)
                }
                "pop" => items.borrow_mut().pop().unwrap_or_default(),
                "shift" => {
                    let mut items = items.borrow_mut();
                    if items.is_empty() { Value::Undefined } else { items.remove(0) }
                }
                "unshift" => {
                    let mut items = items.borrow_mut();
                    for (i, v) in args.iter().enumerate() {
                        items.insert(i, v.clone());
                    }
                    Value::Number(items.len() as f64)
                }
                "indexOf" => {
                    let needle = arg(args, 0);
                    let pos = items.borrow().iter().position(|v| *v == needle);
                    Value::Number(pos.map(|p| p as f64).unwrap_or(-1.0))
                }
                "includes" => {
                    let needle = arg(args, 0);
                    Value::Bool(items.borrow().iter().any(|v| *v == needle))
                }
                "join" => {
                    let sep = match args.first() {
                        None | Some(Value::Undefined) => ",".to_string(),
                        Some(v) => v.to_string(),
                    };
                    Value::from(value::join_array(items, &sep))
                }
                "slice" => {
                    let items = items.borrow();
                    let start = relative_index(args.first(), items.len(), 0);
                    let end = relative_index(args.get(1), items.len(), items.len());
                    Value::from(items.get(start..end.max(start)).unwrap_or_default().to_vec())
                }
                _ => return None,
            };
            Some(result)
        }
        Value::Text(text) => {
            let chars: Vec<char> = text.chars().collect();
            let result = match name {
                "charAt" => {
                    let i = num(args, 0);
                    let i = if i.is_nan() { 0.0 } else { i.trunc() };
                    let c = if i >= 0.0 { chars.get(i as usize) } else { None };
                    Value::from(c.map(char::to_string).unwrap_or_default())
                }
                "indexOf" => {
                    let needle = arg(args, 0).to_string();
                    let pos = text.find(&needle).map(|byte| text[..byte].chars().count() as f64);
                    Value::Number(pos.unwrap_or(-1.0))
                }
                "includes" => Value::Bool(text.contains(&arg(args, 0).to_string())),
                "slice" => {
                    let start = relative_index(args.first(), chars.len(), 0);
                    let end = relative_index(args.get(1), chars.len(), chars.len());
                    Value::from(chars.get(start..end.max(start)).unwrap_or_default().iter().collect::<String>())
                }
                "substring" => {
                    let clamp = |v: Option<&Value>, default: usize| match v {
                        None | Some(Value::Undefined) => default,
                        Some(v) => {
                            let n = v.to_number();
                            if n.is_nan() || n < 0.0 { 0 } else { (n as usize).min(chars.len()) }
                        }
                    };
                    let a = clamp(args.first(), 0);
                    let b = clamp(args.get(1), chars.len());
                    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                    Value::from(chars[lo..hi].iter().collect::<String>())
                }
                "toUpperCase" => Value::from(text.to_uppercase()),
                "toLowerCase" => Value::from(text.to_lowercase()),
                "trim" => Value::from(text.trim()),
                "split" => {
                    let parts: Vec<Value> = match args.first() {
                        None | Some(Value::Undefined) => vec![Value::Text(text.clone())],
                        Some(sep) => {
                            let sep = sep.to_string();
                            if sep.is_empty() {
                                chars.iter().map(|c| Value::from(c.to_string())).collect()
                            } else {
                                text.split(sep.as_str()).map(Value::from).collect()
                            }
                        }
                    };
                    Value::from(parts)
                }
                _ => return None,
            };
            Some(result)
        }
        _ => None,
    }
}

/// `length` and numeric indexing on arrays and strings.
pub fn intrinsic_property(receiver: &Value, key: &str) -> Option<Value> {
    match receiver {
        Value::Array(items) => {
            let items = items.borrow();
            if key == "length" {
                return Some(Value::Number(items.len() as f64));
            }
            let index: usize = key.parse().ok()?;
            Some(items.get(index).cloned().unwrap_or_default())
        }
        Value::Text(text) => {
            if key == "length" {
                return Some(Value::Number(text.chars().count() as f64));
            }
            let index: usize = key.parse().ok()?;
            Some(text.chars().nth(index).map(|c| Value::from(c.to_string())).unwrap_or_default())
        }
        _ => None,
    }
}

/// Canonical property key for a computed member access.
pub fn property_key(key: &Value) -> String {
    match key {
        Value::Number(n) => format_number(*n),
        other => other.to_string(),
    }
}
