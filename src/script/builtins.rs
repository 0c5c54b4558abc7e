//! Primitive operations reachable by bare name.
//!
//! The table is fixed; the capability policy decides which entries a given
//! script may resolve.

use std::cell::RefCell;
use std::cmp::Ordering;

use indexmap::IndexMap;

use super::ast::BinOp;
use super::error::Fault;
use super::interp::{Interpreter, Stream};
use super::value::{Builtin, CallArgs, Key, Range, Value};

static BUILTINS: &[Builtin] = &[
    Builtin { name: "abs", func: builtin_abs },
    Builtin { name: "all", func: builtin_all },
    Builtin { name: "any", func: builtin_any },
    Builtin { name: "bool", func: builtin_bool },
    Builtin { name: "dict", func: builtin_dict },
    Builtin { name: "enumerate", func: builtin_enumerate },
    Builtin { name: "float", func: builtin_float },
    Builtin { name: "int", func: builtin_int },
    Builtin { name: "len", func: builtin_len },
    Builtin { name: "list", func: builtin_list },
    Builtin { name: "max", func: builtin_max },
    Builtin { name: "min", func: builtin_min },
    Builtin { name: "print", func: builtin_print },
    Builtin { name: "range", func: builtin_range },
    Builtin { name: "round", func: builtin_round },
    Builtin { name: "sorted", func: builtin_sorted },
    Builtin { name: "str", func: builtin_str },
    Builtin { name: "sum", func: builtin_sum },
    Builtin { name: "zip", func: builtin_zip },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Names of every primitive operation the interpreter implements.
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|b| b.name)
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Stable sort with an optional key function; unordered pairs compare equal.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> Result<Vec<Value>, Fault> {
    let keys = match key {
        Some(func) if !matches!(func, Value::None) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in &items {
                keys.push(interp.call(func, CallArgs::new(vec![item.clone()]))?);
            }
            keys
        }
        _ => items.clone(),
    };
    interp.tick()?;

    let failure: RefCell<Option<Fault>> = RefCell::new(None);
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        let ordering = match keys[a].compare(&keys[b]) {
            Ok(ordering) => ordering.unwrap_or(Ordering::Equal),
            Err(fault) => {
                failure.borrow_mut().get_or_insert(fault);
                Ordering::Equal
            }
        };
        if reverse {
            ordering.reverse()
        } else {
            ordering
        }
    });
    if let Some(fault) = failure.into_inner() {
        return Err(fault);
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

/// Round half to even at `digits` decimal places.
pub fn round_half_even(x: f64, digits: i32) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let (scaled, factor) = if digits >= 0 {
        (x * 10f64.powi(digits), 10f64.powi(digits))
    } else {
        (x / 10f64.powi(-digits), 10f64.powi(-digits))
    };
    if !scaled.is_finite() {
        return x;
    }
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if floor % 2.0 == 0.0 {
        floor
    } else {
        floor + 1.0
    };
    if digits >= 0 {
        rounded / factor
    } else {
        rounded * factor
    }
}

fn int_arg(value: &Value) -> Result<i64, Fault> {
    value.as_int().ok_or_else(|| {
        Fault::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn float_to_int(f: f64) -> Result<i64, Fault> {
    if f.is_nan() {
        return Err(Fault::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() || f.abs() >= 9.223_372_036_854_776e18 {
        return Err(Fault::overflow("cannot convert float infinity to integer"));
    }
    Ok(f.trunc() as i64)
}

pub fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" | "+nan" | "-nan" => return Some(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => return Some(f64::INFINITY),
        "-inf" | "-infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    if trimmed.is_empty() || trimmed.contains("__") || trimmed.starts_with('_') {
        return None;
    }
    trimmed.replace('_', "").parse::<f64>().ok()
}

// =============================================================================
// Builtins
// =============================================================================

fn builtin_abs(_: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("abs", 1, 1, &[])?;
    match &args.positional[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v => match v.as_int() {
            Some(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| Fault::overflow("integer overflow")),
            None => Err(Fault::type_error(format!(
                "bad operand type for abs(): '{}'",
                v.type_name()
            ))),
        },
    }
}

fn builtin_all(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("all", 1, 1, &[])?;
    let items = interp.iterate(&args.positional[0])?;
    Ok(Value::Bool(items.iter().all(Value::truthy)))
}

fn builtin_any(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("any", 1, 1, &[])?;
    let items = interp.iterate(&args.positional[0])?;
    Ok(Value::Bool(items.iter().any(Value::truthy)))
}

fn builtin_bool(_: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("bool", 0, 1, &[])?;
    Ok(Value::Bool(args.arg(0).map_or(false, Value::truthy)))
}

fn builtin_dict(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("dict", 0, 1, &[])?;
    let mut map = IndexMap::new();
    match args.arg(0) {
        None => {}
        Some(Value::Dict(source)) => {
            map = source.borrow().clone();
        }
        Some(iterable) => {
            for pair in interp.iterate(iterable)? {
                let items = interp.iterate(&pair)?;
                if items.len() != 2 {
                    return Err(Fault::value_error(format!(
                        "dictionary update sequence element has length {}; 2 is required",
                        items.len()
                    )));
                }
                map.insert(Key::from_value(&items[0])?, items[1].clone());
            }
        }
    }
    for (name, value) in args.keywords {
        map.insert(Key::Str(name.as_str().into()), value);
    }
    interp.new_dict(map)
}

fn builtin_enumerate(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("enumerate", 1, 2, &["start"])?;
    let start = match args.get(1, "start") {
        Some(v) => int_arg(v)?,
        None => 0,
    };
    let items = interp.iterate(&args.positional[0])?;
    let mut out = Vec::with_capacity(items.len());
    for (offset, item) in items.into_iter().enumerate() {
        let index = start
            .checked_add(offset as i64)
            .ok_or_else(|| Fault::overflow("integer overflow"))?;
        out.push(interp.new_list(vec![Value::Int(index), item])?);
    }
    interp.new_list(out)
}

fn builtin_float(_: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("float", 0, 1, &[])?;
    match args.arg(0) {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => parse_float(s).map(Value::Float).ok_or_else(|| {
            Fault::value_error(format!("could not convert string to float: {}", Value::Str(s.clone()).repr()))
        }),
        Some(v) => v.as_f64().map(Value::Float).ok_or_else(|| {
            Fault::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn builtin_int(_: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("int", 0, 1, &[])?;
    match args.arg(0) {
        None => Ok(Value::Int(0)),
        Some(Value::Float(f)) => float_to_int(*f).map(Value::Int),
        Some(Value::Str(s)) => {
            let trimmed = s.trim();
            let valid = !trimmed.is_empty() && !trimmed.contains("__") && !trimmed.ends_with('_');
            let parsed = if valid {
                trimmed.replace('_', "").parse::<i64>().ok()
            } else {
                None
            };
            parsed.map(Value::Int).ok_or_else(|| {
                Fault::value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    Value::Str(s.clone()).repr()
                ))
            })
        }
        Some(v) => v.as_int().map(Value::Int).ok_or_else(|| {
            Fault::type_error(format!(
                "int() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn builtin_len(_: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("len", 1, 1, &[])?;
    let len = match &args.positional[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(list) => list.borrow().len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::Range(range) => range.len(),
        other => {
            return Err(Fault::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len as i64))
}

fn builtin_list(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("list", 0, 1, &[])?;
    let items = match args.arg(0) {
        Some(iterable) => interp.iterate(iterable)?,
        None => Vec::new(),
    };
    interp.new_list(items)
}

fn extremum(
    interp: &mut Interpreter,
    args: CallArgs,
    name: &str,
    wanted: Ordering,
) -> Result<Value, Fault> {
    args.check(name, 1, usize::MAX, &["key", "default"])?;
    let items = if args.len() == 1 {
        interp.iterate(&args.positional[0])?
    } else {
        args.positional.clone()
    };
    let key = args.keyword("key").filter(|k| !matches!(k, Value::None)).cloned();

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        interp.tick()?;
        let score = match &key {
            Some(func) => interp.call(func, CallArgs::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        best = match best {
            None => Some((item, score)),
            Some((current, current_score)) => {
                if score.compare(&current_score)? == Some(wanted) {
                    Some((item, score))
                } else {
                    Some((current, current_score))
                }
            }
        };
    }
    match best {
        Some((item, _)) => Ok(item),
        None => args.keyword("default").cloned().ok_or_else(|| {
            Fault::value_error(format!("{}() arg is an empty sequence", name))
        }),
    }
}

fn builtin_max(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    extremum(interp, args, "max", Ordering::Greater)
}

fn builtin_min(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    extremum(interp, args, "min", Ordering::Less)
}

fn builtin_print(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("print", 0, usize::MAX, &["sep", "end"])?;
    let text_arg = |name: &str, default: &str| -> Result<String, Fault> {
        match args.keyword(name) {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => Err(Fault::type_error(format!(
                "{} must be None or a string, not {}",
                name,
                other.type_name()
            ))),
        }
    };
    let sep = text_arg("sep", " ")?;
    let end = text_arg("end", "\n")?;

    let mut line = args
        .positional
        .iter()
        .map(Value::to_str)
        .collect::<Vec<_>>()
        .join(&sep);
    line.push_str(&end);
    interp.write(Stream::Stdout, &line)?;
    Ok(Value::None)
}

fn builtin_range(_: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("range", 1, 3, &[])?;
    let ints = args
        .positional
        .iter()
        .map(int_arg)
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(Fault::internal("range arity")),
    };
    if step == 0 {
        return Err(Fault::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(Range { start, stop, step }))
}

fn builtin_round(_: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("round", 1, 2, &["ndigits"])?;
    let digits = match args.get(1, "ndigits") {
        None | Some(Value::None) => None,
        Some(v) => Some(int_arg(v)?),
    };
    let value = &args.positional[0];
    match (value, digits) {
        (Value::Float(f), None) => float_to_int(round_half_even(*f, 0)).map(Value::Int),
        (Value::Float(f), Some(d)) => {
            let d = d.clamp(-308, 308) as i32;
            Ok(Value::Float(round_half_even(*f, d)))
        }
        (v, digits) => match v.as_int() {
            Some(i) => match digits {
                Some(d) if d < 0 => {
                    let rounded = round_half_even(i as f64, d.max(-18) as i32);
                    Ok(Value::Int(rounded as i64))
                }
                _ => Ok(Value::Int(i)),
            },
            None => Err(Fault::type_error(format!(
                "type {} doesn't define __round__ method",
                v.type_name()
            ))),
        },
    }
}

fn builtin_sorted(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("sorted", 1, 1, &["key", "reverse"])?;
    let items = interp.iterate(&args.positional[0])?;
    let reverse = args.keyword("reverse").map_or(false, Value::truthy);
    let sorted = sort_values(interp, items, args.keyword("key"), reverse)?;
    interp.new_list(sorted)
}

fn builtin_str(_: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("str", 0, 1, &[])?;
    Ok(match args.arg(0) {
        Some(value) => Value::str(&value.to_str()),
        None => Value::str(""),
    })
}

fn builtin_sum(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("sum", 1, 2, &["start"])?;
    let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(Fault::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in interp.iterate(&args.positional[0])? {
        interp.tick()?;
        total = interp.binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn builtin_zip(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("zip", 0, usize::MAX, &[])?;
    let columns = args
        .positional
        .iter()
        .map(|v| interp.iterate(v))
        .collect::<Result<Vec<_>, _>>()?;
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut rows = Vec::with_capacity(len);
    for i in 0..len {
        let row = columns.iter().map(|c| c[i].clone()).collect();
        rows.push(interp.new_list(row)?);
    }
    interp.new_list(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5, 0), 2.0);
        assert_eq!(round_half_even(3.5, 0), 4.0);
        assert_eq!(round_half_even(-2.5, 0), -2.0);
        assert_eq!(round_half_even(1.26, 1), 1.3);
        assert_eq!(round_half_even(1250.0, -2), 1200.0);
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float(" 1.5 "), Some(1.5));
        assert_eq!(parse_float("1_000.5"), Some(1000.5));
        assert!(parse_float("nan").unwrap().is_nan());
        assert_eq!(parse_float("-Infinity"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float(""), None);
    }

    #[test]
    fn test_table_has_unique_names() {
        let mut names: Vec<_> = names().collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
        assert!(lookup("open").is_none());
        assert!(lookup("print").is_some());
    }
}
