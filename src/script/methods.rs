//! Methods on lists, dicts and strings.

use super::builtins::sort_values;
use super::error::Fault;
use super::format::format_value;
use super::interp::{list_index, Interpreter};
use super::value::{CallArgs, Key, Value};

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "setdefault", "update", "values",
];

const STR_METHODS: &[&str] = &[
    "endswith", "format", "isdigit", "join", "lower", "lstrip", "replace", "rstrip", "split",
    "startswith", "strip", "upper",
];

/// Static name of `receiver.name` if it is a known method.
pub fn resolve(receiver: &Value, name: &str) -> Option<&'static str> {
    let table = match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Str(_) => STR_METHODS,
        _ => return None,
    };
    table.iter().copied().find(|m| *m == name)
}

pub fn call(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &'static str,
    args: CallArgs,
) -> Result<Value, Fault> {
    match receiver {
        Value::List(_) => list_method(interp, receiver, name, args),
        Value::Dict(_) => dict_method(interp, receiver, name, args),
        Value::Str(s) => str_method(interp, s, name, args),
        other => Err(Fault::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        ))),
    }
}

// =============================================================================
// list
// =============================================================================

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &'static str,
    args: CallArgs,
) -> Result<Value, Fault> {
    let Value::List(list) = receiver else {
        return Err(Fault::internal("list method on non-list"));
    };
    match name {
        "append" => {
            args.check("append", 1, 1, &[])?;
            let len = list.borrow().len();
            interp.grow(receiver, len + 1)?;
            list.borrow_mut().push(args.positional[0].clone());
            Ok(Value::None)
        }
        "extend" => {
            args.check("extend", 1, 1, &[])?;
            let extra = interp.iterate(&args.positional[0])?;
            let len = list.borrow().len();
            interp.grow(receiver, len + extra.len())?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            args.check("insert", 2, 2, &[])?;
            let len = list.borrow().len();
            interp.grow(receiver, len + 1)?;
            let raw = args.positional[0].as_int().ok_or_else(|| {
                Fault::type_error("list indices must be integers")
            })?;
            let at = if raw < 0 {
                (raw + len as i64).max(0) as usize
            } else {
                (raw as usize).min(len)
            };
            list.borrow_mut().insert(at, args.positional[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            args.check("pop", 0, 1, &[])?;
            let len = list.borrow().len();
            if len == 0 {
                return Err(Fault::index_error("pop from empty list"));
            }
            let at = match args.arg(0) {
                Some(index) => list_index(index, len, "pop index out of range")?,
                None => len - 1,
            };
            Ok(list.borrow_mut().remove(at))
        }
        "remove" => {
            args.check("remove", 1, 1, &[])?;
            let position = list
                .borrow()
                .iter()
                .position(|v| v.py_eq(&args.positional[0]));
            match position {
                Some(at) => {
                    list.borrow_mut().remove(at);
                    Ok(Value::None)
                }
                None => Err(Fault::value_error("list.remove(x): x not in list")),
            }
        }
        "index" => {
            args.check("index", 1, 1, &[])?;
            let position = list
                .borrow()
                .iter()
                .position(|v| v.py_eq(&args.positional[0]));
            position.map(|at| Value::Int(at as i64)).ok_or_else(|| {
                Fault::value_error(format!("{} is not in list", args.positional[0].repr()))
            })
        }
        "count" => {
            args.check("count", 1, 1, &[])?;
            let count = list
                .borrow()
                .iter()
                .filter(|v| v.py_eq(&args.positional[0]))
                .count();
            Ok(Value::Int(count as i64))
        }
        "reverse" => {
            args.check("reverse", 0, 0, &[])?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "sort" => {
            args.check("sort", 0, 0, &["key", "reverse"])?;
            let items = list.borrow().clone();
            let reverse = args.keyword("reverse").map_or(false, Value::truthy);
            let sorted = sort_values(interp, items, args.keyword("key"), reverse)?;
            **list.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "copy" => {
            args.check("copy", 0, 0, &[])?;
            let items = list.borrow().clone();
            interp.new_list(items)
        }
        "clear" => {
            args.check("clear", 0, 0, &[])?;
            let items = std::mem::take(&mut **list.borrow_mut());
            drop(items);
            Ok(Value::None)
        }
        _ => Err(Fault::attribute_error(format!(
            "'list' object has no attribute '{}'",
            name
        ))),
    }
}

// =============================================================================
// dict
// =============================================================================

fn dict_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &'static str,
    args: CallArgs,
) -> Result<Value, Fault> {
    let Value::Dict(dict) = receiver else {
        return Err(Fault::internal("dict method on non-dict"));
    };
    match name {
        "get" => {
            args.check("get", 1, 2, &[])?;
            let key = Key::from_value(&args.positional[0])?;
            let found = dict.borrow().get(&key).cloned();
            Ok(found.unwrap_or_else(|| args.arg(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => {
            args.check("keys", 0, 0, &[])?;
            let keys = dict.borrow().keys().map(Key::to_value).collect();
            interp.new_list(keys)
        }
        "values" => {
            args.check("values", 0, 0, &[])?;
            let values = dict.borrow().values().cloned().collect();
            interp.new_list(values)
        }
        "items" => {
            args.check("items", 0, 0, &[])?;
            let entries: Vec<(Key, Value)> = dict
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut pairs = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                pairs.push(interp.new_list(vec![k.to_value(), v])?);
            }
            interp.new_list(pairs)
        }
        "update" => {
            args.check("update", 0, 1, &[])?;
            let mut incoming = Vec::new();
            match args.arg(0) {
                None => {}
                Some(Value::Dict(other)) => {
                    incoming.extend(other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Some(iterable) => {
                    for pair in interp.iterate(iterable)? {
                        let items = interp.iterate(&pair)?;
                        if items.len() != 2 {
                            return Err(Fault::value_error(
                                "dictionary update sequence element must have length 2",
                            ));
                        }
                        incoming.push((Key::from_value(&items[0])?, items[1].clone()));
                    }
                }
            }
            for (k, v) in &args.keywords {
                incoming.push((Key::Str(k.as_str().into()), v.clone()));
            }
            let len = dict.borrow().len();
            interp.grow(receiver, len + incoming.len())?;
            dict.borrow_mut().extend(incoming);
            Ok(Value::None)
        }
        "pop" => {
            args.check("pop", 1, 2, &[])?;
            let key = Key::from_value(&args.positional[0])?;
            let removed = dict.borrow_mut().shift_remove(&key);
            match (removed, args.arg(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(Fault::key_error(args.positional[0].repr())),
            }
        }
        "setdefault" => {
            args.check("setdefault", 1, 2, &[])?;
            let key = Key::from_value(&args.positional[0])?;
            if let Some(existing) = dict.borrow().get(&key) {
                return Ok(existing.clone());
            }
            let len = dict.borrow().len();
            interp.grow(receiver, len + 1)?;
            let value = args.arg(1).cloned().unwrap_or(Value::None);
            dict.borrow_mut().insert(key, value.clone());
            Ok(value)
        }
        "copy" => {
            args.check("copy", 0, 0, &[])?;
            let entries = dict.borrow().clone();
            interp.new_dict(entries)
        }
        "clear" => {
            args.check("clear", 0, 0, &[])?;
            let entries = std::mem::take(&mut **dict.borrow_mut());
            drop(entries);
            Ok(Value::None)
        }
        _ => Err(Fault::attribute_error(format!(
            "'dict' object has no attribute '{}'",
            name
        ))),
    }
}

// =============================================================================
// str
// =============================================================================

fn str_arg<'a>(args: &'a CallArgs, index: usize, method: &str) -> Result<&'a str, Fault> {
    match args.arg(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(Fault::type_error(format!(
            "{}() argument must be str, not {}",
            method,
            other.type_name()
        ))),
        None => Err(Fault::type_error(format!("{}() missing argument", method))),
    }
}

fn optional_chars<'a>(args: &'a CallArgs, method: &str) -> Result<Option<&'a str>, Fault> {
    match args.arg(0) {
        None | Some(Value::None) => Ok(None),
        Some(_) => str_arg(args, 0, method).map(Some),
    }
}

fn str_method(
    interp: &mut Interpreter,
    s: &str,
    name: &'static str,
    args: CallArgs,
) -> Result<Value, Fault> {
    match name {
        "upper" => {
            args.check("upper", 0, 0, &[])?;
            Ok(Value::str(&s.to_uppercase()))
        }
        "lower" => {
            args.check("lower", 0, 0, &[])?;
            Ok(Value::str(&s.to_lowercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            args.check(name, 0, 1, &[])?;
            let chars = optional_chars(&args, name)?;
            let matcher = |c: char| match chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            };
            Ok(Value::str(out))
        }
        "split" => {
            args.check("split", 0, 2, &["sep", "maxsplit"])?;
            let sep = match args.get(0, "sep") {
                None | Some(Value::None) => None,
                Some(Value::Str(sep)) if sep.is_empty() => {
                    return Err(Fault::value_error("empty separator"))
                }
                Some(Value::Str(sep)) => Some(sep.to_string()),
                Some(other) => {
                    return Err(Fault::type_error(format!(
                        "must be str or None, not {}",
                        other.type_name()
                    )))
                }
            };
            let maxsplit = match args.get(1, "maxsplit") {
                None => -1,
                Some(v) => v
                    .as_int()
                    .ok_or_else(|| Fault::type_error("maxsplit must be an integer"))?,
            };
            let parts: Vec<Value> = match (&sep, maxsplit) {
                (Some(sep), n) if n >= 0 => s.splitn(n as usize + 1, sep.as_str()).map(Value::str).collect(),
                (Some(sep), _) => s.split(sep.as_str()).map(Value::str).collect(),
                (None, n) if n >= 0 => {
                    let mut parts = Vec::new();
                    let mut rest = s.trim_start();
                    while !rest.is_empty() {
                        if parts.len() as i64 == n {
                            parts.push(Value::str(rest));
                            break;
                        }
                        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                        parts.push(Value::str(&rest[..end]));
                        rest = rest[end..].trim_start();
                    }
                    parts
                }
                (None, _) => s.split_whitespace().map(Value::str).collect(),
            };
            interp.new_list(parts)
        }
        "join" => {
            args.check("join", 1, 1, &[])?;
            let items = interp.iterate(&args.positional[0])?;
            let mut pieces = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece.to_string()),
                    other => {
                        return Err(Fault::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            let joined = pieces.join(s);
            interp.check_len(joined.len())?;
            Ok(Value::str(&joined))
        }
        "replace" => {
            args.check("replace", 2, 2, &[])?;
            let from = str_arg(&args, 0, "replace")?;
            let to = str_arg(&args, 1, "replace")?;
            let count = if from.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(from).count()
            };
            interp.check_len(s.len() + count.saturating_mul(to.len()))?;
            Ok(Value::str(&s.replace(from, to)))
        }
        "startswith" => {
            args.check("startswith", 1, 1, &[])?;
            Ok(Value::Bool(s.starts_with(str_arg(&args, 0, "startswith")?)))
        }
        "endswith" => {
            args.check("endswith", 1, 1, &[])?;
            Ok(Value::Bool(s.ends_with(str_arg(&args, 0, "endswith")?)))
        }
        "isdigit" => {
            args.check("isdigit", 0, 0, &[])?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }
        "format" => {
            let text = format_template(s, &args)?;
            interp.check_len(text.len())?;
            Ok(Value::str(&text))
        }
        _ => Err(Fault::attribute_error(format!(
            "'str' object has no attribute '{}'",
            name
        ))),
    }
}

/// `"{} {name:.2f}".format(...)`.
fn format_template(template: &str, args: &CallArgs) -> Result<String, Fault> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(Fault::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(Fault::value_error(
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }
                let (name, spec) = match field.split_once(':') {
                    Some((name, spec)) => (name, Some(spec)),
                    None => (field.as_str(), None),
                };
                let value = if name.is_empty() {
                    let value = args.arg(auto_index);
                    auto_index += 1;
                    value
                } else if let Ok(index) = name.parse::<usize>() {
                    args.arg(index)
                } else {
                    args.keyword(name)
                };
                let value = value.ok_or_else(|| {
                    if name.is_empty() || name.parse::<usize>().is_ok() {
                        Fault::index_error("Replacement index out of range for positional args tuple")
                    } else {
                        Fault::key_error(format!("'{}'", name))
                    }
                })?;
                match spec {
                    Some(spec) => out.push_str(&format_value(value, spec)?),
                    None => out.push_str(&value.to_str()),
                }
            }
            c => out.push(c),
        }
    }
    Ok(out)
}
