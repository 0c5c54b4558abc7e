//! `pandas`: helpers over row tables shaped like `input_data`.
//!
//! A table is a list of row mappings; rows need not share the same keys and a
//! missing cell reads as `None`.

use indexmap::IndexSet;

use super::{elementwise, float_list, floats, int_option, str_option, LibraryModule};
use crate::script::builtins::parse_float;
use crate::script::error::Fault;
use crate::script::interp::Interpreter;
use crate::script::value::{CallArgs, Key, Value};

pub(super) fn module() -> LibraryModule {
    LibraryModule::new("pandas")
        .function("columns", columns)
        .function("column", column)
        .function("to_numeric", to_numeric)
        .function("isna", isna)
        .function("rolling_mean", rolling_mean)
        .function("dropna", dropna)
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::None => true,
        Value::Float(f) => f.is_nan(),
        _ => false,
    }
}

fn rows(interp: &mut Interpreter, value: &Value, func: &str) -> Result<Vec<Value>, Fault> {
    let rows = interp.iterate(value)?;
    if let Some(bad) = rows.iter().find(|row| !matches!(row, Value::Dict(_))) {
        return Err(Fault::type_error(format!(
            "{}() expects a list of row mappings, got a row of type '{}'",
            func,
            bad.type_name()
        )));
    }
    Ok(rows)
}

/// Union of row keys in first-seen order.
fn columns(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("columns", 1, 1, &[])?;
    let mut seen: IndexSet<Key> = IndexSet::new();
    for row in rows(interp, &args.positional[0], "columns")? {
        interp.tick()?;
        if let Value::Dict(dict) = &row {
            seen.extend(dict.borrow().keys().cloned());
        }
    }
    interp.new_list(seen.iter().map(Key::to_value).collect())
}

fn column(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("column", 2, 2, &[])?;
    let key = Key::from_value(&args.positional[1])?;
    let table = rows(interp, &args.positional[0], "column")?;
    let mut cells = Vec::with_capacity(table.len());
    for row in &table {
        interp.tick()?;
        if let Value::Dict(dict) = row {
            cells.push(dict.borrow().get(&key).cloned().unwrap_or(Value::None));
        }
    }
    interp.new_list(cells)
}

fn to_numeric(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("to_numeric", 1, 2, &["errors"])?;
    let coerce = match str_option(&args, 1, "errors", "raise")? {
        "raise" => false,
        "coerce" => true,
        _ => return Err(Fault::value_error("invalid error value specified")),
    };
    elementwise(interp, &args.positional[0], |v| match v {
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(v.clone()),
        Value::None => Ok(Value::Float(f64::NAN)),
        Value::Str(text) => {
            let trimmed = text.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            match parse_float(trimmed) {
                Some(f) => Ok(Value::Float(f)),
                None if coerce => Ok(Value::Float(f64::NAN)),
                None => Err(Fault::value_error(format!(
                    "Unable to parse string \"{}\"",
                    text
                ))),
            }
        }
        _ if coerce => Ok(Value::Float(f64::NAN)),
        other => Err(Fault::type_error(format!(
            "Invalid object type '{}'",
            other.type_name()
        ))),
    })
}

fn isna(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("isna", 1, 1, &[])?;
    elementwise(interp, &args.positional[0], |v| Ok(Value::Bool(is_missing(v))))
}

/// Trailing-window mean; the first `window - 1` positions and any window
/// holding a missing value are NaN.
fn rolling_mean(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("rolling_mean", 1, 2, &["window"])?;
    let window = int_option(&args, 1, "window", 0)?;
    if window < 1 {
        return Err(Fault::value_error("window must be a positive integer"));
    }
    let window = window as usize;
    let values = floats(interp, &args.positional[0], "rolling_mean")?;
    let mut out = Vec::with_capacity(values.len());
    for end in 0..values.len() {
        interp.tick()?;
        if end + 1 < window {
            out.push(f64::NAN);
            continue;
        }
        let slice = &values[end + 1 - window..=end];
        out.push(slice.iter().sum::<f64>() / window as f64);
    }
    float_list(interp, out)
}

/// Drop rows with a missing cell, or missing scalars from a flat list.
///
/// Rows are compared against the union of all columns, so a row lacking a
/// key another row has counts as missing that cell.
fn dropna(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("dropna", 1, 1, &[])?;
    let items = interp.iterate(&args.positional[0])?;
    let mut all_columns: IndexSet<Key> = IndexSet::new();
    for item in &items {
        if let Value::Dict(dict) = item {
            all_columns.extend(dict.borrow().keys().cloned());
        }
    }
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        interp.tick()?;
        let missing = match &item {
            Value::Dict(dict) => {
                let row = dict.borrow();
                all_columns
                    .iter()
                    .any(|key| row.get(key).map_or(true, is_missing))
            }
            other => is_missing(other),
        };
        if !missing {
            kept.push(item);
        }
    }
    interp.new_list(kept)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault_type, out};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const ROWS: &str = "rows = [{'a': 1, 'b': '2.5'}, {'a': None, 'c': 'x'}, {'b': '7'}]\n";

    #[test]
    fn test_columns_and_column() {
        assert_eq!(
            out(&format!("{}import pandas as pd\nout = [pd.columns(rows), pd.column(rows, 'b')]", ROWS)),
            json!([["a", "b", "c"], ["2.5", null, "7"]])
        );
        assert_eq!(fault_type("import pandas as pd\npd.columns([1, 2])"), "TypeError");
    }

    #[test]
    fn test_to_numeric() {
        assert_eq!(
            out(&format!("{}import pandas as pd\nout = pd.to_numeric(pd.column(rows, 'b'), errors='coerce')", ROWS)),
            json!([2.5, null, 7])
        );
        assert_eq!(
            out("import pandas as pd\nout = pd.to_numeric(['1', 'x'], errors='coerce')"),
            json!([1, null])
        );
        assert_eq!(fault_type("import pandas as pd\npd.to_numeric(['x'])"), "ValueError");
        assert_eq!(
            fault_type("import pandas as pd\npd.to_numeric(['1'], errors='skip')"),
            "ValueError"
        );
    }

    #[test]
    fn test_isna_and_dropna() {
        assert_eq!(
            out(&format!("{}import pandas as pd\nout = [pd.isna([1, None, float('nan')]), len(pd.dropna(rows)), pd.dropna([1, None, 2])]", ROWS)),
            json!([[false, true, true], 0, [1, 2]])
        );
        assert_eq!(
            out("import pandas as pd\nout = pd.dropna([{'a': 1, 'b': 2}, {'a': None, 'b': 3}, {'a': 4}])"),
            json!([{"a": 1, "b": 2}])
        );
    }

    #[test]
    fn test_rolling_mean() {
        assert_eq!(
            out("import pandas as pd\nout = pd.rolling_mean([1, 2, 3, 4], 2)"),
            json!([null, 1.5, 2.5, 3.5])
        );
        assert_eq!(
            out("import pandas as pd\nout = pd.rolling_mean([1, None, 3], window=1)"),
            json!([1.0, null, 3.0])
        );
        assert_eq!(fault_type("import pandas as pd\npd.rolling_mean([1], 0)"), "ValueError");
    }
}
