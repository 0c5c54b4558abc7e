//! `numpy`: array construction, reductions and elementwise math over lists.

use std::cell::Cell;

use super::{
    elementwise, element_f64, float_list, floats, int_option, is_sequence, mean, median, variance,
    warn, LibraryModule,
};
use crate::script::builtins::round_half_even;
use crate::script::error::Fault;
use crate::script::interp::Interpreter;
use crate::script::value::{CallArgs, Value};

pub(super) fn module() -> LibraryModule {
    LibraryModule::new("numpy")
        .function("array", array)
        .function("asarray", array)
        .function("zeros", zeros)
        .function("ones", ones)
        .function("arange", arange)
        .function("linspace", linspace)
        .function("mean", np_mean)
        .function("median", np_median)
        .function("std", np_std)
        .function("var", np_var)
        .function("sum", np_sum)
        .function("min", np_min)
        .function("max", np_max)
        .function("abs", np_abs)
        .function("sqrt", np_sqrt)
        .function("round", np_round)
        .function("cumsum", cumsum)
        .function("diff", diff)
        .function("clip", clip)
        .function("isnan", isnan)
        .constant("nan", f64::NAN)
        .constant("pi", std::f64::consts::PI)
        .constant("e", std::f64::consts::E)
}

/// Integer view for values numpy would keep in an integer array.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn items(interp: &mut Interpreter, value: &Value) -> Result<Vec<Value>, Fault> {
    if is_sequence(value) {
        interp.iterate(value)
    } else {
        Ok(vec![value.clone()])
    }
}

fn sized(interp: &Interpreter, n: i64) -> Result<usize, Fault> {
    if n < 0 {
        return Err(Fault::value_error("negative dimensions are not allowed"));
    }
    let n = usize::try_from(n).map_err(|_| Fault::value_error("array is too big"))?;
    interp.check_len(n)?;
    Ok(n)
}

// ===== Construction =====

fn array(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("array", 1, 1, &[])?;
    let value = &args.positional[0];
    if !is_sequence(value) {
        return Ok(value.clone());
    }
    let items = interp.iterate(value)?;
    interp.new_list(items)
}

fn filled(interp: &mut Interpreter, args: CallArgs, name: &str, fill: f64) -> Result<Value, Fault> {
    args.check(name, 1, 1, &[])?;
    let n = match &args.positional[0] {
        Value::Int(n) => *n,
        other => {
            return Err(Fault::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            )))
        }
    };
    let n = sized(interp, n)?;
    float_list(interp, vec![fill; n])
}

fn zeros(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    filled(interp, args, "zeros", 0.0)
}

fn ones(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    filled(interp, args, "ones", 1.0)
}

fn arange(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("arange", 1, 3, &[])?;
    let (start, stop, step) = match args.positional.as_slice() {
        [stop] => (Value::Int(0), stop.clone(), Value::Int(1)),
        [start, stop] => (start.clone(), stop.clone(), Value::Int(1)),
        [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
        _ => return Err(Fault::internal("arange arity")),
    };

    if let (Some(a), Some(b), Some(s)) = (as_integer(&start), as_integer(&stop), as_integer(&step))
    {
        if s == 0 {
            return Err(Fault::zero_division("division by zero"));
        }
        let span = (b as i128 - a as i128 + s as i128 - s.signum() as i128) / s as i128;
        let n = sized(interp, span.clamp(0, i64::MAX as i128) as i64)?;
        let values = (0..n as i64).map(|i| Value::Int(a + i * s)).collect();
        return interp.new_list(values);
    }

    let a = element_f64(&start, "arange")?;
    let b = element_f64(&stop, "arange")?;
    let s = element_f64(&step, "arange")?;
    if s == 0.0 {
        return Err(Fault::zero_division("division by zero"));
    }
    let span = ((b - a) / s).ceil();
    if !span.is_finite() {
        return Err(Fault::value_error("arange: cannot compute length"));
    }
    let n = sized(interp, span.max(0.0).min(i64::MAX as f64) as i64)?;
    float_list(interp, (0..n).map(|i| a + i as f64 * s).collect())
}

fn linspace(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("linspace", 2, 3, &["num", "endpoint"])?;
    let start = element_f64(&args.positional[0], "linspace")?;
    let stop = element_f64(&args.positional[1], "linspace")?;
    let num = int_option(&args, 2, "num", 50)?;
    if num < 0 {
        return Err(Fault::value_error(format!(
            "Number of samples, {}, must be non-negative.",
            num
        )));
    }
    let endpoint = args.keyword("endpoint").map_or(true, Value::truthy);
    let n = sized(interp, num)?;
    let divisions = if endpoint { n.saturating_sub(1) } else { n };
    let step = if divisions == 0 {
        0.0
    } else {
        (stop - start) / divisions as f64
    };
    let mut values: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
    if endpoint && n > 1 {
        values[n - 1] = stop;
    }
    float_list(interp, values)
}

// ===== Reductions =====

fn reduce_input(interp: &mut Interpreter, args: &CallArgs, name: &str) -> Result<Vec<f64>, Fault> {
    match args.arg(0) {
        Some(value) => floats(interp, value, name),
        None => Err(Fault::type_error(format!(
            "{}() missing required argument 'a' (pos 1)",
            name
        ))),
    }
}

fn np_mean(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("mean", 1, 1, &[])?;
    let values = reduce_input(interp, &args, "mean")?;
    if values.is_empty() {
        warn(interp, "Mean of empty slice.")?;
        return Ok(Value::Float(f64::NAN));
    }
    Ok(Value::Float(mean(&values)))
}

fn np_median(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("median", 1, 1, &[])?;
    let values = reduce_input(interp, &args, "median")?;
    if values.is_empty() {
        warn(interp, "Mean of empty slice.")?;
        return Ok(Value::Float(f64::NAN));
    }
    Ok(Value::Float(median(&values)))
}

fn spread(interp: &mut Interpreter, args: CallArgs, name: &str) -> Result<f64, Fault> {
    args.check(name, 1, 2, &["ddof"])?;
    let ddof = int_option(&args, 1, "ddof", 0)?;
    if ddof < 0 {
        return Err(Fault::value_error("ddof must be non-negative"));
    }
    let values = reduce_input(interp, &args, name)?;
    if values.len() as i64 <= ddof {
        warn(interp, "Degrees of freedom <= 0 for slice")?;
        return Ok(f64::NAN);
    }
    Ok(variance(&values, ddof as usize))
}

fn np_std(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    spread(interp, args, "std").map(|v| Value::Float(v.sqrt()))
}

fn np_var(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    spread(interp, args, "var").map(Value::Float)
}

fn np_sum(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("sum", 1, 1, &[])?;
    let values = items(interp, &args.positional[0])?;
    if values.iter().all(|v| as_integer(v).is_some()) {
        let mut total: i64 = 0;
        for value in &values {
            total = total
                .checked_add(as_integer(value).unwrap_or(0))
                .ok_or_else(|| Fault::overflow("integer overflow in sum"))?;
        }
        return Ok(Value::Int(total));
    }
    let mut total = 0.0;
    for value in &values {
        interp.tick()?;
        total += element_f64(value, "sum")?;
    }
    Ok(Value::Float(total))
}

fn extremum(
    interp: &mut Interpreter,
    args: CallArgs,
    name: &str,
    pick_later: fn(f64, f64) -> bool,
) -> Result<Value, Fault> {
    args.check(name, 1, 1, &[])?;
    let values = items(interp, &args.positional[0])?;
    let Some(first) = values.first() else {
        let reduction = if name == "min" { "minimum" } else { "maximum" };
        return Err(Fault::value_error(format!(
            "zero-size array to reduction operation {} which has no identity",
            reduction
        )));
    };
    let mut best = first.clone();
    let mut best_f = element_f64(first, name)?;
    for value in &values[1..] {
        interp.tick()?;
        let x = element_f64(value, name)?;
        if x.is_nan() {
            return Ok(Value::Float(f64::NAN));
        }
        if pick_later(x, best_f) {
            best = value.clone();
            best_f = x;
        }
    }
    if best_f.is_nan() {
        return Ok(Value::Float(f64::NAN));
    }
    match as_integer(&best) {
        Some(i) if values.iter().all(|v| as_integer(v).is_some()) => Ok(Value::Int(i)),
        _ => Ok(Value::Float(best_f)),
    }
}

fn np_min(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    extremum(interp, args, "min", |x, best| x < best)
}

fn np_max(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    extremum(interp, args, "max", |x, best| x > best)
}

// ===== Elementwise =====

fn np_abs(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("abs", 1, 1, &[])?;
    elementwise(interp, &args.positional[0], |v| match v {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Fault::overflow("integer overflow in abs")),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        other => element_f64(other, "abs").map(|x| Value::Float(x.abs())),
    })
}

fn np_sqrt(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("sqrt", 1, 1, &[])?;
    let invalid = Cell::new(false);
    let result = elementwise(interp, &args.positional[0], |v| {
        let x = element_f64(v, "sqrt")?;
        if x < 0.0 {
            invalid.set(true);
        }
        Ok(Value::Float(x.sqrt()))
    })?;
    if invalid.get() {
        warn(interp, "invalid value encountered in sqrt")?;
    }
    Ok(result)
}

fn np_round(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("round", 1, 2, &["decimals"])?;
    let decimals = int_option(&args, 1, "decimals", 0)?.clamp(-308, 308) as i32;
    elementwise(interp, &args.positional[0], |v| match as_integer(v) {
        Some(i) if decimals >= 0 => Ok(Value::Int(i)),
        Some(i) => Ok(Value::Int(round_half_even(i as f64, decimals) as i64)),
        None => element_f64(v, "round").map(|x| Value::Float(round_half_even(x, decimals))),
    })
}

fn isnan(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("isnan", 1, 1, &[])?;
    elementwise(interp, &args.positional[0], |v| match v {
        Value::Float(f) => Ok(Value::Bool(f.is_nan())),
        Value::None => Ok(Value::Bool(true)),
        Value::Int(_) | Value::Bool(_) => Ok(Value::Bool(false)),
        other => Err(Fault::type_error(format!(
            "ufunc 'isnan' not supported for the input types ('{}')",
            other.type_name()
        ))),
    })
}

fn clip(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("clip", 1, 3, &["a_min", "a_max"])?;
    let bound = |index, name| match args.get(index, name) {
        None | Some(Value::None) => Ok(None),
        Some(v) => element_f64(v, "clip").map(|x| Some((x, v.clone()))),
    };
    let low = bound(1, "a_min")?;
    let high = bound(2, "a_max")?;
    if low.is_none() && high.is_none() {
        return Err(Fault::value_error("One of max or min must be given"));
    }
    elementwise(interp, &args.positional[0], |v| {
        let x = element_f64(v, "clip")?;
        if let Some((lo, lo_value)) = &low {
            if x < *lo {
                return Ok(lo_value.clone());
            }
        }
        if let Some((hi, hi_value)) = &high {
            if x > *hi {
                return Ok(hi_value.clone());
            }
        }
        Ok(v.clone())
    })
}

// ===== Sequence transforms =====

fn cumsum(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("cumsum", 1, 1, &[])?;
    let values = items(interp, &args.positional[0])?;
    if values.iter().all(|v| as_integer(v).is_some()) {
        let mut total: i64 = 0;
        let mut out = Vec::with_capacity(values.len());
        for value in &values {
            total = total
                .checked_add(as_integer(value).unwrap_or(0))
                .ok_or_else(|| Fault::overflow("integer overflow in cumsum"))?;
            out.push(Value::Int(total));
        }
        return interp.new_list(out);
    }
    let mut total = 0.0;
    let mut out = Vec::with_capacity(values.len());
    for value in &values {
        interp.tick()?;
        total += element_f64(value, "cumsum")?;
        out.push(total);
    }
    float_list(interp, out)
}

fn diff(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("diff", 1, 2, &["n"])?;
    let order = int_option(&args, 1, "n", 1)?;
    if order < 0 {
        return Err(Fault::value_error(format!(
            "order must be non-negative but got {}",
            order
        )));
    }
    let mut values = items(interp, &args.positional[0])?;
    for _ in 0..order {
        interp.tick()?;
        let mut next = Vec::with_capacity(values.len().saturating_sub(1));
        for pair in values.windows(2) {
            next.push(match (as_integer(&pair[0]), as_integer(&pair[1])) {
                (Some(a), Some(b)) => b
                    .checked_sub(a)
                    .map(Value::Int)
                    .ok_or_else(|| Fault::overflow("integer overflow in diff"))?,
                _ => Value::Float(element_f64(&pair[1], "diff")? - element_f64(&pair[0], "diff")?),
            });
        }
        values = next;
    }
    interp.new_list(values)
}
