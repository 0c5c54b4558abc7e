//! Format-spec mini-language for f-string fields and `str.format`.
//!
//! Supports `[[fill]align][sign][,][0][width][.precision][type]` with types
//! `d f F e E g % s` and none.

use super::error::Fault;
use super::value::{format_float, Value};

#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    grouping: bool,
    zero_pad: bool,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(raw: &str) -> Result<Spec, Fault> {
    let invalid = || Fault::value_error(format!("Invalid format specifier '{}'", raw));
    let chars: Vec<char> = raw.chars().collect();
    let mut spec = Spec::default();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = Some(chars[0]);
        spec.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            spec.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        spec.zero_pad = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).map_or(false, |c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        spec.width = chars[start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| invalid())?;
    }
    if matches!(chars.get(i), Some(',') | Some('_')) {
        spec.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).map_or(false, |c| c.is_ascii_digit()) {
            i += 1;
        }
        if i == start {
            return Err(invalid());
        }
        spec.precision = Some(
            chars[start..i]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| invalid())?,
        );
    }
    if let Some(&c) = chars.get(i) {
        if !matches!(c, 'd' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%' | 's') {
            return Err(invalid());
        }
        spec.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid());
    }
    Ok(spec)
}

/// Render `value` according to a format spec.
pub fn format_value(value: &Value, raw_spec: &str) -> Result<String, Fault> {
    let spec = parse_spec(raw_spec)?;
    let numeric = matches!(value, Value::Int(_) | Value::Float(_));

    let body = match (spec.kind, value) {
        (Some('s'), Value::Str(s)) | (None, Value::Str(s)) => {
            let mut text = s.to_string();
            if let Some(p) = spec.precision {
                text = text.chars().take(p).collect();
            }
            text
        }
        (Some('s'), other) => other.to_str(),
        (Some('d'), v) => match v.as_int() {
            Some(i) => group(&i.abs().to_string(), spec.grouping, i < 0, spec.sign),
            None => {
                return Err(Fault::value_error(format!(
                    "Unknown format code 'd' for object of type '{}'",
                    v.type_name()
                )))
            }
        },
        (Some(kind), v) if numeric => {
            let x = v.as_f64().unwrap_or(f64::NAN);
            let precision = spec.precision.unwrap_or(6);
            let magnitude = match kind {
                'f' | 'F' => fixed(x.abs(), precision),
                'e' | 'E' => exponent(x.abs(), precision, kind == 'E'),
                '%' => format!("{}%", fixed(x.abs() * 100.0, precision)),
                _ => general(x.abs(), spec.precision),
            };
            let negative = x.is_sign_negative() && !x.is_nan() && x != 0.0;
            group(&magnitude, spec.grouping, negative, spec.sign)
        }
        (None, v) if numeric => {
            let text = match (v, spec.precision) {
                (Value::Float(f), Some(p)) => general(f.abs(), Some(p)),
                (Value::Float(f), None) => format_float(f.abs()),
                (other, _) => other.as_int().unwrap_or(0).abs().to_string(),
            };
            let negative = v.as_f64().map_or(false, |x| x < 0.0);
            group(&text, spec.grouping, negative, spec.sign)
        }
        (Some(kind), v) => {
            return Err(Fault::value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                kind,
                v.type_name()
            )))
        }
        (None, other) => other.to_str(),
    };

    Ok(pad(body, &spec, numeric))
}

fn fixed(x: f64, precision: usize) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return "inf".to_string();
    }
    format!("{:.*}", precision, x)
}

fn exponent(x: f64, precision: usize, upper: bool) -> String {
    if !x.is_finite() {
        return fixed(x, precision);
    }
    let text = format!("{:.*e}", precision, x);
    let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    let e = if upper { 'E' } else { 'e' };
    format!("{}{}{}{:0>2}", mantissa, e, sign, digits)
}

fn general(x: f64, precision: Option<usize>) -> String {
    if !x.is_finite() {
        return fixed(x, 0);
    }
    let p = precision.unwrap_or(6).max(1);
    if x == 0.0 {
        return "0".to_string();
    }
    let exp = x.log10().floor() as i32;
    let text = if exp < -4 || exp >= p as i32 {
        exponent(x, p - 1, false)
    } else {
        fixed(x, (p as i32 - 1 - exp).max(0) as usize)
    };
    trim_zeros(&text)
}

fn trim_zeros(text: &str) -> String {
    let (mantissa, suffix) = match text.find('e') {
        Some(at) => (&text[..at], &text[at..]),
        None => (text, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{}{}", mantissa, suffix)
}

/// Apply sign and thousands separators to an unsigned magnitude.
fn group(magnitude: &str, grouping: bool, negative: bool, sign: Option<char>) -> String {
    let body = if grouping {
        let (int_part, rest) = match magnitude.find(|c: char| !c.is_ascii_digit()) {
            Some(at) => (&magnitude[..at], &magnitude[at..]),
            None => (magnitude, ""),
        };
        let mut grouped = String::new();
        for (i, c) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        grouped.push_str(rest);
        grouped
    } else {
        magnitude.to_string()
    };
    let prefix = match (negative, sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };
    format!("{}{}", prefix, body)
}

fn pad(body: String, spec: &Spec, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let missing = spec.width - len;
    if spec.zero_pad && spec.align.is_none() && numeric {
        let (sign, digits) = match body.chars().next() {
            Some(c @ ('-' | '+' | ' ')) => (c.to_string(), body[1..].to_string()),
            _ => (String::new(), body),
        };
        return format!("{}{}{}", sign, "0".repeat(missing), digits);
    }
    let fill = spec.fill.unwrap_or(' ').to_string();
    let align = spec.align.unwrap_or(if numeric { '>' } else { '<' });
    match align {
        '>' | '=' => format!("{}{}", fill.repeat(missing), body),
        '^' => {
            let left = missing / 2;
            format!("{}{}{}", fill.repeat(left), body, fill.repeat(missing - left))
        }
        _ => format!("{}{}", body, fill.repeat(missing)),
    }
}
