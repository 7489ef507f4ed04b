//! printf-style rendering used for FORMATTED values.
//!
//! Supports `%d %i %u %x %X %o %f %F %e %E %g %G %s %c %%` with the
//! `- 0 + space` flags, width and precision. Unsupported conversions are
//! emitted literally.

use crate::value::Value;

/// Upper bound on width and precision.
const MAX_FIELD: usize = 256;

fn push_digit(field: usize, digit: u32) -> usize {
    field
        .saturating_mul(10)
        .saturating_add(digit as usize)
        .min(MAX_FIELD)
}

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    width: usize,
    precision: Option<usize>,
}

/// Render `value` through `format_string`.
pub fn format_value(format_string: &str, value: &Value) -> String {
    let mut out = String::new();
    let mut chars = format_string.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut spec = Spec::default();
        let mut literal = String::from("%");
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                _ => break,
            }
            literal.push(flag);
            chars.next();
        }
        while let Some(&d) = chars.peek() {
            let Some(digit) = d.to_digit(10) else { break };
            spec.width = push_digit(spec.width, digit);
            literal.push(d);
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            literal.push('.');
            chars.next();
            let mut precision = 0;
            while let Some(&d) = chars.peek() {
                let Some(digit) = d.to_digit(10) else { break };
                precision = push_digit(precision, digit);
                literal.push(d);
                chars.next();
            }
            spec.precision = Some(precision);
        }
        // length modifiers carry no meaning here
        while let Some(&m) = chars.peek() {
            if matches!(m, 'l' | 'h' | 'q' | 'L' | 'z' | 'j' | 't') {
                literal.push(m);
                chars.next();
            } else {
                break;
            }
        }
        match chars.next() {
            Some(conv) => match render(conv, &spec, value) {
                Some(body) => out.push_str(&pad(&spec, body, conv)),
                None => {
                    out.push_str(&literal);
                    out.push(conv);
                }
            },
            None => out.push_str(&literal),
        }
    }
    out
}

fn signed(spec: &Spec, negative: bool, digits: String) -> String {
    if negative {
        format!("-{digits}")
    } else if spec.plus {
        format!("+{digits}")
    } else if spec.space {
        format!(" {digits}")
    } else {
        digits
    }
}

fn render(conv: char, spec: &Spec, value: &Value) -> Option<String> {
    match conv {
        'd' | 'i' | 'u' => {
            let v = match value {
                Value::Int(i) => *i,
                Value::Float(f) => f.trunc() as i64,
                _ => return Some(value.to_string()),
            };
            Some(signed(spec, v < 0, v.unsigned_abs().to_string()))
        }
        'x' | 'X' | 'o' => {
            let v = value.as_f64()? as i64;
            let magnitude = v.unsigned_abs();
            let digits = match conv {
                'x' => format!("{magnitude:x}"),
                'X' => format!("{magnitude:X}"),
                _ => format!("{magnitude:o}"),
            };
            Some(signed(spec, v < 0, digits))
        }
        'f' | 'F' => {
            let v = value.as_f64()?;
            let precision = spec.precision.unwrap_or(6);
            Some(signed(spec, v.is_sign_negative() && v != 0.0, format!("{:.*}", precision, v.abs())))
        }
        'e' | 'E' => {
            let v = value.as_f64()?;
            let body = exponent(v.abs(), spec.precision.unwrap_or(6));
            let body = if conv == 'E' { body.to_uppercase() } else { body };
            Some(signed(spec, v < 0.0, body))
        }
        'g' | 'G' => {
            let v = value.as_f64()?;
            let body = general(v.abs(), spec.precision.unwrap_or(6));
            let body = if conv == 'G' { body.to_uppercase() } else { body };
            Some(signed(spec, v < 0.0, body))
        }
        's' => {
            let text = value.to_string();
            Some(match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            })
        }
        'c' => match value {
            Value::Int(i) => u32::try_from(*i).ok().and_then(char::from_u32).map(String::from),
            Value::String(s) => s.chars().next().map(String::from),
            _ => None,
        },
        _ => None,
    }
}

/// C-style exponent: mantissa with `precision` digits and a signed two-digit exponent.
fn exponent(v: f64, precision: usize) -> String {
    let formatted = format!("{:.*e}", precision, v);
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

fn general(v: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if v == 0.0 {
        return "0".to_string();
    }
    let exp = v.log10().floor() as i32;
    let body = if exp < -4 || exp >= precision as i32 {
        exponent(v, precision - 1)
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        format!("{:.*}", decimals, v)
    };
    strip_trailing_zeros(&body)
}

fn strip_trailing_zeros(s: &str) -> String {
    let (mantissa, suffix) = match s.find('e') {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{mantissa}{suffix}")
}

fn pad(spec: &Spec, body: String, conv: char) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let fill = spec.width - len;
    if spec.left {
        format!("{body}{}", " ".repeat(fill))
    } else if spec.zero && conv != 's' && conv != 'c' {
        let (sign, digits) = match body.chars().next() {
            Some(c @ ('-' | '+' | ' ')) => (c.to_string(), body[1..].to_string()),
            _ => (String::new(), body),
        };
        format!("{sign}{}{digits}", "0".repeat(fill))
    } else {
        format!("{}{body}", " ".repeat(fill))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_formats() {
        assert_eq!(format_value("%d", &Value::Int(42)), "42");
        assert_eq!(format_value("%05d", &Value::Int(-42)), "-0042");
        assert_eq!(format_value("0x%04X", &Value::Int(0xAB)), "0x00AB");
        assert_eq!(format_value("%-4d|", &Value::Int(7)), "7   |");
        assert_eq!(format_value("%+d", &Value::Int(7)), "+7");
    }

    #[test]
    fn test_float_formats() {
        assert_eq!(format_value("%0.2f", &Value::Float(3.14159)), "3.14");
        assert_eq!(format_value("%.3f V", &Value::Int(5)), "5.000 V");
        assert_eq!(format_value("%e", &Value::Float(1234.5)), "1.234500e+03");
        assert_eq!(format_value("%g", &Value::Float(0.0001)), "0.0001");
        assert_eq!(format_value("%g", &Value::Float(100.0)), "100");
    }

    #[test]
    fn test_strings_and_literals() {
        assert_eq!(format_value("%s!", &Value::from("HI")), "HI!");
        assert_eq!(format_value("100%%", &Value::Int(1)), "100%");
        assert_eq!(format_value("%y", &Value::Int(1)), "%y");
    }

    #[test]
    fn test_oversized_fields_are_capped() {
        let width = "9".repeat(40);
        let out = format_value(&format!("%{width}d"), &Value::Int(1));
        assert_eq!(out.len(), MAX_FIELD);
        assert!(out.ends_with('1'));

        let out = format_value(&format!("%.{width}f"), &Value::Float(0.5));
        assert_eq!(out.len(), 2 + MAX_FIELD);
    }
}
