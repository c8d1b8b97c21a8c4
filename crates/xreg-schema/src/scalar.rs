//! Scalar type checks.
//!
//! Each check either accepts the value as-is, rewrites it into canonical
//! form (integral floats to integers, timestamps to UTC), or rejects it with
//! an `invalid_attribute` problem naming the property path.

use url::Url;
use xreg_model::{AttrType, Model, Xid, XidTarget};
use xreg_types::{timestamp, PropPath, Problem, Value};

fn invalid(path: &PropPath, detail: impl ToString) -> Problem {
    Problem::invalid_attribute(path, detail)
}

fn expect_str<'v>(value: &'v Value, path: &PropPath, ty: AttrType) -> Result<&'v str, Problem> {
    value
        .as_str()
        .ok_or_else(|| invalid(path, format!("must be a {ty}, not {}", value.kind_name())))
}

/// Validate (and possibly normalize) a scalar value.
pub fn check_scalar(
    value: &mut Value,
    ty: AttrType,
    target: Option<&str>,
    path: &PropPath,
    model: &Model,
) -> Result<(), Problem> {
    match ty {
        AttrType::Boolean => match value {
            Value::Bool(_) => Ok(()),
            other => Err(invalid(path, format!("must be a boolean, not {}", other.kind_name()))),
        },
        AttrType::Decimal => {
            if value.is_number() {
                Ok(())
            } else {
                Err(invalid(path, format!("must be a decimal, not {}", value.kind_name())))
            }
        }
        AttrType::Integer => match value {
            Value::Int(_) => Ok(()),
            Value::UInt(_) => Err(invalid(path, "must be a 64-bit signed integer")),
            Value::Float(f) => {
                let f = *f;
                match value.as_i64() {
                    Some(i) => {
                        *value = Value::Int(i);
                        Ok(())
                    }
                    None => Err(invalid(path, format!("must be an integer, not {f}"))),
                }
            }
            other => Err(invalid(path, format!("must be an integer, not {}", other.kind_name()))),
        },
        AttrType::UInteger => match value {
            Value::Int(i) if *i < 0 => Err(invalid(path, "must be a uinteger (>= 0)")),
            Value::Int(_) | Value::UInt(_) => Ok(()),
            Value::Float(f) if *f < 0.0 => Err(invalid(path, "must be a uinteger (>= 0)")),
            Value::Float(f) => {
                let f = *f;
                match value.as_u64() {
                    Some(u) => {
                        *value = Value::from_u64(u);
                        Ok(())
                    }
                    None => Err(invalid(path, format!("must be a uinteger, not {f}"))),
                }
            }
            other => Err(invalid(path, format!("must be a uinteger, not {}", other.kind_name()))),
        },
        AttrType::String => expect_str(value, path, ty).map(|_| ()),
        AttrType::Timestamp => {
            let text = expect_str(value, path, ty)?;
            let canonical = timestamp::normalize(text)
                .map_err(|_| invalid(path, format!("{text:?} is not a valid timestamp")))?;
            if canonical != text {
                *value = Value::String(canonical);
            }
            Ok(())
        }
        AttrType::Uri => {
            let text = expect_str(value, path, ty)?;
            Url::parse(text)
                .map(|_| ())
                .map_err(|e| invalid(path, format!("{text:?} is not a valid uri: {e}")))
        }
        AttrType::Url | AttrType::UriReference => {
            let text = expect_str(value, path, ty)?;
            check_reference(text).map_err(|e| invalid(path, format!("{text:?} is not a valid {ty}: {e}")))
        }
        AttrType::UriTemplate => {
            let text = expect_str(value, path, ty)?;
            check_template(text).map_err(|e| invalid(path, format!("{text:?} is not a valid uritemplate: {e}")))
        }
        AttrType::Xid => {
            let text = expect_str(value, path, ty)?;
            check_xid(text, target, model, path)
        }
        AttrType::XidType => {
            let text = expect_str(value, path, ty)?;
            if model.has_abstract(text) {
                Ok(())
            } else {
                Err(invalid(path, format!("{text:?} does not name an entity type")))
            }
        }
        AttrType::Any | AttrType::Map | AttrType::Array | AttrType::Object => Ok(()),
    }
}

/// Absolute or relative URI reference.
fn check_reference(text: &str) -> Result<(), String> {
    if text.chars().any(char::is_whitespace) {
        return Err("contains whitespace".into());
    }
    match Url::parse(text) {
        Ok(_) => Ok(()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse("http://base.invalid/").map_err(|e| e.to_string())?;
            base.join(text).map(|_| ()).map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Braces must be balanced and not nested.
fn check_template(text: &str) -> Result<(), String> {
    let mut open = false;
    for ch in text.chars() {
        match (ch, open) {
            ('{', false) => open = true,
            ('}', true) => open = false,
            ('{', true) => return Err("nested '{'".into()),
            ('}', false) => return Err("unmatched '}'".into()),
            _ => {}
        }
    }
    if open {
        return Err("unclosed '{'".into());
    }
    Ok(())
}

fn check_xid(text: &str, target: Option<&str>, model: &Model, path: &PropPath) -> Result<(), Problem> {
    let xid = Xid::parse(text).map_err(|e| invalid(path, format!("{text:?} is not a valid xid: {e}")))?;
    model
        .check_xid(&xid)
        .map_err(|e| invalid(path, format!("{text:?}: {e}")))?;
    if let Some(target) = target {
        let parsed = XidTarget::parse(target).map_err(Problem::model_error)?;
        model.check_target(&parsed)?;
        if !parsed.matches(&xid) {
            return Err(invalid(path, format!("{text:?} must match target {parsed}")));
        }
    }
    Ok(())
}
