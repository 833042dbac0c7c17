//! Parameter decoders (spec §4.I, supplemented from `lib/json/json_util.c`):
//! exponent-form integers (`"1.2e1"` -> `12`) are accepted, non-integral
//! mantissas are rejected, and out-of-range values are `ERANGE` rather than
//! silently truncated.

use serde_json::Value;

use super::error::{Code, RpcError};

fn invalid_params(msg: impl ToString) -> RpcError {
    RpcError::new(Code::InvalidParams, msg)
}

fn field<'a>(obj: &'a Value, name: &str) -> Result<&'a Value, RpcError> {
    obj.get(name)
        .ok_or_else(|| invalid_params(format!("missing required field '{name}'")))
}

/// Decode a JSON number into an integer, accepting exponent form as long as
/// the evaluated value is integral (`"1.2e1"` -> `12`, `"1.2"` rejected).
fn decode_integral(val: &Value, field_name: &str) -> Result<f64, RpcError> {
    let n = val
        .as_f64()
        .ok_or_else(|| invalid_params(format!("field '{field_name}' is not a number")))?;
    if n.fract() != 0.0 {
        return Err(invalid_params(format!(
            "field '{field_name}' is not an integer"
        )));
    }
    Ok(n)
}

pub fn decode_uint32(obj: &Value, name: &str) -> Result<u32, RpcError> {
    let n = decode_integral(field(obj, name)?, name)?;
    if n < 0.0 || n > u32::MAX as f64 {
        return Err(invalid_params(format!("field '{name}' out of range (ERANGE)")));
    }
    Ok(n as u32)
}

pub fn decode_uint64(obj: &Value, name: &str) -> Result<u64, RpcError> {
    let n = decode_integral(field(obj, name)?, name)?;
    if n < 0.0 || n > u64::MAX as f64 {
        return Err(invalid_params(format!("field '{name}' out of range (ERANGE)")));
    }
    Ok(n as u64)
}

pub fn decode_bool(obj: &Value, name: &str) -> Result<bool, RpcError> {
    field(obj, name)?
        .as_bool()
        .ok_or_else(|| invalid_params(format!("field '{name}' is not a bool")))
}

pub fn decode_string(obj: &Value, name: &str) -> Result<String, RpcError> {
    field(obj, name)?
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| invalid_params(format!("field '{name}' is not a string")))
}

pub fn decode_array<'a>(obj: &'a Value, name: &str) -> Result<&'a Vec<Value>, RpcError> {
    field(obj, name)?
        .as_array()
        .ok_or_else(|| invalid_params(format!("field '{name}' is not an array")))
}

pub fn decode_object<'a>(obj: &'a Value, name: &str) -> Result<&'a Value, RpcError> {
    let v = field(obj, name)?;
    if v.is_object() {
        Ok(v)
    } else {
        Err(invalid_params(format!("field '{name}' is not an object")))
    }
}

/// Same as [`decode_uint32`] but returns `None` rather than erroring when
/// the field is absent, for optional parameters.
pub fn decode_uint32_opt(obj: &Value, name: &str) -> Result<Option<u32>, RpcError> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => decode_uint32(obj, name).map(Some),
    }
}

pub fn decode_bool_opt(obj: &Value, name: &str) -> Result<Option<bool>, RpcError> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => decode_bool(obj, name).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exponent_form_integer_accepted() {
        let v = json!({"n": "1.2e1".parse::<f64>().unwrap()});
        assert_eq!(decode_uint32(&v, "n").unwrap(), 12);
    }

    #[test]
    fn non_integral_mantissa_rejected() {
        let v = json!({"n": 1.2});
        assert!(decode_uint32(&v, "n").is_err());
    }

    #[test]
    fn overflow_is_rejected_as_erange() {
        let v = json!({"n": (u32::MAX as f64) + 10.0});
        let err = decode_uint32(&v, "n").unwrap_err();
        assert!(err.message.contains("ERANGE"));
    }

    #[test]
    fn missing_required_field_fails_whole_decode() {
        let v = json!({});
        assert!(decode_string(&v, "name").is_err());
    }

    #[test]
    fn decode_bool_and_string_roundtrip() {
        let v = json!({"enabled": true, "name": "foo"});
        assert!(decode_bool(&v, "enabled").unwrap());
        assert_eq!(decode_string(&v, "name").unwrap(), "foo");
    }

    #[test]
    fn optional_field_absent_is_none() {
        let v = json!({});
        assert_eq!(decode_uint32_opt(&v, "n").unwrap(), None);
    }
}
