//! Conversions between [`PvValue`] and Rhai's [`Dynamic`].

use crate::types::PvValue;
use rhai::{Array, Dynamic};

pub fn pv_to_dynamic(value: &PvValue) -> Dynamic {
    match value {
        PvValue::Number(n) => Dynamic::from_float(*n),
        PvValue::Bool(b) => Dynamic::from_bool(*b),
        PvValue::Text(s) => Dynamic::from(s.clone()),
        PvValue::Array(values) => {
            let array: Array = values.iter().map(|v| Dynamic::from_float(*v)).collect();
            Dynamic::from_array(array)
        }
    }
}

/// Convert a script result back into a PV value (`None` for unit)
pub fn dynamic_to_pv(value: Dynamic) -> Option<PvValue> {
    if value.is_unit() {
        return None;
    }
    if let Ok(f) = value.as_float() {
        return Some(PvValue::Number(f));
    }
    if let Ok(i) = value.as_int() {
        return Some(PvValue::Number(i as f64));
    }
    if let Ok(b) = value.as_bool() {
        return Some(PvValue::Bool(b));
    }
    if value.is_string() {
        return value.into_string().ok().map(PvValue::Text);
    }
    if value.is_array() {
        let array = value.try_cast::<Array>()?;
        let numbers = array.into_iter().map(element_to_f64).collect();
        return Some(PvValue::Array(numbers));
    }
    Some(PvValue::Text(value.to_string()))
}

fn element_to_f64(element: Dynamic) -> f64 {
    if let Ok(f) = element.as_float() {
        f
    } else if let Ok(i) = element.as_int() {
        i as f64
    } else if let Ok(b) = element.as_bool() {
        if b {
            1.0
        } else {
            0.0
        }
    } else {
        f64::NAN
    }
}
