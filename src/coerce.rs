//! Conversion of dynamically typed script values into the typed values the
//! host works with. Every failure is a [`ConversionError`].

use glam::Vec4;
use rhai::{Array, Dynamic, Map};

use crate::error::ConversionError;
use crate::shader::reflection::{ScalarKind, VariableType};
use crate::shader::variable::ShaderValue;
use crate::user_vars::UserVar;

pub fn to_f32(value: &Dynamic) -> Result<f32, ConversionError> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f32);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(if b { 1.0 } else { 0.0 });
    }
    Err(ConversionError::mismatch("number", value.type_name()))
}

pub fn to_i64(value: &Dynamic) -> Result<i64, ConversionError> {
    if let Ok(i) = value.as_int() {
        return Ok(i);
    }
    if let Ok(f) = value.as_float() {
        if f.fract() == 0.0 {
            return Ok(f as i64);
        }
    }
    Err(ConversionError::mismatch("integer", value.type_name()))
}

pub fn to_u32(value: &Dynamic) -> Result<u32, ConversionError> {
    let v = to_i64(value)?;
    u32::try_from(v).map_err(|_| ConversionError::Invalid(format!("{v} is out of range")))
}

pub fn to_bool(value: &Dynamic) -> Result<bool, ConversionError> {
    value
        .as_bool()
        .map_err(|found| ConversionError::mismatch("bool", found))
}

pub fn to_string(value: &Dynamic) -> Result<String, ConversionError> {
    value
        .clone()
        .into_string()
        .map_err(|found| ConversionError::mismatch("string", found))
}

pub fn to_string_list(value: &Dynamic) -> Result<Vec<String>, ConversionError> {
    let array = to_array(value)?;
    array.iter().map(to_string).collect()
}

pub fn to_array(value: &Dynamic) -> Result<Array, ConversionError> {
    value
        .clone()
        .try_cast::<Array>()
        .ok_or_else(|| ConversionError::mismatch("array", value.type_name()))
}

pub fn to_map(value: &Dynamic) -> Result<Map, ConversionError> {
    value
        .clone()
        .try_cast::<Map>()
        .ok_or_else(|| ConversionError::mismatch("map", value.type_name()))
}

/// Numbers, bools and (nested) arrays of them, flattened in order.
pub fn flatten_numbers(value: &Dynamic) -> Result<Vec<f32>, ConversionError> {
    let mut out = Vec::new();
    flatten_into(value, &mut out)?;
    Ok(out)
}

fn flatten_into(value: &Dynamic, out: &mut Vec<f32>) -> Result<(), ConversionError> {
    if let Some(array) = value.clone().try_cast::<Array>() {
        for item in &array {
            flatten_into(item, out)?;
        }
        return Ok(());
    }
    out.push(to_f32(value)?);
    Ok(())
}

/// At least `n` numbers; extra components are dropped.
pub fn to_f32_list(value: &Dynamic, n: usize) -> Result<Vec<f32>, ConversionError> {
    let mut values = flatten_numbers(value)?;
    if values.len() < n {
        return Err(ConversionError::TooFewComponents {
            expected: n,
            found: values.len(),
        });
    }
    values.truncate(n);
    Ok(values)
}

/// An RGB or RGBA colour. Alpha defaults to 1.
pub fn to_colour(value: &Dynamic) -> Result<Vec4, ConversionError> {
    let values = flatten_numbers(value)?;
    match values.as_slice() {
        [r, g, b] => Ok(Vec4::new(*r, *g, *b, 1.0)),
        [r, g, b, a, ..] => Ok(Vec4::new(*r, *g, *b, *a)),
        _ => Err(ConversionError::TooFewComponents {
            expected: 3,
            found: values.len(),
        }),
    }
}

/// Convert a script value for a constant variable of type `ty`. Matrices are
/// given as a list of columns (or a flat column-major list). User variables
/// contribute their current value.
pub fn to_shader_value(value: &Dynamic, ty: &VariableType) -> Result<ShaderValue, ConversionError> {
    let count = ty.component_count();
    if count == 0 {
        return Err(ConversionError::Invalid(format!(
            "variables of type {ty} cannot be set from scripts"
        )));
    }

    let components = match value.clone().try_cast::<UserVar>() {
        Some(var) => var.components().ok_or_else(|| {
            ConversionError::mismatch(ty.to_string(), format!("user variable {}", var.name()))
        })?,
        None => flatten_numbers(value).map_err(|_| {
            ConversionError::mismatch(ty.to_string(), value.type_name())
        })?,
    };

    if components.len() < count {
        return Err(ConversionError::TooFewComponents {
            expected: count,
            found: components.len(),
        });
    }

    Ok(match ty.scalar {
        ScalarKind::Float => ShaderValue::Floats(components[..count].to_vec()),
        _ => ShaderValue::Ints(components[..count].iter().map(|v| *v as i32).collect()),
    })
}

/// Look up an optional key in an options map.
pub fn map_get<'a>(map: &'a Map, key: &str) -> Option<&'a Dynamic> {
    map.get(key).filter(|v| !v.is_unit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflection::VariableClass;

    fn vec_type(n: u32) -> VariableType {
        VariableType {
            class: VariableClass::Vector,
            scalar: ScalarKind::Float,
            rows: 1,
            columns: n,
        }
    }

    fn array(values: &[f32]) -> Dynamic {
        Dynamic::from(values.iter().map(|v| Dynamic::from(*v)).collect::<Array>())
    }

    #[test]
    fn test_scalar_from_int() {
        let ty = VariableType::scalar(ScalarKind::Float);
        let value = to_shader_value(&Dynamic::from(3_i64), &ty).unwrap();
        assert_eq!(value, ShaderValue::Floats(vec![3.0]));
    }

    #[test]
    fn test_vector_needs_enough_components() {
        let err = to_shader_value(&array(&[1.0, 2.0]), &vec_type(4)).unwrap_err();
        assert_eq!(err, ConversionError::TooFewComponents { expected: 4, found: 2 });
    }

    #[test]
    fn test_extra_components_dropped() {
        let value = to_shader_value(&array(&[1.0, 2.0, 3.0, 4.0]), &vec_type(3)).unwrap();
        assert_eq!(value, ShaderValue::Floats(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_string_is_rejected() {
        let err = to_shader_value(&Dynamic::from("red"), &vec_type(4)).unwrap_err();
        assert!(matches!(err, ConversionError::Mismatch { .. }));
    }

    #[test]
    fn test_int_vector() {
        let ty = VariableType {
            class: VariableClass::Vector,
            scalar: ScalarKind::Sint,
            rows: 1,
            columns: 2,
        };
        let value = to_shader_value(&array(&[1.0, -2.0]), &ty).unwrap();
        assert_eq!(value, ShaderValue::Ints(vec![1, -2]));
    }

    #[test]
    fn test_colour() {
        assert_eq!(to_colour(&array(&[1.0, 0.5, 0.0])).unwrap(), Vec4::new(1.0, 0.5, 0.0, 1.0));
        assert!(to_colour(&array(&[1.0])).is_err());
    }

    #[test]
    fn test_user_var_contributes_current_value() {
        let var = UserVar::float("Radius", 20.0);
        let value = to_shader_value(&Dynamic::from(var), &VariableType::scalar(ScalarKind::Float)).unwrap();
        assert_eq!(value, ShaderValue::Floats(vec![20.0]));
    }
}
