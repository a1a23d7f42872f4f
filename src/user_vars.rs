//! User variables created by scripts (`ri.add_user_var_*`).
//!
//! A user variable is a property shown to the user plus an accessor the
//! script keeps: reading it always returns the current (possibly user
//! edited) value, and binding a shader variable to it makes every draw pick
//! up that value.

use std::sync::Arc;

use rhai::{Array, Dynamic};

use crate::error::ConversionError;
use crate::property::{CompositeProperty, ScalarProperty, ScalarValue, UserProperty, ValueProperty};

#[derive(Clone)]
pub enum UserVar {
    Scalar(Arc<ValueProperty>),
    Vector(Arc<CompositeProperty>),
}

impl UserVar {
    pub fn float(name: &str, value: f32) -> Self {
        Self::scalar(ValueProperty::new(name, ScalarValue::Float(value)))
    }

    pub fn int(name: &str, value: i32) -> Self {
        Self::scalar(ValueProperty::new(name, ScalarValue::Int(value)))
    }

    pub fn bool(name: &str, value: bool) -> Self {
        Self::scalar(ValueProperty::new(name, ScalarValue::Bool(value)))
    }

    pub fn string(name: &str, value: &str) -> Self {
        Self::scalar(ValueProperty::new(name, ScalarValue::String(value.to_string())))
    }

    pub fn choice(name: &str, choices: Vec<String>, initial: &str) -> Result<Self, ConversionError> {
        Ok(Self::scalar(ValueProperty::choice(name, choices, initial)?))
    }

    pub fn float_vector(name: &str, values: &[f32]) -> Self {
        Self::vector(name, values.iter().map(|v| ScalarValue::Float(*v)))
    }

    pub fn int_vector(name: &str, values: &[i32]) -> Self {
        Self::vector(name, values.iter().map(|v| ScalarValue::Int(*v)))
    }

    fn scalar(prop: ValueProperty) -> Self {
        UserVar::Scalar(Arc::new(prop))
    }

    fn vector(name: &str, values: impl Iterator<Item = ScalarValue>) -> Self {
        const AXES: [&str; 4] = ["x", "y", "z", "w"];
        let components = values
            .enumerate()
            .map(|(i, v)| {
                Arc::new(ValueProperty::new(AXES.get(i).copied().unwrap_or("?"), v))
                    as Arc<dyn ScalarProperty>
            })
            .collect();
        UserVar::Vector(Arc::new(CompositeProperty::vector(name, components)))
    }

    pub fn name(&self) -> &str {
        match self {
            UserVar::Scalar(p) => p.name(),
            UserVar::Vector(p) => p.name(),
        }
    }

    pub fn property(&self) -> Arc<dyn UserProperty> {
        match self {
            UserVar::Scalar(p) => p.clone(),
            UserVar::Vector(p) => p.clone(),
        }
    }

    /// Numeric components of the current value, `None` for strings and choices.
    pub fn components(&self) -> Option<Vec<f32>> {
        match self {
            UserVar::Scalar(p) => p.get().as_f32().map(|v| vec![v]),
            UserVar::Vector(p) => Some(p.values_f32()),
        }
    }

    /// Current value as a script value.
    pub fn value(&self) -> Dynamic {
        match self {
            UserVar::Scalar(p) => scalar_to_dynamic(p.get()),
            UserVar::Vector(p) => p
                .components()
                .iter()
                .map(|c| scalar_to_dynamic(c.get()))
                .collect::<Array>()
                .into(),
        }
    }
}

fn scalar_to_dynamic(value: ScalarValue) -> Dynamic {
    match value {
        ScalarValue::Float(v) => Dynamic::from(v),
        ScalarValue::Int(v) => Dynamic::from(v as i64),
        ScalarValue::Bool(v) => Dynamic::from(v),
        ScalarValue::String(v) => Dynamic::from(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_tracks_edits() {
        let var = UserVar::float("Radius", 20.0);
        assert_eq!(var.value().as_float().unwrap(), 20.0);

        if let UserVar::Scalar(p) = &var {
            p.set(ScalarValue::Float(5.0)).unwrap();
        }
        assert_eq!(var.value().as_float().unwrap(), 5.0);
        assert_eq!(var.components(), Some(vec![5.0]));
    }

    #[test]
    fn test_vector_components() {
        let var = UserVar::float_vector("Tint", &[1.0, 0.5, 0.25]);
        assert_eq!(var.components(), Some(vec![1.0, 0.5, 0.25]));
        let array = var.value().try_cast::<Array>().unwrap();
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn test_strings_have_no_numeric_value() {
        let var = UserVar::string("Label", "hello");
        assert!(var.components().is_none());
        assert_eq!(var.value().into_string().unwrap(), "hello");

        let mode = UserVar::choice("Mode", vec!["a".into(), "b".into()], "b").unwrap();
        assert_eq!(mode.value().into_string().unwrap(), "b");
    }
}
