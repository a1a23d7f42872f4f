//! User properties over shader constants the script left unbound, so they
//! can be tweaked from the host without editing the script.

use std::sync::Arc;

use crate::property::{AccessorProperty, CompositeProperty, ScalarProperty, ScalarType, ScalarValue, UserProperty};
use crate::shader::reflection::{ScalarKind, VariableClass};
use crate::shader::variable::{ConstantSlot, ShaderValue};
use crate::shader::Shader;

fn scalar_type(kind: ScalarKind) -> ScalarType {
    match kind {
        ScalarKind::Float => ScalarType::Float,
        ScalarKind::Sint | ScalarKind::Uint => ScalarType::Int,
        ScalarKind::Bool => ScalarType::Bool,
    }
}

/// Scalar view of component `index` (storage order) of `slot`.
fn component_property(slot: &Arc<ConstantSlot>, name: String, index: usize) -> Arc<AccessorProperty> {
    let ty = scalar_type(slot.layout.ty.scalar);
    let reader = slot.clone();
    let writer = slot.clone();
    Arc::new(AccessorProperty::new(
        name,
        ty,
        Arc::new(move || {
            let v = reader.read_components().get(index).copied().unwrap_or(0.0);
            match ty {
                ScalarType::Int => ScalarValue::Int(v as i32),
                ScalarType::Bool => ScalarValue::Bool(v != 0.0),
                _ => ScalarValue::Float(v),
            }
        }),
        Some(Arc::new(move |value: ScalarValue| {
            let Some(v) = value.as_f32() else {
                return;
            };
            let mut components = writer.read_components();
            if let Some(c) = components.get_mut(index) {
                *c = v;
                writer.write(&ShaderValue::Floats(components));
            }
        })),
    ))
}

/// Property for one constant, or `None` for aggregates.
pub fn constant_property(slot: &Arc<ConstantSlot>) -> Option<Arc<dyn UserProperty>> {
    let ty = slot.layout.ty;
    let name = slot.layout.name.clone();
    match ty.class {
        VariableClass::Scalar => Some(component_property(slot, name, 0)),
        VariableClass::Vector => {
            const AXES: [&str; 4] = ["x", "y", "z", "w"];
            let components = (0..ty.columns as usize)
                .map(|i| {
                    component_property(slot, AXES.get(i).unwrap_or(&"?").to_string(), i)
                        as Arc<dyn ScalarProperty>
                })
                .collect();
            Some(Arc::new(CompositeProperty::vector(name, components)))
        }
        VariableClass::Matrix => {
            let (rows, columns) = (ty.rows as usize, ty.columns as usize);
            // property cells are row-major, storage is column-major
            let mut components = Vec::with_capacity(rows * columns);
            for r in 0..rows {
                for c in 0..columns {
                    components.push(
                        component_property(slot, format!("m{r}{c}"), c * rows + r) as Arc<dyn ScalarProperty>,
                    );
                }
            }
            Some(Arc::new(CompositeProperty::matrix(name, rows, columns, components)))
        }
        VariableClass::Other => None,
    }
}

/// Properties for every live constant of `shader` that has no bind source.
pub fn unbound_constant_properties(shader: &Shader) -> Vec<Arc<dyn UserProperty>> {
    shader
        .constants()
        .iter()
        .filter(|slot| slot.source().is_none())
        .filter_map(constant_property)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogger;
    use crate::property::PropertyKind;
    use crate::shader::{ShaderCompiler, ShaderSource};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SOURCE: &str = r#"
struct Globals {
    WorldToProjectionMatrix: mat4x4<f32>,
    Basis: mat3x3<f32>,
    Tint: vec4<f32>,
    Radius: f32,
    Steps: i32,
};
@group(0) @binding(0) var<uniform> globals: Globals;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    let b = globals.Basis * vec3<f32>(1.0);
    let p = globals.WorldToProjectionMatrix * vec4<f32>(b, f32(globals.Steps));
    return p * globals.Tint * globals.Radius;
}
"#;

    fn shader() -> Shader {
        let compiler = ShaderCompiler::new(Arc::new(NullLogger));
        let compiled = compiler
            .compile(&ShaderSource::Inline(SOURCE.into()), "fs_main", "ps_5_0", &BTreeMap::new())
            .unwrap();
        Shader::instantiate(compiled)
    }

    #[test]
    fn test_only_unbound_constants_are_exposed() {
        let s = shader();
        s.find_constant_variable("Radius").set(ShaderValue::float(2.0));
        let props = unbound_constant_properties(&s);
        let names: Vec<&str> = props.iter().map(|p| p.name()).collect();
        // WorldToProjectionMatrix is auto-bound, Radius explicitly set
        assert_eq!(names, ["Basis", "Tint", "Steps"]);
    }

    #[test]
    fn test_vector_property_writes_through() {
        let s = shader();
        let props = unbound_constant_properties(&s);
        let tint = props.iter().find(|p| p.name() == "Tint").unwrap();
        let PropertyKind::Vector(tint) = tint.kind() else {
            panic!("Tint should be a vector");
        };

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let _sub = tint.subscribe(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        tint.components()[2].set(ScalarValue::Float(0.75)).unwrap();
        assert_eq!(s.find_constant_variable("Tint").read_components(), vec![0.0, 0.0, 0.75, 0.0]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matrix_cells_map_to_column_major_storage() {
        let s = shader();
        let props = unbound_constant_properties(&s);
        let basis = props.iter().find(|p| p.name() == "Basis").unwrap();
        let PropertyKind::Matrix(basis) = basis.kind() else {
            panic!("Basis should be a matrix");
        };
        assert_eq!((basis.rows(), basis.columns()), (3, 3));

        // row 0, column 1
        basis.component(0, 1).unwrap().set(ScalarValue::Float(5.0)).unwrap();
        let stored = s.find_constant_variable("Basis").read_components();
        assert_eq!(stored[3], 5.0);
    }

    #[test]
    fn test_int_constant_is_int_property() {
        let s = shader();
        let props = unbound_constant_properties(&s);
        let steps = props.iter().find(|p| p.name() == "Steps").unwrap();
        let PropertyKind::Scalar(steps) = steps.kind() else {
            panic!("Steps should be a scalar");
        };
        assert_eq!(steps.scalar_type(), ScalarType::Int);
        steps.set(ScalarValue::Int(7)).unwrap();
        assert_eq!(steps.get(), ScalarValue::Int(7));
        assert!(steps.set(ScalarValue::Float(1.0)).is_err());
    }
}
