//! Handles to a shader's variables.
//!
//! Every lookup returns a handle, even for names the shader doesn't have:
//! those come back as the null variant of the handle, on which every
//! mutator does nothing. Scripts can therefore configure optional
//! variables without guarding each call.

use std::fmt;
use std::sync::Arc;

use glam::Mat4;
use parking_lot::Mutex;

use crate::observable::ChangeNotifier;
use crate::resources::ResourceRef;
use crate::shader::binding::{BindSource, BindValue, ResourceBind};
use crate::shader::reflection::{
    BindPoint, ConstantBufferLayout, ConstantLayout, ResourceLayout, SamplerLayout, ScalarKind,
    VariableClass,
};
use crate::state::SamplerState;

/// A value destined for a constant variable. Float and int lists hold
/// components in storage order (column-major for matrices).
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderValue {
    Floats(Vec<f32>),
    Ints(Vec<i32>),
    Matrix(Mat4),
}

impl ShaderValue {
    pub fn float(v: f32) -> Self {
        ShaderValue::Floats(vec![v])
    }
}

/// Backing bytes of one uniform buffer.
pub struct ConstantBufferData {
    pub layout: ConstantBufferLayout,
    pub(crate) bytes: Mutex<Vec<u8>>,
}

impl ConstantBufferData {
    pub fn new(layout: ConstantBufferLayout) -> Self {
        let size = layout.size as usize;
        Self {
            layout,
            bytes: Mutex::new(vec![0; size]),
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

enum Component {
    F(f32),
    I(i32),
}

fn encode(kind: ScalarKind, value: Component) -> [u8; 4] {
    match (kind, value) {
        (ScalarKind::Float, Component::F(v)) => v.to_le_bytes(),
        (ScalarKind::Float, Component::I(v)) => (v as f32).to_le_bytes(),
        (ScalarKind::Sint, Component::F(v)) => (v as i32).to_le_bytes(),
        (ScalarKind::Sint, Component::I(v)) => v.to_le_bytes(),
        (ScalarKind::Uint, Component::F(v)) => (v.max(0.0) as u32).to_le_bytes(),
        (ScalarKind::Uint, Component::I(v)) => (v.max(0) as u32).to_le_bytes(),
        (ScalarKind::Bool, Component::F(v)) => u32::from(v != 0.0).to_le_bytes(),
        (ScalarKind::Bool, Component::I(v)) => u32::from(v != 0).to_le_bytes(),
    }
}

fn decode(kind: ScalarKind, bytes: [u8; 4]) -> f32 {
    match kind {
        ScalarKind::Float => f32::from_le_bytes(bytes),
        ScalarKind::Sint => i32::from_le_bytes(bytes) as f32,
        ScalarKind::Uint | ScalarKind::Bool => u32::from_le_bytes(bytes) as f32,
    }
}

/// A reflected constant variable: its place in a uniform buffer and its
/// current bind source.
pub struct ConstantSlot {
    pub layout: ConstantLayout,
    pub(crate) buffer: Arc<ConstantBufferData>,
    pub(crate) source: Mutex<Option<BindSource>>,
    pub(crate) changed: ChangeNotifier,
}

impl ConstantSlot {
    pub fn new(layout: ConstantLayout, buffer: Arc<ConstantBufferData>) -> Self {
        Self {
            layout,
            buffer,
            source: Mutex::new(None),
            changed: ChangeNotifier::new(),
        }
    }

    fn put(&self, bytes: &mut [u8], index: usize, value: Component) {
        let ty = &self.layout.ty;
        let local = ty.component_offset(index);
        if local + 4 > self.layout.size as usize {
            return;
        }
        let start = self.layout.offset as usize + local;
        if let Some(dst) = bytes.get_mut(start..start + 4) {
            dst.copy_from_slice(&encode(ty.scalar, value));
        }
    }

    /// Write `value` into the buffer. Surplus components are ignored,
    /// missing ones leave the existing bytes alone.
    pub fn write(&self, value: &ShaderValue) {
        let count = self.layout.ty.component_count();
        {
            let mut bytes = self.buffer.bytes.lock();
            match value {
                ShaderValue::Floats(v) => {
                    for (i, x) in v.iter().take(count).enumerate() {
                        self.put(&mut bytes, i, Component::F(*x));
                    }
                }
                ShaderValue::Ints(v) => {
                    for (i, x) in v.iter().take(count).enumerate() {
                        self.put(&mut bytes, i, Component::I(*x));
                    }
                }
                ShaderValue::Matrix(m) => {
                    let ty = self.layout.ty;
                    if ty.class == VariableClass::Matrix {
                        let rows = ty.rows as usize;
                        for c in 0..(ty.columns as usize).min(4) {
                            for r in 0..rows.min(4) {
                                self.put(&mut bytes, c * rows + r, Component::F(m.col(c)[r]));
                            }
                        }
                    } else {
                        for (i, x) in m.to_cols_array().iter().take(count).enumerate() {
                            self.put(&mut bytes, i, Component::F(*x));
                        }
                    }
                }
            }
        }
        self.changed.notify();
    }

    /// Current value, component by component.
    pub fn read_components(&self) -> Vec<f32> {
        let bytes = self.buffer.bytes.lock();
        let ty = &self.layout.ty;
        (0..ty.component_count())
            .map(|i| {
                let start = self.layout.offset as usize + ty.component_offset(i);
                bytes
                    .get(start..start + 4)
                    .and_then(|b| <[u8; 4]>::try_from(b).ok())
                    .map(|b| decode(ty.scalar, b))
                    .unwrap_or(0.0)
            })
            .collect()
    }

    pub fn source(&self) -> Option<BindSource> {
        self.source.lock().clone()
    }

    pub fn bind(&self, source: BindSource) {
        if let BindSource::Fixed(BindValue::Literal(value)) = &source {
            self.write(value);
        }
        *self.source.lock() = Some(source);
    }

    pub fn mark_as_script_override(&self) {
        let mut source = self.source.lock();
        let fallback = match source.take() {
            Some(BindSource::Fixed(value)) => Some(value),
            Some(BindSource::ScriptOverride { fallback }) => fallback,
            _ => None,
        };
        *source = Some(BindSource::ScriptOverride { fallback });
    }

    pub fn is_overridable(&self) -> bool {
        matches!(*self.source.lock(), Some(BindSource::ScriptOverride { .. }))
    }
}

#[derive(Clone)]
pub enum ConstantVariable {
    Live(Arc<ConstantSlot>),
    Null(Arc<str>),
}

impl ConstantVariable {
    pub fn name(&self) -> &str {
        match self {
            ConstantVariable::Live(slot) => &slot.layout.name,
            ConstantVariable::Null(name) => name,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConstantVariable::Null(_))
    }

    pub fn slot(&self) -> Option<&Arc<ConstantSlot>> {
        match self {
            ConstantVariable::Live(slot) => Some(slot),
            ConstantVariable::Null(_) => None,
        }
    }

    pub fn bind(&self, source: BindSource) {
        if let Some(slot) = self.slot() {
            slot.bind(source);
        }
    }

    /// Bind to a literal value.
    pub fn set(&self, value: ShaderValue) {
        self.bind(BindSource::Fixed(BindValue::Literal(value)));
    }

    pub fn mark_as_script_override(&self) {
        if let Some(slot) = self.slot() {
            slot.mark_as_script_override();
        }
    }

    pub fn source(&self) -> Option<BindSource> {
        self.slot().and_then(|s| s.source())
    }

    pub fn read_components(&self) -> Vec<f32> {
        self.slot().map(|s| s.read_components()).unwrap_or_default()
    }
}

impl fmt::Debug for ConstantVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantVariable::Live(slot) => write!(f, "ConstantVariable({})", slot.layout.name),
            ConstantVariable::Null(name) => write!(f, "ConstantVariable({name}, null)"),
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

pub struct ResourceSlot {
    pub layout: ResourceLayout,
    pub(crate) bind: Mutex<Option<ResourceBind>>,
    pub(crate) current: Mutex<Option<ResourceRef>>,
}

impl ResourceSlot {
    pub fn new(layout: ResourceLayout) -> Self {
        Self {
            layout,
            bind: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<ResourceRef> {
        self.current.lock().clone()
    }
}

#[derive(Clone)]
pub enum ResourceVariable {
    Live(Arc<ResourceSlot>),
    Null(Arc<str>),
}

impl ResourceVariable {
    pub fn name(&self) -> &str {
        match self {
            ResourceVariable::Live(slot) => &slot.layout.name,
            ResourceVariable::Null(name) => name,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ResourceVariable::Null(_))
    }

    pub fn bind(&self, bind: ResourceBind) {
        if let ResourceVariable::Live(slot) = self {
            if let ResourceBind::Fixed(resource) = &bind {
                *slot.current.lock() = Some(resource.clone());
            }
            *slot.bind.lock() = Some(bind);
        }
    }

    pub fn set(&self, resource: ResourceRef) {
        self.bind(ResourceBind::Fixed(resource));
    }

    pub fn bind_to_material(&self, param: &str, fallback: Option<ResourceRef>) {
        self.bind(ResourceBind::Material {
            param: param.to_string(),
            fallback,
        });
    }

    pub fn current(&self) -> Option<ResourceRef> {
        match self {
            ResourceVariable::Live(slot) => slot.current(),
            ResourceVariable::Null(_) => None,
        }
    }
}

pub struct SamplerSlot {
    pub layout: SamplerLayout,
    pub(crate) state: Mutex<SamplerState>,
}

#[derive(Clone)]
pub enum SamplerVariable {
    Live(Arc<SamplerSlot>),
    Null(Arc<str>),
}

impl SamplerVariable {
    pub fn new_slot(layout: SamplerLayout) -> Arc<SamplerSlot> {
        Arc::new(SamplerSlot {
            layout,
            state: Mutex::new(SamplerState::DEFAULT),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            SamplerVariable::Live(slot) => &slot.layout.name,
            SamplerVariable::Null(name) => name,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SamplerVariable::Null(_))
    }

    pub fn set(&self, state: SamplerState) {
        if let SamplerVariable::Live(slot) = self {
            *slot.state.lock() = state;
        }
    }

    pub fn state(&self) -> Option<SamplerState> {
        match self {
            SamplerVariable::Live(slot) => Some(*slot.state.lock()),
            SamplerVariable::Null(_) => None,
        }
    }
}

/// Writable texture or buffer.
pub struct UavSlot {
    pub layout: ResourceLayout,
    pub(crate) target: Mutex<Option<ResourceRef>>,
}

#[derive(Clone)]
pub enum UavVariable {
    Live(Arc<UavSlot>),
    Null(Arc<str>),
}

impl UavVariable {
    pub fn new_slot(layout: ResourceLayout) -> Arc<UavSlot> {
        Arc::new(UavSlot {
            layout,
            target: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            UavVariable::Live(slot) => &slot.layout.name,
            UavVariable::Null(name) => name,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, UavVariable::Null(_))
    }

    pub fn set(&self, target: ResourceRef) {
        if let UavVariable::Live(slot) = self {
            *slot.target.lock() = Some(target);
        }
    }

    pub fn current(&self) -> Option<ResourceRef> {
        match self {
            UavVariable::Live(slot) => slot.target.lock().clone(),
            UavVariable::Null(_) => None,
        }
    }

    pub fn bind_point(&self) -> Option<BindPoint> {
        match self {
            UavVariable::Live(slot) => Some(slot.layout.bind_point),
            UavVariable::Null(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflection::VariableType;

    fn slot(ty: VariableType, offset: u32, size: u32) -> ConstantSlot {
        let buffer = Arc::new(ConstantBufferData::new(ConstantBufferLayout {
            name: "globals".into(),
            bind_point: BindPoint { group: 0, binding: 0 },
            size: 128,
        }));
        ConstantSlot::new(
            ConstantLayout {
                name: "v".into(),
                buffer: 0,
                offset,
                size,
                ty,
            },
            buffer,
        )
    }

    fn vec4() -> VariableType {
        VariableType {
            class: VariableClass::Vector,
            scalar: ScalarKind::Float,
            rows: 1,
            columns: 4,
        }
    }

    #[test]
    fn test_write_lands_at_offset() {
        let s = slot(vec4(), 16, 16);
        s.write(&ShaderValue::Floats(vec![1.0, 2.0, 3.0, 4.0]));
        let bytes = s.buffer.snapshot();
        assert_eq!(&bytes[16..20], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[28..32], &4.0f32.to_le_bytes());
        assert!(bytes[..16].iter().all(|b| *b == 0));
        assert_eq!(s.read_components(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_partial_write_keeps_remaining_bytes() {
        let s = slot(vec4(), 0, 16);
        s.write(&ShaderValue::Floats(vec![1.0, 1.0, 1.0, 1.0]));
        s.write(&ShaderValue::Floats(vec![5.0, 6.0]));
        assert_eq!(s.read_components(), vec![5.0, 6.0, 1.0, 1.0]);
    }

    #[test]
    fn test_matrix_write_is_column_major() {
        let ty = VariableType {
            class: VariableClass::Matrix,
            scalar: ScalarKind::Float,
            rows: 4,
            columns: 4,
        };
        let s = slot(ty, 0, 64);
        let m = Mat4::from_translation(glam::Vec3::new(7.0, 8.0, 9.0));
        s.write(&ShaderValue::Matrix(m));
        assert_eq!(s.read_components(), m.to_cols_array().to_vec());
    }

    #[test]
    fn test_int_slot_converts_floats() {
        let s = slot(VariableType::scalar(ScalarKind::Sint), 0, 4);
        s.write(&ShaderValue::float(3.7));
        assert_eq!(&s.buffer.snapshot()[0..4], &3i32.to_le_bytes());
    }

    #[test]
    fn test_script_override_keeps_literal_as_fallback() {
        let s = slot(vec4(), 0, 16);
        s.bind(BindSource::Fixed(BindValue::Literal(ShaderValue::Floats(vec![1.0; 4]))));
        s.mark_as_script_override();
        assert!(s.is_overridable());
        match s.source() {
            Some(BindSource::ScriptOverride { fallback: Some(BindValue::Literal(v)) }) => {
                assert_eq!(v, ShaderValue::Floats(vec![1.0; 4]));
            }
            _ => panic!("expected override with literal fallback"),
        }
    }

    #[test]
    fn test_null_variable_ignores_mutation() {
        let v = ConstantVariable::Null(Arc::from("Missing"));
        v.set(ShaderValue::float(1.0));
        v.mark_as_script_override();
        assert!(v.is_null());
        assert!(v.source().is_none());
        assert!(v.read_components().is_empty());

        let r = ResourceVariable::Null(Arc::from("tex"));
        r.set(ResourceRef::DefaultDepth);
        assert!(r.current().is_none());
    }
}
