//! User properties: named, observable, optionally editable values shown to
//! the user (script user variables, unbound shader variables, primitive
//! transforms).
//!
//! A property is a scalar, a vector of scalars or a matrix of scalars.
//! Composite properties are built from scalar leaves; subscribing to a
//! composite subscribes to every leaf, so each leaf mutation is reported
//! exactly once.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ConversionError;
use crate::observable::{Callback, ChangeNotifier, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Float,
    Int,
    Bool,
    String,
    Choice,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    /// Used by both string and choice properties.
    String(String),
}

impl ScalarValue {
    /// Numeric view used when the value feeds a shader variable.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ScalarValue::Float(v) => Some(*v),
            ScalarValue::Int(v) => Some(*v as f32),
            ScalarValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            ScalarValue::String(_) => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::Float(_) => "float",
            ScalarValue::Int(_) => "int",
            ScalarValue::Bool(_) => "bool",
            ScalarValue::String(_) => "string",
        }
    }

    fn fits(&self, ty: ScalarType) -> bool {
        matches!(
            (self, ty),
            (ScalarValue::Float(_), ScalarType::Float)
                | (ScalarValue::Int(_), ScalarType::Int)
                | (ScalarValue::Bool(_), ScalarType::Bool)
                | (ScalarValue::String(_), ScalarType::String)
                | (ScalarValue::String(_), ScalarType::Choice)
        )
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::String(v) => f.write_str(v),
        }
    }
}

pub enum PropertyKind<'a> {
    Scalar(&'a dyn ScalarProperty),
    Vector(&'a CompositeProperty),
    Matrix(&'a CompositeProperty),
}

pub trait UserProperty: Send + Sync {
    fn name(&self) -> &str;
    fn is_read_only(&self) -> bool;
    fn subscribe(&self, callback: Callback) -> Subscription;
    fn kind(&self) -> PropertyKind<'_>;
}

pub trait ScalarProperty: UserProperty {
    fn scalar_type(&self) -> ScalarType;
    fn get(&self) -> ScalarValue;
    fn set(&self, value: ScalarValue) -> Result<(), ConversionError>;

    /// Allowed values for choice properties.
    fn choices(&self) -> Option<&[String]> {
        None
    }
}

/// Current value as text: `1.5`, or `(1, 2, 3)` for composites.
pub fn display_value(property: &dyn UserProperty) -> String {
    match property.kind() {
        PropertyKind::Scalar(scalar) => scalar.get().to_string(),
        PropertyKind::Vector(composite) | PropertyKind::Matrix(composite) => {
            let parts: Vec<String> = composite.components().iter().map(|c| c.get().to_string()).collect();
            format!("({})", parts.join(", "))
        }
    }
}

/// Copy the value of `source` into `target` as far as their shapes allow.
/// Vectors copy the leading components both have, matrices the cells both
/// have. Read-only targets are never written. Returns whether anything was
/// copied.
pub fn try_copy_from(target: &dyn UserProperty, source: &dyn UserProperty) -> bool {
    if target.is_read_only() {
        return false;
    }
    match (target.kind(), source.kind()) {
        (PropertyKind::Scalar(t), PropertyKind::Scalar(s)) => copy_scalar(t, s),
        (PropertyKind::Vector(t), PropertyKind::Vector(s)) => t
            .components
            .iter()
            .zip(&s.components)
            .fold(false, |any, (t, s)| copy_scalar(t.as_ref(), s.as_ref()) | any),
        (PropertyKind::Matrix(t), PropertyKind::Matrix(s)) => {
            let mut any = false;
            for row in 0..t.rows().min(s.rows()) {
                for column in 0..t.columns().min(s.columns()) {
                    if let (Some(t), Some(s)) = (t.component(row, column), s.component(row, column)) {
                        any |= copy_scalar(t.as_ref(), s.as_ref());
                    }
                }
            }
            any
        }
        _ => false,
    }
}

fn copy_scalar(target: &dyn ScalarProperty, source: &dyn ScalarProperty) -> bool {
    !target.is_read_only() && target.scalar_type() == source.scalar_type() && target.set(source.get()).is_ok()
}

// ============================================================================
// Stored scalars
// ============================================================================

/// A scalar that owns its value.
pub struct ValueProperty {
    name: String,
    scalar_type: ScalarType,
    read_only: bool,
    choices: Option<Vec<String>>,
    value: Mutex<ScalarValue>,
    changed: ChangeNotifier,
}

impl ValueProperty {
    pub fn new(name: impl Into<String>, value: ScalarValue) -> Self {
        let scalar_type = match value {
            ScalarValue::Float(_) => ScalarType::Float,
            ScalarValue::Int(_) => ScalarType::Int,
            ScalarValue::Bool(_) => ScalarType::Bool,
            ScalarValue::String(_) => ScalarType::String,
        };
        Self {
            name: name.into(),
            scalar_type,
            read_only: false,
            choices: None,
            value: Mutex::new(value),
            changed: ChangeNotifier::new(),
        }
    }

    /// A string property restricted to `choices`. The initial value must be
    /// one of them.
    pub fn choice(
        name: impl Into<String>,
        choices: Vec<String>,
        initial: &str,
    ) -> Result<Self, ConversionError> {
        if !choices.iter().any(|c| c == initial) {
            return Err(ConversionError::Invalid(format!(
                "'{initial}' is not one of the available choices"
            )));
        }
        let mut prop = Self::new(name, ScalarValue::String(initial.to_string()));
        prop.scalar_type = ScalarType::Choice;
        prop.choices = Some(choices);
        Ok(prop)
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Host-side update; works on read-only properties too.
    pub fn update(&self, value: ScalarValue) -> Result<(), ConversionError> {
        if !value.fits(self.scalar_type) {
            return Err(ConversionError::mismatch(
                format!("{:?}", self.scalar_type),
                value.type_name(),
            ));
        }
        if let (Some(choices), ScalarValue::String(s)) = (&self.choices, &value) {
            if !choices.contains(s) {
                return Err(ConversionError::Invalid(format!(
                    "'{s}' is not a valid choice for {}",
                    self.name
                )));
            }
        }
        {
            let mut current = self.value.lock();
            if *current == value {
                return Ok(());
            }
            *current = value;
        }
        self.changed.notify();
        Ok(())
    }
}

impl UserProperty for ValueProperty {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn subscribe(&self, callback: Callback) -> Subscription {
        self.changed.subscribe(callback)
    }

    fn kind(&self) -> PropertyKind<'_> {
        PropertyKind::Scalar(self)
    }
}

impl ScalarProperty for ValueProperty {
    fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    fn get(&self) -> ScalarValue {
        self.value.lock().clone()
    }

    fn set(&self, value: ScalarValue) -> Result<(), ConversionError> {
        if self.read_only {
            return Err(ConversionError::Invalid(format!("{} is read-only", self.name)));
        }
        self.update(value)
    }

    fn choices(&self) -> Option<&[String]> {
        self.choices.as_deref()
    }
}

// ============================================================================
// Accessor scalars
// ============================================================================

pub type Getter = Arc<dyn Fn() -> ScalarValue + Send + Sync>;
pub type Setter = Arc<dyn Fn(ScalarValue) + Send + Sync>;

/// A scalar whose storage lives elsewhere and is reached through closures.
pub struct AccessorProperty {
    name: String,
    scalar_type: ScalarType,
    get: Getter,
    set: Option<Setter>,
    changed: ChangeNotifier,
}

impl AccessorProperty {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType, get: Getter, set: Option<Setter>) -> Self {
        Self {
            name: name.into(),
            scalar_type,
            get,
            set,
            changed: ChangeNotifier::new(),
        }
    }
}

impl UserProperty for AccessorProperty {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_read_only(&self) -> bool {
        self.set.is_none()
    }

    fn subscribe(&self, callback: Callback) -> Subscription {
        self.changed.subscribe(callback)
    }

    fn kind(&self) -> PropertyKind<'_> {
        PropertyKind::Scalar(self)
    }
}

impl ScalarProperty for AccessorProperty {
    fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    fn get(&self) -> ScalarValue {
        (self.get)()
    }

    fn set(&self, value: ScalarValue) -> Result<(), ConversionError> {
        let Some(setter) = &self.set else {
            return Err(ConversionError::Invalid(format!("{} is read-only", self.name)));
        };
        if !value.fits(self.scalar_type) {
            return Err(ConversionError::mismatch(
                format!("{:?}", self.scalar_type),
                value.type_name(),
            ));
        }
        setter(value);
        self.changed.notify();
        Ok(())
    }
}

// ============================================================================
// Composites
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeShape {
    Vector,
    /// Components are stored row-major: index = row * columns + column.
    Matrix { rows: usize, columns: usize },
}

pub struct CompositeProperty {
    name: String,
    shape: CompositeShape,
    components: Vec<Arc<dyn ScalarProperty>>,
}

impl CompositeProperty {
    pub fn vector(name: impl Into<String>, components: Vec<Arc<dyn ScalarProperty>>) -> Self {
        Self {
            name: name.into(),
            shape: CompositeShape::Vector,
            components,
        }
    }

    pub fn matrix(
        name: impl Into<String>,
        rows: usize,
        columns: usize,
        components: Vec<Arc<dyn ScalarProperty>>,
    ) -> Self {
        debug_assert_eq!(rows * columns, components.len());
        Self {
            name: name.into(),
            shape: CompositeShape::Matrix { rows, columns },
            components,
        }
    }

    pub fn components(&self) -> &[Arc<dyn ScalarProperty>] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn rows(&self) -> usize {
        match self.shape {
            CompositeShape::Vector => 1,
            CompositeShape::Matrix { rows, .. } => rows,
        }
    }

    pub fn columns(&self) -> usize {
        match self.shape {
            CompositeShape::Vector => self.components.len(),
            CompositeShape::Matrix { columns, .. } => columns,
        }
    }

    pub fn component(&self, row: usize, column: usize) -> Option<&Arc<dyn ScalarProperty>> {
        if row >= self.rows() || column >= self.columns() {
            return None;
        }
        self.components.get(row * self.columns() + column)
    }

    /// Numeric values of all components in storage order.
    pub fn values_f32(&self) -> Vec<f32> {
        self.components
            .iter()
            .map(|c| c.get().as_f32().unwrap_or(0.0))
            .collect()
    }
}

impl UserProperty for CompositeProperty {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_read_only(&self) -> bool {
        self.components.iter().all(|c| c.is_read_only())
    }

    fn subscribe(&self, callback: Callback) -> Subscription {
        Subscription::merge(
            self.components
                .iter()
                .map(|c| c.subscribe(callback.clone()))
                .collect(),
        )
    }

    fn kind(&self) -> PropertyKind<'_> {
        match self.shape {
            CompositeShape::Vector => PropertyKind::Vector(self),
            CompositeShape::Matrix { .. } => PropertyKind::Matrix(self),
        }
    }
}

/// One `f32` field of a struct exposed through [`struct_property`].
pub struct StructField<T> {
    pub name: &'static str,
    pub get: fn(&T) -> f32,
    pub set: fn(&mut T, f32),
}

/// Expose fields of an opaque value as a vector property. Each field reads
/// the whole value, changes its field and writes the whole value back.
pub fn struct_property<T: 'static>(
    name: impl Into<String>,
    get: Arc<dyn Fn() -> T + Send + Sync>,
    set: Arc<dyn Fn(T) + Send + Sync>,
    fields: Vec<StructField<T>>,
) -> CompositeProperty {
    let components = fields
        .into_iter()
        .map(|field| {
            let read = get.clone();
            let (read_whole, write_whole) = (get.clone(), set.clone());
            let getter: Getter = Arc::new(move || ScalarValue::Float((field.get)(&read())));
            let setter: Setter = Arc::new(move |value: ScalarValue| {
                if let Some(v) = value.as_f32() {
                    let mut whole = read_whole();
                    (field.set)(&mut whole, v);
                    write_whole(whole);
                }
            });
            Arc::new(AccessorProperty::new(field.name, ScalarType::Float, getter, Some(setter)))
                as Arc<dyn ScalarProperty>
        })
        .collect();
    CompositeProperty::vector(name, components)
}
