//! Reflection of a validated naga module: which uniforms, textures, buffers
//! and samplers an entry point uses, and where they live.

use std::fmt;

use naga::{AddressSpace, ImageClass, StorageAccess, TypeInner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Float,
    Sint,
    Uint,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableClass {
    Scalar,
    Vector,
    Matrix,
    /// Arrays, structs and anything else without a flat component layout.
    Other,
}

/// Shape of a constant variable. Vectors have one row; matrices are
/// `columns` x `rows` as in WGSL `matCxR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableType {
    pub class: VariableClass,
    pub scalar: ScalarKind,
    pub rows: u32,
    pub columns: u32,
}

impl VariableType {
    pub fn scalar(scalar: ScalarKind) -> Self {
        Self {
            class: VariableClass::Scalar,
            scalar,
            rows: 1,
            columns: 1,
        }
    }

    pub fn component_count(&self) -> usize {
        match self.class {
            VariableClass::Other => 0,
            _ => (self.rows * self.columns) as usize,
        }
    }

    /// Byte offset of component `index` (column-major for matrices) from the
    /// start of the variable, following WGSL uniform layout rules.
    pub fn component_offset(&self, index: usize) -> usize {
        match self.class {
            VariableClass::Matrix => {
                let rows = self.rows as usize;
                let column_stride = if rows == 2 { 8 } else { 16 };
                (index / rows) * column_stride + (index % rows) * 4
            }
            _ => index * 4,
        }
    }

    fn from_naga(inner: &TypeInner) -> Self {
        let scalar_kind = |s: &naga::Scalar| match s.kind {
            naga::ScalarKind::Sint | naga::ScalarKind::AbstractInt => ScalarKind::Sint,
            naga::ScalarKind::Uint => ScalarKind::Uint,
            naga::ScalarKind::Bool => ScalarKind::Bool,
            naga::ScalarKind::Float | naga::ScalarKind::AbstractFloat => ScalarKind::Float,
        };
        match inner {
            TypeInner::Scalar(s) => Self::scalar(scalar_kind(s)),
            TypeInner::Vector { size, scalar } => Self {
                class: VariableClass::Vector,
                scalar: scalar_kind(scalar),
                rows: 1,
                columns: *size as u32,
            },
            TypeInner::Matrix { columns, rows, scalar } => Self {
                class: VariableClass::Matrix,
                scalar: scalar_kind(scalar),
                rows: *rows as u32,
                columns: *columns as u32,
            },
            _ => Self {
                class: VariableClass::Other,
                scalar: ScalarKind::Float,
                rows: 0,
                columns: 0,
            },
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scalar = match self.scalar {
            ScalarKind::Float => "f32",
            ScalarKind::Sint => "i32",
            ScalarKind::Uint => "u32",
            ScalarKind::Bool => "bool",
        };
        match self.class {
            VariableClass::Scalar => f.write_str(scalar),
            VariableClass::Vector => write!(f, "vec{}<{scalar}>", self.columns),
            VariableClass::Matrix => write!(f, "mat{}x{}<{scalar}>", self.columns, self.rows),
            VariableClass::Other => f.write_str("aggregate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindPoint {
    pub group: u32,
    pub binding: u32,
}

impl From<&naga::ResourceBinding> for BindPoint {
    fn from(b: &naga::ResourceBinding) -> Self {
        Self {
            group: b.group,
            binding: b.binding,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantBufferLayout {
    pub name: String,
    pub bind_point: BindPoint,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantLayout {
    pub name: String,
    /// Index into [`ShaderReflection::constant_buffers`].
    pub buffer: usize,
    pub offset: u32,
    pub size: u32,
    pub ty: VariableType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture { multisampled: bool, depth: bool },
    StorageTexture { format: naga::StorageFormat },
    StorageBuffer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLayout {
    pub name: String,
    pub bind_point: BindPoint,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerLayout {
    pub name: String,
    pub bind_point: BindPoint,
    pub comparison: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderReflection {
    pub constant_buffers: Vec<ConstantBufferLayout>,
    pub constants: Vec<ConstantLayout>,
    /// Read-only textures and buffers.
    pub resources: Vec<ResourceLayout>,
    /// Writable textures and buffers.
    pub uavs: Vec<ResourceLayout>,
    pub samplers: Vec<SamplerLayout>,
}

/// Reflect the globals used by entry point `entry_index`.
pub fn reflect(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
    entry_index: usize,
) -> ShaderReflection {
    let usage = info.get_entry_point(entry_index);
    let mut out = ShaderReflection::default();

    for (handle, var) in module.global_variables.iter() {
        if usage[handle].is_empty() {
            continue;
        }
        let Some(binding) = &var.binding else {
            continue;
        };
        let name = var.name.clone().unwrap_or_default();
        let bind_point = BindPoint::from(binding);
        let inner = &module.types[var.ty].inner;

        match var.space {
            AddressSpace::Uniform => {
                let buffer = out.constant_buffers.len();
                out.constant_buffers.push(ConstantBufferLayout {
                    name: name.clone(),
                    bind_point,
                    size: inner.size(module.to_ctx()),
                });
                match inner {
                    TypeInner::Struct { members, .. } => {
                        for member in members {
                            let member_inner = &module.types[member.ty].inner;
                            out.constants.push(ConstantLayout {
                                name: member.name.clone().unwrap_or_default(),
                                buffer,
                                offset: member.offset,
                                size: member_inner.size(module.to_ctx()),
                                ty: VariableType::from_naga(member_inner),
                            });
                        }
                    }
                    other => out.constants.push(ConstantLayout {
                        name,
                        buffer,
                        offset: 0,
                        size: other.size(module.to_ctx()),
                        ty: VariableType::from_naga(other),
                    }),
                }
            }
            AddressSpace::Storage { access } => {
                let layout = ResourceLayout {
                    name,
                    bind_point,
                    kind: ResourceKind::StorageBuffer,
                };
                if access.contains(StorageAccess::STORE) {
                    out.uavs.push(layout);
                } else {
                    out.resources.push(layout);
                }
            }
            AddressSpace::Handle => match inner {
                TypeInner::Sampler { comparison } => out.samplers.push(SamplerLayout {
                    name,
                    bind_point,
                    comparison: *comparison,
                }),
                TypeInner::Image { class, .. } => match class {
                    ImageClass::Storage { format, access } => {
                        let layout = ResourceLayout {
                            name,
                            bind_point,
                            kind: ResourceKind::StorageTexture { format: *format },
                        };
                        if access.contains(StorageAccess::STORE) {
                            out.uavs.push(layout);
                        } else {
                            out.resources.push(layout);
                        }
                    }
                    ImageClass::Sampled { multi, .. } => out.resources.push(ResourceLayout {
                        name,
                        bind_point,
                        kind: ResourceKind::Texture {
                            multisampled: *multi,
                            depth: false,
                        },
                    }),
                    ImageClass::Depth { multi } => out.resources.push(ResourceLayout {
                        name,
                        bind_point,
                        kind: ResourceKind::Texture {
                            multisampled: *multi,
                            depth: true,
                        },
                    }),
                },
                _ => {}
            },
            _ => {}
        }
    }

    out
}
