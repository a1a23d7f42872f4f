//! Variable binding: where each shader variable gets its value from, and how
//! that value is resolved for one draw.
//!
//! Precedence for a constant variable on each draw:
//! 1. the draw's override map, if the variable is a script override;
//! 2. the variable's own source (literal, user variable, semantic, material);
//! 3. nothing, leaving the buffer bytes as they were.

use std::fmt;
use std::path::PathBuf;

use glam::Mat4;
use rhai::Map;

use crate::coerce;
use crate::error::ConversionError;
use crate::logging::{LogCategory, Logger, OnceFilter};
use crate::resources::ResourceRef;
use crate::scene::Material;
use crate::shader::variable::{ConstantSlot, ResourceSlot, ShaderValue};
use crate::user_vars::UserVar;
use crate::view::{inverse_or_identity, ViewInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticBind {
    WorldToProjectionMatrix,
    ProjectionToWorldMatrix,
    LocalToWorldMatrix,
    WorldToLocalMatrix,
    LocalToWorldInverseTransposeMatrix,
    CameraPosition,
}

impl SemanticBind {
    pub const ALL: [SemanticBind; 6] = [
        SemanticBind::WorldToProjectionMatrix,
        SemanticBind::ProjectionToWorldMatrix,
        SemanticBind::LocalToWorldMatrix,
        SemanticBind::WorldToLocalMatrix,
        SemanticBind::LocalToWorldInverseTransposeMatrix,
        SemanticBind::CameraPosition,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SemanticBind::WorldToProjectionMatrix => "WorldToProjectionMatrix",
            SemanticBind::ProjectionToWorldMatrix => "ProjectionToWorldMatrix",
            SemanticBind::LocalToWorldMatrix => "LocalToWorldMatrix",
            SemanticBind::WorldToLocalMatrix => "WorldToLocalMatrix",
            SemanticBind::LocalToWorldInverseTransposeMatrix => "LocalToWorldInverseTransposeMatrix",
            SemanticBind::CameraPosition => "CameraPosition",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Whether the value depends on the primitive being drawn.
    pub fn needs_primitive(self) -> bool {
        matches!(
            self,
            SemanticBind::LocalToWorldMatrix
                | SemanticBind::WorldToLocalMatrix
                | SemanticBind::LocalToWorldInverseTransposeMatrix
        )
    }
}

/// A fixed value: either a literal or a live user variable.
#[derive(Clone)]
pub enum BindValue {
    Literal(ShaderValue),
    UserVar(UserVar),
}

impl BindValue {
    pub fn current(&self) -> Option<ShaderValue> {
        match self {
            BindValue::Literal(value) => Some(value.clone()),
            BindValue::UserVar(var) => var.components().map(ShaderValue::Floats),
        }
    }
}

impl fmt::Debug for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Literal(value) => write!(f, "Literal({value:?})"),
            BindValue::UserVar(var) => write!(f, "UserVar({})", var.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BindSource {
    Fixed(BindValue),
    /// Value comes from each draw's override map, else from `fallback`.
    ScriptOverride { fallback: Option<BindValue> },
    Semantic(SemanticBind),
    /// A `float4` parameter of the drawn primitive's material.
    Material { param: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceBind {
    Fixed(ResourceRef),
    /// A texture of the drawn primitive's material, else `fallback`.
    Material {
        param: String,
        fallback: Option<ResourceRef>,
    },
}

/// The primitive a draw is for.
#[derive(Clone, Copy)]
pub struct DrawTarget<'a> {
    pub local_to_world: Mat4,
    pub material: Option<&'a Material>,
}

pub struct ResolveContext<'a> {
    pub view: &'a ViewInfo,
    pub target: Option<DrawTarget<'a>>,
    pub overrides: &'a Map,
    pub logger: &'a dyn Logger,
    pub once: &'a OnceFilter,
    /// Resolves material texture paths against the project.
    pub resolve_path: &'a dyn Fn(&std::path::Path) -> PathBuf,
}

pub fn semantic_value(semantic: SemanticBind, ctx: &ResolveContext) -> Option<ShaderValue> {
    let local_to_world = || ctx.target.map(|t| t.local_to_world);
    let matrix = match semantic {
        SemanticBind::WorldToProjectionMatrix => ctx.view.world_to_projection(),
        SemanticBind::ProjectionToWorldMatrix => ctx.view.projection_to_world(),
        SemanticBind::LocalToWorldMatrix => local_to_world()?,
        SemanticBind::WorldToLocalMatrix => inverse_or_identity(&local_to_world()?),
        SemanticBind::LocalToWorldInverseTransposeMatrix => {
            inverse_or_identity(&local_to_world()?).transpose()
        }
        SemanticBind::CameraPosition => {
            return Some(ShaderValue::Floats(ctx.view.eye_position.to_array().to_vec()));
        }
    };
    Some(ShaderValue::Matrix(matrix))
}

/// Resolve one constant variable for a draw and write the result into its
/// buffer. A value in the override map that can't be converted is an error.
pub fn resolve_constant(slot: &ConstantSlot, ctx: &ResolveContext) -> Result<(), ConversionError> {
    let name = slot.layout.name.as_str();
    let source = slot.source();

    let value = match &source {
        Some(BindSource::ScriptOverride { fallback }) => match coerce::map_get(ctx.overrides, name) {
            Some(value) => Some(coerce::to_shader_value(value, &slot.layout.ty)?),
            None => fallback.as_ref().and_then(BindValue::current),
        },
        Some(BindSource::Fixed(value)) => value.current(),
        Some(BindSource::Semantic(semantic)) => semantic_value(*semantic, ctx),
        Some(BindSource::Material { param }) => ctx.target.and_then(|t| t.material).and_then(|m| {
            let value = m.params.get(param).map(|v| ShaderValue::Floats(v.to_array().to_vec()));
            if value.is_none() {
                ctx.once.warn_once(
                    ctx.logger,
                    LogCategory::Render,
                    &format!("Material '{}' has no parameter '{param}'.", m.name),
                );
            }
            value
        }),
        None => None,
    };

    if !matches!(source, Some(BindSource::ScriptOverride { .. })) && ctx.overrides.contains_key(name) {
        ctx.once.warn_once(
            ctx.logger,
            LogCategory::Render,
            &format!("Shader variable '{name}' is not marked as a script override; override ignored."),
        );
    }

    if let Some(value) = value {
        slot.write(&value);
    }
    Ok(())
}

/// Resolve a resource variable for a draw. Unresolved binds keep the last
/// resolved resource.
pub fn resolve_resource(slot: &ResourceSlot, ctx: &ResolveContext) -> Option<ResourceRef> {
    let bind = slot.bind.lock().clone();
    let resolved = match bind {
        Some(ResourceBind::Fixed(resource)) => Some(resource),
        Some(ResourceBind::Material { param, fallback }) => ctx
            .target
            .and_then(|t| t.material)
            .and_then(|m| m.textures.get(&param))
            .map(|path| ResourceRef::File {
                path: (ctx.resolve_path)(path),
                mips: true,
            })
            .or(fallback),
        None => None,
    };
    let mut current = slot.current.lock();
    if resolved.is_some() {
        *current = resolved;
    }
    current.clone()
}
