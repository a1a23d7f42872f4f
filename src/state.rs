//! Immutable pipeline state objects.
//!
//! States are plain `Copy` values compared by value. The commonly used
//! configurations exist as associated constants so scripts and the render
//! context can refer to them without building new instances.

use std::hash::{Hash, Hasher};

macro_rules! state_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Case-insensitive lookup by name.
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.name().eq_ignore_ascii_case(name))
            }
        }
    };
}

state_enum!(FillMode {
    Solid => "Solid",
    Wireframe => "Wireframe",
});

state_enum!(CullMode {
    None => "None",
    Front => "Front",
    Back => "Back",
});

state_enum!(ComparisonFunction {
    Never => "Never",
    Less => "Less",
    Equal => "Equal",
    LessEqual => "LessEqual",
    Greater => "Greater",
    NotEqual => "NotEqual",
    GreaterEqual => "GreaterEqual",
    Always => "Always",
});

state_enum!(
    /// Blend factor applied to a source or destination term.
    BlendInput {
        Zero => "Zero",
        One => "One",
        SrcColour => "SrcColour",
        InvSrcColour => "InvSrcColour",
        SrcAlpha => "SrcAlpha",
        InvSrcAlpha => "InvSrcAlpha",
        DestAlpha => "DestAlpha",
        InvDestAlpha => "InvDestAlpha",
        DestColour => "DestColour",
        InvDestColour => "InvDestColour",
        SrcAlphaSat => "SrcAlphaSat",
        BlendFactor => "BlendFactor",
        InvBlendFactor => "InvBlendFactor",
        Src1Colour => "Src1Colour",
        InvSrc1Colour => "InvSrc1Colour",
        Src1Alpha => "Src1Alpha",
        InvSrc1Alpha => "InvSrc1Alpha",
    }
);

state_enum!(BlendOp {
    Add => "Add",
    Subtract => "Subtract",
    RevSubtract => "RevSubtract",
    Min => "Min",
    Max => "Max",
});

state_enum!(TextureFilter {
    Point => "Point",
    Linear => "Linear",
    Anisotropic => "Anisotropic",
});

state_enum!(TextureAddressMode {
    Wrap => "Wrap",
    Clamp => "Clamp",
    Mirror => "Mirror",
});

// ============================================================================
// Rasterizer
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RastState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub depth_bias: i32,
    pub slope_scale_depth_bias: f32,
    pub depth_bias_clamp: f32,
    pub enable_scissor: bool,
    pub enable_depth_clip: bool,
}

impl RastState {
    pub const DEFAULT: RastState = RastState {
        fill_mode: FillMode::Solid,
        cull_mode: CullMode::Back,
        depth_bias: 0,
        slope_scale_depth_bias: 0.0,
        depth_bias_clamp: 0.0,
        enable_scissor: false,
        enable_depth_clip: true,
    };

    /// State used for debug wire spheres.
    pub const WIREFRAME: RastState = RastState {
        fill_mode: FillMode::Wireframe,
        cull_mode: CullMode::None,
        ..RastState::DEFAULT
    };

    fn bits(&self) -> (FillMode, CullMode, i32, u32, u32, bool, bool) {
        (
            self.fill_mode,
            self.cull_mode,
            self.depth_bias,
            self.slope_scale_depth_bias.to_bits(),
            self.depth_bias_clamp.to_bits(),
            self.enable_scissor,
            self.enable_depth_clip,
        )
    }

    pub fn polygon_mode(&self) -> wgpu::PolygonMode {
        match self.fill_mode {
            FillMode::Solid => wgpu::PolygonMode::Fill,
            FillMode::Wireframe => wgpu::PolygonMode::Line,
        }
    }

    pub fn cull_face(&self) -> Option<wgpu::Face> {
        match self.cull_mode {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        }
    }

    pub fn depth_bias_state(&self) -> wgpu::DepthBiasState {
        wgpu::DepthBiasState {
            constant: self.depth_bias,
            slope_scale: self.slope_scale_depth_bias,
            clamp: self.depth_bias_clamp,
        }
    }
}

impl Default for RastState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl PartialEq for RastState {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for RastState {}

impl Hash for RastState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

// ============================================================================
// Depth/stencil
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub enable_depth_test: bool,
    pub enable_depth_write: bool,
    pub depth_func: ComparisonFunction,
}

impl DepthStencilState {
    pub const ENABLE_DEPTH: DepthStencilState = DepthStencilState {
        enable_depth_test: true,
        enable_depth_write: true,
        depth_func: ComparisonFunction::Less,
    };
    pub const DISABLE_DEPTH: DepthStencilState = DepthStencilState {
        enable_depth_test: false,
        enable_depth_write: false,
        depth_func: ComparisonFunction::Less,
    };
    pub const DISABLE_DEPTH_WRITE: DepthStencilState = DepthStencilState {
        enable_depth_test: true,
        enable_depth_write: false,
        depth_func: ComparisonFunction::Less,
    };
    pub const EQUAL_DEPTH: DepthStencilState = DepthStencilState {
        enable_depth_test: true,
        enable_depth_write: false,
        depth_func: ComparisonFunction::Equal,
    };
    pub const DEFAULT: DepthStencilState = DepthStencilState::ENABLE_DEPTH;

    pub fn to_wgpu(&self, format: wgpu::TextureFormat, rast: &RastState) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.enable_depth_write,
            depth_compare: if self.enable_depth_test {
                self.depth_func.to_wgpu()
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: rast.depth_bias_state(),
        }
    }
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ComparisonFunction {
    pub fn to_wgpu(self) -> wgpu::CompareFunction {
        match self {
            ComparisonFunction::Never => wgpu::CompareFunction::Never,
            ComparisonFunction::Less => wgpu::CompareFunction::Less,
            ComparisonFunction::Equal => wgpu::CompareFunction::Equal,
            ComparisonFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            ComparisonFunction::Greater => wgpu::CompareFunction::Greater,
            ComparisonFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            ComparisonFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            ComparisonFunction::Always => wgpu::CompareFunction::Always,
        }
    }
}

// ============================================================================
// Blending
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enable: bool,
    pub colour_src: BlendInput,
    pub colour_dest: BlendInput,
    pub colour_op: BlendOp,
    pub alpha_src: BlendInput,
    pub alpha_dest: BlendInput,
    pub alpha_op: BlendOp,
}

impl BlendState {
    pub const NO_BLENDING: BlendState = BlendState {
        enable: false,
        colour_src: BlendInput::One,
        colour_dest: BlendInput::Zero,
        colour_op: BlendOp::Add,
        alpha_src: BlendInput::One,
        alpha_dest: BlendInput::Zero,
        alpha_op: BlendOp::Add,
    };
    pub const ALPHA_BLENDING: BlendState = BlendState {
        enable: true,
        colour_src: BlendInput::SrcAlpha,
        colour_dest: BlendInput::InvSrcAlpha,
        colour_op: BlendOp::Add,
        alpha_src: BlendInput::SrcAlpha,
        alpha_dest: BlendInput::InvSrcAlpha,
        alpha_op: BlendOp::Add,
    };
    pub const ADDITIVE_BLENDING: BlendState = BlendState {
        enable: true,
        colour_src: BlendInput::One,
        colour_dest: BlendInput::One,
        colour_op: BlendOp::Add,
        alpha_src: BlendInput::One,
        alpha_dest: BlendInput::One,
        alpha_op: BlendOp::Add,
    };
    pub const DEFAULT: BlendState = BlendState::NO_BLENDING;

    /// `None` when blending is disabled.
    pub fn to_wgpu(&self) -> Option<wgpu::BlendState> {
        if !self.enable {
            return None;
        }
        Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: self.colour_src.to_wgpu(),
                dst_factor: self.colour_dest.to_wgpu(),
                operation: self.colour_op.to_wgpu(),
            },
            alpha: wgpu::BlendComponent {
                src_factor: self.alpha_src.to_wgpu(),
                dst_factor: self.alpha_dest.to_wgpu(),
                operation: self.alpha_op.to_wgpu(),
            },
        })
    }
}

impl Default for BlendState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BlendInput {
    pub fn to_wgpu(self) -> wgpu::BlendFactor {
        use wgpu::BlendFactor as F;
        match self {
            BlendInput::Zero => F::Zero,
            BlendInput::One => F::One,
            BlendInput::SrcColour => F::Src,
            BlendInput::InvSrcColour => F::OneMinusSrc,
            BlendInput::SrcAlpha => F::SrcAlpha,
            BlendInput::InvSrcAlpha => F::OneMinusSrcAlpha,
            BlendInput::DestAlpha => F::DstAlpha,
            BlendInput::InvDestAlpha => F::OneMinusDstAlpha,
            BlendInput::DestColour => F::Dst,
            BlendInput::InvDestColour => F::OneMinusDst,
            BlendInput::SrcAlphaSat => F::SrcAlphaSaturated,
            BlendInput::BlendFactor => F::Constant,
            BlendInput::InvBlendFactor => F::OneMinusConstant,
            BlendInput::Src1Colour => F::Src1,
            BlendInput::InvSrc1Colour => F::OneMinusSrc1,
            BlendInput::Src1Alpha => F::Src1Alpha,
            BlendInput::InvSrc1Alpha => F::OneMinusSrc1Alpha,
        }
    }
}

impl BlendOp {
    pub fn to_wgpu(self) -> wgpu::BlendOperation {
        match self {
            BlendOp::Add => wgpu::BlendOperation::Add,
            BlendOp::Subtract => wgpu::BlendOperation::Subtract,
            BlendOp::RevSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOp::Min => wgpu::BlendOperation::Min,
            BlendOp::Max => wgpu::BlendOperation::Max,
        }
    }
}

// ============================================================================
// Sampling
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub filter: TextureFilter,
    pub address_mode: TextureAddressMode,
}

impl SamplerState {
    pub const LINEAR_WRAP: SamplerState = SamplerState {
        filter: TextureFilter::Linear,
        address_mode: TextureAddressMode::Wrap,
    };
    pub const LINEAR_CLAMP: SamplerState = SamplerState {
        filter: TextureFilter::Linear,
        address_mode: TextureAddressMode::Clamp,
    };
    pub const POINT_WRAP: SamplerState = SamplerState {
        filter: TextureFilter::Point,
        address_mode: TextureAddressMode::Wrap,
    };
    pub const POINT_CLAMP: SamplerState = SamplerState {
        filter: TextureFilter::Point,
        address_mode: TextureAddressMode::Clamp,
    };
    pub const DEFAULT: SamplerState = SamplerState::LINEAR_WRAP;

    pub fn to_wgpu(&self) -> wgpu::SamplerDescriptor<'static> {
        let address = match self.address_mode {
            TextureAddressMode::Wrap => wgpu::AddressMode::Repeat,
            TextureAddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
            TextureAddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
        };
        let (filter, anisotropy_clamp) = match self.filter {
            TextureFilter::Point => (wgpu::FilterMode::Nearest, 1),
            TextureFilter::Linear => (wgpu::FilterMode::Linear, 1),
            TextureFilter::Anisotropic => (wgpu::FilterMode::Linear, 16),
        };
        wgpu::SamplerDescriptor {
            label: Some("script sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            anisotropy_clamp,
            ..Default::default()
        }
    }
}

impl Default for SamplerState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Rasterizer, depth and blend state for one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PipelineState {
    pub rast: RastState,
    pub depth: DepthStencilState,
    pub blend: BlendState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_canonical_instances() {
        assert_eq!(RastState::default(), RastState::DEFAULT);
        assert_eq!(DepthStencilState::default(), DepthStencilState::ENABLE_DEPTH);
        assert_eq!(BlendState::default(), BlendState::NO_BLENDING);
        assert_eq!(SamplerState::default(), SamplerState::LINEAR_WRAP);
    }

    #[test]
    fn test_rast_default_values() {
        let r = RastState::DEFAULT;
        assert_eq!(r.fill_mode, FillMode::Solid);
        assert_eq!(r.cull_mode, CullMode::Back);
        assert_eq!(r.depth_bias, 0);
        assert!(!r.enable_scissor);
        assert!(r.enable_depth_clip);
    }

    #[test]
    fn test_value_equal_states_are_interchangeable() {
        let built = BlendState {
            enable: true,
            colour_src: BlendInput::SrcAlpha,
            colour_dest: BlendInput::InvSrcAlpha,
            colour_op: BlendOp::Add,
            alpha_src: BlendInput::SrcAlpha,
            alpha_dest: BlendInput::InvSrcAlpha,
            alpha_op: BlendOp::Add,
        };
        assert_eq!(built, BlendState::ALPHA_BLENDING);
        assert_eq!(built.to_wgpu(), BlendState::ALPHA_BLENDING.to_wgpu());
    }

    #[test]
    fn test_disabled_blend_has_no_wgpu_state() {
        assert!(BlendState::NO_BLENDING.to_wgpu().is_none());
        let additive = BlendState::ADDITIVE_BLENDING.to_wgpu().unwrap();
        assert_eq!(additive.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(additive.color.dst_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn test_depth_states() {
        assert!(!DepthStencilState::DISABLE_DEPTH_WRITE.enable_depth_write);
        assert!(DepthStencilState::DISABLE_DEPTH_WRITE.enable_depth_test);
        assert_eq!(DepthStencilState::EQUAL_DEPTH.depth_func, ComparisonFunction::Equal);

        let disabled = DepthStencilState::DISABLE_DEPTH
            .to_wgpu(wgpu::TextureFormat::Depth32Float, &RastState::DEFAULT);
        assert_eq!(disabled.depth_compare, wgpu::CompareFunction::Always);
        assert!(!disabled.depth_write_enabled);
    }

    #[test]
    fn test_enum_names() {
        assert_eq!(BlendInput::ALL.len(), 17);
        assert_eq!(ComparisonFunction::ALL.len(), 8);
        assert_eq!(BlendOp::from_name("revsubtract"), Some(BlendOp::RevSubtract));
        assert_eq!(CullMode::from_name("sideways"), None);
    }

    #[test]
    fn test_sampler_conversion() {
        let desc = SamplerState::POINT_CLAMP.to_wgpu();
        assert_eq!(desc.mag_filter, wgpu::FilterMode::Nearest);
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToEdge);
    }
}
