//! Pixel/element formats used by script-created textures and buffers.
//!
//! Each format knows its byte size and component count, how to encode a
//! script-supplied element value into bytes, and which wgpu texture format
//! (if any) it maps to.

use std::fmt;
use std::str::FromStr;

use crate::error::ConversionError;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R32G32B32A32_Float,
    R32G32B32_Float,
    R16G16B16A16_Float,
    R16G16B16A16_UNorm,
    R8G8B8A8_UNorm,
    R8G8B8A8_UNorm_SRGB,
    R8G8B8A8_UInt,
    R8G8B8A8_SNorm,
    R8G8B8A8_SInt,
    R32_Float,
    R16_Float,
    R8_UNorm,
    R8_UInt,
    R8_SNorm,
    R8_SInt,
}

/// How a single component is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Float32,
    Float16,
    UNorm16,
    UNorm8,
    SNorm8,
    UInt8,
    SInt8,
}

impl ComponentKind {
    pub fn byte_size(self) -> usize {
        match self {
            ComponentKind::Float32 => 4,
            ComponentKind::Float16 | ComponentKind::UNorm16 => 2,
            _ => 1,
        }
    }

    fn encode(self, value: f32, out: &mut Vec<u8>) {
        match self {
            ComponentKind::Float32 => out.extend_from_slice(&value.to_le_bytes()),
            ComponentKind::Float16 => {
                out.extend_from_slice(&half::f16::from_f32(value).to_le_bytes())
            }
            ComponentKind::UNorm16 => {
                let v = (value.clamp(0.0, 1.0) * 65535.0).round() as u16;
                out.extend_from_slice(&v.to_le_bytes());
            }
            ComponentKind::UNorm8 => out.push((value.clamp(0.0, 1.0) * 255.0).round() as u8),
            ComponentKind::SNorm8 => {
                out.push(((value.clamp(-1.0, 1.0) * 127.0).round() as i8) as u8)
            }
            ComponentKind::UInt8 => out.push(value.clamp(0.0, 255.0) as u8),
            ComponentKind::SInt8 => out.push((value.clamp(-128.0, 127.0) as i8) as u8),
        }
    }
}

impl Format {
    pub const ALL: [Format; 15] = [
        Format::R32G32B32A32_Float,
        Format::R32G32B32_Float,
        Format::R16G16B16A16_Float,
        Format::R16G16B16A16_UNorm,
        Format::R8G8B8A8_UNorm,
        Format::R8G8B8A8_UNorm_SRGB,
        Format::R8G8B8A8_UInt,
        Format::R8G8B8A8_SNorm,
        Format::R8G8B8A8_SInt,
        Format::R32_Float,
        Format::R16_Float,
        Format::R8_UNorm,
        Format::R8_UInt,
        Format::R8_SNorm,
        Format::R8_SInt,
    ];

    /// Size of one element in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            Format::R32G32B32A32_Float => 16,
            Format::R32G32B32_Float => 12,
            Format::R16G16B16A16_Float | Format::R16G16B16A16_UNorm => 8,
            Format::R8G8B8A8_UNorm
            | Format::R8G8B8A8_UNorm_SRGB
            | Format::R8G8B8A8_UInt
            | Format::R8G8B8A8_SNorm
            | Format::R8G8B8A8_SInt
            | Format::R32_Float => 4,
            Format::R16_Float => 2,
            Format::R8_UNorm | Format::R8_UInt | Format::R8_SNorm | Format::R8_SInt => 1,
        }
    }

    pub fn components(self) -> usize {
        match self {
            Format::R32G32B32A32_Float
            | Format::R16G16B16A16_Float
            | Format::R16G16B16A16_UNorm
            | Format::R8G8B8A8_UNorm
            | Format::R8G8B8A8_UNorm_SRGB
            | Format::R8G8B8A8_UInt
            | Format::R8G8B8A8_SNorm
            | Format::R8G8B8A8_SInt => 4,
            Format::R32G32B32_Float => 3,
            Format::R32_Float
            | Format::R16_Float
            | Format::R8_UNorm
            | Format::R8_UInt
            | Format::R8_SNorm
            | Format::R8_SInt => 1,
        }
    }

    pub fn component_kind(self) -> ComponentKind {
        match self {
            Format::R32G32B32A32_Float | Format::R32G32B32_Float | Format::R32_Float => {
                ComponentKind::Float32
            }
            Format::R16G16B16A16_Float | Format::R16_Float => ComponentKind::Float16,
            Format::R16G16B16A16_UNorm => ComponentKind::UNorm16,
            Format::R8G8B8A8_UNorm | Format::R8G8B8A8_UNorm_SRGB | Format::R8_UNorm => {
                ComponentKind::UNorm8
            }
            Format::R8G8B8A8_UInt | Format::R8_UInt => ComponentKind::UInt8,
            Format::R8G8B8A8_SNorm | Format::R8_SNorm => ComponentKind::SNorm8,
            Format::R8G8B8A8_SInt | Format::R8_SInt => ComponentKind::SInt8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::R32G32B32A32_Float => "R32G32B32A32_Float",
            Format::R32G32B32_Float => "R32G32B32_Float",
            Format::R16G16B16A16_Float => "R16G16B16A16_Float",
            Format::R16G16B16A16_UNorm => "R16G16B16A16_UNorm",
            Format::R8G8B8A8_UNorm => "R8G8B8A8_UNorm",
            Format::R8G8B8A8_UNorm_SRGB => "R8G8B8A8_UNorm_SRGB",
            Format::R8G8B8A8_UInt => "R8G8B8A8_UInt",
            Format::R8G8B8A8_SNorm => "R8G8B8A8_SNorm",
            Format::R8G8B8A8_SInt => "R8G8B8A8_SInt",
            Format::R32_Float => "R32_Float",
            Format::R16_Float => "R16_Float",
            Format::R8_UNorm => "R8_UNorm",
            Format::R8_UInt => "R8_UInt",
            Format::R8_SNorm => "R8_SNorm",
            Format::R8_SInt => "R8_SInt",
        }
    }

    /// Encode one element. Missing components are zero, extra ones ignored.
    pub fn encode_element(self, components: &[f32], out: &mut Vec<u8>) {
        let kind = self.component_kind();
        for i in 0..self.components() {
            kind.encode(components.get(i).copied().unwrap_or(0.0), out);
        }
    }

    /// Texture format used when this format backs a texture. Three-component
    /// float has no texture equivalent and is buffer-only.
    pub fn to_wgpu(self) -> Option<wgpu::TextureFormat> {
        use wgpu::TextureFormat as T;
        Some(match self {
            Format::R32G32B32A32_Float => T::Rgba32Float,
            Format::R32G32B32_Float => return None,
            Format::R16G16B16A16_Float => T::Rgba16Float,
            Format::R16G16B16A16_UNorm => T::Rgba16Unorm,
            Format::R8G8B8A8_UNorm => T::Rgba8Unorm,
            Format::R8G8B8A8_UNorm_SRGB => T::Rgba8UnormSrgb,
            Format::R8G8B8A8_UInt => T::Rgba8Uint,
            Format::R8G8B8A8_SNorm => T::Rgba8Snorm,
            Format::R8G8B8A8_SInt => T::Rgba8Sint,
            Format::R32_Float => T::R32Float,
            Format::R16_Float => T::R16Float,
            Format::R8_UNorm => T::R8Unorm,
            Format::R8_UInt => T::R8Uint,
            Format::R8_SNorm => T::R8Snorm,
            Format::R8_SInt => T::R8Sint,
        })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConversionError::UnknownName {
                kind: "format",
                name: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table() {
        let expected = [
            (Format::R32G32B32A32_Float, 16, 4),
            (Format::R32G32B32_Float, 12, 3),
            (Format::R16G16B16A16_Float, 8, 4),
            (Format::R16G16B16A16_UNorm, 8, 4),
            (Format::R8G8B8A8_UNorm, 4, 4),
            (Format::R8G8B8A8_UNorm_SRGB, 4, 4),
            (Format::R8G8B8A8_UInt, 4, 4),
            (Format::R8G8B8A8_SNorm, 4, 4),
            (Format::R8G8B8A8_SInt, 4, 4),
            (Format::R32_Float, 4, 1),
            (Format::R16_Float, 2, 1),
            (Format::R8_UNorm, 1, 1),
            (Format::R8_UInt, 1, 1),
            (Format::R8_SNorm, 1, 1),
            (Format::R8_SInt, 1, 1),
        ];
        for (format, size, components) in expected {
            assert_eq!(format.byte_size(), size, "{format}");
            assert_eq!(format.components(), components, "{format}");
            assert_eq!(
                format.component_kind().byte_size() * components,
                size,
                "{format}"
            );
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("r8g8b8a8_unorm".parse::<Format>().unwrap(), Format::R8G8B8A8_UNorm);
        assert!("R9_Float".parse::<Format>().is_err());
    }

    #[test]
    fn test_encode_element() {
        let mut out = Vec::new();
        Format::R8G8B8A8_UNorm.encode_element(&[1.0, 0.0, 0.5, 2.0], &mut out);
        assert_eq!(out, vec![255, 0, 128, 255]);

        out.clear();
        Format::R32_Float.encode_element(&[1.5, 9.0], &mut out);
        assert_eq!(out, 1.5f32.to_le_bytes().to_vec());

        out.clear();
        Format::R8_SNorm.encode_element(&[-1.0], &mut out);
        assert_eq!(out, vec![(-127i8) as u8]);

        out.clear();
        Format::R16_Float.encode_element(&[], &mut out);
        assert_eq!(out, vec![0, 0]);
    }

    #[test]
    fn test_three_component_float_is_buffer_only() {
        assert!(Format::R32G32B32_Float.to_wgpu().is_none());
        assert_eq!(
            Format::R8G8B8A8_UNorm_SRGB.to_wgpu(),
            Some(wgpu::TextureFormat::Rgba8UnormSrgb)
        );
    }
}
