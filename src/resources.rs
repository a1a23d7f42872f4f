//! Resources created by scripts: render targets, textures and buffers.
//!
//! Each run gets its own [`ResourceTable`]. The table only describes the
//! resources (size, format, initial contents); a backend creates the GPU
//! objects from it and uses [`ResourceTable::id`] to notice a new table.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ConversionError;
use crate::format::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub usize);

/// Something a resource or UAV variable can point at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Texture(TextureHandle),
    RenderTarget(RenderTargetHandle),
    Buffer(BufferHandle),
    /// The implicit depth buffer.
    DefaultDepth,
    /// An image file, decoded by the backend on first use. `mips` asks for
    /// a generated mip chain.
    File { path: PathBuf, mips: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub data: Vec<u8>,
    /// Generate a mip chain from `data` when the texture is created.
    pub mips: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub element_count: u32,
    pub format: Format,
    pub data: Vec<u8>,
    pub uav: bool,
}

/// Byte size of a `width` x `height` texture of `format`, checked against the
/// default device limits.
pub fn texture_byte_len(width: u32, height: u32, format: Format) -> Result<usize, ConversionError> {
    if width == 0 || height == 0 {
        return Err(ConversionError::Invalid("texture size must be non-zero".into()));
    }
    let max = wgpu::Limits::default().max_texture_dimension_2d;
    if width > max || height > max {
        return Err(ConversionError::Invalid(format!(
            "texture size {width}x{height} exceeds the limit of {max}"
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(format.byte_size()))
        .ok_or_else(|| ConversionError::Invalid(format!("texture size {width}x{height} is too large")))
}

/// Byte size of `count` elements of `format`, checked against the default
/// device limits.
pub fn buffer_byte_len(count: u32, format: Format) -> Result<usize, ConversionError> {
    let max = wgpu::Limits::default().max_buffer_size;
    match (count as usize).checked_mul(format.byte_size()) {
        Some(len) if len as u64 <= max => Ok(len),
        _ => Err(ConversionError::Invalid(format!(
            "buffer of {count} {format} elements exceeds the limit of {max} bytes"
        ))),
    }
}

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

pub struct ResourceTable {
    id: u64,
    textures: RwLock<Vec<Arc<TextureDesc>>>,
    render_targets: RwLock<Vec<RenderTargetDesc>>,
    buffers: RwLock<Vec<Arc<BufferDesc>>>,
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTable {
    pub fn new() -> Self {
        Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            textures: RwLock::new(Vec::new()),
            render_targets: RwLock::new(Vec::new()),
            buffers: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn create_render_target(&self, width: u32, height: u32, format: Format) -> RenderTargetHandle {
        let mut targets = self.render_targets.write();
        targets.push(RenderTargetDesc {
            width,
            height,
            format,
        });
        RenderTargetHandle(targets.len() - 1)
    }

    pub fn create_texture_2d(&self, desc: TextureDesc) -> Result<TextureHandle, ConversionError> {
        let expected = texture_byte_len(desc.width, desc.height, desc.format)?;
        if desc.data.len() != expected {
            return Err(ConversionError::Invalid(format!(
                "texture data is {} bytes, expected {expected}",
                desc.data.len()
            )));
        }
        let mut textures = self.textures.write();
        textures.push(Arc::new(desc));
        Ok(TextureHandle(textures.len() - 1))
    }

    pub fn set_texture_mips(&self, handle: TextureHandle, mips: bool) -> Result<(), ConversionError> {
        let mut textures = self.textures.write();
        let desc = textures
            .get_mut(handle.0)
            .ok_or_else(|| ConversionError::Invalid(format!("texture {} does not exist", handle.0)))?;
        Arc::make_mut(desc).mips = mips;
        Ok(())
    }

    pub fn create_buffer(&self, desc: BufferDesc) -> Result<BufferHandle, ConversionError> {
        let expected = buffer_byte_len(desc.element_count, desc.format)?;
        if desc.data.len() != expected {
            return Err(ConversionError::Invalid(format!(
                "buffer data is {} bytes, expected {expected}",
                desc.data.len()
            )));
        }
        let mut buffers = self.buffers.write();
        buffers.push(Arc::new(desc));
        Ok(BufferHandle(buffers.len() - 1))
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<Arc<TextureDesc>> {
        self.textures.read().get(handle.0).cloned()
    }

    pub fn render_target(&self, handle: RenderTargetHandle) -> Option<RenderTargetDesc> {
        self.render_targets.read().get(handle.0).cloned()
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<Arc<BufferDesc>> {
        self.buffers.read().get(handle.0).cloned()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.read().len()
    }

    pub fn render_target_count(&self) -> usize {
        self.render_targets.read().len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.read().len()
    }
}

/// Encode `count` elements of `format`, asking `element` for each one's
/// components.
pub fn encode_elements(
    format: Format,
    count: usize,
    mut element: impl FnMut(usize) -> Result<Vec<f32>, ConversionError>,
) -> Result<Vec<u8>, ConversionError> {
    let mut out = Vec::with_capacity(count * format.byte_size());
    for i in 0..count {
        let components = element(i)?;
        format.encode_element(&components, &mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_index_their_tables() {
        let table = ResourceTable::new();
        let rt0 = table.create_render_target(64, 64, Format::R8G8B8A8_UNorm);
        let rt1 = table.create_render_target(32, 16, Format::R16G16B16A16_Float);
        assert_eq!(rt0, RenderTargetHandle(0));
        assert_eq!(table.render_target(rt1).unwrap().width, 32);
        assert!(table.render_target(RenderTargetHandle(5)).is_none());
    }

    #[test]
    fn test_texture_size_is_checked() {
        let table = ResourceTable::new();
        let data = encode_elements(Format::R8G8B8A8_UNorm, 4, |i| Ok(vec![i as f32 / 3.0, 0.0, 0.0, 1.0])).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(data[12], 255);

        let ok = table.create_texture_2d(TextureDesc {
            width: 2,
            height: 2,
            format: Format::R8G8B8A8_UNorm,
            data: data.clone(),
            mips: false,
        });
        assert!(ok.is_ok());

        let bad = table.create_texture_2d(TextureDesc {
            width: 4,
            height: 4,
            format: Format::R8G8B8A8_UNorm,
            data,
            mips: false,
        });
        assert!(bad.is_err());
    }

    #[test]
    fn test_oversized_resources_are_rejected() {
        assert!(texture_byte_len(65536, 65536, Format::R8_UNorm).is_err());
        assert!(texture_byte_len(0, 4, Format::R8_UNorm).is_err());
        assert_eq!(texture_byte_len(4, 2, Format::R32_Float).unwrap(), 32);
        assert!(buffer_byte_len(u32::MAX, Format::R32G32B32A32_Float).is_err());
        assert_eq!(buffer_byte_len(3, Format::R8G8B8A8_UInt).unwrap(), 12);

        let table = ResourceTable::new();
        let huge = table.create_texture_2d(TextureDesc {
            width: u32::MAX,
            height: u32::MAX,
            format: Format::R8G8B8A8_UNorm,
            data: Vec::new(),
            mips: false,
        });
        assert!(huge.is_err());
    }

    #[test]
    fn test_texture_mips_flag() {
        let table = ResourceTable::new();
        let handle = table
            .create_texture_2d(TextureDesc {
                width: 1,
                height: 1,
                format: Format::R8_UNorm,
                data: vec![0],
                mips: false,
            })
            .unwrap();
        table.set_texture_mips(handle, true).unwrap();
        assert!(table.texture(handle).unwrap().mips);
        assert!(table.set_texture_mips(TextureHandle(3), true).is_err());
    }

    #[test]
    fn test_tables_have_distinct_ids() {
        assert_ne!(ResourceTable::new().id(), ResourceTable::new().id());
    }

    #[test]
    fn test_element_callback_error_propagates() {
        let result = encode_elements(Format::R32_Float, 3, |i| {
            if i == 2 {
                Err(ConversionError::Invalid("bad element".into()))
            } else {
                Ok(vec![1.0])
            }
        });
        assert!(result.is_err());
    }
}
