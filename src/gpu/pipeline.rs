use std::borrow::Cow;

use crate::gpu::mesh::vertex_layout;
use crate::shader::CompiledShader;
use crate::state::{FillMode, PipelineState};

/// Everything a render pipeline is built from. Two draws with equal keys
/// share a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPipelineKey {
    pub vertex: u64,
    pub pixel: Option<u64>,
    pub state: PipelineState,
    pub colour_formats: Vec<wgpu::TextureFormat>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub topology: wgpu::PrimitiveTopology,
    pub polygon_mode: wgpu::PolygonMode,
}

/// How to rasterize a fill mode on this device. Without line polygon mode
/// wireframe falls back to a line list over the triangle edges.
pub fn raster_mode(fill: FillMode, features: wgpu::Features) -> (wgpu::PrimitiveTopology, wgpu::PolygonMode) {
    match fill {
        FillMode::Solid => (wgpu::PrimitiveTopology::TriangleList, wgpu::PolygonMode::Fill),
        FillMode::Wireframe if features.contains(wgpu::Features::POLYGON_MODE_LINE) => {
            (wgpu::PrimitiveTopology::TriangleList, wgpu::PolygonMode::Line)
        }
        FillMode::Wireframe => (wgpu::PrimitiveTopology::LineList, wgpu::PolygonMode::Fill),
    }
}

pub fn create_shader_module(device: &wgpu::Device, shader: &CompiledShader) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&shader.label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader.source.as_ref())),
    })
}

fn blend_for(format: wgpu::TextureFormat, state: &PipelineState, features: wgpu::Features) -> Option<wgpu::BlendState> {
    let blendable = format
        .guaranteed_format_features(features)
        .flags
        .contains(wgpu::TextureFormatFeatureFlags::BLENDABLE);
    if blendable {
        state.blend.to_wgpu()
    } else {
        None
    }
}

/// Build a render pipeline with a layout derived from the shaders.
pub fn create_render_pipeline(
    device: &wgpu::Device,
    key: &RenderPipelineKey,
    vertex: (&wgpu::ShaderModule, &CompiledShader),
    pixel: Option<(&wgpu::ShaderModule, &CompiledShader)>,
) -> wgpu::RenderPipeline {
    let features = device.features();
    let (vs_module, vs) = vertex;
    let targets: Vec<Option<wgpu::ColorTargetState>> = key
        .colour_formats
        .iter()
        .map(|&format| {
            Some(wgpu::ColorTargetState {
                format,
                blend: blend_for(format, &key.state, features),
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();
    let unclipped_depth =
        !key.state.rast.enable_depth_clip && features.contains(wgpu::Features::DEPTH_CLIP_CONTROL);

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&vs.label),
        layout: None,
        vertex: wgpu::VertexState {
            module: vs_module,
            entry_point: Some(&vs.entry_point),
            buffers: &[vertex_layout()],
            compilation_options: wgpu::PipelineCompilationOptions {
                constants: &vs.constants,
                ..Default::default()
            },
        },
        fragment: pixel.map(|(module, ps)| wgpu::FragmentState {
            module,
            entry_point: Some(&ps.entry_point),
            targets: &targets,
            compilation_options: wgpu::PipelineCompilationOptions {
                constants: &ps.constants,
                ..Default::default()
            },
        }),
        primitive: wgpu::PrimitiveState {
            topology: key.topology,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: if key.topology == wgpu::PrimitiveTopology::TriangleList {
                key.state.rast.cull_face()
            } else {
                None
            },
            polygon_mode: key.polygon_mode,
            unclipped_depth,
            conservative: false,
        },
        depth_stencil: key
            .depth_format
            .map(|format| key.state.depth.to_wgpu(format, &key.state.rast)),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

pub fn create_compute_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    cs: &CompiledShader,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&cs.label),
        layout: None,
        module,
        entry_point: Some(&cs.entry_point),
        compilation_options: wgpu::PipelineCompilationOptions {
            constants: &cs.constants,
            ..Default::default()
        },
        cache: None,
    })
}

/// Pipeline that draws one full-screen triangle sampling the level above.
pub fn create_mip_pipeline(device: &wgpu::Device, source: &str, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("mip"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("mip"),
        layout: None,
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets: &[Some(format.into())],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wireframe_falls_back_to_lines() {
        let (topology, mode) = raster_mode(FillMode::Wireframe, wgpu::Features::empty());
        assert_eq!(topology, wgpu::PrimitiveTopology::LineList);
        assert_eq!(mode, wgpu::PolygonMode::Fill);

        let (topology, mode) = raster_mode(FillMode::Wireframe, wgpu::Features::POLYGON_MODE_LINE);
        assert_eq!(topology, wgpu::PrimitiveTopology::TriangleList);
        assert_eq!(mode, wgpu::PolygonMode::Line);
    }

    #[test]
    fn test_solid_fill() {
        let (topology, mode) = raster_mode(FillMode::Solid, wgpu::Features::empty());
        assert_eq!(
            (topology, mode),
            (wgpu::PrimitiveTopology::TriangleList, wgpu::PolygonMode::Fill)
        );
    }
}
