//! Executes recorded frames with wgpu into an offscreen back buffer.
//!
//! GPU objects for script resources are created on first use and kept until
//! a frame arrives with a different [`ResourceTable`]. Pipelines use layouts
//! derived from the shaders, so bind groups are built per draw item against
//! the pipeline's own layouts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::error::BackendError;
use crate::format::Format;
use crate::gpu::mesh::{
    create_cube_geometry, create_fullscreen_quad_geometry, create_plane_geometry, create_sphere_geometry,
    triangle_edges,
};
use crate::gpu::pipeline::{
    create_compute_pipeline, create_mip_pipeline, create_render_pipeline, create_shader_module, raster_mode,
    RenderPipelineKey,
};
use crate::render::{
    DepthTarget, DispatchCall, DispatchGroups, DrawCall, DrawKind, Frame, FrameCommand, MeshRef, RenderBackend, TargetRef,
};
use crate::resources::{BufferHandle, RenderTargetHandle, ResourceRef, ResourceTable, TextureHandle};
use crate::scene::{MeshVertex, SceneMesh};
use crate::shader::reflection::{BindPoint, ResourceKind};
use crate::shader::{BoundShader, CompiledShader};
use crate::state::SamplerState;

pub const BACK_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const PLACEHOLDER_BUFFER_SIZE: u64 = 4096;
const MIP_SHADER: &str = include_str!("mip.wgsl");

/// Open a headless device, enabling line polygon mode and depth clip
/// control when the adapter has them.
pub async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), BackendError> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(BackendError::NoAdapter)?;

    let optional = wgpu::Features::POLYGON_MODE_LINE | wgpu::Features::DEPTH_CLIP_CONTROL;
    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("shaderbench"),
                required_features: adapter.features() & optional,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        )
        .await?;
    Ok((device, queue))
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl GpuTexture {
    fn new(texture: wgpu::Texture) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
    edges: wgpu::Buffer,
    edge_count: u32,
    // keeps the address behind a `MeshKey::Scene` from being reused
    _source: Option<Arc<SceneMesh>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MeshKey {
    Sphere,
    Cube,
    Plane,
    FullscreenQuad,
    Scene(usize),
}

impl MeshKey {
    fn of(mesh: &MeshRef) -> Self {
        match mesh {
            MeshRef::Sphere => MeshKey::Sphere,
            MeshRef::Cube => MeshKey::Cube,
            MeshRef::Plane => MeshKey::Plane,
            MeshRef::FullscreenQuad => MeshKey::FullscreenQuad,
            MeshRef::Scene(mesh) => MeshKey::Scene(Arc::as_ptr(mesh) as usize),
        }
    }
}

enum Binding<'a> {
    Buffer(&'a wgpu::Buffer),
    View(&'a wgpu::TextureView),
    Sampler(&'a wgpu::Sampler),
}

fn texture_usages(format: wgpu::TextureFormat, features: wgpu::Features, base: wgpu::TextureUsages) -> wgpu::TextureUsages {
    let allowed = format.guaranteed_format_features(features).allowed_usages;
    base | (allowed & wgpu::TextureUsages::STORAGE_BINDING)
}

fn texture_descriptor(
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::TextureDescriptor<'_> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    }
}

/// Number of levels in a full mip chain down to 1x1.
fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Whether mips of `format` can be made by rendering each level from the
/// one above it with a filtering sampler.
fn can_generate_mips(format: wgpu::TextureFormat, features: wgpu::Features) -> bool {
    let supported = format.guaranteed_format_features(features);
    supported.allowed_usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        && supported.flags.contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
}

/// Create a texture from level-0 `data`, with room for a mip chain when
/// `mips` is set.
fn create_texture_with_level0(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    (width, height): (u32, u32),
    format: wgpu::TextureFormat,
    mips: bool,
    data: &[u8],
) -> wgpu::Texture {
    let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
    let mut desc = texture_descriptor(label, width, height, format, usage);
    if mips {
        usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        desc.usage = usage;
        desc.mip_level_count = full_mip_count(width, height);
    }
    let texture = device.create_texture(&desc);
    let texel_size = format.block_copy_size(None).unwrap_or(4);
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * texel_size),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    texture
}

fn load_image(path: &Path) -> Result<image::RgbaImage, BackendError> {
    let image = image::open(path).map_err(|e| BackendError::TextureLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(image.to_rgba8())
}

fn upload_mesh(device: &wgpu::Device, vertices: &[MeshVertex], indices: &[u32], source: Option<Arc<SceneMesh>>) -> GpuMesh {
    let edges = triangle_edges(indices);
    let buffer = |label: &str, contents: &[u8], usage| {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    };
    GpuMesh {
        vertices: buffer("mesh vertices", bytemuck::cast_slice(vertices), wgpu::BufferUsages::VERTEX),
        indices: buffer("mesh indices", bytemuck::cast_slice(indices), wgpu::BufferUsages::INDEX),
        index_count: indices.len() as u32,
        edges: buffer("mesh edges", bytemuck::cast_slice(&edges), wgpu::BufferUsages::INDEX),
        edge_count: edges.len() as u32,
        _source: source,
    }
}

/// Pads to a non-empty multiple of 16 bytes.
fn padded(bytes: &[u8]) -> Vec<u8> {
    let len = bytes.len().max(16).next_multiple_of(16);
    let mut out = bytes.to_vec();
    out.resize(len, 0);
    out
}

/// Group `bindings` by bind group, creating an empty group for every gap.
fn bind_groups(
    device: &wgpu::Device,
    bindings: &BTreeMap<BindPoint, Binding>,
    layout: impl Fn(u32) -> wgpu::BindGroupLayout,
) -> Vec<wgpu::BindGroup> {
    let Some(max_group) = bindings.keys().map(|b| b.group).max() else {
        return Vec::new();
    };
    (0..=max_group)
        .map(|group| {
            let entries: Vec<wgpu::BindGroupEntry> = bindings
                .iter()
                .filter(|(point, _)| point.group == group)
                .map(|(point, binding)| wgpu::BindGroupEntry {
                    binding: point.binding,
                    resource: match binding {
                        Binding::Buffer(buffer) => buffer.as_entire_binding(),
                        Binding::View(view) => wgpu::BindingResource::TextureView(view),
                        Binding::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                    },
                })
                .collect();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &layout(group),
                entries: &entries,
            })
        })
        .collect()
}

/// GPU objects made from one [`ResourceTable`]. Everything is dropped when a
/// frame arrives with another table, so a re-run reloads files from disk.
struct TableObjects<T, B> {
    table_id: Option<u64>,
    textures: HashMap<TextureHandle, T>,
    render_targets: HashMap<RenderTargetHandle, T>,
    buffers: HashMap<BufferHandle, B>,
    /// `None` marks a file that failed to load. Keyed by path and whether
    /// the texture has mips.
    files: HashMap<(PathBuf, bool), Option<T>>,
}

impl<T, B> TableObjects<T, B> {
    fn new() -> Self {
        Self {
            table_id: None,
            textures: HashMap::new(),
            render_targets: HashMap::new(),
            buffers: HashMap::new(),
            files: HashMap::new(),
        }
    }

    /// Switch to table `id`, forgetting the objects of any other table.
    /// Returns whether anything was reset.
    fn sync(&mut self, id: u64) -> bool {
        if self.table_id == Some(id) {
            return false;
        }
        *self = Self::new();
        self.table_id = Some(id);
        true
    }
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    back_buffer: GpuTexture,
    depth_buffers: HashMap<(u32, u32), GpuTexture>,
    placeholder_texture: GpuTexture,
    placeholder_depth: GpuTexture,
    placeholder_buffer: wgpu::Buffer,

    meshes: HashMap<MeshKey, GpuMesh>,
    modules: HashMap<u64, wgpu::ShaderModule>,
    render_pipelines: HashMap<RenderPipelineKey, wgpu::RenderPipeline>,
    compute_pipelines: HashMap<u64, wgpu::ComputePipeline>,
    samplers: HashMap<(SamplerState, bool), wgpu::Sampler>,

    table: TableObjects<GpuTexture, wgpu::Buffer>,
    mip_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    mip_sampler: wgpu::Sampler,

    warned: HashSet<String>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| log::error!("wgpu error: {err}")));

        let features = device.features();
        let back_buffer = GpuTexture::new(device.create_texture(&texture_descriptor(
            "back buffer",
            width,
            height,
            BACK_BUFFER_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        )));
        let placeholder_texture = GpuTexture::new(device.create_texture_with_data(
            &queue,
            &texture_descriptor(
                "placeholder texture",
                1,
                1,
                wgpu::TextureFormat::Rgba8Unorm,
                texture_usages(
                    wgpu::TextureFormat::Rgba8Unorm,
                    features,
                    wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                ),
            ),
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        ));
        let placeholder_depth = GpuTexture::new(device.create_texture(&texture_descriptor(
            "placeholder depth",
            1,
            1,
            DEPTH_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING,
        )));
        let mip_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("mip sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let placeholder_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("placeholder buffer"),
            size: PLACEHOLDER_BUFFER_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            back_buffer,
            depth_buffers: HashMap::new(),
            placeholder_texture,
            placeholder_depth,
            placeholder_buffer,
            meshes: HashMap::new(),
            modules: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            samplers: HashMap::new(),
            table: TableObjects::new(),
            mip_pipelines: HashMap::new(),
            mip_sampler,
            warned: HashSet::new(),
        }
    }

    /// A backend on a fresh headless device.
    pub async fn headless(width: u32, height: u32) -> Result<Self, BackendError> {
        let (device, queue) = request_device().await?;
        Ok(Self::new(device, queue, width, height))
    }

    pub fn size(&self) -> (u32, u32) {
        self.back_buffer.size()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn warn_once(&mut self, message: String) {
        if self.warned.insert(message.clone()) {
            log::warn!("{message}");
        }
    }

    fn sync_table(&mut self, resources: &ResourceTable) {
        if self.table.sync(resources.id()) {
            self.warned.clear();
        }
    }

    /// Fill levels 1.. of `texture` by downsampling each level into the next.
    fn generate_mips(&mut self, texture: &wgpu::Texture) {
        let levels = texture.mip_level_count();
        if levels < 2 {
            return;
        }
        let format = texture.format();
        let device = &self.device;
        let pipeline = self
            .mip_pipelines
            .entry(format)
            .or_insert_with(|| create_mip_pipeline(device, MIP_SHADER, format));
        let layout = pipeline.get_bind_group_layout(0);
        let views: Vec<wgpu::TextureView> = (0..levels)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("mip level"),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("generate mips"),
        });
        for pair in views.windows(2) {
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mip source"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&pair[0]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.mip_sampler),
                    },
                ],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mip"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &pair[1],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    /// Whether a texture of `format` can have mips, warning once if not.
    fn mips_supported(&mut self, format: wgpu::TextureFormat, what: &str) -> bool {
        if can_generate_mips(format, self.device.features()) {
            return true;
        }
        self.warn_once(format!("cannot generate mips for {what} ({format:?}); using one level"));
        false
    }

    fn ensure_depth(&mut self, size: (u32, u32)) {
        let device = &self.device;
        self.depth_buffers.entry(size).or_insert_with(|| {
            GpuTexture::new(device.create_texture(&texture_descriptor(
                "depth buffer",
                size.0,
                size.1,
                DEPTH_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            )))
        });
    }

    fn texture_format(format: Format) -> Result<wgpu::TextureFormat, BackendError> {
        format.to_wgpu().ok_or(BackendError::UnsupportedFormat(format))
    }

    /// Create the GPU object behind `resource` if it doesn't exist yet.
    fn ensure_resource(&mut self, resource: &ResourceRef, resources: &ResourceTable) -> Result<(), BackendError> {
        let features = self.device.features();
        match resource {
            ResourceRef::Texture(handle) => {
                if self.table.textures.contains_key(handle) {
                    return Ok(());
                }
                let Some(desc) = resources.texture(*handle) else {
                    self.warn_once(format!("texture {} does not exist", handle.0));
                    return Ok(());
                };
                let format = Self::texture_format(desc.format)?;
                let mips = desc.mips && self.mips_supported(format, &format!("texture {}", handle.0));
                let texture = create_texture_with_level0(
                    &self.device,
                    &self.queue,
                    "script texture",
                    (desc.width, desc.height),
                    format,
                    mips,
                    &desc.data,
                );
                self.generate_mips(&texture);
                self.table.textures.insert(*handle, GpuTexture::new(texture));
            }
            ResourceRef::RenderTarget(handle) => {
                if self.table.render_targets.contains_key(handle) {
                    return Ok(());
                }
                let Some(desc) = resources.render_target(*handle) else {
                    self.warn_once(format!("render target {} does not exist", handle.0));
                    return Ok(());
                };
                let format = Self::texture_format(desc.format)?;
                let usage = texture_usages(
                    format,
                    features,
                    wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                );
                let texture = self.device.create_texture(&texture_descriptor(
                    "render target",
                    desc.width,
                    desc.height,
                    format,
                    usage,
                ));
                self.table.render_targets.insert(*handle, GpuTexture::new(texture));
            }
            ResourceRef::Buffer(handle) => {
                if self.table.buffers.contains_key(handle) {
                    return Ok(());
                }
                let Some(desc) = resources.buffer(*handle) else {
                    self.warn_once(format!("buffer {} does not exist", handle.0));
                    return Ok(());
                };
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("script buffer"),
                    contents: &padded(&desc.data),
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::INDIRECT
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                });
                self.table.buffers.insert(*handle, buffer);
            }
            ResourceRef::DefaultDepth => self.ensure_depth(self.size()),
            ResourceRef::File { path, mips } => {
                let key = (path.clone(), *mips);
                if self.table.files.contains_key(&key) {
                    return Ok(());
                }
                let loaded = match load_image(path) {
                    Ok(rgba) => {
                        let texture = create_texture_with_level0(
                            &self.device,
                            &self.queue,
                            "file texture",
                            rgba.dimensions(),
                            wgpu::TextureFormat::Rgba8UnormSrgb,
                            *mips,
                            &rgba,
                        );
                        self.generate_mips(&texture);
                        Some(GpuTexture::new(texture))
                    }
                    Err(err) => {
                        log::warn!("{err}; using a placeholder");
                        None
                    }
                };
                self.table.files.insert(key, loaded);
            }
        }
        Ok(())
    }

    fn ensure_target(&mut self, target: TargetRef, resources: &ResourceTable) -> Result<Option<(u32, u32)>, BackendError> {
        match target {
            TargetRef::BackBuffer => Ok(Some(self.size())),
            TargetRef::RenderTarget(handle) => {
                self.ensure_resource(&ResourceRef::RenderTarget(handle), resources)?;
                Ok(self.table.render_targets.get(&handle).map(GpuTexture::size))
            }
        }
    }

    fn target(&self, target: TargetRef) -> Option<&GpuTexture> {
        match target {
            TargetRef::BackBuffer => Some(&self.back_buffer),
            TargetRef::RenderTarget(handle) => self.table.render_targets.get(&handle),
        }
    }

    fn ensure_module(&mut self, shader: &CompiledShader) {
        let device = &self.device;
        self.modules
            .entry(shader.id)
            .or_insert_with(|| create_shader_module(device, shader));
    }

    fn ensure_mesh(&mut self, mesh: &MeshRef) -> MeshKey {
        let key = MeshKey::of(mesh);
        if self.meshes.contains_key(&key) {
            return key;
        }
        let uploaded = match mesh {
            MeshRef::Scene(scene_mesh) => {
                upload_mesh(&self.device, &scene_mesh.vertices, &scene_mesh.indices, Some(scene_mesh.clone()))
            }
            builtin => {
                let (vertices, indices) = match builtin {
                    MeshRef::Cube => create_cube_geometry(),
                    MeshRef::Plane => create_plane_geometry(),
                    MeshRef::FullscreenQuad => create_fullscreen_quad_geometry(),
                    _ => create_sphere_geometry(),
                };
                upload_mesh(&self.device, &vertices, &indices, None)
            }
        };
        self.meshes.insert(key, uploaded);
        key
    }

    fn ensure_bindings(&mut self, shader: &BoundShader, resources: &ResourceTable) -> Result<(), BackendError> {
        for bound in shader.resources.iter().chain(&shader.uavs) {
            if let Some(resource) = &bound.resource {
                self.ensure_resource(resource, resources)?;
            }
        }
        for sampler in &shader.samplers {
            let device = &self.device;
            self.samplers
                .entry((sampler.state, sampler.comparison))
                .or_insert_with(|| {
                    let mut desc = sampler.state.to_wgpu();
                    if sampler.comparison {
                        desc.compare = Some(wgpu::CompareFunction::LessEqual);
                    }
                    device.create_sampler(&desc)
                });
        }
        Ok(())
    }

    fn view_for(&self, resource: Option<&ResourceRef>, kind: ResourceKind) -> Option<&wgpu::TextureView> {
        let found = match resource? {
            ResourceRef::Texture(handle) => self.table.textures.get(handle),
            ResourceRef::RenderTarget(handle) => self.table.render_targets.get(handle),
            ResourceRef::DefaultDepth => self.depth_buffers.get(&self.size()),
            ResourceRef::File { path, mips } => self.table.files.get(&(path.clone(), *mips)).and_then(Option::as_ref),
            ResourceRef::Buffer(_) => None,
        };
        match (found, kind) {
            (Some(texture), _) => Some(&texture.view),
            (None, ResourceKind::Texture { depth: true, .. }) => Some(&self.placeholder_depth.view),
            (None, ResourceKind::Texture { .. }) => Some(&self.placeholder_texture.view),
            (None, _) => None,
        }
    }

    /// Bindings for a vertex/pixel pair or a compute shader. The first
    /// shader wins where two bind the same point.
    fn collect_bindings<'a>(
        &'a self,
        shaders: &[&BoundShader],
        uniforms: &'a [(BindPoint, wgpu::Buffer)],
    ) -> Result<BTreeMap<BindPoint, Binding<'a>>, String> {
        let mut out = BTreeMap::new();
        for (point, buffer) in uniforms {
            out.entry(*point).or_insert(Binding::Buffer(buffer));
        }
        for shader in shaders {
            for bound in shader.resources.iter().chain(&shader.uavs) {
                if out.contains_key(&bound.bind_point) {
                    continue;
                }
                let binding = match bound.kind {
                    ResourceKind::StorageBuffer => Binding::Buffer(match &bound.resource {
                        Some(ResourceRef::Buffer(handle)) => self.table.buffers.get(handle).unwrap_or(&self.placeholder_buffer),
                        _ => &self.placeholder_buffer,
                    }),
                    kind => match self.view_for(bound.resource.as_ref(), kind) {
                        Some(view) => Binding::View(view),
                        None => return Err(format!("no texture bound to '{}'", bound.name)),
                    },
                };
                out.insert(bound.bind_point, binding);
            }
            for sampler in &shader.samplers {
                if let Some(s) = self.samplers.get(&(sampler.state, sampler.comparison)) {
                    out.entry(sampler.bind_point).or_insert(Binding::Sampler(s));
                }
            }
        }
        Ok(out)
    }

    fn uniform_buffers(&self, shaders: &[&BoundShader]) -> Vec<(BindPoint, wgpu::Buffer)> {
        let mut seen = HashSet::new();
        shaders
            .iter()
            .flat_map(|s| &s.constant_buffers)
            .filter(|b| seen.insert(b.bind_point))
            .map(|b| {
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("constants"),
                    contents: &padded(&b.bytes),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                (b.bind_point, buffer)
            })
            .collect()
    }

    fn encode_clear(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        colour: glam::Vec4,
        targets: &[TargetRef],
        resources: &ResourceTable,
    ) -> Result<(), BackendError> {
        for &target in targets {
            self.ensure_target(target, resources)?;
            let Some(texture) = self.target(target) else {
                continue;
            };
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &texture.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: colour.x as f64,
                            g: colour.y as f64,
                            b: colour.z as f64,
                            a: colour.w as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        Ok(())
    }

    fn encode_draw(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        draw: &DrawCall,
        resources: &ResourceTable,
        cleared_depth: &mut HashSet<(u32, u32)>,
    ) -> Result<(), BackendError> {
        let Some(first) = draw.items.first() else {
            return Ok(());
        };
        let has_pixel = first.pixel.is_some();

        let mut size = None;
        let mut colour_formats = Vec::new();
        if has_pixel {
            for &target in &draw.targets {
                let Some(target_size) = self.ensure_target(target, resources)? else {
                    self.warn_once(format!("{target:?} does not exist; draw skipped"));
                    return Ok(());
                };
                size.get_or_insert(target_size);
                if let Some(texture) = self.target(target) {
                    colour_formats.push(texture.texture.format());
                }
            }
        }
        let size = size.unwrap_or_else(|| self.size());
        let depth_size = match draw.depth_buffer {
            DepthTarget::Default => {
                self.ensure_depth(size);
                Some(size)
            }
            DepthTarget::None => None,
        };
        if colour_formats.is_empty() && depth_size.is_none() {
            self.warn_once("draw has neither a pixel shader nor a depth buffer; skipped".to_string());
            return Ok(());
        }

        let (topology, polygon_mode) = raster_mode(draw.pipeline.rast.fill_mode, self.device.features());
        let key = RenderPipelineKey {
            vertex: first.vertex.shader.id,
            pixel: first.pixel.as_ref().map(|p| p.shader.id),
            state: draw.pipeline,
            colour_formats,
            depth_format: depth_size.map(|_| DEPTH_FORMAT),
            topology,
            polygon_mode,
        };
        self.ensure_module(&first.vertex.shader);
        if let Some(pixel) = &first.pixel {
            self.ensure_module(&pixel.shader);
        }
        if !self.render_pipelines.contains_key(&key) {
            let vs = &first.vertex.shader;
            let ps = first.pixel.as_ref().map(|p| &p.shader);
            let pipeline = create_render_pipeline(
                &self.device,
                &key,
                (&self.modules[&vs.id], vs.as_ref()),
                ps.map(|ps| (&self.modules[&ps.id], ps.as_ref())),
            );
            self.render_pipelines.insert(key.clone(), pipeline);
        }

        let mut meshes = Vec::with_capacity(draw.items.len());
        for item in &draw.items {
            self.ensure_bindings(&item.vertex, resources)?;
            if let Some(pixel) = &item.pixel {
                self.ensure_bindings(pixel, resources)?;
            }
            meshes.push(self.ensure_mesh(&item.mesh));
        }

        let this = &*self;
        let pipeline = &this.render_pipelines[&key];
        let mut prepared = Vec::with_capacity(draw.items.len());
        for (item, mesh) in draw.items.iter().zip(meshes) {
            let shaders: Vec<&BoundShader> = std::iter::once(&item.vertex).chain(item.pixel.as_ref()).collect();
            let uniforms = this.uniform_buffers(&shaders);
            match this.collect_bindings(&shaders, &uniforms) {
                Ok(bindings) => {
                    let groups = bind_groups(&this.device, &bindings, |g| pipeline.get_bind_group_layout(g));
                    prepared.push((groups, mesh));
                }
                Err(message) => log::warn!("{}({}): {message}; item skipped", item.vertex.shader.label, item.vertex.shader.entry_point),
            }
        }

        let colour_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = if has_pixel {
            draw.targets
                .iter()
                .filter_map(|&t| this.target(t))
                .map(|texture| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &texture.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect()
        } else {
            Vec::new()
        };
        let depth_attachment = depth_size.and_then(|size| {
            let load = if cleared_depth.insert(size) {
                wgpu::LoadOp::Clear(1.0)
            } else {
                wgpu::LoadOp::Load
            };
            this.depth_buffers.get(&size).map(|depth| wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            })
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(draw_label(draw)),
            color_attachments: &colour_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        for (groups, mesh) in &prepared {
            let Some(mesh) = this.meshes.get(mesh) else {
                continue;
            };
            for (index, group) in groups.iter().enumerate() {
                pass.set_bind_group(index as u32, group, &[]);
            }
            pass.set_vertex_buffer(0, mesh.vertices.slice(..));
            let (indices, count) = if topology == wgpu::PrimitiveTopology::LineList {
                (&mesh.edges, mesh.edge_count)
            } else {
                (&mesh.indices, mesh.index_count)
            };
            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..count, 0, 0..1);
        }
        Ok(())
    }

    fn encode_dispatch(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        call: &DispatchCall,
        resources: &ResourceTable,
    ) -> Result<(), BackendError> {
        let shader = &call.shader.shader;
        self.ensure_module(shader);
        if !self.compute_pipelines.contains_key(&shader.id) {
            let pipeline = create_compute_pipeline(&self.device, &self.modules[&shader.id], shader);
            self.compute_pipelines.insert(shader.id, pipeline);
        }
        self.ensure_bindings(&call.shader, resources)?;
        if let DispatchGroups::Indirect { buffer, .. } = call.groups {
            self.ensure_resource(&ResourceRef::Buffer(buffer), resources)?;
        }

        let this = &*self;
        let pipeline = &this.compute_pipelines[&shader.id];
        let shaders = [&call.shader];
        let uniforms = this.uniform_buffers(&shaders);
        let bindings = match this.collect_bindings(&shaders, &uniforms) {
            Ok(bindings) => bindings,
            Err(message) => {
                log::warn!("{}({}): {message}; dispatch skipped", shader.label, shader.entry_point);
                return Ok(());
            }
        };
        let groups = bind_groups(&this.device, &bindings, |g| pipeline.get_bind_group_layout(g));

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&shader.entry_point),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        for (index, group) in groups.iter().enumerate() {
            pass.set_bind_group(index as u32, group, &[]);
        }
        match call.groups {
            DispatchGroups::Direct([x, y, z]) => pass.dispatch_workgroups(x, y, z),
            DispatchGroups::Indirect { buffer, offset } => {
                let Some(args) = this.table.buffers.get(&buffer) else {
                    return Ok(());
                };
                pass.dispatch_workgroups_indirect(args, offset as u64);
            }
        }
        Ok(())
    }

    fn encode_frame(&mut self, frame: &Frame, resources: &ResourceTable) -> Result<wgpu::CommandBuffer, BackendError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") });
        let mut cleared_depth = HashSet::new();
        for command in &frame.commands {
            match command {
                FrameCommand::Clear { colour, targets } => self.encode_clear(&mut encoder, *colour, targets, resources)?,
                FrameCommand::Draw(draw) => self.encode_draw(&mut encoder, draw, resources, &mut cleared_depth)?,
                FrameCommand::Dispatch(call) => self.encode_dispatch(&mut encoder, call, resources)?,
            }
        }
        Ok(encoder.finish())
    }

    /// Copy the back buffer to memory.
    pub fn read_back(&self) -> Result<image::RgbaImage, BackendError> {
        let (width, height) = self.size();
        let unpadded_bytes_per_row = 4 * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let output = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("read-back"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("read-back") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.back_buffer.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            self.back_buffer.texture.size(),
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = output.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| BackendError::Readback(e.to_string()))?
            .map_err(|e| BackendError::Readback(e.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in 0..height {
                let start = (row * padded_bytes_per_row) as usize;
                pixels.extend_from_slice(&data[start..start + unpadded_bytes_per_row as usize]);
            }
        }
        output.unmap();
        image::RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| BackendError::Readback("pixel buffer has the wrong size".into()))
    }

    pub fn save_png(&self, path: &Path) -> Result<(), BackendError> {
        self.read_back()?
            .save(path)
            .map_err(|e| BackendError::Readback(format!("{}: {e}", path.display())))
    }
}

fn draw_label(draw: &DrawCall) -> &'static str {
    match draw.kind {
        DrawKind::Scene => "draw_scene",
        DrawKind::Sphere => "draw_sphere",
        DrawKind::FullscreenQuad => "draw_fullscreen_quad",
        DrawKind::WireSphere => "draw_wire_sphere",
    }
}

impl RenderBackend for WgpuBackend {
    fn submit(&mut self, frame: &Frame, resources: &ResourceTable) -> Result<(), BackendError> {
        self.sync_table(resources);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let encoded = self
            .encode_frame(frame, resources)
            .map(|commands| self.queue.submit(Some(commands)));
        let validation = pollster::block_on(self.device.pop_error_scope());
        encoded?;
        match validation {
            Some(err) => Err(BackendError::Validation(err.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_is_non_empty_and_aligned() {
        assert_eq!(padded(&[]).len(), 16);
        assert_eq!(padded(&[1; 17]).len(), 32);
        assert_eq!(padded(&[1; 64]).len(), 64);
    }

    #[test]
    fn test_new_table_drops_file_textures() {
        let mut objects: TableObjects<u32, u32> = TableObjects::new();
        assert!(objects.sync(1));
        objects.files.insert((PathBuf::from("brick.png"), true), None);
        objects.textures.insert(TextureHandle(0), 7);

        assert!(!objects.sync(1));
        assert_eq!(objects.files.len(), 1);

        assert!(objects.sync(2));
        assert!(objects.files.is_empty());
        assert!(objects.textures.is_empty());
    }

    #[test]
    fn test_full_mip_count() {
        assert_eq!(full_mip_count(1, 1), 1);
        assert_eq!(full_mip_count(8, 8), 4);
        assert_eq!(full_mip_count(256, 64), 9);
        assert_eq!(full_mip_count(5, 3), 3);
    }

    #[test]
    fn test_mip_shader_is_valid() {
        let module = naga::front::wgsl::parse_str(MIP_SHADER).unwrap();
        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::empty())
            .validate(&module)
            .unwrap();
        let entries: Vec<&str> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(entries, vec!["vs_main", "fs_main"]);
    }

    #[test]
    fn test_mips_need_renderable_filterable_formats() {
        let features = wgpu::Features::empty();
        assert!(can_generate_mips(wgpu::TextureFormat::Rgba8UnormSrgb, features));
        assert!(can_generate_mips(wgpu::TextureFormat::Rgba16Float, features));
        assert!(!can_generate_mips(wgpu::TextureFormat::Rgba8Uint, features));
        assert!(!can_generate_mips(wgpu::TextureFormat::Rgba8Snorm, features));
    }

    #[test]
    fn test_scene_mesh_keys_follow_identity() {
        let mesh = Arc::new(SceneMesh {
            name: "tri".into(),
            vertices: Vec::new(),
            indices: Vec::new(),
        });
        let a = MeshKey::of(&MeshRef::Scene(mesh.clone()));
        let b = MeshKey::of(&MeshRef::Scene(mesh));
        assert_eq!(a, b);
        assert_ne!(MeshKey::of(&MeshRef::Sphere), MeshKey::of(&MeshRef::FullscreenQuad));
    }
}
