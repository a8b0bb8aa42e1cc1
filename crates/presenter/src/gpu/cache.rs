//! Pipeline cache: maps a [`PipelineKey`] to a compiled render pipeline,
//! compiling on first use. Also owns the fixed resources every variant
//! shares: the vertex module, the bind-group layouts, and the pipeline
//! layouts carrying the push-constant range.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::PresentError;
use crate::gpu::key::{BlitVariant, PipelineKey, SpecConstants};

const VS_SOURCE: &str = include_str!("../shaders/present_vs.wgsl");
const FS_COMMON: &str = include_str!("../shaders/present_common.wgsl");
const FS_COPY: &str = include_str!("../shaders/fs_copy.wgsl");
const FS_BLIT: &str = include_str!("../shaders/fs_blit.wgsl");
const FS_MS_RESOLVE: &str = include_str!("../shaders/fs_ms_resolve.wgsl");
const FS_MS_BLIT: &str = include_str!("../shaders/fs_ms_blit.wgsl");

/// Byte size of the per-draw push-constant block.
pub(crate) const PUSH_CONSTANT_SIZE: u32 = 24;

pub(crate) struct PipelineCache {
    vertex_module: wgpu::ShaderModule,
    single_sample_layout: wgpu::BindGroupLayout,
    multi_sample_layout: wgpu::BindGroupLayout,
    single_sample_pipeline_layout: wgpu::PipelineLayout,
    multi_sample_pipeline_layout: wgpu::PipelineLayout,
    pipelines: Mutex<HashMap<PipelineKey, Arc<wgpu::RenderPipeline>>>,
}

impl PipelineCache {
    pub(crate) fn new(device: &wgpu::Device) -> Result<Self, PresentError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("present vertex"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(VS_SOURCE)),
        });

        let single_sample_layout = create_bind_group_layout(device, false);
        let multi_sample_layout = create_bind_group_layout(device, true);
        let single_sample_pipeline_layout =
            create_pipeline_layout(device, &single_sample_layout, "present layout");
        let multi_sample_pipeline_layout =
            create_pipeline_layout(device, &multi_sample_layout, "present layout (ms)");

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(PresentError::PipelineCompilation(error));
        }

        Ok(Self {
            vertex_module,
            single_sample_layout,
            multi_sample_layout,
            single_sample_pipeline_layout,
            multi_sample_pipeline_layout,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn bind_group_layout(&self, variant: BlitVariant) -> &wgpu::BindGroupLayout {
        if variant.is_multisampled() {
            &self.multi_sample_layout
        } else {
            &self.single_sample_layout
        }
    }

    /// Looks up the pipeline for `key`, compiling and inserting it on a miss.
    ///
    /// Lookup and insert happen under one lock, so two callers racing on the
    /// same key can never produce two pipeline objects.
    pub(crate) fn get_or_create(
        &self,
        device: &wgpu::Device,
        key: &PipelineKey,
    ) -> Result<Arc<wgpu::RenderPipeline>, PresentError> {
        let mut pipelines = self
            .pipelines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(pipeline) = pipelines.get(key) {
            return Ok(pipeline.clone());
        }

        tracing::debug!(?key, variant = ?key.variant(), "compiling presentation pipeline");
        let pipeline = Arc::new(self.compile(device, key)?);
        pipelines.insert(*key, pipeline.clone());
        Ok(pipeline)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pipelines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn compile(
        &self,
        device: &wgpu::Device,
        key: &PipelineKey,
    ) -> Result<wgpu::RenderPipeline, PresentError> {
        let variant = key.variant();
        let constants = SpecConstants::from_key(key);
        let source = fragment_source(variant, &constants);

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(variant.label()),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });

        let pipeline_layout = if variant.is_multisampled() {
            &self.multi_sample_pipeline_layout
        } else {
            &self.single_sample_pipeline_layout
        };

        let blend = if key.needs_blending {
            Some(wgpu::BlendState::ALPHA_BLENDING)
        } else {
            None
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(variant.label()),
            layout: Some(pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.vertex_module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                ..Default::default()
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.dst_format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(PresentError::PipelineCompilation(error));
        }
        Ok(pipeline)
    }
}

/// Assembles the fragment source for one variant: generated constant header,
/// shared preamble, then the variant body.
pub(crate) fn fragment_source(variant: BlitVariant, constants: &SpecConstants) -> String {
    let body = match variant {
        BlitVariant::Copy => FS_COPY,
        BlitVariant::Blit => FS_BLIT,
        BlitVariant::MsResolve => FS_MS_RESOLVE,
        BlitVariant::MsBlit => FS_MS_BLIT,
    };
    format!("{}\n{FS_COMMON}\n{body}", constants.to_wgsl_header())
}

fn create_bind_group_layout(device: &wgpu::Device, multisampled: bool) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(if multisampled {
            "present bindings (ms)"
        } else {
            "present bindings"
        }),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float {
                        filterable: !multisampled,
                    },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D1,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

fn create_pipeline_layout(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
    label: &str,
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[wgpu::PushConstantRange {
            stages: wgpu::ShaderStages::FRAGMENT,
            range: 0..PUSH_CONSTANT_SIZE,
        }],
    })
}
