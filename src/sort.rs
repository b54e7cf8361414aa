use bytemuck::{Pod, Zeroable};

use crate::device::GpuDevice;
use crate::directory::RowId;
use crate::error::{Error, Result};

/// Must match @workgroup_size in the sort shader.
const WORKGROUP_SIZE: u32 = 256;

const SORT_BIND_ITEMS: u32 = 0;
const SORT_BIND_PARAMS: u32 = 1;
const SORT_BIND_SWAPPED: u32 = 2;

/// Sentinel word for padding items; sorts after every real field tuple
/// and is filtered out of the readback.
const PAD_WORD: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default)]
struct SortParams {
    size: u32,
    half_size: u32,
    row_count: u32,
    padded_count: u32,
    fields_per_item: u32,
    _pad: [u32; 3],
}

/// Bitonic sorter over fixed-stride u32 items. Each item is a row id
/// word followed by `fields_per_item` orderable field words; the device
/// orders items by their field words ascending (descending fields are
/// complement-encoded upstream).
pub struct SortPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl SortPipeline {
    pub fn new(device: &GpuDevice) -> Self {
        let shader = device
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("row-sort-shader"),
                source: wgpu::ShaderSource::Wgsl(ROW_SORT_WGSL.into()),
            });
        let bind_group_layout =
            device
                .device()
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("row-sort-bind-group-layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: SORT_BIND_ITEMS,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: false },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: SORT_BIND_PARAMS,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: SORT_BIND_SWAPPED,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: false },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });
        let pipeline_layout =
            device
                .device()
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("row-sort-pipeline-layout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });
        let pipeline =
            device
                .device()
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("row-sort-pipeline"),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: "main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                });

        Self {
            pipeline,
            bind_group_layout,
        }
    }

    /// Sort the concatenated items and read back their row ids in order.
    /// `fields_per_item` is the number of orderable words per item; the
    /// item stride is one greater for the leading row id.
    pub async fn execute(
        &self,
        device: &GpuDevice,
        definition: &str,
        items: &[u32],
        fields_per_item: u32,
    ) -> Result<Vec<RowId>> {
        let stride = fields_per_item as usize + 1;
        debug_assert_eq!(items.len() % stride, 0);
        let row_count = (items.len() / stride) as u32;
        if row_count <= 1 {
            return Ok(items.iter().step_by(stride).copied().collect());
        }

        let padded_count = row_count.next_power_of_two();
        let item_bytes = padded_count as u64 * stride as u64 * 4;
        if item_bytes > device.max_storage_binding() {
            return Err(Error::SortBudgetExceeded {
                definition: definition.to_string(),
                bytes: item_bytes,
            });
        }

        // Padding items carry the max field tuple, so they sink to the
        // tail and the real rows come back as a prefix permutation.
        let mut padded = Vec::with_capacity(padded_count as usize * stride);
        padded.extend_from_slice(items);
        padded.resize(padded_count as usize * stride, PAD_WORD);

        let item_buffer = device.create_storage_with_data("row-sort-items", &padded);
        let params_buffer = device.create_uniform(
            "row-sort-params",
            std::mem::size_of::<SortParams>() as u64,
        );
        let swapped_buffer = device.create_storage_with_data("row-sort-swapped", &[0]);

        let bind_group = device
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("row-sort-bind-group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: SORT_BIND_ITEMS,
                        resource: item_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: SORT_BIND_PARAMS,
                        resource: params_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: SORT_BIND_SWAPPED,
                        resource: swapped_buffer.as_entire_binding(),
                    },
                ],
            });

        let workgroups = padded_count.div_ceil(WORKGROUP_SIZE);
        let mut size = 2u32;
        while size <= padded_count {
            let mut half_size = size / 2;
            while half_size > 0 {
                let params = SortParams {
                    size,
                    half_size,
                    row_count,
                    padded_count,
                    fields_per_item,
                    _pad: [0; 3],
                };
                device
                    .queue()
                    .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));
                device
                    .queue()
                    .write_buffer(&swapped_buffer, 0, bytemuck::bytes_of(&0u32));

                let mut encoder =
                    device
                        .device()
                        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                            label: Some("row-sort-encoder"),
                        });
                {
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("row-sort-pass"),
                        timestamp_writes: None,
                    });
                    cpass.set_pipeline(&self.pipeline);
                    cpass.set_bind_group(0, &bind_group, &[]);
                    cpass.dispatch_workgroups(workgroups, 1, 1);
                }
                device.submit(encoder);
                device.await_queue();

                half_size /= 2;
            }
            size *= 2;
        }

        let staging = device.create_staging(item_bytes);
        let mut encoder = device
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("row-sort-readback-encoder"),
            });
        encoder.copy_buffer_to_buffer(&item_buffer, 0, &staging, 0, item_bytes);
        device.submit(encoder);
        device.await_queue();

        let bytes = device.read_back(&staging)?;
        item_buffer.destroy();
        params_buffer.destroy();
        swapped_buffer.destroy();
        staging.destroy();

        let words: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes);
        Ok(words
            .iter()
            .step_by(stride)
            .copied()
            .filter(|&id| id != PAD_WORD)
            .take(row_count as usize)
            .collect())
    }
}

const ROW_SORT_WGSL: &str = r#"
struct SortParams {
    size: u32,
    half_size: u32,
    row_count: u32,
    padded_count: u32,
    fields_per_item: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var<storage, read_write> items: array<u32>;
@group(0) @binding(1) var<uniform> params: SortParams;
@group(0) @binding(2) var<storage, read_write> debug_swapped: atomic<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.padded_count) {
        return;
    }
    let mate = i ^ params.half_size;
    if (mate <= i || mate >= params.padded_count) {
        return;
    }

    let stride = params.fields_per_item + 1u;
    let a = i * stride;
    let b = mate * stride;

    var cmp: i32 = 0;
    for (var w = 1u; w <= params.fields_per_item; w = w + 1u) {
        let x = items[a + w];
        let y = items[b + w];
        if (x != y) {
            cmp = select(-1, 1, x > y);
            break;
        }
    }

    let ascending = (i & params.size) == 0u;
    let should_swap = select(cmp < 0, cmp > 0, ascending);
    if (should_swap) {
        for (var w = 0u; w < stride; w = w + 1u) {
            let tmp = items[a + w];
            items[a + w] = items[b + w];
            items[b + w] = tmp;
        }
        atomicAdd(&debug_swapped, 1u);
    }
}
"#;
