//! GPU-accelerated droplet erosion using wgpu compute shaders
//!
//! The WGSL kernel mirrors [`DropletKernel::run`]: one invocation per droplet,
//! the height map bound as `array<atomic<u32>>` and updated with a
//! compare-and-swap float add. Spawn cells come from the CPU so GPU droplets
//! start exactly where the CPU droplets would.

use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::erosion::hydraulic::{DropletKernel, DropletOutcome, NEGLIGIBLE_WATER};
use crate::erosion::resample::SimulationGrid;
use crate::erosion::ErosionStats;
use crate::error::{ErosionError, Result};

/// Droplets per dispatch
const BATCH_SIZE: usize = 65_536;
const WORKGROUP_SIZE: usize = 64;

/// Parameters passed to the GPU compute shader
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GpuErosionParams {
    map_size: u32,
    border: u32,
    brush_len: u32,
    max_lifetime: u32,
    droplet_offset: u32,
    droplet_count: u32,
    seed: u32,
    _pad0: u32,
    inertia: f32,
    capacity_factor: f32,
    min_capacity: f32,
    erode_speed: f32,
    deposit_speed: f32,
    evaporate_speed: f32,
    gravity: f32,
    initial_speed: f32,
    initial_water: f32,
    min_water: f32,
    wind_x: f32,
    wind_y: f32,
    wind_weight: f32,
    _pad1: [f32; 3],
}

/// Per-droplet result written by the shader, one slot per invocation
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
struct GpuDropletOutcome {
    steps: u32,
    eroded: f32,
    deposited: f32,
    discarded: u32,
}

impl From<GpuDropletOutcome> for DropletOutcome {
    fn from(o: GpuDropletOutcome) -> Self {
        DropletOutcome {
            steps: o.steps,
            eroded: o.eroded,
            deposited: o.deposited,
            discarded: o.discarded != 0,
        }
    }
}

/// GPU context for erosion computation
pub struct GpuErosionContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuErosionContext {
    /// Create a new GPU erosion context
    /// Returns None if no GPU adapter is available
    pub fn new() -> Option<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;

        info!(adapter = %adapter.get_info().name, "GPU adapter acquired");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Erosion GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .ok()?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Droplet Erosion Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(EROSION_SHADER)),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Erosion Bind Group Layout"),
            entries: &[
                // Height map (atomic f32 bits)
                storage_entry(0, false),
                // Spawn cells, two u32 per droplet
                storage_entry(1, true),
                // Brush offsets
                storage_entry(2, true),
                // Brush weights
                storage_entry(3, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Droplet outcomes of the current batch
                storage_entry(5, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Erosion Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Erosion Compute Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Some(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
        })
    }

    /// Copy `source` into a mappable buffer and read it back as `T`s.
    fn read_back<T: Pod>(&self, source: &wgpu::Buffer, len: usize) -> Result<Vec<T>> {
        let byte_len = (len * std::mem::size_of::<T>()) as u64;
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: byte_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Copy Encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging_buffer, 0, byte_len);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| ErosionError::Gpu(format!("readback channel closed: {}", e)))?
            .map_err(|e| ErosionError::Gpu(format!("buffer map failed: {}", e)))?;

        let values = bytemuck::cast_slice::<u8, T>(&buffer_slice.get_mapped_range()).to_vec();
        staging_buffer.unmap();
        Ok(values)
    }

    /// Run `num_droplets` droplets on the GPU.
    ///
    /// `grid` is only overwritten after a successful readback.
    pub fn simulate(
        &self,
        grid: &mut SimulationGrid,
        kernel: &DropletKernel<'_>,
        num_droplets: usize,
    ) -> Result<ErosionStats> {
        let size = grid.resolution;
        let cells = size * size;

        let mut stats = ErosionStats::default();
        if num_droplets == 0 {
            return Ok(stats);
        }
        let mut spawns: Vec<u32> = Vec::with_capacity(num_droplets * 2);
        for index in 0..num_droplets {
            let (x, y) = kernel.spawn_cell(&mut kernel.rng_for(index));
            spawns.push(x as u32);
            spawns.push(y as u32);
        }

        let heights: Vec<u32> = grid.data.iter().map(|h| h.to_bits()).collect();
        let map_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Height Buffer"),
            contents: bytemuck::cast_slice(&heights),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let spawn_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Spawn Buffer"),
            contents: bytemuck::cast_slice(&spawns),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let offset_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Brush Offsets"),
            contents: bytemuck::cast_slice(&kernel.brush.offsets),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let weight_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Brush Weights"),
            contents: bytemuck::cast_slice(&kernel.brush.weights),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let outcome_slots = num_droplets.min(BATCH_SIZE);
        let outcome_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Droplet Outcomes"),
            size: (outcome_slots * std::mem::size_of::<GpuDropletOutcome>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params = kernel.params;
        let (wind_x, wind_y, wind_weight) = kernel
            .wind
            .map(|w| (w.dir_x, w.dir_y, w.weight))
            .unwrap_or((0.0, 0.0, 0.0));

        let num_batches = num_droplets.div_ceil(BATCH_SIZE);
        for batch in 0..num_batches {
            let batch_start = batch * BATCH_SIZE;
            let batch_count = (num_droplets - batch_start).min(BATCH_SIZE);

            let gpu_params = GpuErosionParams {
                map_size: size as u32,
                border: kernel.brush.radius as u32,
                brush_len: kernel.brush.len() as u32,
                max_lifetime: params.max_droplet_lifetime as u32,
                droplet_offset: batch_start as u32,
                droplet_count: batch_count as u32,
                seed: (kernel.seed & 0xFFFF_FFFF) as u32,
                _pad0: 0,
                inertia: params.inertia,
                capacity_factor: params.sediment_capacity_factor,
                min_capacity: params.min_sediment_capacity,
                erode_speed: params.erode_speed,
                deposit_speed: params.deposit_speed,
                evaporate_speed: params.evaporate_speed,
                gravity: params.gravity,
                initial_speed: params.initial_speed,
                initial_water: params.initial_water_volume,
                min_water: NEGLIGIBLE_WATER,
                wind_x,
                wind_y,
                wind_weight,
                _pad1: [0.0; 3],
            };

            let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Params Buffer"),
                contents: bytemuck::bytes_of(&gpu_params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Erosion Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: map_buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: spawn_buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: offset_buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 3, resource: weight_buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 4, resource: params_buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 5, resource: outcome_buffer.as_entire_binding() },
                ],
            });

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Erosion Encoder"),
            });
            {
                let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Erosion Pass"),
                    timestamp_writes: None,
                });
                compute_pass.set_pipeline(&self.pipeline);
                compute_pass.set_bind_group(0, &bind_group, &[]);
                let num_workgroups = batch_count.div_ceil(WORKGROUP_SIZE);
                compute_pass.dispatch_workgroups(num_workgroups as u32, 1, 1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));

            // Every slot up to batch_count is rewritten by its invocation
            let outcomes: Vec<GpuDropletOutcome> = self.read_back(&outcome_buffer, batch_count)?;
            for outcome in outcomes {
                stats.record(&outcome.into());
            }
            debug!(batch, batch_count, "GPU droplet batch complete");
        }

        let result: Vec<f32> = self
            .read_back::<u32>(&map_buffer, cells)?
            .into_iter()
            .map(f32::from_bits)
            .collect();

        if !result.iter().all(|h| h.is_finite()) {
            return Err(ErosionError::Gpu("kernel produced non-finite heights".into()));
        }

        grid.data = result;

        Ok(stats)
    }
}

/// Check if GPU erosion is available on this system
pub fn is_gpu_available() -> bool {
    GpuErosionContext::new().is_some()
}

/// WGSL compute shader for droplet erosion
const EROSION_SHADER: &str = r#"
struct Params {
    map_size: u32,
    border: u32,
    brush_len: u32,
    max_lifetime: u32,
    droplet_offset: u32,
    droplet_count: u32,
    seed: u32,
    _pad0: u32,
    inertia: f32,
    capacity_factor: f32,
    min_capacity: f32,
    erode_speed: f32,
    deposit_speed: f32,
    evaporate_speed: f32,
    gravity: f32,
    initial_speed: f32,
    initial_water: f32,
    min_water: f32,
    wind_x: f32,
    wind_y: f32,
    wind_weight: f32,
    _pad1: f32,
    _pad2: f32,
    _pad3: f32,
}

@group(0) @binding(0) var<storage, read_write> heights: array<atomic<u32>>;
@group(0) @binding(1) var<storage, read> spawns: array<u32>;
@group(0) @binding(2) var<storage, read> brush_offsets: array<i32>;
@group(0) @binding(3) var<storage, read> brush_weights: array<f32>;
@group(0) @binding(4) var<uniform> params: Params;
@group(0) @binding(5) var<storage, read_write> outcomes: array<Outcome>;

struct Outcome {
    steps: u32,
    eroded: f32,
    deposited: f32,
    discarded: u32,
}

fn pcg_hash(input: u32) -> u32 {
    let state = input * 747796405u + 2891336453u;
    let word = ((state >> ((state >> 28u) + 4u)) ^ state) * 277803737u;
    return (word >> 22u) ^ word;
}

fn random_f32(seed: ptr<function, u32>) -> f32 {
    *seed = pcg_hash(*seed);
    return f32(*seed) / 4294967295.0;
}

fn height(idx: u32) -> f32 {
    return bitcast<f32>(atomicLoad(&heights[idx]));
}

fn add_height(idx: u32, amount: f32) {
    var old = atomicLoad(&heights[idx]);
    loop {
        let next = bitcast<u32>(bitcast<f32>(old) + amount);
        let result = atomicCompareExchangeWeak(&heights[idx], old, next);
        if (result.exchanged) {
            break;
        }
        old = result.old_value;
    }
}

// Remove up to `amount` without going below zero, returns the removed material
fn take_height(idx: u32, amount: f32) -> f32 {
    var old = atomicLoad(&heights[idx]);
    loop {
        let current = bitcast<f32>(old);
        let next_h = current - min(amount, max(current, 0.0));
        let result = atomicCompareExchangeWeak(&heights[idx], old, bitcast<u32>(next_h));
        if (result.exchanged) {
            return current - next_h;
        }
        old = result.old_value;
    }
    // Unreachable: the loop only exits via the return above; naga requires a trailing return.
    return 0.0;
}

// x: height, y: gradient x, z: gradient y
fn height_and_gradient(pos: vec2<f32>) -> vec3<f32> {
    let node = vec2<u32>(u32(pos.x), u32(pos.y));
    let off = pos - vec2<f32>(node);
    let idx = node.y * params.map_size + node.x;

    let nw = height(idx);
    let ne = height(idx + 1u);
    let sw = height(idx + params.map_size);
    let se = height(idx + params.map_size + 1u);

    let grad_x = (ne - nw) * (1.0 - off.y) + (se - sw) * off.y;
    let grad_y = (sw - nw) * (1.0 - off.x) + (se - ne) * off.x;
    let top = nw + (ne - nw) * off.x;
    let bottom = sw + (se - sw) * off.x;
    return vec3<f32>(top + (bottom - top) * off.y, grad_x, grad_y);
}

fn in_interior(pos: vec2<f32>) -> bool {
    let border = f32(params.border);
    let limit = f32(params.map_size - 1u) - border;
    return pos.x >= border && pos.x < limit && pos.y >= border && pos.y < limit;
}

fn normalize_or_random(dir: vec2<f32>, rng: ptr<function, u32>) -> vec2<f32> {
    let len = length(dir);
    if (len > 0.000001) {
        return dir / len;
    }
    let angle = random_f32(rng) * 6.2831853;
    return vec2<f32>(cos(angle), sin(angle));
}

fn deposit_bilinear(idx: u32, off: vec2<f32>, amount: f32) {
    add_height(idx, amount * (1.0 - off.x) * (1.0 - off.y));
    add_height(idx + 1u, amount * off.x * (1.0 - off.y));
    add_height(idx + params.map_size, amount * (1.0 - off.x) * off.y);
    add_height(idx + params.map_size + 1u, amount * off.x * off.y);
}

fn simulate_droplet(droplet_id: u32) -> Outcome {
    var outcome = Outcome(0u, 0.0, 0.0, 0u);
    var rng_state = params.seed ^ (droplet_id * 1664525u + 1013904223u);

    var pos = vec2<f32>(f32(spawns[droplet_id * 2u]), f32(spawns[droplet_id * 2u + 1u]));
    if (!in_interior(pos)) {
        outcome.discarded = 1u;
        return outcome;
    }

    var dir = vec2<f32>(0.0, 0.0);
    var speed = params.initial_speed;
    var water = params.initial_water;
    var sediment = 0.0;
    var alive_inside = true;

    for (var lifetime = 0u; lifetime < params.max_lifetime; lifetime++) {
        let node = vec2<u32>(u32(pos.x), u32(pos.y));
        let idx = node.y * params.map_size + node.x;
        let off = pos - vec2<f32>(node);

        let hg = height_and_gradient(pos);
        dir = dir * params.inertia - hg.yz * (1.0 - params.inertia);
        dir = normalize_or_random(dir, &rng_state);
        if (params.wind_weight > 0.0) {
            dir = dir * (1.0 - params.wind_weight) + vec2<f32>(params.wind_x, params.wind_y) * params.wind_weight;
            dir = normalize_or_random(dir, &rng_state);
        }

        pos = pos + dir;
        outcome.steps = outcome.steps + 1u;
        if (!in_interior(pos)) {
            alive_inside = false;
            break;
        }

        let delta_height = height_and_gradient(pos).x - hg.x;
        let capacity = max(-delta_height * speed * water * params.capacity_factor, params.min_capacity);

        if (sediment > capacity || delta_height > 0.0) {
            var amount = (sediment - capacity) * params.deposit_speed;
            if (delta_height > 0.0) {
                amount = min(delta_height, sediment);
            }
            sediment = sediment - amount;
            deposit_bilinear(idx, off, amount);
            outcome.deposited = outcome.deposited + amount;
        } else {
            let amount = min((capacity - sediment) * params.erode_speed, -delta_height);
            var removed = 0.0;
            for (var i = 0u; i < params.brush_len; i++) {
                let target_idx = u32(i32(idx) + brush_offsets[i]);
                removed = removed + take_height(target_idx, amount * brush_weights[i]);
            }
            sediment = sediment + removed;
            outcome.eroded = outcome.eroded + removed;
        }

        speed = sqrt(max(0.0, speed * speed + delta_height * params.gravity));
        water = water * (1.0 - params.evaporate_speed);
        if (water < params.min_water) {
            break;
        }
    }

    if (alive_inside && sediment > 0.0) {
        let node = vec2<u32>(u32(pos.x), u32(pos.y));
        deposit_bilinear(node.y * params.map_size + node.x, pos - vec2<f32>(node), sediment);
        outcome.deposited = outcome.deposited + sediment;
    }
    return outcome;
}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    if (global_id.x >= params.droplet_count) {
        return;
    }
    outcomes[global_id.x] = simulate_droplet(params.droplet_offset + global_id.x);
}
"#;
