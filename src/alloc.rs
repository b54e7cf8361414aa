use crate::device::GpuDevice;

/// Row slots start on 256-byte boundaries. Besides matching copy
/// alignment rules, this keeps every supported element kind aligned
/// inside numeric stores.
pub const OFFSET_ALIGN: u64 = 256;

pub fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Offset for a new row of `required` bytes inside a chunk with the
/// given occupancy, or None when the chunk cannot hold it.
fn placement_in(used: u64, capacity: u64, required: u64) -> Option<u64> {
    let aligned = round_up(used, OFFSET_ALIGN);
    (aligned + required <= capacity).then_some(aligned)
}

/// Capacity for a fresh chunk: the store default, grown when a single
/// row needs more.
fn capacity_for(default_capacity: u64, required: u64) -> u64 {
    default_capacity.max(round_up(required, OFFSET_ALIGN))
}

/// One device buffer plus its occupancy high-water mark. `used` never
/// decreases while the chunk lives.
pub struct Chunk {
    pub buffer: wgpu::Buffer,
    pub capacity: u64,
    pub used: u64,
    pub rows: u64,
}

/// The ordered chunk list of one store. Allocation is append-only into
/// the last chunk; earlier chunks only ever serve reads.
pub struct ChunkSet {
    label: String,
    default_capacity: u64,
    chunks: Vec<Chunk>,
}

impl ChunkSet {
    pub fn new(label: impl Into<String>, default_capacity: u64) -> Self {
        Self {
            label: label.into(),
            default_capacity,
            chunks: Vec::new(),
        }
    }

    /// Reserve space for `required` bytes and return `(chunk_index,
    /// offset)`. The offset is always a multiple of [`OFFSET_ALIGN`].
    pub fn allocate(&mut self, device: &GpuDevice, required: u64) -> (usize, u64) {
        if let Some(last) = self.chunks.last_mut() {
            if let Some(offset) = placement_in(last.used, last.capacity, required) {
                last.used = offset + required;
                last.rows += 1;
                return (self.chunks.len() - 1, offset);
            }
        }

        let capacity = capacity_for(self.default_capacity, required);
        let label = format!("{}-chunk-{}", self.label, self.chunks.len());
        self.chunks.push(Chunk {
            buffer: device.create_chunk(&label, capacity),
            capacity,
            used: round_up(required, OFFSET_ALIGN),
            rows: 1,
        });
        (self.chunks.len() - 1, 0)
    }

    pub fn chunk(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn used_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.used).sum()
    }

    /// Destroy every chunk and start over with one empty chunk of the
    /// default capacity.
    pub fn reset(&mut self, device: &GpuDevice) {
        self.destroy();
        let label = format!("{}-chunk-0", self.label);
        self.chunks.push(Chunk {
            buffer: device.create_chunk(&label, self.default_capacity),
            capacity: self.default_capacity,
            used: 0,
            rows: 0,
        });
    }

    /// Destroy every chunk without replacement. Used at store teardown.
    pub fn destroy(&mut self) {
        for chunk in self.chunks.drain(..) {
            chunk.buffer.destroy();
        }
    }
}
