use super::error::{GPUError, Result};
use super::structs::{AllocationInfo, TextureDesc};

/// Checks that `info.size` bytes placed at `offset` fit inside a heap of
/// `heap_size` bytes and honour the placement alignment.
pub fn validate_placement(offset: u64, info: AllocationInfo, heap_size: u64) -> Result<()> {
    let end = offset.checked_add(info.size).ok_or(GPUError::HeapOverflow {
        offset,
        size: info.size,
        heap_size,
    })?;

    if end > heap_size {
        return Err(GPUError::HeapOverflow {
            offset,
            size: info.size,
            heap_size,
        });
    }

    if info.alignment > 1 && offset % info.alignment != 0 {
        return Err(GPUError::MisalignedPlacement {
            offset,
            alignment: info.alignment,
        });
    }

    Ok(())
}

/// Rejects texture descriptions no backend can allocate: empty extents, mip
/// chains longer than the largest extent allows, and sizes past `u64`.
pub fn validate_texture_desc(desc: &TextureDesc) -> Result<()> {
    if desc.width == 0 || desc.height == 0 {
        return Err(GPUError::InvalidTextureDesc("width and height must be non-zero"));
    }
    if desc.mip_levels > desc.max_mip_levels() {
        return Err(GPUError::InvalidTextureDesc("mip chain is longer than the extent allows"));
    }
    if desc.checked_packed_size().is_none() {
        return Err(GPUError::InvalidTextureDesc("texture size overflows"));
    }
    Ok(())
}

/// Hands out slots in a fixed-size descriptor heap. Freed slots are reused
/// lowest-first.
#[derive(Debug, Clone)]
pub struct DescriptorAllocator {
    capacity: u32,
    next: u32,
    free: Vec<u32>,
    name: &'static str,
}

impl DescriptorAllocator {
    pub fn new(name: &'static str, capacity: u32) -> Self {
        Self {
            capacity,
            next: 0,
            free: Vec::new(),
            name,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn in_use(&self) -> u32 {
        self.next - self.free.len() as u32
    }

    pub fn allocate(&mut self) -> Result<u32> {
        if let Some(idx) = self.free.pop() {
            return Ok(idx);
        }

        if self.next == self.capacity {
            return Err(GPUError::SlotError(self.name));
        }

        let idx = self.next;
        self.next += 1;
        Ok(idx)
    }

    pub fn release(&mut self, index: u32) {
        debug_assert!(index < self.next && !self.free.contains(&index));
        self.free.push(index);
        self.free.sort_unstable_by(|a, b| b.cmp(a));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUF_4K: AllocationInfo = AllocationInfo {
        size: 4096,
        alignment: 65536,
    };

    #[test]
    fn mip_chain_is_bounded_by_the_largest_extent() {
        let mut desc = TextureDesc {
            width: 4,
            height: 4,
            mip_levels: 3,
            ..Default::default()
        };
        assert!(validate_texture_desc(&desc).is_ok());

        desc.mip_levels = 4;
        assert!(matches!(
            validate_texture_desc(&desc),
            Err(GPUError::InvalidTextureDesc(_))
        ));

        desc.mip_levels = 40;
        assert!(matches!(
            validate_texture_desc(&desc),
            Err(GPUError::InvalidTextureDesc(_))
        ));
    }

    #[test]
    fn oversized_and_empty_textures_are_rejected() {
        let huge = TextureDesc {
            width: u32::MAX,
            height: u32::MAX,
            face_count: u32::MAX,
            sample_count: u32::MAX,
            ..Default::default()
        };
        assert!(validate_texture_desc(&huge).is_err());

        let empty = TextureDesc {
            width: 0,
            ..Default::default()
        };
        assert!(validate_texture_desc(&empty).is_err());
    }

    #[test]
    fn placement_inside_heap_is_accepted() {
        assert!(validate_placement(0, BUF_4K, 65536).is_ok());
        assert!(validate_placement(65536, BUF_4K, 131072).is_ok());
    }

    #[test]
    fn placement_past_the_end_overflows() {
        assert!(matches!(
            validate_placement(65536, BUF_4K, 65536),
            Err(GPUError::HeapOverflow { .. })
        ));
        assert!(matches!(
            validate_placement(u64::MAX, BUF_4K, 65536),
            Err(GPUError::HeapOverflow { .. })
        ));
    }

    #[test]
    fn unaligned_placement_is_rejected() {
        assert!(matches!(
            validate_placement(256, BUF_4K, 1 << 20),
            Err(GPUError::MisalignedPlacement {
                offset: 256,
                alignment: 65536
            })
        ));
    }

    #[test]
    fn descriptor_slots_are_recycled_lowest_first() {
        let mut slots = DescriptorAllocator::new("test", 3);
        let a = slots.allocate().unwrap();
        let b = slots.allocate().unwrap();
        let c = slots.allocate().unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert!(matches!(slots.allocate(), Err(GPUError::SlotError("test"))));

        slots.release(2);
        slots.release(0);
        assert_eq!(slots.allocate().unwrap(), 0);
        assert_eq!(slots.allocate().unwrap(), 2);
        assert_eq!(slots.in_use(), 3);
    }
}
