use std::collections::BTreeMap;
use std::fmt;
use std::ptr::NonNull;

use thiserror::Error;

use crate::ir::{DataType, MemoryProvider, NativeCpuRuntime, RuntimeError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("arena already materialized: {operation} is not allowed after reservation")]
    ArenaMaterialized { operation: &'static str },
    #[error("free of unknown block at offset {offset}")]
    UnknownBlock { offset: usize },
    #[error("double free of block at offset {offset}")]
    DoubleFree { offset: usize },
    #[error("request of {size} bytes overflows the arena address space")]
    SizeOverflow { size: usize },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Snapshot of allocator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorUsage {
    pub used: usize,
    pub peak: usize,
    pub free_blocks: usize,
    pub materialized: bool,
}

impl fmt::Display for AllocatorUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Used memory: {}, peak memory: {}, free blocks: {}, materialized: {}",
            self.used, self.peak, self.free_blocks, self.materialized
        )
    }
}

/// First-fit allocator handing out offsets into a single arena.
///
/// Planning and reservation are separate phases. `alloc` and `free` only move
/// offsets around; the arena is reserved from the provider on the first
/// `base_pointer` call, sized to the highest peak reached while planning so
/// blocks freed from the tail stay addressable. After that the plan is frozen.
pub struct Allocator {
    used: usize,
    peak: usize,
    high_water: usize,
    alignment: usize,
    // block offset -> free bytes; 0 marks a live block
    free_blocks: BTreeMap<usize, usize>,
    // most recently appended block that is still live
    tail: Option<usize>,
    provider: Box<dyn MemoryProvider>,
    arena: Option<NonNull<u8>>,
    reserved: usize,
}

impl Allocator {
    pub fn new(provider: Box<dyn MemoryProvider>) -> Self {
        Self::with_alignment(provider, DataType::MAX_WIDTH)
    }

    pub fn with_alignment(provider: Box<dyn MemoryProvider>, alignment: usize) -> Self {
        Self {
            used: 0,
            peak: 0,
            high_water: 0,
            alignment: alignment.max(1),
            free_blocks: BTreeMap::new(),
            tail: None,
            provider,
            arena: None,
            reserved: 0,
        }
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Rounds `size` up to the alignment quantum. Empty requests still take
    /// one quantum so every live block has its own offset. Saturates at
    /// `usize::MAX` for sizes no arena can hold.
    pub fn aligned_size(&self, size: usize) -> usize {
        self.checked_aligned_size(size).unwrap_or(usize::MAX)
    }

    fn checked_aligned_size(&self, size: usize) -> Result<usize, AllocatorError> {
        size.max(1)
            .div_ceil(self.alignment)
            .checked_mul(self.alignment)
            .ok_or(AllocatorError::SizeOverflow { size })
    }

    pub fn alloc(&mut self, size: usize) -> Result<usize, AllocatorError> {
        self.ensure_planning("alloc")?;
        let requested = size;
        let size = self.checked_aligned_size(size)?;
        let used = self
            .used
            .checked_add(size)
            .ok_or(AllocatorError::SizeOverflow { size: requested })?;

        let reusable = self
            .free_blocks
            .iter()
            .find(|(_, free)| **free >= size)
            .map(|(offset, free)| (*offset, *free));

        if let Some((offset, free)) = reusable {
            self.used = used;
            self.free_blocks.insert(offset, 0);
            if free > size {
                self.free_blocks.insert(offset + size, free - size);
            }
            log::trace!("alloc {size} bytes reusing block at {offset}");
            return Ok(offset);
        }

        let offset = self.peak;
        let peak = offset
            .checked_add(size)
            .ok_or(AllocatorError::SizeOverflow { size: requested })?;
        self.used = used;
        self.free_blocks.insert(offset, 0);
        self.tail = Some(offset);
        self.peak = peak;
        self.high_water = self.high_water.max(self.peak);
        log::trace!("alloc {size} bytes appended at {offset}, peak {}", self.peak);
        Ok(offset)
    }

    pub fn free(&mut self, offset: usize, size: usize) -> Result<(), AllocatorError> {
        self.ensure_planning("free")?;
        let size = self.checked_aligned_size(size)?;

        match self.free_blocks.get(&offset).copied() {
            None => return Err(AllocatorError::UnknownBlock { offset }),
            Some(free) if free > 0 => return Err(AllocatorError::DoubleFree { offset }),
            Some(_) => {}
        }

        self.used = self.used.saturating_sub(size);
        if self.tail == Some(offset) {
            self.free_blocks.remove(&offset);
            self.tail = None;
            self.peak = self.peak.saturating_sub(size);
            log::trace!("free {size} bytes at {offset}, arena shrinks to {}", self.peak);
        } else {
            self.free_blocks.insert(offset, size);
            log::trace!("free {size} bytes at {offset} kept for reuse");
        }
        Ok(())
    }

    /// Reserves the arena on first call and returns its base address.
    pub fn base_pointer(&mut self) -> Result<NonNull<u8>, AllocatorError> {
        if let Some(ptr) = self.arena {
            return Ok(ptr);
        }
        let ptr = self.provider.alloc(self.high_water)?;
        log::debug!(
            "reserved {} byte arena from {} runtime",
            self.high_water,
            self.provider.name()
        );
        self.arena = Some(ptr);
        self.reserved = self.high_water;
        Ok(ptr)
    }

    /// Drops every planned block and zeroes the counters so planning can
    /// start over. Not allowed once the arena is reserved.
    pub fn reset(&mut self) -> Result<(), AllocatorError> {
        self.ensure_planning("reset")?;
        self.used = 0;
        self.peak = 0;
        self.high_water = 0;
        self.free_blocks.clear();
        self.tail = None;
        log::trace!("allocator reset");
        Ok(())
    }

    pub fn is_materialized(&self) -> bool {
        self.arena.is_some()
    }

    pub fn current_used(&self) -> usize {
        self.used
    }

    pub fn peak_used(&self) -> usize {
        self.peak
    }

    /// Largest `peak_used` seen so far; the size of the reserved arena.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn usage(&self) -> AllocatorUsage {
        AllocatorUsage {
            used: self.used,
            peak: self.peak,
            free_blocks: self.free_blocks.values().filter(|free| **free > 0).count(),
            materialized: self.is_materialized(),
        }
    }

    fn ensure_planning(&self, operation: &'static str) -> Result<(), AllocatorError> {
        if self.arena.is_some() {
            return Err(AllocatorError::ArenaMaterialized { operation });
        }
        Ok(())
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(Box::new(NativeCpuRuntime))
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        if let Some(ptr) = self.arena.take() {
            self.provider.dealloc(ptr, self.reserved);
        }
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("used", &self.used)
            .field("peak", &self.peak)
            .field("high_water", &self.high_water)
            .field("alignment", &self.alignment)
            .field("free_blocks", &self.free_blocks)
            .field("runtime", &self.provider.name())
            .field("materialized", &self.is_materialized())
            .finish()
    }
}
