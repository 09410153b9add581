use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use thiserror::Error;

use crate::ir::DataType;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("{runtime}: invalid arena layout for {bytes} bytes")]
    InvalidLayout { runtime: String, bytes: usize },
    #[error("{runtime}: out of memory reserving {bytes} bytes")]
    OutOfMemory { runtime: String, bytes: usize },
}

/// Backing memory provider the allocator reserves its arena from.
///
/// `alloc` is called at most once per allocator and `dealloc` exactly once for
/// every successful `alloc`, with the same byte count.
pub trait MemoryProvider {
    fn name(&self) -> &str;

    fn alloc(&mut self, bytes: usize) -> Result<NonNull<u8>, RuntimeError>;

    fn dealloc(&mut self, ptr: NonNull<u8>, bytes: usize);
}

/// Host memory through the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCpuRuntime;

impl NativeCpuRuntime {
    const ALIGNMENT: usize = DataType::MAX_WIDTH;

    fn layout(&self, bytes: usize) -> Result<Layout, RuntimeError> {
        Layout::from_size_align(bytes, Self::ALIGNMENT).map_err(|_| RuntimeError::InvalidLayout {
            runtime: self.name().to_string(),
            bytes,
        })
    }
}

impl MemoryProvider for NativeCpuRuntime {
    fn name(&self) -> &str {
        "cpu"
    }

    fn alloc(&mut self, bytes: usize) -> Result<NonNull<u8>, RuntimeError> {
        if bytes == 0 {
            // An empty arena is never dereferenced.
            return Ok(NonNull::<u64>::dangling().cast());
        }
        let layout = self.layout(bytes)?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| RuntimeError::OutOfMemory {
            runtime: self.name().to_string(),
            bytes,
        })
    }

    fn dealloc(&mut self, ptr: NonNull<u8>, bytes: usize) {
        if bytes == 0 {
            return;
        }
        if let Ok(layout) = self.layout(bytes) {
            // SAFETY: `ptr` came from `alloc` with this same layout.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{DataType, MemoryProvider, NativeCpuRuntime};

    #[test]
    fn reserves_aligned_host_memory() {
        let mut runtime = NativeCpuRuntime;
        let ptr = runtime.alloc(64).expect("host allocation should succeed");
        assert_eq!(ptr.as_ptr() as usize % DataType::MAX_WIDTH, 0);

        // SAFETY: the arena is 64 bytes long.
        unsafe { ptr.as_ptr().write_bytes(0xAB, 64) };
        runtime.dealloc(ptr, 64);
    }

    #[test]
    fn empty_arena_is_not_reserved() {
        let mut runtime = NativeCpuRuntime;
        let ptr = runtime.alloc(0).expect("empty arena is always available");
        runtime.dealloc(ptr, 0);
    }
}
