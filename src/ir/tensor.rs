use std::ptr::NonNull;

use crate::ir::node::push_unique;
use crate::ir::{DataType, Fuid, Guid};

pub type Shape = Vec<usize>;

/// Storage bound to a tensor after memory planning: the arena base address
/// plus the tensor's planned offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob {
    base: NonNull<u8>,
    offset: usize,
}

impl Blob {
    pub fn new(base: NonNull<u8>, offset: usize) -> Self {
        Self { base, offset }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Address of the first byte of the tensor inside the arena.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.offset)
    }
}

pub(crate) fn checked_bytes(shape: &[usize], dtype: DataType) -> Option<usize> {
    shape
        .iter()
        .try_fold(dtype.size_in_bytes(), |bytes, dim| bytes.checked_mul(*dim))
}

/// Value node of the graph.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub fuid: Fuid,
    pub shape: Shape,
    pub dtype: DataType,
    pub source: Option<Guid>,
    pub targets: Vec<Guid>,
    pub storage: Option<Blob>,
}

impl Tensor {
    pub fn new(fuid: Fuid, shape: Shape, dtype: DataType) -> Self {
        Self {
            fuid,
            shape,
            dtype,
            source: None,
            targets: Vec::new(),
            storage: None,
        }
    }

    /// Saturates at `usize::MAX`; see `checked_bytes` for overflow detection.
    pub fn element_count(&self) -> usize {
        self.shape
            .iter()
            .try_fold(1usize, |count, dim| count.checked_mul(*dim))
            .unwrap_or(usize::MAX)
    }

    pub fn bytes(&self) -> usize {
        self.checked_bytes().unwrap_or(usize::MAX)
    }

    /// Storage size, or `None` when it does not fit in `usize`.
    pub fn checked_bytes(&self) -> Option<usize> {
        checked_bytes(&self.shape, self.dtype)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn add_target(&mut self, guid: Guid) {
        push_unique(&mut self.targets, guid);
    }

    pub fn remove_target(&mut self, guid: Guid) {
        self.targets.retain(|target| *target != guid);
    }

    /// A tensor attached to nothing is not part of any computation.
    pub fn is_dangling(&self) -> bool {
        self.source.is_none() && self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use crate::ir::{Blob, DataType, Fuid, Guid, Tensor};

    #[test]
    fn byte_size_uses_dtype_width() {
        let tensor = Tensor::new(Fuid(0), vec![2, 3, 4], DataType::Float16);
        assert_eq!(tensor.element_count(), 24);
        assert_eq!(tensor.bytes(), 48);

        let scalar = Tensor::new(Fuid(1), Vec::new(), DataType::Int64);
        assert_eq!(scalar.bytes(), 8);
    }

    #[test]
    fn oversized_shape_has_no_byte_size() {
        let tensor = Tensor::new(Fuid(0), vec![usize::MAX / 2, 3], DataType::Float32);
        assert_eq!(tensor.checked_bytes(), None);
        assert_eq!(tensor.bytes(), usize::MAX);
        assert_eq!(tensor.element_count(), usize::MAX);
    }

    #[test]
    fn targets_have_set_semantics() {
        let mut tensor = Tensor::new(Fuid(0), vec![4], DataType::Float32);
        assert!(tensor.is_dangling());
        tensor.add_target(Guid(1));
        tensor.add_target(Guid(1));
        tensor.add_target(Guid(2));
        assert_eq!(tensor.targets, vec![Guid(1), Guid(2)]);
        tensor.remove_target(Guid(1));
        assert_eq!(tensor.targets, vec![Guid(2)]);
        assert!(!tensor.is_dangling());
    }

    #[test]
    fn blob_points_at_offset() {
        let mut arena = [0u8; 32];
        let base = NonNull::new(arena.as_mut_ptr()).expect("stack address is non-null");
        let blob = Blob::new(base, 16);
        assert_eq!(blob.as_ptr() as usize - base.as_ptr() as usize, 16);
        assert_eq!(blob.offset(), 16);
    }
}
