//! Element indexing for per-pixel energies.

use crate::patch::PatchPartition;
use crate::remap::{is_valid_mask_value, Remapper};
use crate::types::{ImageDims, Real};

const INACTIVE: u32 = u32::MAX;

/// Maps solver elements to pixels and back.
///
/// Without remapping every pixel is a solver element and inactive pixels are
/// simply never referenced by a residual. With remapping only active pixels
/// are elements, indexed by the remap table.
#[derive(Debug, Clone)]
pub struct GridDomain {
    dims: ImageDims,
    elements: Vec<u32>,
    lookup: Vec<u32>,
    num_active: usize,
    partition: PatchPartition,
}

impl GridDomain {
    /// One element per pixel; activity from the mask.
    pub fn dense<T: Real>(dims: ImageDims, mask: &[T], patch_size: usize) -> Self {
        assert_eq!(mask.len(), dims.len(), "mask does not match the grid dimensions");
        let elements: Vec<u32> = (0..dims.len() as u32).collect();
        let lookup: Vec<u32> = mask
            .iter()
            .enumerate()
            .map(|(i, &m)| if is_valid_mask_value(m) { i as u32 } else { INACTIVE })
            .collect();
        let num_active = lookup.iter().filter(|&&l| l != INACTIVE).count();
        let partition = PatchPartition::grid(dims, patch_size, &elements);
        Self {
            dims,
            elements,
            lookup,
            num_active,
            partition,
        }
    }

    /// Active pixels only, in remap table order.
    pub fn remapped(dims: ImageDims, remapper: &Remapper, patch_size: usize) -> Self {
        let elements = remapper.remap_table().to_vec();
        let mut lookup = vec![INACTIVE; dims.len()];
        for (k, &dense) in elements.iter().enumerate() {
            lookup[dense as usize] = k as u32;
        }
        let partition = PatchPartition::grid(dims, patch_size, &elements);
        Self {
            dims,
            num_active: elements.len(),
            elements,
            lookup,
            partition,
        }
    }

    pub fn dims(&self) -> ImageDims {
        self.dims
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn num_active(&self) -> usize {
        self.num_active
    }

    pub fn partition(&self) -> &PatchPartition {
        &self.partition
    }

    #[inline]
    pub fn dense_of(&self, element: usize) -> usize {
        self.elements[element] as usize
    }

    #[inline]
    pub fn coords_of(&self, element: usize) -> (usize, usize) {
        self.dims.coords(self.dense_of(element))
    }

    /// Active element at pixel `(x, y)`, `None` outside the grid or when inactive.
    #[inline]
    pub fn element_at(&self, x: isize, y: isize) -> Option<usize> {
        let dense = self.dims.index(x, y)?;
        match self.lookup[dense] {
            INACTIVE => None,
            e => Some(e as usize),
        }
    }

    #[inline]
    pub fn is_active(&self, element: usize) -> bool {
        self.lookup[self.dense_of(element)] == element as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_and_remapped_agree_on_activity() {
        let dims = ImageDims::new(3, 3);
        let mut mask = vec![1.0f64; 9];
        mask[4] = 0.0;

        let dense = GridDomain::dense(dims, &mask, 16);
        assert_eq!(dense.num_elements(), 9);
        assert_eq!(dense.num_active(), 8);
        assert!(!dense.is_active(4));
        assert_eq!(dense.element_at(1, 1), None);
        assert_eq!(dense.element_at(2, 1), Some(5));

        let mut remapper = Remapper::new(9);
        remapper.compute(&mask, dims, 16);
        let remapped = GridDomain::remapped(dims, &remapper, 16);
        assert_eq!(remapped.num_elements(), 8);
        assert_eq!(remapped.element_at(1, 1), None);
        assert_eq!(remapped.element_at(2, 1), Some(4));
        assert_eq!(remapped.dense_of(4), 5);
        assert!((0..8).all(|e| remapped.is_active(e)));
    }

    #[test]
    fn test_element_at_outside_grid() {
        let dims = ImageDims::new(2, 2);
        let domain = GridDomain::dense(dims, &[1.0f32; 4], 2);
        assert_eq!(domain.element_at(-1, 0), None);
        assert_eq!(domain.element_at(0, 2), None);
        assert_eq!(domain.element_at(1, 1), Some(3));
    }
}
