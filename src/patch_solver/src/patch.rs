//! Patch partitioning of grid pixels and mesh vertices.
//!
//! Grids are cut into `patch_size x patch_size` tiles (tile-major ids,
//! row-major offsets inside a tile). Meshes are cut into contiguous chunks of
//! vertex indices. The last tile or chunk in each dimension may be partial.
//!
//! An element is on a patch boundary when one of its neighbors lives in a
//! different patch. Boundary elements couple patches in the block solver.

use serde::Serialize;

use crate::types::ImageDims;

/// Position of an element within the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatchLocation {
    pub patch_id: usize,
    pub offset: usize,
    pub is_boundary: bool,
}

/// How element indices map to patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatchLayout {
    /// Square tiles of a dense grid.
    Grid(ImageDims),
    /// Contiguous index chunks (mesh vertices).
    Linear,
    /// Everything in one patch (global solve).
    Single,
}

/// Locate a dense grid index.
///
/// # Arguments
/// * `dense` - Row-major pixel index, must be `< dims.len()`
/// * `dims` - Grid dimensions
/// * `patch_size` - Tile edge length, must be non-zero
pub fn locate_grid(dense: usize, dims: ImageDims, patch_size: usize) -> PatchLocation {
    debug_assert!(patch_size > 0);
    let (x, y) = dims.coords(dense);
    let tiles_x = dims.width.div_ceil(patch_size);
    let (tx, lx) = (x / patch_size, x % patch_size);
    let (ty, ly) = (y / patch_size, y % patch_size);

    let left = lx == 0 && x > 0;
    let right = lx + 1 == patch_size && x + 1 < dims.width;
    let top = ly == 0 && y > 0;
    let bottom = ly + 1 == patch_size && y + 1 < dims.height;

    PatchLocation {
        patch_id: ty * tiles_x + tx,
        offset: ly * patch_size + lx,
        is_boundary: left || right || top || bottom,
    }
}

/// Locate a vertex in a chunked linear layout.
///
/// `neighbors` are the vertex's mesh neighbors.
pub fn locate_linear(vertex: usize, patch_size: usize, neighbors: &[u32]) -> PatchLocation {
    debug_assert!(patch_size > 0);
    let patch_id = vertex / patch_size;
    PatchLocation {
        patch_id,
        offset: vertex % patch_size,
        is_boundary: neighbors
            .iter()
            .any(|&n| n as usize / patch_size != patch_id),
    }
}

/// A non-empty patch and its member elements (solver element indices).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub id: usize,
    pub members: Vec<u32>,
}

/// Partition of solver elements into patches.
///
/// Element indices are the solver's own indices: dense indices without
/// remapping, compacted indices with remapping. Empty patches are dropped;
/// `slot_of` gives the position of an element's patch in [`patches`](Self::patches).
#[derive(Debug, Clone)]
pub struct PatchPartition {
    layout: PatchLayout,
    patch_size: usize,
    patches: Vec<Patch>,
    slot: Vec<u32>,
    local: Vec<u32>,
    boundary: Vec<bool>,
}

impl PatchPartition {
    /// Tile a grid. `elements[e]` is the dense index of solver element `e`.
    pub fn grid(dims: ImageDims, patch_size: usize, elements: &[u32]) -> Self {
        assert!(patch_size > 0, "patch size must be non-zero");
        let tiles = dims.width.div_ceil(patch_size) * dims.height.div_ceil(patch_size);
        let mut buckets = vec![Vec::new(); tiles];
        let mut boundary = Vec::with_capacity(elements.len());

        for (e, &dense) in elements.iter().enumerate() {
            let loc = locate_grid(dense as usize, dims, patch_size);
            buckets[loc.patch_id].push(e as u32);
            boundary.push(loc.is_boundary);
        }

        Self::from_buckets(PatchLayout::Grid(dims), patch_size, buckets, boundary)
    }

    /// Chunk `num_elements` vertices into runs of `patch_size`.
    pub fn linear<'a, F>(num_elements: usize, patch_size: usize, neighbors: F) -> Self
    where
        F: Fn(usize) -> &'a [u32],
    {
        assert!(patch_size > 0, "patch size must be non-zero");
        let mut buckets = vec![Vec::new(); num_elements.div_ceil(patch_size)];
        let mut boundary = Vec::with_capacity(num_elements);

        for v in 0..num_elements {
            let loc = locate_linear(v, patch_size, neighbors(v));
            buckets[loc.patch_id].push(v as u32);
            boundary.push(loc.is_boundary);
        }

        Self::from_buckets(PatchLayout::Linear, patch_size, buckets, boundary)
    }

    /// One patch holding every element.
    pub fn single(num_elements: usize) -> Self {
        let members = (0..num_elements as u32).collect::<Vec<_>>();
        let buckets = if members.is_empty() { Vec::new() } else { vec![members] };
        Self::from_buckets(
            PatchLayout::Single,
            num_elements.max(1),
            buckets,
            vec![false; num_elements],
        )
    }

    fn from_buckets(
        layout: PatchLayout,
        patch_size: usize,
        buckets: Vec<Vec<u32>>,
        boundary: Vec<bool>,
    ) -> Self {
        let n = boundary.len();
        let patches: Vec<Patch> = buckets
            .into_iter()
            .enumerate()
            .filter(|(_, members)| !members.is_empty())
            .map(|(id, members)| Patch { id, members })
            .collect();

        let mut slot = vec![0u32; n];
        let mut local = vec![0u32; n];
        for (s, patch) in patches.iter().enumerate() {
            for (l, &e) in patch.members.iter().enumerate() {
                slot[e as usize] = s as u32;
                local[e as usize] = l as u32;
            }
        }

        Self {
            layout,
            patch_size,
            patches,
            slot,
            local,
            boundary,
        }
    }

    pub fn layout(&self) -> PatchLayout {
        self.layout
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Number of partitioned elements.
    pub fn num_elements(&self) -> usize {
        self.boundary.len()
    }

    pub fn num_patches(&self) -> usize {
        self.patches.len()
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Index into [`patches`](Self::patches) of the patch holding `element`.
    #[inline]
    pub fn slot_of(&self, element: usize) -> usize {
        self.slot[element] as usize
    }

    /// Position of `element` in its patch's member list.
    #[inline]
    pub fn local_index(&self, element: usize) -> usize {
        self.local[element] as usize
    }

    #[inline]
    pub fn is_boundary(&self, element: usize) -> bool {
        self.boundary[element]
    }

    pub fn num_boundary(&self) -> usize {
        self.boundary.iter().filter(|&&b| b).count()
    }
}
