//! As-rigid-as-possible mesh deformation energy.
//!
//! Unknowns per vertex: position (3) followed by Euler angles (3), with
//! `R(a) = Rz(a.z) * Ry(a.y) * Rx(a.x)`.

use nalgebra::{Matrix3, Vector3};

use super::{Energy, EnergyWeights, ProblemKind, ResidualRow};
use crate::backend::{NamedParam, ParamValue};
use crate::error::{check_len, Result, SolverError};
use crate::patch::PatchPartition;
use crate::remap::exclusive_scan_cpu;
use crate::solver::SolverParameters;
use crate::types::{ImageDims, Real};

const UNKNOWNS: usize = 6;

/// Undirected vertex adjacency in CSR form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshTopology {
    offsets: Vec<u32>,
    neighbors: Vec<u32>,
}

impl MeshTopology {
    /// Build from undirected edges. Self loops and duplicates are dropped.
    pub fn from_edges(num_vertices: usize, edges: &[(u32, u32)]) -> Result<Self> {
        let mut adjacency = vec![Vec::new(); num_vertices];
        for &(a, b) in edges {
            for v in [a, b] {
                if v as usize >= num_vertices {
                    return Err(SolverError::InvalidTopology {
                        vertex: v as usize,
                        num_vertices,
                    });
                }
            }
            if a != b {
                adjacency[a as usize].push(b);
                adjacency[b as usize].push(a);
            }
        }
        for list in &mut adjacency {
            list.sort_unstable();
            list.dedup();
        }

        let counts: Vec<u32> = adjacency.iter().map(|l| l.len() as u32).collect();
        let mut offsets = vec![0u32; num_vertices];
        let total = exclusive_scan_cpu(&counts, &mut offsets);
        offsets.push(total);

        Ok(Self {
            offsets,
            neighbors: adjacency.into_iter().flatten().collect(),
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Number of directed edges (twice the undirected count).
    pub fn num_directed_edges(&self) -> usize {
        self.neighbors.len()
    }

    #[inline]
    pub fn neighbors(&self, vertex: usize) -> &[u32] {
        &self.neighbors[self.offsets[vertex] as usize..self.offsets[vertex + 1] as usize]
    }
}

/// Caller buffers of a mesh deformation solve (`3 * N` values each).
#[derive(Debug, Clone)]
pub struct MeshInput<'a, T: Real> {
    /// Rest shape `u`.
    pub rest_positions: &'a [T],
    pub topology: &'a MeshTopology,
    /// Target positions; a vertex with any non-finite coordinate is free.
    pub constraints: &'a [T],
}

impl<'a, T: Real> MeshInput<'a, T> {
    pub fn new(rest_positions: &'a [T], topology: &'a MeshTopology, constraints: &'a [T]) -> Self {
        Self {
            rest_positions,
            topology,
            constraints,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.topology.num_vertices()
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.num_vertices() * 3;
        check_len("rest_positions", self.rest_positions, n)?;
        check_len("constraints", self.constraints, n)?;
        Ok(())
    }

    /// Constraint of `vertex` when all three coordinates are finite.
    pub fn constraint(&self, vertex: usize) -> Option<Vector3<T>> {
        let c = vec3(self.constraints, vertex);
        (c.x.is_finite() && c.y.is_finite() && c.z.is_finite()).then_some(c)
    }
}

#[inline]
fn vec3<T: Real>(data: &[T], vertex: usize) -> Vector3<T> {
    Vector3::new(data[3 * vertex], data[3 * vertex + 1], data[3 * vertex + 2])
}

/// Wrap an angle to `(-π, π]`.
pub fn wrap_angle<T: Real>(angle: T) -> T {
    let wrapped = angle.sin().atan2(angle.cos());
    if wrapped <= -T::pi() {
        wrapped + T::two_pi()
    } else {
        wrapped
    }
}

/// `R(a)` and its partial derivatives with respect to the three angles.
pub(crate) fn euler_rotation<T: Real>(a: &Vector3<T>) -> (Matrix3<T>, [Matrix3<T>; 3]) {
    let (o, z) = (T::one(), T::zero());
    let (sa, ca) = a.x.sin_cos();
    let (sb, cb) = a.y.sin_cos();
    let (sg, cg) = a.z.sin_cos();

    let rx = Matrix3::new(o, z, z, z, ca, -sa, z, sa, ca);
    let ry = Matrix3::new(cb, z, sb, z, o, z, -sb, z, cb);
    let rz = Matrix3::new(cg, -sg, z, sg, cg, z, z, z, o);
    let drx = Matrix3::new(z, z, z, z, -sa, -ca, z, ca, -sa);
    let dry = Matrix3::new(-sb, z, cb, z, z, z, -cb, z, -sb);
    let drz = Matrix3::new(-sg, -cg, z, cg, -sg, z, z, z, z);

    (
        rz * ry * rx,
        [rz * ry * drx, rz * dry * rx, drz * ry * rx],
    )
}

/// ARAP energy over borrowed vertex positions and angles.
pub struct ArapEnergy<'a, T: Real> {
    input: &'a MeshInput<'a, T>,
    partition: PatchPartition,
    positions: &'a mut [T],
    angles: &'a mut [T],
}

impl<'a, T: Real> ArapEnergy<'a, T> {
    /// Vertices are partitioned into chunks of `chunk_size` indices.
    pub fn new(
        input: &'a MeshInput<'a, T>,
        chunk_size: usize,
        positions: &'a mut [T],
        angles: &'a mut [T],
    ) -> Self {
        let topology = input.topology;
        let partition = PatchPartition::linear(topology.num_vertices(), chunk_size, |v| {
            topology.neighbors(v)
        });
        Self {
            input,
            partition,
            positions,
            angles,
        }
    }

    #[inline]
    fn var(vertex: usize, component: usize) -> usize {
        vertex * UNKNOWNS + component
    }
}

impl<T: Real> Energy<T> for ArapEnergy<'_, T> {
    fn kind(&self) -> ProblemKind {
        ProblemKind::MeshDeformation
    }

    fn num_elements(&self) -> usize {
        self.input.num_vertices()
    }

    fn unknowns_per_element(&self) -> usize {
        UNKNOWNS
    }

    fn partition(&self) -> &PatchPartition {
        &self.partition
    }

    fn element_residuals(&self, i: usize, weights: &EnergyWeights<T>, out: &mut Vec<ResidualRow<T>>) {
        let w = weights.sqrt();
        let p_i = vec3(self.positions, i);
        let u_i = vec3(self.input.rest_positions, i);

        if w.fitting > T::zero() {
            if let Some(target) = self.input.constraint(i) {
                for c in 0..3 {
                    let mut row = ResidualRow::new(i, w.fitting * (p_i[c] - target[c]));
                    row.push(Self::var(i, c), w.fitting);
                    out.push(row);
                }
            }
        }

        if w.prior > T::zero() {
            for c in 0..3 {
                let mut row = ResidualRow::new(i, w.prior * (p_i[c] - u_i[c]));
                row.push(Self::var(i, c), w.prior);
                out.push(row);
            }
        }

        if w.regularizer > T::zero() {
            let (rot, d_rot) = euler_rotation(&vec3(self.angles, i));
            for &j in self.input.topology.neighbors(i) {
                let j = j as usize;
                let rest_edge = u_i - vec3(self.input.rest_positions, j);
                let rotated = rot * rest_edge;
                let d_rotated = d_rot.map(|d| d * rest_edge);
                let edge = p_i - vec3(self.positions, j);

                for c in 0..3 {
                    let mut row = ResidualRow::new(i, w.regularizer * (edge[c] - rotated[c]));
                    row.push(Self::var(i, c), w.regularizer)
                        .push(Self::var(j, c), -w.regularizer);
                    for (k, dq) in d_rotated.iter().enumerate() {
                        row.push(Self::var(i, 3 + k), -w.regularizer * dq[c]);
                    }
                    out.push(row);
                }
            }
        }
    }

    fn apply_step(&mut self, delta: &[T]) {
        for v in 0..self.num_elements() {
            for c in 0..3 {
                self.positions[3 * v + c] += delta[Self::var(v, c)];
                let angle = self.angles[3 * v + c] + delta[Self::var(v, 3 + c)];
                self.angles[3 * v + c] = wrap_angle(angle);
            }
        }
    }

    fn snapshot_dims(&self) -> ImageDims {
        ImageDims::new(self.num_elements(), 1)
    }

    fn dense_index(&self, element: usize) -> usize {
        element
    }

    fn named_parameters(&self, params: &SolverParameters) -> Vec<NamedParam> {
        let mut values = vec![
            NamedParam::new("w_fitSqrt", ParamValue::Float(params.weight_fitting.sqrt())),
            NamedParam::new("w_regSqrt", ParamValue::Float(params.weight_regularizer.sqrt())),
            NamedParam::new("w_priorSqrt", ParamValue::Float(params.weight_prior.sqrt())),
        ];
        values.extend(params.iteration_values());
        values
    }
}
