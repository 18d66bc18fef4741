//! Diagnostics snapshots of the linearized system.
//!
//! When a sink is attached, every outer iteration emits dense per-unknown
//! snapshots of the cost, JTF, the Jacobi preconditioner and the JTJ
//! diagonal. Inactive elements are zero. Emitting snapshots never changes
//! the numerical result.

use serde::Serialize;

use crate::energy::Energy;
use crate::linear::LinearSystem;
use crate::types::{to_f64, Real};

/// What a snapshot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SnapshotKind {
    /// Per-element `Σ r²` (1 channel).
    Cost,
    /// `Jᵀr` per unknown.
    Jtf,
    /// `1 / diag(JᵀJ)` per unknown.
    Preconditioner,
    /// `diag(JᵀJ)` per unknown.
    Jtj,
}

impl SnapshotKind {
    pub const ALL: [SnapshotKind; 4] = [
        SnapshotKind::Cost,
        SnapshotKind::Jtf,
        SnapshotKind::Preconditioner,
        SnapshotKind::Jtj,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SnapshotKind::Cost => "cost",
            SnapshotKind::Jtf => "JTF",
            SnapshotKind::Preconditioner => "Pre",
            SnapshotKind::Jtj => "JTJ",
        }
    }
}

/// A dense snapshot, borrowed for the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    /// `<kind>_<backend>`, e.g. `JTF_native_block`.
    pub label: &'a str,
    pub kind: SnapshotKind,
    pub iteration: usize,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    /// `width * height * channels` values, channel-interleaved.
    pub data: &'a [f32],
}

/// Receiver of diagnostics snapshots.
pub trait DiagnosticsSink {
    fn snapshot(&mut self, snapshot: &Snapshot<'_>);
}

/// Owned copy of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedSnapshot {
    pub label: String,
    pub kind: SnapshotKind,
    pub iteration: usize,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

/// Sink keeping every snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRecorder {
    pub snapshots: Vec<RecordedSnapshot>,
}

impl SnapshotRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, kind: SnapshotKind, iteration: usize) -> Option<&RecordedSnapshot> {
        self.snapshots
            .iter()
            .find(|s| s.kind == kind && s.iteration == iteration)
    }
}

impl DiagnosticsSink for SnapshotRecorder {
    fn snapshot(&mut self, s: &Snapshot<'_>) {
        self.snapshots.push(RecordedSnapshot {
            label: s.label.to_string(),
            kind: s.kind,
            iteration: s.iteration,
            width: s.width,
            height: s.height,
            channels: s.channels,
            data: s.data.to_vec(),
        });
    }
}

/// Scatter per-element values into a dense snapshot buffer.
fn densify<T: Real, E: Energy<T> + ?Sized>(energy: &E, values: &[T], channels: usize) -> Vec<f32> {
    let dims = energy.snapshot_dims();
    let mut data = vec![0.0f32; dims.len() * channels];
    for e in 0..energy.num_elements() {
        let dense = energy.dense_index(e);
        for c in 0..channels {
            data[dense * channels + c] = to_f64(values[e * channels + c]) as f32;
        }
    }
    data
}

/// Emit the four snapshots of one iteration.
pub(crate) fn emit_snapshots<T: Real, E: Energy<T> + ?Sized>(
    sink: &mut dyn DiagnosticsSink,
    energy: &E,
    system: &LinearSystem<T>,
    iteration: usize,
    backend: &str,
) {
    let dims = energy.snapshot_dims();
    let unknowns = energy.unknowns_per_element();

    for kind in SnapshotKind::ALL {
        let (values, channels) = match kind {
            SnapshotKind::Cost => (system.element_costs(energy.num_elements()), 1),
            SnapshotKind::Jtf => (system.jtf().to_vec(), unknowns),
            SnapshotKind::Preconditioner => (system.preconditioner(), unknowns),
            SnapshotKind::Jtj => (system.jtj_diag().to_vec(), unknowns),
        };
        let data = densify(energy, &values, channels);
        let label = format!("{}_{backend}", kind.label());
        sink.snapshot(&Snapshot {
            label: &label,
            kind,
            iteration,
            width: dims.width,
            height: dims.height,
            channels,
            data: &data,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::{EnergyWeights, GridDomain, SmoothingEnergy};
    use crate::types::ImageDims;

    #[test]
    fn test_snapshots_are_dense_with_zero_holes() {
        let dims = ImageDims::new(3, 1);
        let mask = [1.0f64, 0.0, 1.0];
        let target = [1.0, 5.0, 3.0];
        let mut image = [0.0; 3];
        let energy = SmoothingEnergy::new(GridDomain::dense(dims, &mask, 4), &target, &mut image);
        let weights = EnergyWeights {
            fitting: 1.0,
            shading: 0.0,
            regularizer: 0.0,
            prior: 0.0,
            boundary: 0.0,
        };
        let system = LinearSystem::evaluate(&energy, &weights);

        let mut recorder = SnapshotRecorder::new();
        emit_snapshots(&mut recorder, &energy, &system, 0, "test");
        assert_eq!(recorder.snapshots.len(), 4);

        let cost = recorder.find(SnapshotKind::Cost, 0).unwrap();
        assert_eq!(cost.label, "cost_test");
        assert_eq!(cost.data, vec![1.0, 0.0, 9.0]);

        let jtf = recorder.find(SnapshotKind::Jtf, 0).unwrap();
        assert_eq!(jtf.data, vec![-1.0, 0.0, -3.0]);

        let pre = recorder.find(SnapshotKind::Preconditioner, 0).unwrap();
        assert_eq!(pre.data, vec![1.0, 0.0, 1.0]);
        assert!(recorder.find(SnapshotKind::Jtj, 1).is_none());
    }
}
