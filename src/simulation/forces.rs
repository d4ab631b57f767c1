//! Gravitational force model for the n-body engine
//!
//! Turns the flattened `[position, velocity]` state into its time derivative
//! `[velocity, acceleration]` using direct pairwise Newtonian gravity, and
//! keeps the accelerations from its latest evaluation as an
//! [`AccelerationSnapshot`] so they can be published without recomputation.

use std::collections::HashMap;

use super::integrator::OdeSystem;
use super::states::{Body, BodyId, NVec, StateLayout};

/// Accelerations from one derivative evaluation, addressed by body id
#[derive(Debug, Clone)]
pub struct AccelerationSnapshot {
    dimensions: usize,
    slots: HashMap<BodyId, usize>, // body id -> slot in `values`
    values: Vec<f64>,
}

impl AccelerationSnapshot {
    pub fn new(ids: &[BodyId], dimensions: usize) -> Self {
        let slots = ids.iter().enumerate().map(|(slot, id)| (*id, slot)).collect();
        Self {
            dimensions,
            slots,
            values: vec![0.0; ids.len() * dimensions],
        }
    }

    /// Acceleration of body `id`, `None` if the body is not part of this model
    pub fn acceleration(&self, id: BodyId) -> Option<&[f64]> {
        let slot = *self.slots.get(&id)?;
        let start = slot * self.dimensions;
        self.values.get(start..start + self.dimensions)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot_mut(&mut self, slot: usize) -> &mut [f64] {
        let start = slot * self.dimensions;
        &mut self.values[start..start + self.dimensions]
    }

    fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Direct-sum Newtonian gravity over a fixed set of masses.
///
/// One instance belongs to one run; masses, ids and dimensionality are fixed
/// when it is built.
#[derive(Debug, Clone)]
pub struct GravityModel {
    g: f64, // gravitational constant
    masses: Vec<f64>,
    layout: StateLayout,
    snapshot: AccelerationSnapshot,
}

impl GravityModel {
    /// `ids[i]` and `masses[i]` describe the body in block `i` of the state vector
    pub fn new(g: f64, masses: Vec<f64>, ids: &[BodyId], dimensions: usize) -> Self {
        debug_assert_eq!(masses.len(), ids.len());
        let layout = StateLayout::new(masses.len(), dimensions);
        Self {
            g,
            snapshot: AccelerationSnapshot::new(ids, dimensions),
            masses,
            layout,
        }
    }

    /// Model for the bodies as currently listed
    pub fn for_bodies(g: f64, bodies: &[Body]) -> Self {
        let masses = bodies.iter().map(Body::mass).collect();
        let ids: Vec<BodyId> = bodies.iter().map(Body::id).collect();
        let dimensions = bodies.first().map_or(2, Body::dimensions);
        Self::new(g, masses, &ids, dimensions)
    }

    pub fn gravitational_constant(&self) -> f64 {
        self.g
    }

    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    pub fn layout(&self) -> StateLayout {
        self.layout
    }

    /// Accelerations from the most recent call to [`OdeSystem::derivatives`]
    pub fn snapshot(&self) -> &AccelerationSnapshot {
        &self.snapshot
    }

    /// Evaluate once at `state` so the snapshot matches it
    pub fn prime(&mut self, t: f64, state: &NVec) {
        let mut scratch = NVec::zeros(state.len());
        self.derivatives(t, state, &mut scratch);
    }
}

impl OdeSystem for GravityModel {
    fn dimension(&self) -> usize {
        self.layout.len()
    }

    /// `t` is unused; gravity here does not depend on time
    fn derivatives(&mut self, _t: f64, y: &NVec, dy: &mut NVec) {
        let n = self.masses.len();
        let d = self.layout.dimensions;
        let y = y.as_slice();

        // d(position)/dt = velocity
        for slot in 0..n {
            let pos = self.layout.position_range(slot);
            let vel = self.layout.velocity_range(slot);
            dy.as_mut_slice()[pos].copy_from_slice(&y[vel]);
        }

        self.snapshot.clear();

        // Loop over each unordered pair (i, j) with i < j
        for i in 0..n {
            let xi = &y[self.layout.position_range(i)];
            let mi = self.masses[i];

            for j in (i + 1)..n {
                let xj = &y[self.layout.position_range(j)];
                let mj = self.masses[j];

                // r points from i to j: i is pulled along +r, j along -r
                let mut r = [0.0_f64; 3];
                for k in 0..d {
                    r[k] = xj[k] - xi[k];
                }
                let dist = r[..d].iter().map(|c| c * c).sum::<f64>().sqrt();

                // Coincident bodies exert nothing on each other
                if dist == 0.0 {
                    continue;
                }

                // G / |r|^3, shared by both sides of the pair
                let coef = self.g / (dist * dist * dist);

                // a_i +=  G * m_j * r / |r|^3
                // a_j += -G * m_i * r / |r|^3
                for k in 0..d {
                    let pull = coef * r[k];
                    self.snapshot.slot_mut(i)[k] += pull * mj;
                    self.snapshot.slot_mut(j)[k] -= pull * mi;
                }
            }
        }

        // d(velocity)/dt = acceleration
        for slot in 0..n {
            let vel = self.layout.velocity_range(slot);
            let start = slot * d;
            dy.as_mut_slice()[vel].copy_from_slice(&self.snapshot.values[start..start + d]);
        }
    }
}
