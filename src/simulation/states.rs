//! Core state types for the N-body simulation.
//!
//! Defines the point-mass `Body` (2D or 3D, chosen at construction), its
//! bounded `Trail`, the flattened state vector layout handed to the solver,
//! and `SharedBodies`, the lock-guarded list the stepping loop writes and the
//! renderer reads.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use nalgebra::DVector;

use super::error::SimError;
use super::forces::AccelerationSnapshot;

/// Dynamically sized vector; every body fixes its length to 2 or 3
pub type NVec = DVector<f64>;

/// Number of past positions kept per body
pub const MAX_TRAIL_SIZE: usize = 10_000;

/// Index of a body in its simulation; block `i` of the state vector belongs
/// to the body with id `i`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BodyId(pub usize);

impl BodyId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display color, linear components in 0..=1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Rgba = Rgba::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Rgba::WHITE
    }
}

/// Ring buffer of past positions, oldest evicted first
#[derive(Debug, Clone)]
pub struct Trail {
    points: VecDeque<NVec>,
    capacity: usize,
}

impl Trail {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::new(),
            capacity,
        }
    }

    /// Append a point, dropping the oldest once over capacity
    pub fn push(&mut self, point: NVec) {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &NVec> + '_ {
        self.points.iter()
    }

    pub fn oldest(&self) -> Option<&NVec> {
        self.points.front()
    }

    pub fn latest(&self) -> Option<&NVec> {
        self.points.back()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl Default for Trail {
    fn default() -> Self {
        Trail::new(MAX_TRAIL_SIZE)
    }
}

/// A single point mass
#[derive(Debug, Clone)]
pub struct Body {
    id: BodyId,
    position: NVec,
    velocity: NVec,
    acceleration: NVec, // derived, written only by a publish
    mass: f64,
    color: Rgba,
    trail: Trail,
}

impl Body {
    /// Build a body from position and velocity slices of equal length (2 or 3).
    ///
    /// The id stays 0 until the body is added to a [`Settings`](super::settings::Settings).
    pub fn new(position: &[f64], velocity: &[f64], mass: f64) -> Result<Self, SimError> {
        let dimensions = position.len();
        if !(2..=3).contains(&dimensions) {
            return Err(SimError::UnsupportedDimension(dimensions));
        }
        if velocity.len() != dimensions {
            return Err(SimError::DimensionMismatch {
                expected: dimensions,
                found: velocity.len(),
            });
        }
        if !(mass.is_finite() && mass > 0.0) {
            return Err(SimError::InvalidMass(mass));
        }

        Ok(Self {
            id: BodyId::default(),
            position: NVec::from_column_slice(position),
            velocity: NVec::from_column_slice(velocity),
            acceleration: NVec::zeros(dimensions),
            mass,
            color: Rgba::default(),
            trail: Trail::default(),
        })
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = color;
        self
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: BodyId) {
        self.id = id;
    }

    pub fn dimensions(&self) -> usize {
        self.position.len()
    }

    pub fn position(&self) -> &NVec {
        &self.position
    }

    pub fn velocity(&self) -> &NVec {
        &self.velocity
    }

    pub fn acceleration(&self) -> &NVec {
        &self.acceleration
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn color(&self) -> Rgba {
        self.color
    }

    pub fn set_color(&mut self, color: Rgba) {
        self.color = color;
    }

    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    pub fn set_position(&mut self, position: &[f64]) -> Result<(), SimError> {
        self.check_len(position.len())?;
        self.position.copy_from_slice(position);
        Ok(())
    }

    pub fn set_velocity(&mut self, velocity: &[f64]) -> Result<(), SimError> {
        self.check_len(velocity.len())?;
        self.velocity.copy_from_slice(velocity);
        Ok(())
    }

    /// `[position..., velocity...]`, one block of the state vector
    pub fn flatten(&self) -> Vec<f64> {
        self.position
            .iter()
            .chain(self.velocity.iter())
            .copied()
            .collect()
    }

    /// Take a freshly integrated position/velocity, pull this body's
    /// acceleration out of `snapshot` and extend the trail.
    pub fn publish(&mut self, position: &[f64], velocity: &[f64], snapshot: &AccelerationSnapshot) {
        self.sync(position, velocity, snapshot);
        self.trail.push(self.position.clone());
    }

    /// Same as [`Body::publish`] without touching the trail
    pub(crate) fn sync(&mut self, position: &[f64], velocity: &[f64], snapshot: &AccelerationSnapshot) {
        self.position.copy_from_slice(position);
        self.velocity.copy_from_slice(velocity);
        match snapshot.acceleration(self.id) {
            Some(a) if a.len() == self.acceleration.len() => self.acceleration.copy_from_slice(a),
            _ => self.acceleration.fill(0.0),
        }
    }

    pub fn clear_trail(&mut self) {
        self.trail.clear();
    }

    fn check_len(&self, found: usize) -> Result<(), SimError> {
        if found != self.dimensions() {
            return Err(SimError::DimensionMismatch {
                expected: self.dimensions(),
                found,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}. {{x={:.2}, y={:.2}, vx={:.2}, vy={:.2}}}",
            self.id, self.position[0], self.position[1], self.velocity[0], self.velocity[1]
        )
    }
}

/// Shape of the flattened state vector: one `[position, velocity]` block per
/// body, in body order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    pub bodies: usize,
    pub dimensions: usize,
}

impl StateLayout {
    pub fn new(bodies: usize, dimensions: usize) -> Self {
        Self { bodies, dimensions }
    }

    /// Layout for a body list, `None` when it is empty
    pub fn of(bodies: &[Body]) -> Option<Self> {
        bodies
            .first()
            .map(|b| StateLayout::new(bodies.len(), b.dimensions()))
    }

    pub fn len(&self) -> usize {
        self.bodies * self.block_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block_len(&self) -> usize {
        2 * self.dimensions
    }

    pub fn position_range(&self, slot: usize) -> Range<usize> {
        let start = slot * self.block_len();
        start..start + self.dimensions
    }

    pub fn velocity_range(&self, slot: usize) -> Range<usize> {
        let start = slot * self.block_len() + self.dimensions;
        start..start + self.dimensions
    }
}

/// Concatenate every body's `[position, velocity]` block
pub fn flatten(bodies: &[Body]) -> NVec {
    NVec::from_iterator(
        bodies.iter().map(|b| b.dimensions() * 2).sum(),
        bodies.iter().flat_map(|b| b.flatten()),
    )
}

/// Write positions and velocities from `state` back into `bodies`.
/// Trails and accelerations are left alone.
pub fn unflatten(state: &NVec, bodies: &mut [Body]) -> Result<(), SimError> {
    let layout = match StateLayout::of(bodies) {
        Some(layout) => layout,
        None => return Ok(()),
    };
    if state.len() != layout.len() {
        return Err(SimError::DimensionMismatch {
            expected: layout.len(),
            found: state.len(),
        });
    }
    for (slot, body) in bodies.iter_mut().enumerate() {
        body.set_position(&state.as_slice()[layout.position_range(slot)])?;
        body.set_velocity(&state.as_slice()[layout.velocity_range(slot)])?;
    }
    Ok(())
}

/// Mass-weighted mean position, `None` for an empty list
pub fn center_of_mass(bodies: &[Body]) -> Option<NVec> {
    let first = bodies.first()?;
    let mut weighted = NVec::zeros(first.dimensions());
    let mut total = 0.0;
    for b in bodies {
        weighted += b.position() * b.mass();
        total += b.mass();
    }
    if total > 0.0 {
        Some(weighted / total)
    } else {
        None
    }
}

/// Body list shared between the stepping loop (writer) and the renderer
/// (reader). A whole tick is published under one write lock, so a reader
/// holding the read guard never sees a half-updated frame.
#[derive(Debug, Clone, Default)]
pub struct SharedBodies(Arc<RwLock<Vec<Body>>>);

impl SharedBodies {
    pub fn new(bodies: Vec<Body>) -> Self {
        Self(Arc::new(RwLock::new(bodies)))
    }

    /// Read guard for drawing; hold it for the full iteration over bodies and trails
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Body>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<Body>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Owned copy of the current list
    pub fn snapshot(&self) -> Vec<Body> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn replace(&self, bodies: Vec<Body>) {
        *self.write() = bodies;
    }

    /// Publish one tick: every body gets its new state and a trail point
    pub(crate) fn publish(&self, layout: &StateLayout, state: &NVec, snapshot: &AccelerationSnapshot) {
        let mut bodies = self.write();
        for (slot, body) in bodies.iter_mut().enumerate().take(layout.bodies) {
            body.publish(
                &state.as_slice()[layout.position_range(slot)],
                &state.as_slice()[layout.velocity_range(slot)],
                snapshot,
            );
        }
    }

    /// Final publish before going inactive: state only, no trail point
    pub(crate) fn sync(&self, layout: &StateLayout, state: &NVec, snapshot: &AccelerationSnapshot) {
        let mut bodies = self.write();
        for (slot, body) in bodies.iter_mut().enumerate().take(layout.bodies) {
            body.sync(
                &state.as_slice()[layout.position_range(slot)],
                &state.as_slice()[layout.velocity_range(slot)],
                snapshot,
            );
        }
    }

    /// Clear trails and renumber ids from zero
    pub(crate) fn reset_for_next_run(&self) {
        let mut bodies = self.write();
        for (i, body) in bodies.iter_mut().enumerate() {
            body.clear_trail();
            body.set_id(BodyId(i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_evicts_oldest_first() {
        let mut trail = Trail::new(3);
        for i in 0..5 {
            trail.push(NVec::from_column_slice(&[i as f64, 0.0]));
        }
        assert_eq!(trail.len(), 3);
        assert_eq!(trail.oldest().unwrap()[0], 2.0);
        assert_eq!(trail.latest().unwrap()[0], 4.0);
    }

    #[test]
    fn body_rejects_bad_dimensions() {
        assert_eq!(
            Body::new(&[0.0], &[0.0], 1.0).unwrap_err(),
            SimError::UnsupportedDimension(1)
        );
        assert_eq!(
            Body::new(&[0.0, 0.0], &[0.0, 0.0, 0.0], 1.0).unwrap_err(),
            SimError::DimensionMismatch { expected: 2, found: 3 }
        );
        assert!(matches!(
            Body::new(&[0.0, 0.0], &[0.0, 0.0], 0.0),
            Err(SimError::InvalidMass(_))
        ));
    }

    #[test]
    fn setters_leave_state_unchanged_on_mismatch() {
        let mut b = Body::new(&[1.0, 2.0], &[3.0, 4.0], 1.0).unwrap();
        assert!(b.set_position(&[0.0, 0.0, 0.0]).is_err());
        assert!(b.set_velocity(&[0.0]).is_err());
        assert_eq!(b.position().as_slice(), &[1.0, 2.0]);
        assert_eq!(b.velocity().as_slice(), &[3.0, 4.0]);
    }

    #[test]
    fn layout_ranges() {
        let layout = StateLayout::new(2, 3);
        assert_eq!(layout.len(), 12);
        assert_eq!(layout.position_range(1), 6..9);
        assert_eq!(layout.velocity_range(1), 9..12);
    }

    #[test]
    fn center_of_mass_is_weighted() {
        let bodies = vec![
            Body::new(&[0.0, 0.0], &[0.0, 0.0], 3.0).unwrap(),
            Body::new(&[4.0, 0.0], &[0.0, 0.0], 1.0).unwrap(),
        ];
        let com = center_of_mass(&bodies).unwrap();
        assert_eq!(com.as_slice(), &[1.0, 0.0]);
        assert!(center_of_mass(&[]).is_none());
    }
}
