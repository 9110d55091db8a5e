//! Capsule approximated self collision detection.
//!
//! Every arm segment (the span between two adjacent node positions) is
//! filled with a chain of spheres whose radii taper to zero at the segment
//! endpoints, so the chain approximates a capsule. Collision checking
//! compares sphere chains of non-adjacent segments only; segments sharing a
//! node cannot avoid touching at that node and are skipped, the same way
//! adjacent joints are skipped in robot body collision checks. A cheap
//! bounding ball contact runs first for every segment pair, and the
//! detailed sphere sweep only when the bounds touch.

use nalgebra::{Isometry3, Vector3};
use parry3d::query::contact;
use parry3d::shape::Ball;

/// Largest sphere radius, reached mid segment, world units.
pub const SPHERE_RADIUS: f64 = 0.1;

/// Spacing between consecutive sphere centers along a segment.
pub const SPHERE_INTERVAL: f64 = SPHERE_RADIUS / 4.0;

/// Fraction of the span the chain is inset from each segment end, keeping
/// chains of segments that share a node from overlapping at that node.
pub const SEGMENT_GAP: f64 = 0.001;

/// One sphere of a segment chain.
#[derive(Debug, Clone)]
pub struct SphereVolume {
    /// World center, refreshed by [`CollisionModel::update`].
    pub center: Vector3<f64>,

    /// Radius, fixed at construction since segment lengths are rigid.
    pub radius: f64,

    /// Normalized distance along the owning segment, 0 at the parent end.
    pub segment_fraction: f64,

    /// Set when this sphere touched a sphere of a non-adjacent segment
    /// during the last update.
    pub colliding: bool,
}

/// The sphere chain of one arm segment.
#[derive(Debug, Clone)]
pub struct SegmentChain {
    /// Indices of the two chain positions this segment spans.
    pub index_range: (usize, usize),

    pub spheres: Vec<SphereVolume>,

    bound_center: Vector3<f64>,
    bound_radius: f64,
}

impl SegmentChain {
    fn new(end_index: usize, positions: &[Vector3<f64>]) -> Self {
        let start = positions[end_index - 1];
        let end = positions[end_index];
        let span = (end - start).norm();
        let mut spheres = Vec::new();
        if span > 0.0 {
            let gap = span * SEGMENT_GAP;
            let span_with_gap = span - 2.0 * gap;
            if span_with_gap > 0.0 {
                let count = (span_with_gap / SPHERE_INTERVAL).floor() as usize;
                for k in 0..count {
                    let along = gap + k as f64 * SPHERE_INTERVAL;
                    let fraction = along / span;
                    spheres.push(SphereVolume {
                        center: start.lerp(&end, fraction),
                        radius: SPHERE_RADIUS * (1.0 - 2.0 * (fraction - 0.5).abs()),
                        segment_fraction: fraction,
                        colliding: false,
                    });
                }
            }
        }
        let mut chain = SegmentChain {
            index_range: (end_index - 1, end_index),
            spheres,
            bound_center: Vector3::zeros(),
            bound_radius: 0.0,
        };
        chain.reposition(&start, &end);
        chain
    }

    /// Moves every sphere onto the current segment endpoints and refreshes
    /// the bounding ball. Radii and fractions stay as built.
    fn reposition(&mut self, start: &Vector3<f64>, end: &Vector3<f64>) {
        for sphere in &mut self.spheres {
            sphere.center = start.lerp(end, sphere.segment_fraction);
        }
        self.bound_center = (start + end) / 2.0;
        self.bound_radius = (end - start).norm() / 2.0 + SPHERE_RADIUS;
    }

    fn shares_index_with(&self, other: &SegmentChain) -> bool {
        let (a0, a1) = self.index_range;
        let (b0, b1) = other.index_range;
        a0 == b0 || a0 == b1 || a1 == b0 || a1 == b1
    }

    fn bounds_touch(&self, other: &SegmentChain) -> bool {
        let ball_a = Ball::new(self.bound_radius as f32);
        let ball_b = Ball::new(other.bound_radius as f32);
        let position_a: Isometry3<f32> = Isometry3::translation(
            self.bound_center.x as f32,
            self.bound_center.y as f32,
            self.bound_center.z as f32,
        );
        let position_b: Isometry3<f32> = Isometry3::translation(
            other.bound_center.x as f32,
            other.bound_center.y as f32,
            other.bound_center.z as f32,
        );
        let bound_contact = contact(&position_a, &ball_a, &position_b, &ball_b, 0.0);
        matches!(bound_contact, Ok(Some(_)))
    }
}

/// Self collision state of the whole arm, owned 1:1 by its solution.
pub struct CollisionModel {
    pub segments: Vec<SegmentChain>,
}

impl CollisionModel {
    /// Builds the sphere chains from the node position chain. The chain
    /// layout (sphere counts, radii, fractions) is fixed here; only the
    /// centers move afterwards.
    pub fn new(positions: &[Vector3<f64>]) -> Self {
        let segments = (1..positions.len())
            .map(|i| SegmentChain::new(i, positions))
            .collect();
        CollisionModel { segments }
    }

    /// Recomputes every sphere center from the current positions, then
    /// marks colliding spheres of every non-adjacent segment pair. Both
    /// spheres of an overlapping pair are flagged.
    pub fn update(&mut self, positions: &[Vector3<f64>]) {
        for segment in &mut self.segments {
            let (start, end) = segment.index_range;
            let start = positions[start];
            let end = positions[end];
            segment.reposition(&start, &end);
            for sphere in &mut segment.spheres {
                sphere.colliding = false;
            }
        }

        let mut hits: Vec<(usize, usize)> = Vec::new();
        for a in 0..self.segments.len() {
            for b in (a + 1)..self.segments.len() {
                let (seg_a, seg_b) = (&self.segments[a], &self.segments[b]);
                if seg_a.shares_index_with(seg_b) {
                    continue;
                }
                if !seg_a.bounds_touch(seg_b) {
                    continue;
                }
                for (i, sphere_a) in seg_a.spheres.iter().enumerate() {
                    for (j, sphere_b) in seg_b.spheres.iter().enumerate() {
                        let distance = (sphere_a.center - sphere_b.center).norm();
                        if distance < sphere_a.radius + sphere_b.radius {
                            hits.push((a, i));
                            hits.push((b, j));
                        }
                    }
                }
            }
        }
        for (segment, sphere) in hits {
            self.segments[segment].spheres[sphere].colliding = true;
        }
    }

    /// True when any sphere of any segment is flagged.
    pub fn any_colliding(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.spheres.iter().any(|sphere| sphere.colliding))
    }

    /// All spheres of all segments, for rendering.
    pub fn volumes(&self) -> impl Iterator<Item = &SphereVolume> {
        self.segments.iter().flat_map(|segment| segment.spheres.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_positions() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 4.0, 0.0),
        ]
    }

    /// Three segments folded into a narrow U: the two vertical segments
    /// run 0.15 apart, closer than two mid-chain sphere radii.
    fn folded_positions() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.15, 1.0, 0.0),
            Vector3::new(0.15, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_chain_layout() {
        let model = CollisionModel::new(&straight_positions());
        assert_eq!(model.segments.len(), 2);
        // Span 1.0 inset by 0.001 on both ends: floor(0.998 / 0.025) spheres.
        assert_eq!(model.segments[0].spheres.len(), 39);
        assert_eq!(model.segments[0].index_range, (0, 1));
        assert_eq!(model.segments[1].index_range, (1, 2));
        for sphere in model.volumes() {
            assert!(sphere.segment_fraction > 0.0 && sphere.segment_fraction < 1.0);
            assert!(sphere.radius <= SPHERE_RADIUS);
            assert!(!sphere.colliding);
        }
    }

    #[test]
    fn test_radii_taper_to_segment_ends() {
        let model = CollisionModel::new(&straight_positions());
        let spheres = &model.segments[1].spheres;
        let mid = spheres
            .iter()
            .min_by(|a, b| {
                (a.segment_fraction - 0.5)
                    .abs()
                    .partial_cmp(&(b.segment_fraction - 0.5).abs())
                    .unwrap()
            })
            .unwrap();
        assert!(mid.radius > 0.9 * SPHERE_RADIUS);
        assert!(spheres.first().unwrap().radius < 0.1 * SPHERE_RADIUS);
    }

    #[test]
    fn test_straight_chain_does_not_collide() {
        let positions = straight_positions();
        let mut model = CollisionModel::new(&positions);
        model.update(&positions);
        assert!(!model.any_colliding());
    }

    #[test]
    fn test_folded_chain_collides_symmetrically() {
        let positions = folded_positions();
        let mut model = CollisionModel::new(&positions);
        model.update(&positions);
        assert!(model.any_colliding());
        // Both non-adjacent segments carry flags, the middle one does not:
        // it shares a node with each of them.
        assert!(model.segments[0].spheres.iter().any(|s| s.colliding));
        assert!(model.segments[2].spheres.iter().any(|s| s.colliding));
        assert!(model.segments[1].spheres.iter().all(|s| !s.colliding));
    }

    #[test]
    fn test_flags_match_pairwise_distances() {
        let positions = folded_positions();
        let mut model = CollisionModel::new(&positions);
        model.update(&positions);
        let (left, right) = (&model.segments[0], &model.segments[2]);
        for sphere in &left.spheres {
            let overlaps = right
                .spheres
                .iter()
                .any(|other| (sphere.center - other.center).norm() < sphere.radius + other.radius);
            assert_eq!(sphere.colliding, overlaps);
        }
    }

    #[test]
    fn test_update_moves_centers() {
        let mut positions = straight_positions();
        let mut model = CollisionModel::new(&positions);
        positions[2] = Vector3::new(3.0, 1.0, 0.0);
        model.update(&positions);
        let last = model.segments[1].spheres.last().unwrap();
        let expected = positions[1].lerp(&positions[2], last.segment_fraction);
        assert!((last.center - expected).norm() < 1e-12);
    }
}
