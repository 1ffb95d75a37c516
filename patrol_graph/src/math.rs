// Small wrappers over `cgmath` for the transforms the graph needs.
//
// Positions are `Point3<f32>`; cell and mapping transforms are
// `Matrix4<f32>`. The data store speaks `[f32; 3]`, so conversions live here
// too.

use cgmath::{Matrix4, MetricSpace, Point3, Transform, Vector3};

pub type Position = Point3<f32>;

/// The identity transform.
pub fn identity() -> Matrix4<f32> {
    Matrix4::from_scale(1.0)
}

/// A pure translation to `pos`.
pub fn translation(pos: Position) -> Matrix4<f32> {
    Matrix4::from_translation(Vector3::new(pos.x, pos.y, pos.z))
}

/// Apply `transform` to a point (translation included).
pub fn apply_point(transform: &Matrix4<f32>, point: Position) -> Position {
    transform.transform_point(point)
}

pub fn distance_squared(a: Position, b: Position) -> f32 {
    a.distance2(b)
}

pub fn to_array(p: Position) -> [f32; 3] {
    [p.x, p.y, p.z]
}

pub fn from_array(a: [f32; 3]) -> Position {
    Point3::new(a[0], a[1], a[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_moves_origin() {
        let m = translation(Point3::new(1.0, 2.0, 3.0));
        assert_eq!(apply_point(&m, Point3::new(0.0, 0.0, 0.0)), Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn composed_transform_applies_right_to_left() {
        // Cell at x=100, node at local x=5: world x=105.
        let cell = translation(Point3::new(100.0, 0.0, 0.0));
        let node = translation(Point3::new(5.0, 0.0, 0.0));
        let world = apply_point(&(cell * node), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(world, Point3::new(105.0, 0.0, 0.0));
    }

    #[test]
    fn identity_leaves_points_alone() {
        let p = Point3::new(-3.5, 0.25, 9.0);
        assert_eq!(apply_point(&identity(), p), p);
    }

    #[test]
    fn squared_distance() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(3.0, 4.0, 0.0);
        assert_eq!(distance_squared(a, b), 25.0);
    }
}
