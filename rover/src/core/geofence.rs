//! Operator-configured polygon boundary.

use crate::core::types::Position;

/// Closed polygon in (latitude, longitude) degrees. The last vertex connects
/// back to the first.
#[derive(Debug, Clone, PartialEq)]
pub struct Geofence {
    vertices: Vec<(f64, f64)>,
}

impl Geofence {
    /// Returns `None` for degenerate polygons (fewer than three vertices).
    pub fn new(vertices: Vec<(f64, f64)>) -> Option<Self> {
        if vertices.len() < 3 {
            return None;
        }
        Some(Self { vertices })
    }

    /// Ray-casting containment test. Points exactly on an edge may land on either side.
    pub fn contains(&self, point: &Position) -> bool {
        let (y, x) = (point.latitude, point.longitude);
        let mut inside = false;
        let mut j = self.vertices.len() - 1;
        for i in 0..self.vertices.len() {
            let (yi, xi) = self.vertices[i];
            let (yj, xj) = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Vertex average; used to walk back in when starting outside.
    pub fn centroid(&self) -> Position {
        let n = self.vertices.len() as f64;
        let (lat, lng) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(lat, lng), (y, x)| (lat + y, lng + x));
        Position::new(lat / n, lng / n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Geofence {
        Geofence::new(vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)]).expect("polygon")
    }

    #[test]
    fn contains_interior_points_only() {
        let fence = square();
        assert!(fence.contains(&Position::new(0.5, 0.5)));
        assert!(!fence.contains(&Position::new(1.5, 0.5)));
        assert!(!fence.contains(&Position::new(0.5, -0.1)));
    }

    #[test]
    fn concave_notch_is_outside() {
        // U shape open to the north.
        let fence = Geofence::new(vec![
            (0.0, 0.0),
            (0.0, 3.0),
            (3.0, 3.0),
            (3.0, 2.0),
            (1.0, 2.0),
            (1.0, 1.0),
            (3.0, 1.0),
            (3.0, 0.0),
        ])
        .expect("polygon");
        assert!(fence.contains(&Position::new(2.0, 0.5)));
        assert!(!fence.contains(&Position::new(2.0, 1.5)));
    }

    #[test]
    fn rejects_degenerate_polygons() {
        assert!(Geofence::new(vec![(0.0, 0.0), (1.0, 1.0)]).is_none());
        let centroid = square().centroid();
        assert_eq!(centroid, Position::new(0.5, 0.5));
    }
}
