use super::space::{ParaDir, Point};

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// The `Element`s are the basic geometric unit of the Mesh in Real Space.
///
/// Elements are responsible for:
/// * Keeping a mapping between Real and Parametric Space in their region of the Mesh (axis-aligned only)
/// * Keeping track of a region marker (used by solvers to pick coefficients)
///
/// JSON mesh files describe the `Element`s in the domain; not the `Elem`s
/// Upon `Mesh` construction, each `Element` has one associated `Elem`, but more can be added through h-Refinements
#[derive(Debug)]
pub struct Element {
    pub id: usize,
    pub points: [Point; 4],
    pub marker: usize,
}

impl Element {
    /// Create a new element defined by its coordinates in real space and its region marker
    pub fn new(id: usize, points: [Point; 4], marker: usize) -> Self {
        Self { id, points, marker }
    }

    /// Map a parametric range `[[u_min, u_max], [v_min, v_max]]` (a subset of `[-1, 1]²`) into real space
    pub fn real_range(&self, [[u_min, u_max], [v_min, v_max]]: [[f64; 2]; 2]) -> [[f64; 2]; 2] {
        let [x0, x1] = [self.points[0].x, self.points[3].x];
        let [y0, y1] = [self.points[0].y, self.points[3].y];

        [
            [
                map_range(u_min, -1.0, 1.0, x0, x1),
                map_range(u_max, -1.0, 1.0, x0, x1),
            ],
            [
                map_range(v_min, -1.0, 1.0, y0, y1),
                map_range(v_max, -1.0, 1.0, y0, y1),
            ],
        ]
    }

    /// Get the ordering of two points within the Element
    ///
    /// Points closer to the origin (0.0, 0.0) are smaller than points further from the origin
    pub fn order_points(&self, p0: &Point, p1: &Point) -> std::cmp::Ordering {
        match p0.orientation_with(p1) {
            ParaDir::U => p0.x_order(p1),
            ParaDir::V => p0.y_order(p1),
        }
    }

    /// Produce a Json Object that describes this Element
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "marker": self.marker,
        }
    }
}

fn map_range(val: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    (val - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parametric_to_real() {
        let element = Element::new(
            0,
            [
                Point::new(1.0, 0.0),
                Point::new(3.0, 0.0),
                Point::new(1.0, 0.5),
                Point::new(3.0, 0.5),
            ],
            0,
        );

        let [x, y] = element.real_range([[0.0, 1.0], [-1.0, 0.0]]);
        assert!((x[0] - 2.0).abs() < 1e-14 && (x[1] - 3.0).abs() < 1e-14);
        assert!((y[0] - 0.0).abs() < 1e-14 && (y[1] - 0.25).abs() < 1e-14);
    }
}
