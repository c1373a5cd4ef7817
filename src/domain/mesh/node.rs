use super::space::Point;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// A point in 2D space.
/// Pairs of points describe Edges and Groups of 4 points describe Elems.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub coords: Point,
    pub boundary: bool,
}

impl Node {
    pub fn new(id: usize, coords: Point, boundary: bool) -> Self {
        Self {
            id,
            coords,
            boundary,
        }
    }

    /// Produce a Json Object that describes this Node
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "coords": self.coords.to_json(),
            "boundary": self.boundary,
        }
    }
}
