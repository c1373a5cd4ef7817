use thiserror::Error;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// Description of an h-Refinement
///
/// Intervals only support `T`-type refinements (bisection)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HRef {
    /// isotropic
    T,
    /// anisotropic about the u-direction (produces a West and East child)
    U,
    /// anisotropic about the v-direction (produces a South and North child)
    V,
}

impl HRef {
    /// Number of child `Elem`s produced on a quadrilateral
    pub fn num_children(&self) -> usize {
        match self {
            Self::T => 4,
            Self::U | Self::V => 2,
        }
    }

    /// Location of the `idx`th child relative to its parent
    pub fn loc(&self, idx: usize) -> HRefLoc {
        match self {
            Self::T => HRefLoc::T(Quadrant::from_index(idx)),
            Self::U => HRefLoc::U(Bisection::from_index(idx)),
            Self::V => HRefLoc::V(Bisection::from_index(idx)),
        }
    }

    /// Pairs of child indices and newly allocated IDs
    pub(crate) fn indices_and_ids(&self, id_counter: &mut usize) -> Vec<(usize, usize)> {
        (0..self.num_children())
            .map(|idx| {
                *id_counter += 1;
                (idx, *id_counter - 1)
            })
            .collect()
    }

    /// Indices of the parent's `Edge`s which are bisected by this refinement (see [`Elem`](super::elem::Elem) for the layout)
    pub fn split_edges(&self) -> &'static [usize] {
        match self {
            Self::T => &[0, 1, 2, 3],
            Self::U => &[0, 1],
            Self::V => &[2, 3],
        }
    }
}

/// Quadrant of a child Elem following a T-Type h-Refinement (from the parent Elem's perspective)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quadrant {
    /// south west
    SW,
    /// south east
    SE,
    /// north west
    NW,
    /// north east
    NE,
}

impl Quadrant {
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::SW,
            1 => Self::SE,
            2 => Self::NW,
            3 => Self::NE,
            _ => panic!("Quadrant index must be less than 4; got {}", idx),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::SW => 0,
            Self::SE => 1,
            Self::NW => 2,
            Self::NE => 3,
        }
    }
}

/// Location of a child Elem following a U-Type or V-Type h-refinement (from the parent Elem's perspective).
/// Or the Location of a child Edge following an h-refinement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bisection {
    /// Bottom (V-type) or Left (U-type)
    BL,
    /// Top (V-Type) or Right (U-type)
    TR,
}

impl Bisection {
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::BL,
            1 => Self::TR,
            _ => panic!("Bisection index must be less than 2; got {}", idx),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::BL => 0,
            Self::TR => 1,
        }
    }

    fn half(&self, [min, max]: [f64; 2]) -> [f64; 2] {
        let mid = (min + max) / 2.0;
        match self {
            Self::BL => [min, mid],
            Self::TR => [mid, max],
        }
    }
}

/// The location of an [Elem](super::elem::Elem) relative to its parent following an h-refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HRefLoc {
    T(Quadrant),
    U(Bisection),
    V(Bisection),
}

impl HRefLoc {
    /// The refinement which produced an Elem at this location
    pub fn refinement(&self) -> HRef {
        match self {
            Self::T(_) => HRef::T,
            Self::U(_) => HRef::U,
            Self::V(_) => HRef::V,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::T(quad) => quad.index(),
            Self::U(bi) | Self::V(bi) => bi.index(),
        }
    }

    /// The portion of a parametric range `[[u_min, u_max], [v_min, v_max]]` covered by a child at this location
    pub fn sub_range(&self, [u_range, v_range]: [[f64; 2]; 2]) -> [[f64; 2]; 2] {
        match self {
            Self::T(quad) => {
                let u_half = match quad {
                    Quadrant::SW | Quadrant::NW => Bisection::BL,
                    Quadrant::SE | Quadrant::NE => Bisection::TR,
                };
                let v_half = match quad {
                    Quadrant::SW | Quadrant::SE => Bisection::BL,
                    Quadrant::NW | Quadrant::NE => Bisection::TR,
                };
                [u_half.half(u_range), v_half.half(v_range)]
            }
            Self::U(bi) => [bi.half(u_range), v_range],
            Self::V(bi) => [u_range, bi.half(v_range)],
        }
    }
}

/// Description of an Elem's h-Refinement levels in the u and v directions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HLevels {
    pub u: u8,
    pub v: u8,
}

impl HLevels {
    pub fn from(u: u8, v: u8) -> Self {
        Self { u, v }
    }

    pub fn refined(&self, refinement: HRef) -> Self {
        match refinement {
            HRef::T => Self::from(self.u + 1, self.v + 1),
            HRef::U => Self::from(self.u + 1, self.v),
            HRef::V => Self::from(self.u, self.v + 1),
        }
    }

    /// The deepest refinement level in either direction
    pub fn max(&self) -> u8 {
        std::cmp::max(self.u, self.v)
    }
}

#[cfg(feature = "json_export")]
impl From<HLevels> for JsonValue {
    fn from(levels: HLevels) -> Self {
        object! {
            "u": levels.u,
            "v": levels.v,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HRefError {
    #[error("Elem {0} does not exist; Cannot apply h-Refinement!")]
    ElemDoesntExist(usize),
    #[error("Elem {0} already has children; Cannot apply h-Refinement!")]
    ElemHasChildren(usize),
    #[error("Edge {0} already has children; Cannot h-Refine!")]
    EdgeHasChildren(usize),
    #[error("Multiple h-Refinements were specified for Elem {0}; Cannot apply h-Refinements!")]
    DoubleRefinement(usize),
    #[error("h-Refinement of Edge {0} would produce an Edge shorter than the minimum length!")]
    MinEdgeLength(usize),
    #[error("Elem {0} was not fully initialized during h-Refinement!")]
    UninitializedElem(usize),
    #[error("Cannot create an Edge between coincident points inside Elem {0}!")]
    EdgeOnEqualPoints(usize),
    #[error("Intervals only support isotropic h-Refinement; Cannot apply {0:?} to Elem {1}!")]
    UnsupportedRefinement(HRef, usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_ranges_cover_parent() {
        let parent = [[-1.0, 1.0], [-1.0, 1.0]];
        let sw = HRef::T.loc(0).sub_range(parent);
        let ne = HRef::T.loc(3).sub_range(parent);
        assert_eq!(sw, [[-1.0, 0.0], [-1.0, 0.0]]);
        assert_eq!(ne, [[0.0, 1.0], [0.0, 1.0]]);

        let east = HRef::U.loc(1).sub_range(parent);
        assert_eq!(east, [[0.0, 1.0], [-1.0, 1.0]]);
        let south = HRef::V.loc(0).sub_range(parent);
        assert_eq!(south, [[-1.0, 1.0], [-1.0, 0.0]]);
    }

    #[test]
    fn h_levels_follow_refinements() {
        let levels = HLevels::default().refined(HRef::U).refined(HRef::T);
        assert_eq!(levels, HLevels::from(2, 1));
        assert_eq!(levels.max(), 2);
    }

    #[test]
    fn ids_are_consecutive() {
        let mut counter = 10;
        let ids = HRef::T.indices_and_ids(&mut counter);
        assert_eq!(ids, vec![(0, 10), (1, 11), (2, 12), (3, 13)]);
        assert_eq!(counter, 14);
    }
}
