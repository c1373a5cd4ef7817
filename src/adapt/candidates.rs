use super::config::CandList;
use super::ElemInfo;
use crate::domain::cell::{Cell, ElemShape};
use crate::domain::mesh::{h_refinement::HRef, p_refinement::PolyOrders};

use smallvec::{smallvec, SmallVec};

/// Independent child orders are only enumerated while the number of combinations stays below this;
/// beyond it every child receives the same orders
const MAX_CHILD_ORDER_COMBINATIONS: usize = 81;

/// A possible refinement of a single element
///
/// `split: None` is a pure p-refinement, in which case `child_orders` holds exactly one entry (the
/// element's new orders). Otherwise `child_orders` holds one entry per child, ordered like the
/// children of the split (see [Cell::children]).
#[derive(Clone, Debug, PartialEq)]
pub struct RefinementCandidate {
    pub split: Option<HRef>,
    pub child_orders: SmallVec<[PolyOrders; 4]>,
    /// local Degrees of Freedom after the refinement
    pub dofs: Option<usize>,
    /// predicted error after the refinement
    pub error: Option<f64>,
    pub score: Option<f64>,
}

impl RefinementCandidate {
    pub fn p_only(orders: PolyOrders) -> Self {
        Self {
            split: None,
            child_orders: smallvec![orders],
            dofs: None,
            error: None,
            score: None,
        }
    }

    pub fn split(refinement: HRef, child_orders: SmallVec<[PolyOrders; 4]>) -> Self {
        Self {
            split: Some(refinement),
            child_orders,
            dofs: None,
            error: None,
            score: None,
        }
    }

    /// The footprints of the element after applying this candidate (`None` if the split is not supported by the shape)
    pub fn child_cells(&self, cell: &Cell) -> Option<SmallVec<[Cell; 4]>> {
        match self.split {
            Some(refinement) => cell.children(refinement),
            None => Some(smallvec![*cell]),
        }
    }

    /// Number of local Degrees of Freedom (sum of the tensor basis sizes over all children)
    pub fn local_dofs(&self, shape: ElemShape) -> usize {
        self.child_orders
            .iter()
            .map(|orders| local_basis_size(shape, orders))
            .sum()
    }

    pub fn max_order(&self) -> u8 {
        self.child_orders
            .iter()
            .map(PolyOrders::max_order)
            .max()
            .unwrap_or(0)
    }
}

/// Size of the Legendre tensor basis on one element
pub fn local_basis_size(shape: ElemShape, orders: &PolyOrders) -> usize {
    match shape {
        ElemShape::Interval => orders.interval_size(),
        ElemShape::Quad => orders.quad_size(),
    }
}

/// A family of refinement candidates
pub trait CandidateFamily {
    /// Append this family's candidates for `elem` to `candidates`, skipping any already present
    fn generate(&self, elem: &ElemInfo, max_order: u8, candidates: &mut Vec<RefinementCandidate>);
}

/// p-refinements by one or two orders
pub struct PCandidates {
    aniso: bool,
}

/// h-refinements in which every child keeps the element's orders
pub struct HCandidates {
    aniso: bool,
}

/// h-refinements in which the children's orders vary around the element's orders
pub struct HpCandidates {
    aniso_h: bool,
    aniso_p: bool,
}

const P_ISO: PCandidates = PCandidates { aniso: false };
const P_ANISO: PCandidates = PCandidates { aniso: true };
const H_ISO: HCandidates = HCandidates { aniso: false };
const H_ANISO: HCandidates = HCandidates { aniso: true };
const HP_ISO: HpCandidates = HpCandidates {
    aniso_h: false,
    aniso_p: false,
};
const HP_ANISO_H: HpCandidates = HpCandidates {
    aniso_h: true,
    aniso_p: false,
};
const HP_ANISO_P: HpCandidates = HpCandidates {
    aniso_h: false,
    aniso_p: true,
};
const HP_ANISO: HpCandidates = HpCandidates {
    aniso_h: true,
    aniso_p: true,
};

const FAMILY_TABLE: [(CandList, &[&dyn CandidateFamily]); 8] = [
    (CandList::PIso, &[&P_ISO]),
    (CandList::PAniso, &[&P_ANISO]),
    (CandList::HIso, &[&H_ISO]),
    (CandList::HAniso, &[&H_ANISO]),
    (CandList::HpIso, &[&P_ISO, &HP_ISO]),
    (CandList::HpAnisoH, &[&P_ISO, &HP_ANISO_H]),
    (CandList::HpAnisoP, &[&P_ANISO, &HP_ANISO_P]),
    (CandList::HpAniso, &[&P_ANISO, &HP_ANISO]),
];

/// The candidate families making up a [CandList]
pub fn families(cand_list: CandList) -> &'static [&'static dyn CandidateFamily] {
    FAMILY_TABLE
        .iter()
        .find(|(list, _)| *list == cand_list)
        .map_or(&[], |(_, families)| *families)
}

/// Enumerate every candidate of a [CandList] for an element, in a deterministic order
///
/// Splits are not checked for admissibility here.
///
/// ```
/// use hp_adapt::adapt::{candidates::enumerate_candidates, config::CandList, ElemInfo};
/// use hp_adapt::domain::cell::{Cell, ElemShape};
/// use hp_adapt::domain::mesh::p_refinement::PolyOrders;
///
/// let elem = ElemInfo {
///     id: 0,
///     shape: ElemShape::Interval,
///     orders: PolyOrders::from(2, 0),
///     cell: Cell::Interval { x: [0.0, 1.0] },
///     h_level: 0,
/// };
///
/// let candidates = enumerate_candidates(CandList::PIso, &elem, 10);
/// assert_eq!(candidates.len(), 2);
/// assert_eq!(candidates[1].child_orders[0], PolyOrders::from(4, 0));
/// ```
pub fn enumerate_candidates(
    cand_list: CandList,
    elem: &ElemInfo,
    max_order: u8,
) -> Vec<RefinementCandidate> {
    let mut candidates = Vec::new();
    for family in families(cand_list) {
        family.generate(elem, max_order, &mut candidates);
    }
    candidates
}

fn push_unique(candidates: &mut Vec<RefinementCandidate>, candidate: RefinementCandidate) {
    if !candidates.contains(&candidate) {
        candidates.push(candidate);
    }
}

/// Orders of the same shape as `orders` (the second order is unused on Intervals)
fn shaped(shape: ElemShape, ni: u8, nj: u8) -> PolyOrders {
    match shape {
        ElemShape::Interval => PolyOrders::from(ni, 0),
        ElemShape::Quad => PolyOrders::from(ni, nj),
    }
}

fn splits(shape: ElemShape, aniso: bool) -> &'static [HRef] {
    match (shape, aniso) {
        (ElemShape::Quad, true) => &[HRef::T, HRef::U, HRef::V],
        _ => &[HRef::T],
    }
}

impl CandidateFamily for PCandidates {
    fn generate(&self, elem: &ElemInfo, max_order: u8, candidates: &mut Vec<RefinementCandidate>) {
        let PolyOrders { ni, nj } = elem.orders;
        let increases: SmallVec<[[u8; 2]; 8]> = match (elem.shape, self.aniso) {
            (ElemShape::Quad, true) => (0..=2)
                .flat_map(|di| (0..=2).map(move |dj| [di, dj]))
                .filter(|d| *d != [0, 0])
                .collect(),
            _ => smallvec![[1, 1], [2, 2]],
        };

        for [di, dj] in increases {
            let orders = shaped(elem.shape, ni.saturating_add(di), nj.saturating_add(dj));
            if orders.max_order() <= max_order {
                push_unique(candidates, RefinementCandidate::p_only(orders));
            }
        }
    }
}

impl CandidateFamily for HCandidates {
    fn generate(&self, elem: &ElemInfo, max_order: u8, candidates: &mut Vec<RefinementCandidate>) {
        if elem.orders.max_order() > max_order {
            return;
        }
        for refinement in splits(elem.shape, self.aniso) {
            let n = refinement_children(elem.shape, *refinement);
            push_unique(
                candidates,
                RefinementCandidate::split(*refinement, smallvec![elem.orders; n]),
            );
        }
    }
}

impl CandidateFamily for HpCandidates {
    fn generate(&self, elem: &ElemInfo, max_order: u8, candidates: &mut Vec<RefinementCandidate>) {
        let PolyOrders { ni, nj } = elem.orders;
        let vary = |n: u8, d: i8| (n as i16 + d as i16).clamp(1, max_order as i16) as u8;

        let mut options: SmallVec<[PolyOrders; 9]> = SmallVec::new();
        for di in -1..=1_i8 {
            let dj_range = if self.aniso_p && elem.shape == ElemShape::Quad {
                -1..=1
            } else {
                di..=di
            };
            for dj in dj_range {
                let orders = shaped(elem.shape, vary(ni, di), vary(nj, dj));
                if !options.contains(&orders) {
                    options.push(orders);
                }
            }
        }

        for refinement in splits(elem.shape, self.aniso_h) {
            let n = refinement_children(elem.shape, *refinement);
            for child_orders in child_order_combinations(&options, n) {
                push_unique(candidates, RefinementCandidate::split(*refinement, child_orders));
            }
        }
    }
}

fn refinement_children(shape: ElemShape, refinement: HRef) -> usize {
    match shape {
        ElemShape::Interval => 2,
        ElemShape::Quad => refinement.num_children(),
    }
}

/// Every assignment of `options` to `n` children (first child varies slowest), or one uniform
/// assignment per option when that would be too many
fn child_order_combinations(
    options: &[PolyOrders],
    n: usize,
) -> Vec<SmallVec<[PolyOrders; 4]>> {
    let total = options
        .len()
        .checked_pow(n as u32)
        .unwrap_or(usize::MAX);

    if total > MAX_CHILD_ORDER_COMBINATIONS {
        return options.iter().map(|orders| smallvec![*orders; n]).collect();
    }

    (0..total)
        .map(|k| {
            (0..n)
                .map(|child| {
                    let stride = options.len().pow((n - 1 - child) as u32);
                    options[(k / stride) % options.len()]
                })
                .collect()
        })
        .collect()
}
