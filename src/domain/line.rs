use super::cell::{Cell, ElemShape};
use super::mesh::{
    h_refinement::{HRef, HRefError},
    p_refinement::{PRefError, PolyOrders},
    MeshError, MAX_POLYNOMIAL_ORDER, MIN_EDGE_LENGTH,
};
use crate::adapt::{candidates::RefinementCandidate, AdaptiveSpace, ElemInfo, UnrefMethod};

use log::debug;
use std::collections::BTreeMap;

/// Which end of a [LineDomain]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundarySide {
    Left,
    Right,
}

/// An Interval in a [LineDomain]
///
/// Intervals without children are active and carry a polynomial order.
#[derive(Debug, Clone)]
pub struct LineElem {
    pub id: usize,
    pub x: [f64; 2],
    pub order: u8,
    pub level: u8,
    parent: Option<usize>,
    children: Option<[usize; 2]>,
}

impl LineElem {
    fn new(id: usize, x: [f64; 2], order: u8) -> Self {
        Self {
            id,
            x,
            order,
            level: 0,
            parent: None,
            children: None,
        }
    }

    pub fn parent_id(&self) -> Option<usize> {
        self.parent
    }

    pub fn child_ids(&self) -> Option<[usize; 2]> {
        self.children
    }

    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    pub fn length(&self) -> f64 {
        self.x[1] - self.x[0]
    }

    pub fn cell(&self) -> Cell {
        Cell::Interval { x: self.x }
    }
}

/// A one dimensional H1 Space over an Interval of the real line
///
/// Elements are stored as binary trees rooted at the initial Intervals. Vertices are always shared
/// between neighbors, so hanging nodes cannot occur and the number of Degrees of Freedom is `Σ p + 1`.
#[derive(Debug, Clone)]
pub struct LineDomain {
    pub elems: Vec<LineElem>,
}

impl LineDomain {
    /// `n` equally sized Intervals over `[a, b]`, each with polynomial order `p`
    ///
    /// ```
    /// use hp_adapt::domain::line::LineDomain;
    /// use hp_adapt::AdaptiveSpace;
    ///
    /// let line = LineDomain::uniform(0.0, 1.0, 4, 2).unwrap();
    /// assert_eq!(line.num_dofs(), 9);
    /// ```
    pub fn uniform(a: f64, b: f64, n: usize, p: u8) -> Result<Self, MeshError> {
        if n == 0 || b <= a {
            return Err(MeshError::Format(format!(
                "Cannot build {} Intervals over [{}, {}]",
                n, a, b
            )));
        }
        if p == 0 {
            return Err(PRefError::NegExpansion.into());
        }
        if p > MAX_POLYNOMIAL_ORDER {
            return Err(PRefError::ExceededMaxExpansion.into());
        }

        let h = (b - a) / n as f64;
        Ok(Self {
            elems: (0..n)
                .map(|i| {
                    let right = if i + 1 == n { b } else { a + (i + 1) as f64 * h };
                    LineElem::new(i, [a + i as f64 * h, right], p)
                })
                .collect(),
        })
    }

    /// Iterate over the Intervals without children (left to right within each initial Interval)
    pub fn active(&self) -> impl Iterator<Item = &LineElem> + '_ {
        self.elems.iter().filter(|elem| !elem.has_children())
    }

    /// Bisect an active Interval, returning the IDs of the two children
    pub fn h_refine(&mut self, elem_id: usize) -> Result<[usize; 2], HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;
        if elem.has_children() {
            return Err(HRefError::ElemHasChildren(elem_id));
        }
        if elem.length() / 2.0 < MIN_EDGE_LENGTH {
            return Err(HRefError::MinEdgeLength(elem_id));
        }

        let [x0, x1] = elem.x;
        let mid = (x0 + x1) / 2.0;
        let ids = [self.elems.len(), self.elems.len() + 1];

        let children = [[x0, mid], [mid, x1]].map(|x| (x, elem.order, elem.level + 1));
        for (id, (x, order, level)) in ids.iter().zip(children) {
            let mut child = LineElem::new(*id, x, order);
            child.level = level;
            child.parent = Some(elem_id);
            self.elems.push(child);
        }
        self.elems[elem_id].children = Some(ids);

        Ok(ids)
    }

    /// Set the polynomial order of an Interval
    pub fn set_order(&mut self, elem_id: usize, order: u8) -> Result<(), PRefError> {
        let elem = self
            .elems
            .get_mut(elem_id)
            .ok_or(PRefError::ElemDoesntExist(elem_id))?;
        if order == 0 {
            return Err(PRefError::NegExpansion);
        }
        if order > MAX_POLYNOMIAL_ORDER {
            return Err(PRefError::ExceededMaxExpansion);
        }
        elem.order = order;
        Ok(())
    }

    /// Bisect every active Interval once
    pub fn refine_all_elements(&mut self) -> Result<(), HRefError> {
        let active: Vec<usize> = self.active().map(|elem| elem.id).collect();
        for elem_id in active {
            self.h_refine(elem_id)?;
        }
        Ok(())
    }

    /// Repeatedly bisect the Interval touching one end of the Domain, grading the mesh towards it
    pub fn refine_towards_boundary(
        &mut self,
        side: BoundarySide,
        times: usize,
    ) -> Result<(), HRefError> {
        for _ in 0..times {
            let boundary_elem = match side {
                BoundarySide::Left => self
                    .active()
                    .min_by(|a, b| a.x[0].total_cmp(&b.x[0])),
                BoundarySide::Right => self
                    .active()
                    .max_by(|a, b| a.x[1].total_cmp(&b.x[1])),
            }
            .map(|elem| elem.id);

            if let Some(elem_id) = boundary_elem {
                self.h_refine(elem_id)?;
            }
        }
        Ok(())
    }
}

impl AdaptiveSpace for LineDomain {
    fn num_dofs(&self) -> usize {
        let sum: usize = self.active().map(|elem| elem.order as usize).sum();
        if self.elems.is_empty() {
            0
        } else {
            sum + 1
        }
    }

    fn active_elems(&self) -> Vec<usize> {
        self.active().map(|elem| elem.id).collect()
    }

    fn elem_info(&self, elem_id: usize) -> Option<ElemInfo> {
        self.elems
            .get(elem_id)
            .filter(|elem| !elem.has_children())
            .map(|elem| ElemInfo {
                id: elem.id,
                shape: ElemShape::Interval,
                orders: PolyOrders::from(elem.order, 0),
                cell: elem.cell(),
                h_level: elem.level,
            })
    }

    fn reference_space(&self, split: bool, order_increase: u8) -> Result<Self, MeshError> {
        let mut reference = self.clone();
        if split {
            let active: Vec<usize> = reference.active_elems();
            for elem_id in active {
                match reference.h_refine(elem_id) {
                    Ok(_) | Err(HRefError::MinEdgeLength(_)) => (),
                    Err(err) => return Err(err.into()),
                }
            }
        }

        if order_increase > 0 {
            let active: Vec<usize> = reference.active_elems();
            for elem_id in active {
                let raised = reference.elems[elem_id]
                    .order
                    .saturating_add(order_increase)
                    .min(MAX_POLYNOMIAL_ORDER);
                reference.set_order(elem_id, raised)?;
            }
        }

        debug!(
            "Reference LineDomain: {} active Intervals, {} DoFs",
            reference.active().count(),
            reference.num_dofs()
        );

        Ok(reference)
    }

    fn reference_cells(&self, elem_id: usize) -> Option<Vec<(Cell, PolyOrders)>> {
        self.elems.get(elem_id)?;

        let mut cells = Vec::new();
        let mut stack = vec![elem_id];
        while let Some(id) = stack.pop() {
            match self.elems[id].child_ids() {
                Some([left, right]) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => cells.push((
                    self.elems[id].cell(),
                    PolyOrders::from(self.elems[id].order, 0),
                )),
            }
        }
        Some(cells)
    }

    fn split_admissible(&self, elem_id: usize, refinement: HRef, _mesh_regularity: i32) -> bool {
        refinement == HRef::T
            && self
                .elems
                .get(elem_id)
                .map_or(false, |elem| {
                    !elem.has_children() && elem.length() / 2.0 >= MIN_EDGE_LENGTH
                })
    }

    fn apply_refinements(
        &mut self,
        refinements: &[(usize, RefinementCandidate)],
    ) -> Result<(), MeshError> {
        let mut unique: BTreeMap<usize, &RefinementCandidate> = BTreeMap::new();
        for (elem_id, candidate) in refinements {
            if unique.insert(*elem_id, candidate).is_some() {
                return Err(HRefError::DoubleRefinement(*elem_id).into());
            }
        }
        for (elem_id, candidate) in unique.iter() {
            self.check_refinement(*elem_id, candidate)?;
        }

        for (elem_id, candidate) in unique {
            let targets = match candidate.split {
                Some(_) => self.h_refine(elem_id)?.to_vec(),
                None => vec![elem_id],
            };
            for (target, orders) in targets.into_iter().zip(candidate.child_orders.iter()) {
                self.set_order(target, orders.ni)?;
            }
        }

        Ok(())
    }

    fn dof_change(&self, elem_id: usize, candidate: &RefinementCandidate) -> Result<isize, MeshError> {
        self.check_refinement(elem_id, candidate)?;
        let added: isize = candidate.child_orders.iter().map(|o| o.ni as isize).sum();
        Ok(added - self.elems[elem_id].order as isize)
    }

    fn unrefine(&mut self, method: UnrefMethod, init_order: u8) -> Result<(), MeshError> {
        if init_order == 0 {
            return Err(PRefError::NegExpansion.into());
        }
        if init_order > MAX_POLYNOMIAL_ORDER {
            return Err(PRefError::ExceededMaxExpansion.into());
        }

        let keeps_children = |elem: &LineElem| match (method, elem.children) {
            (UnrefMethod::ResetToBase, _) | (_, None) => false,
            (_, Some(children)) => children.iter().any(|c| self.elems[*c].has_children()),
        };

        // parents precede their children, so one ascending pass sees every parent first
        let mut new_ids: Vec<Option<usize>> = vec![None; self.elems.len()];
        let mut elems: Vec<LineElem> = Vec::new();
        for elem in self.elems.iter() {
            let kept = match elem.parent {
                None => true,
                Some(parent) => new_ids[parent].is_some() && keeps_children(&self.elems[parent]),
            };
            if !kept {
                continue;
            }
            new_ids[elem.id] = Some(elems.len());

            let order = match elem.children {
                Some(children) if !keeps_children(elem) => children
                    .iter()
                    .map(|c| self.elems[*c].order)
                    .max()
                    .unwrap_or(elem.order),
                _ => elem.order,
            };
            let order = match method {
                UnrefMethod::ResetToBase | UnrefMethod::ShaveLayer => init_order,
                UnrefMethod::ShaveLayerLowerOrders => order.saturating_sub(1).max(init_order),
            };

            elems.push(LineElem {
                id: elems.len(),
                x: elem.x,
                order,
                level: elem.level,
                parent: elem.parent.and_then(|p| new_ids[p]),
                children: None,
            });
        }

        for elem in self.elems.iter().filter(|elem| keeps_children(elem)) {
            if let (Some(parent), Some([left, right])) = (new_ids[elem.id], elem.children) {
                if let (Some(left), Some(right)) = (new_ids[left], new_ids[right]) {
                    elems[parent].children = Some([left, right]);
                }
            }
        }

        debug!(
            "Unrefined LineDomain ({:?}): {} -> {} Intervals",
            method,
            self.elems.len(),
            elems.len()
        );
        self.elems = elems;
        Ok(())
    }
}

impl LineDomain {
    /// Check that `candidate` can be applied to an active Interval without changing anything
    fn check_refinement(&self, elem_id: usize, candidate: &RefinementCandidate) -> Result<(), MeshError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;
        if elem.has_children() {
            return Err(HRefError::ElemHasChildren(elem_id).into());
        }

        let expected = match candidate.split {
            Some(HRef::T) => {
                if elem.length() / 2.0 < MIN_EDGE_LENGTH {
                    return Err(HRefError::MinEdgeLength(elem_id).into());
                }
                2
            }
            Some(other) => return Err(HRefError::UnsupportedRefinement(other, elem_id).into()),
            None => 1,
        };
        if expected != candidate.child_orders.len() {
            return Err(MeshError::Format(format!(
                "Refinement of Interval {} expects {} child orders; got {}",
                elem_id,
                expected,
                candidate.child_orders.len()
            )));
        }

        for orders in candidate.child_orders.iter() {
            if orders.ni == 0 {
                return Err(PRefError::NegExpansion.into());
            }
            if orders.ni > MAX_POLYNOMIAL_ORDER {
                return Err(PRefError::ExceededMaxExpansion.into());
            }
        }
        Ok(())
    }
}
