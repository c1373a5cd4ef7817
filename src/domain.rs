/// Real-space footprints of elements
pub mod cell;
/// One dimensional Spaces made of Intervals
pub mod line;
/// The internal geometric structure of a two dimensional Domain
pub mod mesh;

use crate::adapt::{candidates::RefinementCandidate, AdaptiveSpace, ElemInfo, UnrefMethod};
use cell::{Cell, ElemShape};
use mesh::{
    h_refinement::{HRef, HRefError},
    p_refinement::PolyOrders,
    Mesh, MeshError, MAX_POLYNOMIAL_ORDER,
};

use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// High Level Description of a two dimensional hp-FEM Space
///
/// Wraps a [Mesh] of axis-aligned quadrilaterals whose active `Elem`s each carry a set of [PolyOrders].
/// Degrees of Freedom are counted for an H1-conforming hierarchic basis.
#[derive(Debug, Clone)]
pub struct Domain {
    pub mesh: Mesh,
}

impl Domain {
    pub fn from_mesh(mesh: Mesh) -> Self {
        Self { mesh }
    }

    /// Apply one isotropic h-Refinement to every active `Elem`
    pub fn refine_all_elements(&mut self) -> Result<(), HRefError> {
        self.mesh.global_h_refinement(HRef::T)
    }

    /// Set the expansion orders on all `Elem`s
    pub fn set_uniform_orders(&mut self, orders: PolyOrders) -> Result<(), MeshError> {
        self.mesh
            .set_global_expansion_orders([orders.ni, orders.nj])?;
        Ok(())
    }
}

impl AdaptiveSpace for Domain {
    fn num_dofs(&self) -> usize {
        self.mesh.num_h1_dofs()
    }

    fn active_elems(&self) -> Vec<usize> {
        self.mesh.active_elems().map(|elem| elem.id).collect()
    }

    fn elem_info(&self, elem_id: usize) -> Option<ElemInfo> {
        self.mesh
            .elems
            .get(elem_id)
            .filter(|elem| !elem.has_children())
            .map(|elem| ElemInfo {
                id: elem.id,
                shape: ElemShape::Quad,
                orders: elem.poly_orders,
                cell: elem.cell(),
                h_level: elem.h_levels.max(),
            })
    }

    fn reference_space(&self, split: bool, order_increase: u8) -> Result<Self, MeshError> {
        let mut reference = self.clone();
        if split {
            reference.mesh.global_h_refinement(HRef::T)?;
        }

        if order_increase > 0 {
            let increased: Vec<(usize, [u8; 2])> = reference
                .mesh
                .active_elems()
                .map(|elem| {
                    let raise = |n: u8| n.saturating_add(order_increase).min(MAX_POLYNOMIAL_ORDER);
                    (
                        elem.id,
                        [raise(elem.poly_orders.ni), raise(elem.poly_orders.nj)],
                    )
                })
                .collect();
            reference.mesh.set_expansion_orders(increased)?;
        }

        debug!(
            "Reference Domain: {} active Elems, {} DoFs",
            reference.mesh.active_elems().count(),
            reference.num_dofs()
        );

        Ok(reference)
    }

    fn reference_cells(&self, elem_id: usize) -> Option<Vec<(Cell, PolyOrders)>> {
        self.mesh
            .active_descendant_elems(elem_id)
            .ok()
            .map(|ids| {
                ids.into_iter()
                    .map(|id| (self.mesh.elems[id].cell(), self.mesh.elems[id].poly_orders))
                    .collect()
            })
    }

    fn split_admissible(&self, elem_id: usize, refinement: HRef, mesh_regularity: i32) -> bool {
        match (
            self.mesh.elem_is_h_refineable(elem_id, refinement),
            self.mesh.hanging_level(elem_id, refinement),
        ) {
            (Ok(true), Ok(level)) => mesh_regularity < 0 || level <= mesh_regularity as usize,
            _ => false,
        }
    }

    fn apply_refinements(
        &mut self,
        refinements: &[(usize, RefinementCandidate)],
    ) -> Result<(), MeshError> {
        // nothing is changed unless every refinement can be applied
        let mut seen = BTreeSet::new();
        for (elem_id, candidate) in refinements {
            let elem = self
                .mesh
                .elems
                .get(*elem_id)
                .ok_or(MeshError::ElemDoesntExist(*elem_id))?;
            if !seen.insert(*elem_id) {
                return Err(HRefError::DoubleRefinement(*elem_id).into());
            }
            if elem.has_children() {
                return Err(HRefError::ElemHasChildren(*elem_id).into());
            }

            let expected = candidate.split.map_or(1, |split| split.num_children());
            if expected != candidate.child_orders.len() {
                return Err(MeshError::Format(format!(
                    "Refinement of Elem {} expects {} child orders; got {}",
                    elem_id,
                    expected,
                    candidate.child_orders.len()
                )));
            }
            if let Some(split) = candidate.split {
                if !self.mesh.elem_is_h_refineable(*elem_id, split)? {
                    return Err(HRefError::MinEdgeLength(elem.edges[split.split_edges()[0]]).into());
                }
            }
            for orders in candidate.child_orders.iter() {
                PolyOrders::default().set([orders.ni, orders.nj])?;
            }
        }

        let h_refinements: Vec<(usize, HRef)> = refinements
            .iter()
            .filter_map(|(elem_id, candidate)| candidate.split.map(|split| (*elem_id, split)))
            .collect();
        self.mesh.execute_h_refinements(h_refinements)?;

        let mut orders: BTreeMap<usize, [u8; 2]> = BTreeMap::new();
        for (elem_id, candidate) in refinements {
            let targets = match self.mesh.elems[*elem_id].child_ids() {
                Some(child_ids) if candidate.split.is_some() => child_ids.to_vec(),
                _ => vec![*elem_id],
            };
            for (target, child_orders) in targets.into_iter().zip(candidate.child_orders.iter()) {
                orders.insert(target, [child_orders.ni, child_orders.nj]);
            }
        }

        self.mesh
            .set_expansion_orders(orders.into_iter().collect())?;
        Ok(())
    }

    fn unrefine(&mut self, method: UnrefMethod, init_order: u8) -> Result<(), MeshError> {
        let init = [init_order, init_order];
        PolyOrders::default().set(init)?;

        let mesh = match method {
            UnrefMethod::ResetToBase => {
                let mut base = self.mesh.base_mesh()?;
                base.set_global_expansion_orders(init)?;
                base
            }
            UnrefMethod::ShaveLayer => {
                let (mut coarse, _) = self.mesh.coarsened()?;
                coarse.set_global_expansion_orders(init)?;
                coarse
            }
            UnrefMethod::ShaveLayerLowerOrders => {
                let (mut coarse, _) = self.mesh.coarsened()?;
                let lowered: Vec<(usize, [u8; 2])> = coarse
                    .elems
                    .iter()
                    .map(|elem| {
                        let orders = elem.poly_orders.decremented(init_order);
                        (elem.id, [orders.ni, orders.nj])
                    })
                    .collect();
                coarse.set_expansion_orders(lowered)?;
                coarse
            }
        };

        debug!(
            "Unrefined Domain ({:?}): {} -> {} active Elems",
            method,
            self.mesh.active_elems().count(),
            mesh.active_elems().count()
        );
        self.mesh = mesh;
        Ok(())
    }
}

struct IdTracker {
    next_id: usize,
}

impl IdTracker {
    pub fn new(start: usize) -> Self {
        Self { next_id: start }
    }

    pub fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id - 1
    }

    pub fn next_two_ids(&mut self) -> [usize; 2] {
        let ids = [self.next_id, self.next_id + 1];
        self.next_id += 2;
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn two_elem_domain() -> Domain {
        Domain::from_mesh(Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 1).unwrap())
    }

    #[test]
    fn id_tracker() {
        let mut tracker = IdTracker::new(3);
        assert_eq!(tracker.next_id(), 3);
        assert_eq!(tracker.next_two_ids(), [4, 5]);
        assert_eq!(tracker.next_id(), 6);
    }

    #[test]
    fn reference_space_preserves_ids() {
        let dom = two_elem_domain();
        let reference = dom.reference_space(true, 1).unwrap();

        assert_eq!(reference.active_elems().len(), 8);
        for elem_id in dom.active_elems() {
            let cells = reference.reference_cells(elem_id).unwrap();
            assert_eq!(cells.len(), 4);
            assert!(cells.iter().all(|(_, orders)| *orders == PolyOrders::iso(2)));

            let area: f64 = cells.iter().map(|(cell, _)| cell.measure()).sum();
            assert!((area - 1.0).abs() < 1e-14);
        }

        // coarse Space is untouched
        assert_eq!(dom.num_dofs(), 6);
        assert!(dom.elem_info(0).is_some());
        assert!(reference.elem_info(0).is_none());
    }

    #[test]
    fn apply_mixed_refinements() {
        let mut dom = two_elem_domain();
        dom.apply_refinements(&[
            (0, RefinementCandidate::p_only(PolyOrders::from(3, 2))),
            (
                1,
                RefinementCandidate::split(HRef::U, smallvec![PolyOrders::iso(1), PolyOrders::iso(2)]),
            ),
        ])
        .unwrap();

        assert_eq!(dom.active_elems(), vec![0, 2, 3]);
        assert_eq!(dom.elem_info(0).unwrap().orders, PolyOrders::from(3, 2));
        assert_eq!(dom.elem_info(3).unwrap().orders, PolyOrders::iso(2));
        assert_eq!(dom.elem_info(2).unwrap().h_level, 1);
    }

    #[test]
    fn split_admissibility_follows_regularity() {
        let mut dom = two_elem_domain();
        dom.mesh.h_refine_elems(vec![0], HRef::T).unwrap();

        // the SE child of Elem 0 would create a second level hanging node
        assert!(!dom.split_admissible(3, HRef::T, 1));
        assert!(dom.split_admissible(3, HRef::T, 2));
        assert!(dom.split_admissible(3, HRef::T, -1));
        assert!(dom.split_admissible(2, HRef::V, 1));
        assert!(!dom.split_admissible(0, HRef::T, -1));
    }

    #[test]
    fn mismatched_child_orders() {
        let mut dom = two_elem_domain();
        let bad = RefinementCandidate::split(HRef::T, smallvec![PolyOrders::iso(1)]);
        assert!(matches!(
            dom.apply_refinements(&[(0, bad)]),
            Err(MeshError::Format(_))
        ));
    }

    #[test]
    fn invalid_refinements_leave_the_mesh_untouched() {
        let mut dom = two_elem_domain();
        let err = dom
            .apply_refinements(&[
                (0, RefinementCandidate::split(HRef::T, smallvec![PolyOrders::iso(2); 4])),
                (1, RefinementCandidate::split(HRef::U, smallvec![PolyOrders::iso(2)])),
            ])
            .unwrap_err();
        assert!(matches!(err, MeshError::Format(_)));

        let err = dom
            .apply_refinements(&[
                (0, RefinementCandidate::split(HRef::V, smallvec![PolyOrders::iso(2); 2])),
                (1, RefinementCandidate::p_only(PolyOrders::from(0, 2))),
            ])
            .unwrap_err();
        assert!(matches!(err, MeshError::PRef(_)));

        let err = dom
            .apply_refinements(&[
                (0, RefinementCandidate::p_only(PolyOrders::iso(2))),
                (0, RefinementCandidate::split(HRef::U, smallvec![PolyOrders::iso(2); 2])),
            ])
            .unwrap_err();
        assert!(matches!(err, MeshError::HRef(HRefError::DoubleRefinement(0))));

        assert_eq!(dom.mesh.elems.len(), 2);
        assert_eq!(dom.active_elems(), vec![0, 1]);
        assert_eq!(dom.num_dofs(), 6);
    }

    #[test]
    fn lowered_child_orders_can_remove_dofs() {
        let mut dom = two_elem_domain();
        dom.set_uniform_orders(PolyOrders::iso(2)).unwrap();
        assert_eq!(dom.num_dofs(), 15);

        let lowered = RefinementCandidate::split(HRef::T, smallvec![PolyOrders::iso(1); 4]);
        assert_eq!(dom.dof_change(0, &lowered).unwrap(), -1);

        let kept = RefinementCandidate::split(HRef::T, smallvec![PolyOrders::iso(2); 4]);
        assert!(dom.dof_change(0, &kept).unwrap() > 0);

        // the Domain itself is not refined
        assert_eq!(dom.num_dofs(), 15);
        assert!(dom.dof_change(9, &kept).is_err());
    }

    fn graded_domain() -> Domain {
        let mut dom = two_elem_domain();
        dom.mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        dom.mesh.h_refine_elems(vec![2], HRef::T).unwrap();
        dom.mesh.set_expansion_orders(vec![(6, [4, 3]), (7, [2, 5])]).unwrap();
        dom
    }

    #[test]
    fn unrefinement_shaves_one_layer() {
        let mut lowered = graded_domain();
        lowered.unrefine(UnrefMethod::ShaveLayerLowerOrders, 1).unwrap();
        assert_eq!(lowered.active_elems(), vec![1, 2, 3, 4, 5]);
        assert_eq!(lowered.elem_info(2).unwrap().orders, PolyOrders::from(3, 4));
        assert_eq!(lowered.elem_info(3).unwrap().orders, PolyOrders::iso(1));
        assert_eq!(lowered.elem_info(2).unwrap().cell, graded_domain().mesh.elems[2].cell());

        let mut shaved = graded_domain();
        shaved.unrefine(UnrefMethod::ShaveLayer, 2).unwrap();
        let mut expected = two_elem_domain();
        expected.mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        expected.set_uniform_orders(PolyOrders::iso(2)).unwrap();
        assert_eq!(shaved.active_elems(), expected.active_elems());
        assert_eq!(shaved.num_dofs(), expected.num_dofs());
    }

    #[test]
    fn unrefinement_to_the_base_mesh() {
        let mut dom = graded_domain();
        dom.refine_all_elements().unwrap();
        assert_eq!(dom.active_elems().len(), 32);
        dom.unrefine(UnrefMethod::ResetToBase, 3).unwrap();

        assert_eq!(dom.mesh.elems.len(), 2);
        assert_eq!(dom.mesh.nodes.len(), 6);
        assert!(dom.mesh.hanging_nodes().is_empty());
        // 6 vertices, 7 edges with 2 DOFs each, 2 bubbles of 4
        assert_eq!(dom.num_dofs(), 6 + 14 + 8);

        assert!(dom.unrefine(UnrefMethod::ResetToBase, 0).is_err());
        assert_eq!(dom.mesh.elems.len(), 2);
    }
}
