use super::{
    element::Element,
    h_refinement::{HLevels, HRef, HRefError, HRefLoc},
    p_refinement::PolyOrders,
    EXPECTED_NUM_H_REFINEMENTS,
};
use crate::domain::cell::Cell;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "json_export")]
use json::{array, object, JsonValue};

/// `Elem`s are the basic finite unit of the `Mesh`
///
/// `Elem`s are responsible for keeping track of:
/// * Connections to neighboring `Node`s and `Edge`s
/// * Connections to their parent `Elem` (and their own h-refinement state)
/// * Connections to their child `Elem`s (if h-refined)
/// * Polynomial expansion orders (p-refinement state)
///
/// An `Elem` without children is *active*: it carries the Space's polynomial orders and Degrees of Freedom.
///
/// ## Layout
/// The indices of `Node`s and `Edge`s from the perspective of an `Elem` are described as follows:
///
/// ```text
///               N
///         2 --------- 3
///         |     1     |
///         |           |
///      W  |2         3|  E
///         |           |
///         |     0     |
///         0 --------- 1
///               S
/// ```
///
/// ## h-Refinement
///
/// Child `Elem`s are indexed as follows for each type of h-refinement:
///
/// ```text
///      T-Type            U-Type            V-Type
///   ---------------   ---------------   ---------------
///   |   2  |   3  |   |      |      |   |      1      |
///   |------|------|   |  0   |   1  |   |-------------|
///   |   0  |   1  |   |      |      |   |      0      |
///   ---------------   ---------------   ---------------
/// ```
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub nodes: [usize; 4],
    pub edges: [usize; 4],
    pub element: Arc<Element>,
    pub h_levels: HLevels,
    pub poly_orders: PolyOrders,
    children: Option<SmallVec<[usize; 4]>>,
    ancestors: SmallVec<[(usize, HRefLoc); EXPECTED_NUM_H_REFINEMENTS]>,
}

impl Elem {
    /// Construct a new Elem from the relevant associative information
    pub fn new(id: usize, nodes: [usize; 4], edges: [usize; 4], element: Arc<Element>) -> Self {
        Self {
            id,
            nodes,
            edges,
            element,
            children: None,
            ancestors: SmallVec::new(),
            h_levels: HLevels::default(),
            poly_orders: PolyOrders::default(),
        }
    }

    /// Construct new 2 or 4 [ElemUninit]'s from an [HRef] of this Elem
    pub(crate) fn h_refine(
        &mut self,
        refinement: HRef,
        id_counter: &mut usize,
    ) -> Result<Vec<ElemUninit>, HRefError> {
        match self.children {
            Some(_) => Err(HRefError::ElemHasChildren(self.id)),
            None => {
                let children = refinement
                    .indices_and_ids(id_counter)
                    .into_iter()
                    .map(|elem_idx_id| {
                        ElemUninit::new(
                            elem_idx_id,
                            refinement,
                            self.element.clone(),
                            self.id,
                            self.loc_stack(),
                            &self.h_levels,
                            self.poly_orders,
                        )
                    })
                    .collect::<Vec<ElemUninit>>();

                self.children = Some(children.iter().map(|ce| ce.id).collect());
                Ok(children)
            }
        }
    }

    /// Id of the Parent Elem if this Elem has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.ancestors.last().map(|(id, _)| *id)
    }

    /// Get the stack of [HRefLoc]s and Elem-IDs back to this `Elem`s ancestor on the base layer of the mesh
    pub fn loc_stack(&self) -> &[(usize, HRefLoc)] {
        &self.ancestors
    }

    /// Get the bounds of this `Elem` in parametric space relative to its associated `Element`
    pub fn parametric_range(&self) -> [[f64; 2]; 2] {
        self.ancestors
            .iter()
            .fold([[-1.0, 1.0], [-1.0, 1.0]], |acc, (_, href_loc)| {
                href_loc.sub_range(acc)
            })
    }

    /// The rectangle covered by this `Elem` in real space
    pub fn cell(&self) -> Cell {
        let [x, y] = self.element.real_range(self.parametric_range());
        Cell::Rect { x, y }
    }

    /// Returns a vector of ids for this Elem's children. Returns `None` if this Elem has no children.
    pub fn child_ids(&self) -> Option<SmallVec<[usize; 4]>> {
        self.children.clone()
    }

    /// Has this `Elem` been h-Refined
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// Produce a Json Object that describes this Elem
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "element_id": self.element.id,
            "parent": self.parent_id(),
            "active": self.children.is_none(),
            "nodes": array![self.nodes[0], self.nodes[1], self.nodes[2], self.nodes[3]],
            "edges": array![self.edges[0], self.edges[1], self.edges[2], self.edges[3]],
            "expansion": self.poly_orders,
            "h_levels": self.h_levels,
            "children": JsonValue::from(
                match &self.children {
                    Some(ids) => ids.to_vec(),
                    None => Vec::new(),
                }
            )
        }
    }
}

// Intermediate data structure used to represent a child [Elem] during the execution of an [HRef]
#[derive(Debug, Clone)]
pub(crate) struct ElemUninit {
    pub id: usize,
    pub nodes: [Option<usize>; 4],
    pub edges: [Option<usize>; 4],
    pub element: Arc<Element>,
    ancestors: SmallVec<[(usize, HRefLoc); EXPECTED_NUM_H_REFINEMENTS]>,
    h_levels: HLevels,
    poly_orders: PolyOrders,
}

impl ElemUninit {
    pub fn new(
        (idx, id): (usize, usize),
        refinement: HRef,
        element: Arc<Element>,
        parent_id: usize,
        parents_ancestors: &[(usize, HRefLoc)],
        parent_h_levels: &HLevels,
        poly_orders: PolyOrders,
    ) -> Self {
        let mut ancestors = SmallVec::from(parents_ancestors);
        ancestors.push((parent_id, refinement.loc(idx)));

        Self {
            id,
            nodes: [None; 4],
            edges: [None; 4],
            element,
            ancestors,
            h_levels: parent_h_levels.refined(refinement),
            poly_orders,
        }
    }

    pub fn set_node(&mut self, node_idx: usize, node_id: usize) {
        assert!(
            node_idx < 4,
            "Node indices must be between 0 and 4; cannot set Node ({}) to {} on ElemUninit {}!",
            node_idx,
            node_id,
            self.id
        );

        match self.nodes[node_idx] {
            Some(current_id) => assert_eq!(
                current_id, node_id,
                "Node ({}) has already been set to {} on ElemUninit {}; Cannot set to {}",
                node_idx, current_id, self.id, node_id
            ),
            None => self.nodes[node_idx] = Some(node_id),
        }
    }

    pub fn set_edge(&mut self, edge_idx: usize, edge_id: usize) {
        assert!(
            edge_idx < 4,
            "Edge indices must be between 0 and 4; cannot set Edge ({}) to {} on ElemUninit {}!",
            edge_idx,
            edge_id,
            self.id
        );

        if let Some(current_id) = self.edges[edge_idx] {
            panic!(
                "Edge ({}) has already been set to {} on ElemUninit {}; Cannot set to {}",
                edge_idx, current_id, self.id, edge_id
            );
        }

        self.edges[edge_idx] = Some(edge_id);
    }

    pub fn into_elem(self) -> Result<Elem, HRefError> {
        match (collect_ids(&self.nodes), collect_ids(&self.edges)) {
            (Some(nodes), Some(edges)) => Ok(Elem {
                id: self.id,
                nodes,
                edges,
                element: self.element,
                children: None,
                ancestors: self.ancestors,
                h_levels: self.h_levels,
                poly_orders: self.poly_orders,
            }),
            _ => Err(HRefError::UninitializedElem(self.id)),
        }
    }

    fn fmt_id(id: Option<usize>) -> String {
        match id {
            Some(id) => id.to_string(),
            None => String::from("_"),
        }
    }
}

fn collect_ids(ids: &[Option<usize>; 4]) -> Option<[usize; 4]> {
    Some([ids[0]?, ids[1]?, ids[2]?, ids[3]?])
}

impl fmt::Display for ElemUninit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ID: {} \t edges: [{}, {}, {}, {}] \t nodes: [{}, {}, {}, {}]",
            self.id,
            Self::fmt_id(self.edges[0]),
            Self::fmt_id(self.edges[1]),
            Self::fmt_id(self.edges[2]),
            Self::fmt_id(self.edges[3]),
            Self::fmt_id(self.nodes[0]),
            Self::fmt_id(self.nodes[1]),
            Self::fmt_id(self.nodes[2]),
            Self::fmt_id(self.nodes[3]),
        )
    }
}
