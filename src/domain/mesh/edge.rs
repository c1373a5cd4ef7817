use super::{elem::Elem, h_refinement::HRefError, node::Node, space::ParaDir, MIN_EDGE_LENGTH};
use smallvec::{smallvec, SmallVec};

#[cfg(feature = "json_export")]
use json::{array, object, JsonValue};

/// Edges describe a straight line between two `Node`s
///
/// Edges keep track of every `Elem` that uses them as a full side. Combined with the Edge tree, this
/// is enough to find hanging nodes and constrained edges when counting Degrees of Freedom.
///
/// ## Layout
/// There are two Edge variants: U-directed and V-directed
///
/// 1. **U-Dir**:
///
/// `Node` and side indices:
/// ```text
///            T
///            1
///    0 *-----------* 1
///            0
///            B
/// ```
///
/// 2. **V-Dir**:
///
/// ```text
///         1
///         *
///         |
///   L  0  |  1  R
///         |
///         *
///         0
/// ```
///
/// Child Edges are indexed from Node 0 towards Node 1.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: usize,
    pub nodes: [usize; 2],
    pub boundary: bool,
    pub dir: ParaDir,
    pub length: f64,
    children: Option<[usize; 2]>,
    parent: Option<usize>,
    elems: [SmallVec<[usize; 4]>; 2],
    child_node: Option<usize>,
}

impl Edge {
    /// Construct a new edge between two points in real space
    pub fn new(id: usize, nodes: [&Node; 2], boundary: bool) -> Self {
        let dir = nodes[0].coords.orientation_with(&nodes[1].coords);

        Self {
            id,
            nodes: [nodes[0].id, nodes[1].id],
            boundary,
            dir,
            length: nodes[0].coords.dist(&nodes[1].coords),
            children: None,
            parent: None,
            elems: [SmallVec::new(), SmallVec::new()],
            child_node: None,
        }
    }

    /// Side of this Edge occupied by an `Elem` which uses it as its `edge_index`th Edge
    pub fn side_for_edge_index(edge_index: usize) -> usize {
        match edge_index {
            0 | 2 => 1,
            1 | 3 => 0,
            _ => unreachable!(),
        }
    }

    pub(crate) fn connect_elem(&mut self, elem: &Elem) {
        if let Some(index_of_self) = elem.edges.iter().position(|edge_id| edge_id == &self.id) {
            let side_index = Self::side_for_edge_index(index_of_self);
            if !self.elems[side_index].contains(&elem.id) {
                self.elems[side_index].push(elem.id);
            }
        } else {
            panic!(
                "Elem {} is not connected to Edge {}; cannot reciprocate connection!",
                elem.id, self.id
            );
        }
    }

    /// Produce two child Edges from this edge and connect them to a new Node along its center
    pub(crate) fn h_refine(
        &mut self,
        new_ids: [usize; 2],
        new_node_id: usize,
    ) -> Result<SmallVec<[Self; 2]>, HRefError> {
        match self.children {
            Some(_) => Err(HRefError::EdgeHasChildren(self.id)),
            None => {
                let child_edge_length = self.length / 2.0;

                if child_edge_length < MIN_EDGE_LENGTH {
                    Err(HRefError::MinEdgeLength(self.id))
                } else {
                    self.children = Some(new_ids);
                    self.child_node = Some(new_node_id);
                    Ok(smallvec![
                        self.child([self.nodes[0], new_node_id], new_ids[0], child_edge_length),
                        self.child([new_node_id, self.nodes[1]], new_ids[1], child_edge_length),
                    ])
                }
            }
        }
    }

    fn child(&self, nodes: [usize; 2], id: usize, length: f64) -> Self {
        Self {
            id,
            nodes,
            boundary: self.boundary,
            dir: self.dir,
            length,
            children: None,
            parent: Some(self.id),
            elems: [SmallVec::new(), SmallVec::new()],
            child_node: None,
        }
    }

    /// Id of the Parent Edge if this Edge has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.parent
    }

    /// Returns the child Edge ids. Returns `None` if this Edge has no children.
    pub fn child_ids(&self) -> Option<[usize; 2]> {
        self.children
    }

    /// Has been h-Refined?
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// Returns the Node sitting on the center of this Edge if it has been h-Refined; otherwise, `None` is returned.
    pub fn child_node_id(&self) -> Option<usize> {
        self.child_node
    }

    /// Ids of every `Elem` (active or not) which uses this Edge as a full side on `side` (0: B/L, 1: T/R)
    pub fn side_elems(&self, side: usize) -> &[usize] {
        &self.elems[side]
    }

    /// All `Elem`s connected to this Edge on either side
    pub fn connected_elems(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.elems
            .iter()
            .enumerate()
            .flat_map(|(side, ids)| ids.iter().map(move |id| (side, *id)))
    }

    /// Produce a Json Object that describes this Edge
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "boundary": self.boundary,
            "direction": self.dir,
            "nodes": array![self.nodes[0], self.nodes[1]],
            "parent": self.parent_id(),
            "children": match self.children {
                Some(child_ids) => array![child_ids[0], child_ids[1]],
                None => array![],
            },
            "elems": array![self.elems[0].to_vec(), self.elems[1].to_vec()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::space::Point;

    #[test]
    fn refine_edge() {
        let nodes = [
            Node::new(0, Point::new(0.0, 0.0), true),
            Node::new(1, Point::new(1.0, 0.0), true),
        ];
        let mut edge = Edge::new(0, [&nodes[0], &nodes[1]], true);
        assert_eq!(edge.dir, ParaDir::U);

        let children = edge.h_refine([1, 2], 2).unwrap();
        assert_eq!(children[0].nodes, [0, 2]);
        assert_eq!(children[1].nodes, [2, 1]);
        assert_eq!(children[1].parent_id(), Some(0));
        assert!((children[0].length - 0.5).abs() < 1e-14);
        assert_eq!(edge.child_node_id(), Some(2));

        assert_eq!(
            edge.h_refine([3, 4], 3).unwrap_err(),
            HRefError::EdgeHasChildren(0)
        );
    }

    #[test]
    fn short_edges_are_not_refined() {
        let nodes = [
            Node::new(0, Point::new(0.0, 0.0), true),
            Node::new(1, Point::new(0.0, MIN_EDGE_LENGTH), true),
        ];
        let mut edge = Edge::new(0, [&nodes[0], &nodes[1]], true);
        assert_eq!(edge.dir, ParaDir::V);
        assert_eq!(
            edge.h_refine([1, 2], 2).unwrap_err(),
            HRefError::MinEdgeLength(0)
        );
    }
}
