/// A line between two Nodes
pub mod edge;
/// A Finite Element in Parametric Space
pub mod elem;
/// A Finite Element in Real Space
pub mod element;
/// Structures and Functions to facilitate anisotropic h-refinement
pub mod h_refinement;
/// A Point in Real Space
pub mod node;
/// Structures and Functions to facilitate anisotropic p-refinement
pub mod p_refinement;
/// Structures to describe the 2D real space a Mesh lives in
pub mod space;

use edge::Edge;
use elem::{Elem, ElemUninit};
use element::Element;
use h_refinement::{HRef, HRefError};
use node::Node;
use p_refinement::{PRefError, PolyOrders};
use space::{ParaDir, Point};

use super::IdTracker;

use json::JsonValue;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::sync::Arc;
use thiserror::Error;

#[cfg(feature = "json_export")]
use json::object;
#[cfg(feature = "json_export")]
use std::{fs::File, io::BufWriter};

/// Minimum Edge length. h-Refinements will fail after edges are smaller than this value.
pub const MIN_EDGE_LENGTH: f64 = 3.0518e-5; // 15ish refinement layers with unit sized cells

/// The expected "h-Refinement" depth. This determines the stack allocation size of some `SmallVec`s related to h-Refinement
pub const EXPECTED_NUM_H_REFINEMENTS: usize = 8;

/// Maximum Polynomial expansion. p-Refinements will fail when Elem's expansion orders exceed this value.
pub const MAX_POLYNOMIAL_ORDER: u8 = 20;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Unable to read Mesh file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse Mesh file as JSON: {0}")]
    Json(#[from] json::Error),
    #[error("Invalid Mesh description: {0}")]
    Format(String),
    #[error(transparent)]
    HRef(#[from] HRefError),
    #[error(transparent)]
    PRef(#[from] PRefError),
    #[error("Elem {0} does not exist in the Mesh!")]
    ElemDoesntExist(usize),
}

fn format_err(msg: impl Into<String>) -> MeshError {
    MeshError::Format(msg.into())
}

/// Information used to Define the geometric structure and refinement state of a Domain.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elements: Vec<Arc<Element>>,
    pub elems: Vec<Elem>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Mesh {
    /// Construct a structured Mesh of `nx` by `ny` equally sized rectangular Elements covering `x_range` × `y_range`
    ///
    /// ```
    /// use hp_adapt::domain::mesh::Mesh;
    ///
    /// let mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 1).unwrap();
    /// assert_eq!(mesh.elems.len(), 2);
    /// assert_eq!(mesh.nodes.len(), 6);
    /// assert_eq!(mesh.edges.len(), 7);
    /// ```
    pub fn rectangle(
        x_range: [f64; 2],
        y_range: [f64; 2],
        nx: usize,
        ny: usize,
    ) -> Result<Self, MeshError> {
        if nx == 0 || ny == 0 {
            return Err(format_err("A rectangular Mesh needs at least one Element in each direction"));
        }
        if x_range[1] <= x_range[0] || y_range[1] <= y_range[0] {
            return Err(format_err("Mesh ranges must be increasing"));
        }

        let dx = (x_range[1] - x_range[0]) / nx as f64;
        let dy = (y_range[1] - y_range[0]) / ny as f64;

        let points: Vec<Point> = (0..=ny)
            .flat_map(|j| {
                (0..=nx).map(move |i| {
                    Point::new(x_range[0] + i as f64 * dx, y_range[0] + j as f64 * dy)
                })
            })
            .collect();

        let node_id = |i: usize, j: usize| j * (nx + 1) + i;
        let element_node_ids: Vec<[usize; 4]> = (0..ny)
            .flat_map(|j| {
                (0..nx).map(move |i| {
                    [
                        node_id(i, j),
                        node_id(i + 1, j),
                        node_id(i, j + 1),
                        node_id(i + 1, j + 1),
                    ]
                })
            })
            .collect();

        let markers = vec![0; element_node_ids.len()];
        Self::from_parts(points, element_node_ids, markers)
    }

    /// Construct a Mesh from a JSON file with the following format
    ///
    /// The following describes this two element mesh:
    /// ```text
    ///     3               4               5
    /// 0.5 *---------------*---------------*
    ///     |               |               |
    ///     |   marker 0    |   marker 1    |
    ///     |               |               |
    /// 0.0 *---------------*---------------*
    ///  y  0               1               2
    ///  x 0.0             1.0             2.0
    /// ```
    ///
    /// mesh.json
    /// ```JSON
    /// {
    ///     "Elements": [
    ///         {
    ///             "marker": 0,
    ///             "node_ids": [0, 1, 3, 4]
    ///         },
    ///         {
    ///             "marker": 1,
    ///             "node_ids": [1, 2, 4, 5]
    ///         }
    ///     ],
    ///     "Nodes": [
    ///         [0.0, 0.0],
    ///         [1.0, 0.0],
    ///         [2.0, 0.0],
    ///         [0.0, 0.5],
    ///         [1.0, 0.5],
    ///         [2.0, 0.5]
    ///     ]
    /// }
    /// ```
    /// `"marker"` is optional and defaults to 0.
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, MeshError> {
        let mesh_file_contents = read_to_string(path.as_ref())?;
        Self::from_json_str(&mesh_file_contents)
    }

    /// Construct a Mesh from the contents of a JSON Mesh file (see [Mesh::from_file])
    pub fn from_json_str(contents: &str) -> Result<Self, MeshError> {
        let mesh_file_json = json::parse(contents)?;

        let (markers, element_node_ids) = parse_element_information(&mesh_file_json)?;
        let points = parse_node_information(&mesh_file_json)?;

        Self::from_parts(points, element_node_ids, markers)
    }

    fn from_parts(
        points: Vec<Point>,
        element_node_ids: Vec<[usize; 4]>,
        markers: Vec<usize>,
    ) -> Result<Self, MeshError> {
        // build a vector of elements with the specified nodes and markers
        let elements: Vec<Arc<Element>> = markers
            .iter()
            .zip(element_node_ids.iter())
            .enumerate()
            .map(|(element_id, (marker, node_ids))| {
                Arc::new(Element::new(
                    element_id,
                    node_ids.map(|node_id| points[node_id]),
                    *marker,
                ))
            })
            .collect();

        for element in elements.iter() {
            let [p0, p1, p2, p3] = element.points;
            let axis_aligned = p0.y == p1.y && p2.y == p3.y && p0.x == p2.x && p1.x == p3.x;
            if !axis_aligned || p3.x <= p0.x || p3.y <= p0.y {
                return Err(format_err(format!(
                    "Element {} must be an axis-aligned rectangle with nodes ordered [SW, SE, NW, NE]",
                    element.id
                )));
            }
        }

        // count the number of times each point/node is referenced by an element
        let mut node_connection_counts = vec![0; points.len()];
        for node_ids in element_node_ids.iter() {
            for node_id in node_ids.iter() {
                node_connection_counts[*node_id] += 1;
            }
        }
        if node_connection_counts.iter().any(|count| *count > 4) {
            return Err(format_err("Nodes can only be shared by a maximum of 4 Elements"));
        }

        // nodes with fewer than 4 references sit on the boundary
        let nodes: Vec<Node> = points
            .iter()
            .enumerate()
            .map(|(node_id, point)| Node::new(node_id, *point, node_connection_counts[node_id] < 4))
            .collect();

        // {[node_id_0, node_id_1] => [LB element_id, TR element_id]}
        let mut edge_node_pairs: BTreeMap<[usize; 2], [Option<usize>; 2]> = BTreeMap::new();
        for (element_id, element_node_ids) in element_node_ids.iter().enumerate() {
            for (edge_index_pair, element_side_index) in EDGE_IDX_DEFS {
                let sides = edge_node_pairs
                    .entry([
                        element_node_ids[edge_index_pair[0]],
                        element_node_ids[edge_index_pair[1]],
                    ])
                    .or_insert([None, None]);

                if let Some(prev_id) = sides[element_side_index] {
                    return Err(format_err(format!(
                        "Elements {} and {} overlap along nodes {:?}",
                        prev_id, element_id, edge_index_pair
                    )));
                }
                sides[element_side_index] = Some(element_id);
            }
        }

        // edges with only one adjacent element are on the boundary
        let edges: Vec<Edge> = edge_node_pairs
            .iter()
            .enumerate()
            .map(|(edge_id, (node_ids, adj_element_ids))| {
                Edge::new(
                    edge_id,
                    [&nodes[node_ids[0]], &nodes[node_ids[1]]],
                    adj_element_ids.iter().flatten().count() == 1,
                )
            })
            .collect();

        // invert 'edge_node_pairs' S.T. we have a list of edges associated with each element in the correct order
        let mut elem_edges: Vec<[Option<usize>; 4]> = vec![[None; 4]; elements.len()];
        for (edge_id, adj_element_ids) in edge_node_pairs.values().enumerate() {
            for (elem_side_idx, elem_id) in adj_element_ids
                .iter()
                .enumerate()
                .filter_map(|(side_idx, adj_elem_id)| adj_elem_id.map(|id| (side_idx, id)))
            {
                let edge_idx = match (elem_side_idx, edges[edge_id].dir) {
                    (0, ParaDir::U) => 1,
                    (1, ParaDir::U) => 0,
                    (0, ParaDir::V) => 3,
                    (1, ParaDir::V) => 2,
                    _ => unreachable!(),
                };

                elem_edges[elem_id][edge_idx] = Some(edge_id);
            }
        }

        let mut mesh = Self {
            elements,
            elems: Vec::with_capacity(element_node_ids.len()),
            nodes,
            edges,
        };

        // create a vector of Elems from the above information and connect them to the relevant Edges
        for (elem_id, node_ids) in element_node_ids.into_iter().enumerate() {
            let [e0, e1, e2, e3] = elem_edges[elem_id];
            let edge_ids = match (e0, e1, e2, e3) {
                (Some(e0), Some(e1), Some(e2), Some(e3)) => [e0, e1, e2, e3],
                _ => {
                    return Err(format_err(format!(
                        "Unable to find all four Edges of Element {}",
                        elem_id
                    )))
                }
            };

            let elem = Elem::new(elem_id, node_ids, edge_ids, mesh.elements[elem_id].clone());
            for edge_id in elem.edges.iter() {
                mesh.edges[*edge_id].connect_elem(&elem);
            }
            mesh.elems.push(elem);
        }

        Ok(mesh)
    }

    /// Print the mesh to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        let mesh_object = object! {
            "Elements": JsonValue::from(self.elements.iter().map(|element| element.to_json()).collect::<Vec<_>>()),
            "Elems": JsonValue::from(self.elems.iter().map(|elem| elem.to_json()).collect::<Vec<_>>()),
            "Nodes": JsonValue::from(self.nodes.iter().map(|node| node.to_json()).collect::<Vec<_>>()),
            "Edges": JsonValue::from(self.edges.iter().map(|edge| edge.to_json()).collect::<Vec<_>>()),
        };

        mesh_object.write_pretty(&mut w, 4)?;

        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    /// Get the four [Point]s composing an [`Elem`]
    pub fn elem_points(&self, elem_id: usize) -> [&Point; 4] {
        self.elems[elem_id]
            .nodes
            .map(|node_id| &self.nodes[node_id].coords)
    }

    /// Get the two [Point]s composing an [`Edge`]
    pub fn edge_points(&self, edge_id: usize) -> [&Point; 2] {
        [
            &self.nodes[self.edges[edge_id].nodes[0]].coords,
            &self.nodes[self.edges[edge_id].nodes[1]].coords,
        ]
    }

    /// Iterate over the `Elem`s without children
    pub fn active_elems(&self) -> impl Iterator<Item = &Elem> + '_ {
        self.elems.iter().filter(|elem| !elem.has_children())
    }

    /// Get a list of an [`Elem`]s descendant's IDs
    pub fn descendant_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, MeshError> {
        if elem_id >= self.elems.len() {
            Err(MeshError::ElemDoesntExist(elem_id))
        } else {
            let mut descendants = Vec::new();
            self.rec_descendant_elems(elem_id, include_starting_elem, &mut descendants);
            Ok(descendants)
        }
    }

    fn rec_descendant_elems(&self, elem_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(elem_id);
        }
        if let Some(child_elem_ids) = self.elems[elem_id].child_ids() {
            for cei in child_elem_ids {
                self.rec_descendant_elems(cei, true, desc);
            }
        }
    }

    /// Get the IDs of an [`Elem`]s active descendants (itself if it is active)
    pub fn active_descendant_elems(&self, elem_id: usize) -> Result<Vec<usize>, MeshError> {
        Ok(self
            .descendant_elems(elem_id, true)?
            .into_iter()
            .filter(|id| !self.elems[*id].has_children())
            .collect())
    }

    /// Determine if this Elem can be h-refined
    /// * returns false if the Elem already has children
    /// * returns false if any of the Edges split by the refinement would produce children shorter than [MIN_EDGE_LENGTH]
    /// * returns an `Err` if the Mesh doesn't have `elem_id`
    pub fn elem_is_h_refineable(&self, elem_id: usize, refinement: HRef) -> Result<bool, HRefError> {
        if elem_id >= self.elems.len() {
            Err(HRefError::ElemDoesntExist(elem_id))
        } else {
            let elem = &self.elems[elem_id];
            Ok(!elem.has_children()
                && refinement
                    .split_edges()
                    .iter()
                    .all(|edge_idx| self.edges[elem.edges[*edge_idx]].length / 2.0 >= MIN_EDGE_LENGTH))
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Hanging nodes and Degrees of Freedom
    // ----------------------------------------------------------------------------------------------------

    fn has_active_side_elem(&self, edge_id: usize, side: Option<usize>) -> bool {
        self.edges[edge_id]
            .connected_elems()
            .filter(|(s, _)| side.map_or(true, |side| *s == side))
            .any(|(_, elem_id)| !self.elems[elem_id].has_children())
    }

    fn rec_edge_ancestors(&self, edge_id: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.edges[edge_id].parent_id(), move |id| {
            self.edges[*id].parent_id()
        })
    }

    /// An Edge carries Degrees of Freedom if an active `Elem` uses it as a full side and no
    /// larger Edge containing it is used as a full side by an active `Elem`.
    pub fn edge_is_unconstrained(&self, edge_id: usize) -> bool {
        self.has_active_side_elem(edge_id, None)
            && !self
                .rec_edge_ancestors(edge_id)
                .any(|ancestor_id| self.has_active_side_elem(ancestor_id, None))
    }

    /// Polynomial order of an unconstrained Edge following the minimum rule: the smallest directional
    /// order among the active `Elem`s touching any part of it.
    fn edge_order(&self, edge_id: usize) -> u8 {
        let dir = self.edges[edge_id].dir;
        let mut descendants = Vec::new();
        self.rec_descendant_edges(edge_id, true, &mut descendants);

        descendants
            .iter()
            .flat_map(|id| self.edges[*id].connected_elems())
            .filter(|(_, elem_id)| !self.elems[*elem_id].has_children())
            .map(|(_, elem_id)| match dir {
                ParaDir::U => self.elems[elem_id].poly_orders.ni,
                ParaDir::V => self.elems[elem_id].poly_orders.nj,
            })
            .min()
            .unwrap_or(1)
    }

    fn rec_descendant_edges(&self, edge_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(edge_id);
        }
        if let Some(child_edge_ids) = self.edges[edge_id].child_ids() {
            for cei in child_edge_ids {
                self.rec_descendant_edges(cei, true, desc);
            }
        }
    }

    /// A Node is hanging if it sits inside an Edge (or part of an Edge) used as a full side by an active `Elem`
    pub fn hanging_nodes(&self) -> Vec<usize> {
        self.edges
            .iter()
            .filter_map(|edge| edge.child_node_id().map(|node_id| (edge.id, node_id)))
            .filter(|(edge_id, _)| {
                self.has_active_side_elem(*edge_id, None)
                    || self
                        .rec_edge_ancestors(*edge_id)
                        .any(|ancestor_id| self.has_active_side_elem(ancestor_id, None))
            })
            .map(|(_, node_id)| node_id)
            .collect()
    }

    /// Number of H1-conforming Degrees of Freedom (hierarchic tensor-product basis, minimum rule on Edges)
    ///
    /// ```
    /// use hp_adapt::domain::mesh::{Mesh, h_refinement::HRef};
    ///
    /// let mut mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 1).unwrap();
    /// assert_eq!(mesh.num_h1_dofs(), 6);
    ///
    /// mesh.set_global_expansion_orders([2, 2]).unwrap();
    /// assert_eq!(mesh.num_h1_dofs(), 6 + 7 + 2);
    ///
    /// // the new Node on the shared Edge is hanging
    /// mesh.h_refine_elems(vec![0], HRef::T).unwrap();
    /// assert_eq!(mesh.hanging_nodes().len(), 1);
    /// ```
    pub fn num_h1_dofs(&self) -> usize {
        let num_hanging = self.hanging_nodes().len();
        let vertex_dofs = self.nodes.len() - num_hanging;

        let edge_dofs: usize = self
            .edges
            .iter()
            .filter(|edge| self.edge_is_unconstrained(edge.id))
            .map(|edge| self.edge_order(edge.id).saturating_sub(1) as usize)
            .sum();

        let bubble_dofs: usize = self
            .active_elems()
            .map(|elem| {
                (elem.poly_orders.ni.saturating_sub(1) as usize)
                    * (elem.poly_orders.nj.saturating_sub(1) as usize)
            })
            .sum();

        vertex_dofs + edge_dofs + bubble_dofs
    }

    /// The level of the deepest hanging Node that an h-Refinement of an `Elem` would create (0 if none)
    ///
    /// A new Node on an Edge shared with an active neighbor is on level 1. If the Edge itself is
    /// already part of a larger Edge used by an active neighbor, the level grows by one for each step
    /// up the Edge tree.
    pub fn hanging_level(&self, elem_id: usize, refinement: HRef) -> Result<usize, HRefError> {
        if elem_id >= self.elems.len() {
            return Err(HRefError::ElemDoesntExist(elem_id));
        }
        let elem = &self.elems[elem_id];

        Ok(refinement
            .split_edges()
            .iter()
            .map(|edge_index| {
                let edge_id = elem.edges[*edge_index];
                if self.edges[edge_id].has_children() {
                    return 0;
                }

                let other_side = 1 - Edge::side_for_edge_index(*edge_index);
                std::iter::once(edge_id)
                    .chain(self.rec_edge_ancestors(edge_id))
                    .position(|id| self.has_active_side_elem(id, Some(other_side)))
                    .map_or(0, |steps| steps + 1)
            })
            .max()
            .unwrap_or(0))
    }

    // ----------------------------------------------------------------------------------------------------
    // h-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Apply an [HRef] to all active [Elem]s in the Mesh that are eligible for h-refinement
    pub fn global_h_refinement(&mut self, refinement: HRef) -> Result<(), HRefError> {
        let mut refinements = Vec::new();
        for elem in self.active_elems() {
            if self.elem_is_h_refineable(elem.id, refinement)? {
                refinements.push((elem.id, refinement));
            }
        }
        self.execute_h_refinements(refinements)
    }

    /// Apply an [HRef] to a list of [Elem]s by their ID
    pub fn h_refine_elems(&mut self, elems: Vec<usize>, refinement: HRef) -> Result<(), HRefError> {
        self.execute_h_refinements(elems.iter().map(|elem_id| (*elem_id, refinement)).collect())
    }

    /// Execute a series of [HRef]s on [Elem]s specified by their id
    pub fn execute_h_refinements(
        &mut self,
        refinements: Vec<(usize, HRef)>,
    ) -> Result<(), HRefError> {
        let mut refinements_map: BTreeMap<usize, HRef> = BTreeMap::new();
        for (elem_id, h_ref) in refinements {
            if elem_id >= self.elems.len() {
                return Err(HRefError::ElemDoesntExist(elem_id));
            }
            if refinements_map.insert(elem_id, h_ref).is_some() {
                return Err(HRefError::DoubleRefinement(elem_id));
            }
        }

        let mut elem_id_tracker = self.elems.len();
        let mut node_id_tracker = IdTracker::new(self.nodes.len());
        let mut edge_id_tracker = IdTracker::new(self.edges.len());

        for (elem_id, refinement) in refinements_map {
            if !self.elem_is_h_refineable(elem_id, refinement)? {
                return Err(match self.elems[elem_id].has_children() {
                    true => HRefError::ElemHasChildren(elem_id),
                    false => HRefError::MinEdgeLength(self.elems[elem_id].edges[refinement.split_edges()[0]]),
                });
            }

            let new_uninitialized_elems =
                self.elems[elem_id].h_refine(refinement, &mut elem_id_tracker)?;

            let new_elems = match refinement {
                HRef::T => self.execute_t_refinement(
                    new_uninitialized_elems,
                    elem_id,
                    &mut node_id_tracker,
                    &mut edge_id_tracker,
                )?,
                HRef::U => self.execute_u_refinement(
                    new_uninitialized_elems,
                    elem_id,
                    &mut node_id_tracker,
                    &mut edge_id_tracker,
                )?,
                HRef::V => self.execute_v_refinement(
                    new_uninitialized_elems,
                    elem_id,
                    &mut node_id_tracker,
                    &mut edge_id_tracker,
                )?,
            };

            self.elems.extend(new_elems);
        }

        Ok(())
    }

    fn execute_t_refinement(
        &mut self,
        mut new_elems: Vec<ElemUninit>,
        parent_elem_id: usize,
        node_id_tracker: &mut IdTracker,
        edge_id_tracker: &mut IdTracker,
    ) -> Result<Vec<Elem>, HRefError> {
        // create a new node in the center of the parent Elem
        let parent_elem_points = self.elem_points(parent_elem_id);
        let center_node_id = node_id_tracker.next_id();
        let center_point = Point::between(parent_elem_points[0], parent_elem_points[3]);

        self.nodes
            .push(Node::new(center_node_id, center_point, false));

        // connect the child Elems to the center node and the parents nodes
        for (elem_idx, elem_uninit) in new_elems.iter_mut().enumerate() {
            elem_uninit.set_node(3 - elem_idx, center_node_id);
            elem_uninit.set_node(elem_idx, self.elems[parent_elem_id].nodes[elem_idx]);
        }

        // refine each parent Edge (if needed) and connect the child Elems to its descendants,
        // then connect the shared node to the center node with a new internal Edge
        for (edge_index, adj_child_elem_indices, shared_node_indices, internal_edge_idx) in [
            (0, [0, 1], [1, 0], [3, 2]),
            (1, [2, 3], [3, 2], [3, 2]),
            (2, [0, 2], [2, 0], [1, 0]),
            (3, [1, 3], [3, 1], [1, 0]),
        ] {
            let (child_edge_ids, shared_node_id) = self.h_refine_edge_if_needed(
                self.elems[parent_elem_id].edges[edge_index],
                node_id_tracker,
                edge_id_tracker,
            )?;

            new_elems[adj_child_elem_indices[0]].set_edge(edge_index, child_edge_ids[0]);
            new_elems[adj_child_elem_indices[1]].set_edge(edge_index, child_edge_ids[1]);

            new_elems[adj_child_elem_indices[0]].set_node(shared_node_indices[0], shared_node_id);
            new_elems[adj_child_elem_indices[1]].set_node(shared_node_indices[1], shared_node_id);

            let new_edge_id = self.new_edge_between_nodes(
                [shared_node_id, center_node_id],
                edge_id_tracker,
                parent_elem_id,
            )?;

            new_elems[adj_child_elem_indices[0]].set_edge(internal_edge_idx[0], new_edge_id);
            new_elems[adj_child_elem_indices[1]].set_edge(internal_edge_idx[1], new_edge_id);
        }

        self.upgrade_uninit_elems(new_elems)
    }

    fn execute_u_refinement(
        &mut self,
        new_elems: Vec<ElemUninit>,
        parent_elem_id: usize,
        node_id_tracker: &mut IdTracker,
        edge_id_tracker: &mut IdTracker,
    ) -> Result<Vec<Elem>, HRefError> {
        self.execute_bisection(
            new_elems,
            parent_elem_id,
            [(0, [1, 0], [0, 1]), (1, [3, 2], [2, 3])],
            [3, 2],
            [2, 3],
            node_id_tracker,
            edge_id_tracker,
        )
    }

    fn execute_v_refinement(
        &mut self,
        new_elems: Vec<ElemUninit>,
        parent_elem_id: usize,
        node_id_tracker: &mut IdTracker,
        edge_id_tracker: &mut IdTracker,
    ) -> Result<Vec<Elem>, HRefError> {
        self.execute_bisection(
            new_elems,
            parent_elem_id,
            [(2, [2, 0], [0, 2]), (3, [3, 1], [1, 3])],
            [1, 0],
            [0, 1],
            node_id_tracker,
            edge_id_tracker,
        )
    }

    /// Shared implementation of U- and V-type refinements
    ///
    /// * `split`: (parent edge index, shared node indices, outer node indices) for both split Edges
    /// * `internal_edge_idx`: index of the new internal Edge on each child
    /// * `kept_edge_idx`: index of the unsplit parent Edge inherited by each child
    #[allow(clippy::too_many_arguments)]
    fn execute_bisection(
        &mut self,
        mut new_elems: Vec<ElemUninit>,
        parent_elem_id: usize,
        split: [(usize, [usize; 2], [usize; 2]); 2],
        internal_edge_idx: [usize; 2],
        kept_edge_idx: [usize; 2],
        node_id_tracker: &mut IdTracker,
        edge_id_tracker: &mut IdTracker,
    ) -> Result<Vec<Elem>, HRefError> {
        let mut outer_node_ids = [0; 2];

        for (split_idx, (edge_index, shared_node_indices, outer_node_indices)) in
            split.into_iter().enumerate()
        {
            let (child_edge_ids, shared_node_id) = self.h_refine_edge_if_needed(
                self.elems[parent_elem_id].edges[edge_index],
                node_id_tracker,
                edge_id_tracker,
            )?;

            outer_node_ids[split_idx] = shared_node_id;

            new_elems[0].set_edge(edge_index, child_edge_ids[0]);
            new_elems[1].set_edge(edge_index, child_edge_ids[1]);
            new_elems[0].set_node(shared_node_indices[0], shared_node_id);
            new_elems[1].set_node(shared_node_indices[1], shared_node_id);

            new_elems[0].set_node(
                outer_node_indices[0],
                self.elems[parent_elem_id].nodes[outer_node_indices[0]],
            );
            new_elems[1].set_node(
                outer_node_indices[1],
                self.elems[parent_elem_id].nodes[outer_node_indices[1]],
            );
        }

        let new_edge_id =
            self.new_edge_between_nodes(outer_node_ids, edge_id_tracker, parent_elem_id)?;

        new_elems[0].set_edge(internal_edge_idx[0], new_edge_id);
        new_elems[1].set_edge(internal_edge_idx[1], new_edge_id);

        new_elems[0].set_edge(kept_edge_idx[0], self.elems[parent_elem_id].edges[kept_edge_idx[0]]);
        new_elems[1].set_edge(kept_edge_idx[1], self.elems[parent_elem_id].edges[kept_edge_idx[1]]);

        self.upgrade_uninit_elems(new_elems)
    }

    fn h_refine_edge_if_needed(
        &mut self,
        parent_edge_id: usize,
        node_id_tracker: &mut IdTracker,
        edge_id_tracker: &mut IdTracker,
    ) -> Result<(SmallVec<[usize; 2]>, usize), HRefError> {
        if let (Some(child_ids), Some(child_node_id)) = (
            self.edges[parent_edge_id].child_ids(),
            self.edges[parent_edge_id].child_node_id(),
        ) {
            return Ok((SmallVec::from(child_ids), child_node_id));
        }

        let new_edge_ids = edge_id_tracker.next_two_ids();
        let new_node_id = node_id_tracker.next_id();

        let new_edges = self.edges[parent_edge_id].h_refine(new_edge_ids, new_node_id)?;
        self.edges.extend(new_edges);

        let parent_edge_points = self.edge_points(parent_edge_id);
        let node_coords = Point::between(parent_edge_points[0], parent_edge_points[1]);

        self.nodes.push(Node::new(
            new_node_id,
            node_coords,
            self.edges[parent_edge_id].boundary,
        ));

        Ok((SmallVec::from(new_edge_ids), new_node_id))
    }

    fn new_edge_between_nodes(
        &mut self,
        node_ids: [usize; 2],
        edge_id_tracker: &mut IdTracker,
        parent_elem_id: usize,
    ) -> Result<usize, HRefError> {
        let node_0 = &self.nodes[node_ids[0]];
        let node_1 = &self.nodes[node_ids[1]];

        let ordered_nodes = match self.elems[parent_elem_id]
            .element
            .order_points(&node_0.coords, &node_1.coords)
        {
            Ordering::Equal => return Err(HRefError::EdgeOnEqualPoints(parent_elem_id)),
            Ordering::Less => [node_0, node_1],
            Ordering::Greater => [node_1, node_0],
        };

        let new_edge_id = edge_id_tracker.next_id();
        let new_edge = Edge::new(new_edge_id, ordered_nodes, false);
        self.edges.push(new_edge);

        Ok(new_edge_id)
    }

    fn upgrade_uninit_elems(
        &mut self,
        elems_uninit: Vec<ElemUninit>,
    ) -> Result<Vec<Elem>, HRefError> {
        let mut elems = Vec::with_capacity(4);
        for elem_uninit in elems_uninit {
            elems.push(elem_uninit.into_elem()?);
        }

        for elem in elems.iter() {
            for edge_id in elem.edges {
                self.edges[edge_id].connect_elem(elem);
            }
        }

        Ok(elems)
    }

    // ----------------------------------------------------------------------------------------------------
    // Derefinement
    // ----------------------------------------------------------------------------------------------------

    /// The refinement which produced the children of an `Elem` (`None` if it has none)
    pub fn elem_refinement(&self, elem_id: usize) -> Option<HRef> {
        let first_child = *self.elems.get(elem_id)?.child_ids()?.first()?;
        self.elems[first_child]
            .loc_stack()
            .last()
            .map(|(_, loc)| loc.refinement())
    }

    /// A copy of the initial, unrefined Mesh (all expansion orders are reset to 1)
    pub fn base_mesh(&self) -> Result<Self, MeshError> {
        let root_elems = &self.elems[..self.elements.len()];
        let num_base_nodes = root_elems
            .iter()
            .flat_map(|elem| elem.nodes)
            .max()
            .map_or(0, |max_id| max_id + 1);

        Self::from_parts(
            self.nodes[..num_base_nodes].iter().map(|node| node.coords).collect(),
            root_elems.iter().map(|elem| elem.nodes).collect(),
            self.elements.iter().map(|element| element.marker).collect(),
        )
    }

    /// Remove the last layer of h-refinement: every `Elem` whose children are all active becomes active again
    ///
    /// Returns the coarsened Mesh and the map from old to new `Elem` IDs of the surviving `Elem`s.
    /// Surviving active `Elem`s keep their expansion orders; re-activated `Elem`s take the
    /// largest orders of their former children.
    pub fn coarsened(&self) -> Result<(Self, BTreeMap<usize, usize>), MeshError> {
        let keeps_children = |elem: &Elem| match elem.child_ids() {
            Some(children) => children.iter().any(|c| self.elems[*c].has_children()),
            None => false,
        };

        let mut mesh = self.base_mesh()?;
        let mut new_ids: BTreeMap<usize, usize> = (0..self.elements.len()).map(|id| (id, id)).collect();

        // parents always precede their children
        for elem in self.elems.iter() {
            let new_id = match new_ids.get(&elem.id) {
                Some(new_id) => *new_id,
                None => continue,
            };

            if keeps_children(elem) {
                let refinement = self
                    .elem_refinement(elem.id)
                    .ok_or(MeshError::ElemDoesntExist(elem.id))?;
                mesh.execute_h_refinements(vec![(new_id, refinement)])?;

                if let (Some(old_children), Some(new_children)) =
                    (elem.child_ids(), mesh.elems[new_id].child_ids())
                {
                    new_ids.extend(old_children.into_iter().zip(new_children));
                }
            } else {
                let orders = match elem.child_ids() {
                    Some(children) => children.iter().fold(PolyOrders::iso(1), |acc, c| {
                        let [ni, nj] = self.elems[*c].poly_orders.max_with([acc.ni, acc.nj]);
                        PolyOrders::from(ni, nj)
                    }),
                    None => elem.poly_orders,
                };
                mesh.elems[new_id].poly_orders = orders;
            }
        }

        Ok((mesh, new_ids))
    }

    // ----------------------------------------------------------------------------------------------------
    // Expansion orders
    // ----------------------------------------------------------------------------------------------------

    /// Set the expansion orders on all [Elem]s
    pub fn set_global_expansion_orders(&mut self, orders: [u8; 2]) -> Result<(), PRefError> {
        self.set_expansion_orders(self.elems.iter().map(|elem| (elem.id, orders)).collect())
    }

    pub fn set_expansion_orders(
        &mut self,
        poly_orders: Vec<(usize, [u8; 2])>,
    ) -> Result<(), PRefError> {
        let mut poly_orders_map: BTreeMap<usize, [u8; 2]> = BTreeMap::new();
        for (elem_id, orders) in poly_orders {
            if elem_id >= self.elems.len() {
                return Err(PRefError::ElemDoesntExist(elem_id));
            }
            if poly_orders_map.insert(elem_id, orders).is_some() {
                return Err(PRefError::DoubleRefinement(elem_id));
            }
        }

        for (elem_id, orders) in poly_orders_map {
            self.elems[elem_id].poly_orders.set(orders)?;
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------------------------------
// Mesh construction from JSON Utility functions
// ----------------------------------------------------------------------------------------------------

/*
    edge - node_pair - side relationships

    edge 0 : [node_0, node_1], top
    edge 1 : [node_2, node_3], bottom,
    edge 2 : [node_0, node_2], right,
    edge 3 : [node_1, node_3], left,
*/
const EDGE_IDX_DEFS: [([usize; 2], usize); 4] =
    [([0, 1], 1), ([2, 3], 0), ([0, 2], 1), ([1, 3], 0)];

fn parse_element_information(
    mesh_file_json: &JsonValue,
) -> Result<(Vec<usize>, Vec<[usize; 4]>), MeshError> {
    if !mesh_file_json["Elements"].is_array() {
        return Err(format_err("Elements must be an Array!"));
    }

    let num_nodes = mesh_file_json["Nodes"].members().count();

    mesh_file_json["Elements"]
        .members()
        .map(|json_element| {
            if !json_element["node_ids"].is_array()
                || json_element["node_ids"].members().count() != 4
            {
                return Err(format_err("Elements must have an Array of 4 node_ids!"));
            }

            let mut node_ids = [0; 4];
            for (idx, node_id_json) in json_element["node_ids"].members().enumerate() {
                node_ids[idx] = node_id_json
                    .as_usize()
                    .filter(|node_id| *node_id < num_nodes)
                    .ok_or_else(|| {
                        format_err("node_ids must be positive integers smaller than the number of Nodes!")
                    })?;
            }
            if has_duplicates(&node_ids) {
                return Err(format_err("Element's node_ids should have 4 unique values!"));
            }

            let marker = if json_element["marker"].is_null() {
                0
            } else {
                json_element["marker"]
                    .as_usize()
                    .ok_or_else(|| format_err("Element markers must be positive integers!"))?
            };

            Ok((marker, node_ids))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|parsed| parsed.into_iter().unzip())
}

fn parse_node_information(mesh_file_json: &JsonValue) -> Result<Vec<Point>, MeshError> {
    if !mesh_file_json["Nodes"].is_array() {
        return Err(format_err("Nodes must be an Array!"));
    }

    let node_points = mesh_file_json["Nodes"]
        .members()
        .map(|json_node_point| {
            if !json_node_point.is_array() || json_node_point.members().count() != 2 {
                return Err(format_err("nodes must be arrays of length 2!"));
            }

            match (json_node_point[0].as_f64(), json_node_point[1].as_f64()) {
                (Some(x), Some(y)) => Ok(Point::new(x, y)),
                _ => Err(format_err("nodes must be composed of numerical values!")),
            }
        })
        .collect::<Result<Vec<Point>, _>>()?;

    if has_duplicates(&node_points) {
        return Err(format_err("All Nodes must be at unique locations!"));
    }

    Ok(node_points)
}

fn has_duplicates<T>(values: &[T]) -> bool
where
    T: PartialEq,
{
    for (i, val) in values.iter().enumerate() {
        for val_cmp in values.iter().skip(i + 1) {
            if val == val_cmp {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESH_A: &str = r#"{
        "Elements": [
            { "marker": 0, "node_ids": [0, 1, 3, 4] },
            { "marker": 1, "node_ids": [1, 2, 4, 5] },
            { "node_ids": [3, 4, 6, 7] },
            { "node_ids": [4, 5, 7, 8] }
        ],
        "Nodes": [
            [0.0, 0.0], [1.0, 0.0], [2.0, 0.0],
            [0.0, 0.5], [1.0, 0.5], [2.0, 0.5],
            [0.0, 1.0], [1.0, 1.0], [2.0, 1.0]
        ]
    }"#;

    const MESH_A_POINTS_X: [[f64; 4]; 4] = [
        [0.0, 1.0, 0.0, 1.0],
        [1.0, 2.0, 1.0, 2.0],
        [0.0, 1.0, 0.0, 1.0],
        [1.0, 2.0, 1.0, 2.0],
    ];

    const MESH_A_POINTS_Y: [[f64; 4]; 4] = [
        [0.0, 0.0, 0.5, 0.5],
        [0.0, 0.0, 0.5, 0.5],
        [0.5, 0.5, 1.0, 1.0],
        [0.5, 0.5, 1.0, 1.0],
    ];

    const MESH_A_NEIGHBORS: [[Option<usize>; 4]; 4] = [
        [None, Some(2), None, Some(1)],
        [None, Some(3), Some(0), None],
        [Some(0), None, None, Some(3)],
        [Some(1), None, Some(2), None],
    ];

    #[test]
    fn mesh_from_json() {
        let mesh_a = Mesh::from_json_str(MESH_A).unwrap();
        assert_eq!(mesh_a.elements[1].marker, 1);
        assert_eq!(mesh_a.elements[2].marker, 0);

        for (elem_id, elem) in mesh_a.elems.iter().enumerate() {
            for n_idx in 0..4 {
                let p = &mesh_a.nodes[elem.nodes[n_idx]].coords;

                assert!((p.x - MESH_A_POINTS_X[elem_id][n_idx]).abs() < 1e-14);
                assert!((p.y - MESH_A_POINTS_Y[elem_id][n_idx]).abs() < 1e-14);

                let edge = &mesh_a.edges[elem.edges[n_idx]];
                let other_side = 1 - Edge::side_for_edge_index(n_idx);
                let neighbor = edge.side_elems(other_side).first().copied();
                assert_eq!(neighbor, MESH_A_NEIGHBORS[elem_id][n_idx]);
                assert_eq!(edge.boundary, neighbor.is_none());
            }
        }

        assert!(!mesh_a.nodes[4].boundary);
        assert!(mesh_a.nodes[3].boundary);
    }

    #[test]
    fn rectangle_matches_json() {
        let rect = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 2).unwrap();
        let from_json = Mesh::from_json_str(MESH_A).unwrap();

        assert_eq!(rect.edges.len(), from_json.edges.len());
        for (a, b) in rect.elems.iter().zip(from_json.elems.iter()) {
            assert_eq!(a.cell(), b.cell());
        }
        assert_eq!(rect.num_h1_dofs(), 9);
    }

    #[test]
    fn bad_mesh_files() {
        assert!(matches!(
            Mesh::from_json_str("{ not json"),
            Err(MeshError::Json(_))
        ));
        assert!(matches!(
            Mesh::from_json_str(r#"{ "Elements": [{ "node_ids": [0, 1, 2] }], "Nodes": [] }"#),
            Err(MeshError::Format(_))
        ));
        assert!(matches!(
            Mesh::from_file("./no_such_mesh_file.json"),
            Err(MeshError::Io(_))
        ));
    }

    #[test]
    fn basic_h_refinements() {
        let mut mesh = Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 3, 1).unwrap();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        mesh.h_refine_elems(vec![1], HRef::U).unwrap();
        mesh.h_refine_elems(vec![2], HRef::V).unwrap();

        assert_eq!(mesh.active_elems().count(), 8);
        let area: f64 = mesh.active_elems().map(|elem| elem.cell().measure()).sum();
        assert!((area - 1.0).abs() < 1e-14);

        // the Edge between Elems 0 and 1 was split once and shared
        assert_eq!(mesh.descendant_elems(0, false).unwrap(), vec![3, 4, 5, 6]);
        assert_eq!(mesh.elems[6].parent_id(), Some(0));
    }

    #[test]
    fn hanging_nodes_and_dofs() {
        let mut mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 1).unwrap();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();

        // 5 new vertices, one of which hangs on the Edge shared with Elem 1
        assert_eq!(mesh.nodes.len(), 11);
        assert_eq!(mesh.hanging_nodes().len(), 1);
        assert_eq!(mesh.num_h1_dofs(), 10);

        // refining the neighbor resolves the hanging node
        mesh.h_refine_elems(vec![1], HRef::V).unwrap();
        assert_eq!(mesh.nodes.len(), 12);
        assert!(mesh.hanging_nodes().is_empty());
        assert_eq!(mesh.num_h1_dofs(), 12);

        mesh.set_global_expansion_orders([2, 2]).unwrap();
        // 12 vertices + 17 unconstrained edges + 6 bubbles
        assert_eq!(mesh.num_h1_dofs(), 12 + 17 + 6);
    }

    #[test]
    fn minimum_rule_on_constrained_edges() {
        let mut mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 1).unwrap();
        mesh.set_expansion_orders(vec![(0, [3, 3]), (1, [2, 2])]).unwrap();

        // shared V-directed Edge takes min(3, 2) = 2
        // vertices: 6, edges: 3 * 2 (Elem 0 outer) + 3 * 1 (Elem 1 outer) + 1 (shared), bubbles: 4 + 1
        assert_eq!(mesh.num_h1_dofs(), 6 + 6 + 3 + 1 + 5);
    }

    #[test]
    fn hanging_levels() {
        let mut mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 1).unwrap();
        assert_eq!(mesh.hanging_level(0, HRef::T).unwrap(), 1);
        assert_eq!(mesh.hanging_level(0, HRef::V).unwrap(), 1);
        assert_eq!(mesh.hanging_level(0, HRef::U).unwrap(), 0);

        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        // Elem 3 (SE child) borders Elem 1 along an Edge constrained by Elem 1's full side
        assert_eq!(mesh.hanging_level(3, HRef::T).unwrap(), 2);
        assert_eq!(mesh.hanging_level(3, HRef::U).unwrap(), 1);
        // Elem 1 sees an already split Edge
        assert_eq!(mesh.hanging_level(1, HRef::V).unwrap(), 0);
        assert_eq!(
            mesh.hanging_level(42, HRef::T).unwrap_err(),
            HRefError::ElemDoesntExist(42)
        );
    }

    #[cfg(feature = "json_export")]
    #[test]
    fn refined_mesh_to_file() {
        let mut mesh = Mesh::from_json_str(MESH_A).unwrap();
        mesh.set_expansion_orders(vec![(0, [4, 4]), (1, [3, 4])]).unwrap();
        mesh.execute_h_refinements(vec![(0, HRef::T), (1, HRef::U), (2, HRef::V)])
            .unwrap();

        let path = std::env::temp_dir().join("hp_adapt_mesh_refined.json");
        mesh.export_to_json(path.to_string_lossy()).unwrap();

        let exported = json::parse(&read_to_string(&path).unwrap()).unwrap();
        assert_eq!(exported["Elems"].members().count(), mesh.elems.len());
        assert_eq!(exported["Elems"][4]["expansion"]["u"], 4);
    }

    #[test]
    fn h_refine_errors() {
        let mut mesh = Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 1, 1).unwrap();
        assert_eq!(
            mesh.h_refine_elems(vec![0, 1], HRef::T).unwrap_err(),
            HRefError::ElemDoesntExist(1)
        );
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        assert_eq!(
            mesh.h_refine_elems(vec![0], HRef::T).unwrap_err(),
            HRefError::ElemHasChildren(0)
        );
        assert_eq!(
            mesh.execute_h_refinements(vec![(1, HRef::T), (1, HRef::U)])
                .unwrap_err(),
            HRefError::DoubleRefinement(1)
        );
    }

    #[test]
    #[should_panic]
    fn minimum_edge_length_exceeded() {
        let mut mesh = Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 1, 1).unwrap();

        // repeatedly refine the bottom left cell
        for _ in 0..18 {
            let corner_elem = mesh
                .active_elems()
                .find(|elem| elem.nodes[0] == 0)
                .map(|elem| elem.id)
                .unwrap();
            mesh.h_refine_elems(vec![corner_elem], HRef::T).unwrap();
        }
    }

    #[test]
    fn expansion_orders() {
        let mut mesh = Mesh::rectangle([0.0, 3.0], [0.0, 1.0], 3, 1).unwrap();
        mesh.set_expansion_orders(vec![(0, [3, 3]), (1, [3, 2]), (2, [2, 3])])
            .unwrap();

        assert_eq!(mesh.elems[1].poly_orders, PolyOrders::from(3, 2));
        assert_eq!(mesh.elems[2].poly_orders, PolyOrders::from(2, 3));

        assert_eq!(
            mesh.set_expansion_orders(vec![(0, [1, 1]), (0, [2, 2])]).unwrap_err(),
            PRefError::DoubleRefinement(0)
        );
        assert_eq!(
            mesh.set_expansion_orders(vec![(2, [0, 1])]).unwrap_err(),
            PRefError::NegExpansion
        );
        assert_eq!(
            mesh.set_expansion_orders(vec![(7, [1, 1])]).unwrap_err(),
            PRefError::ElemDoesntExist(7)
        );
    }

    #[test]
    fn coarsening_keeps_inner_refinements() {
        let mut mesh = Mesh::from_json_str(MESH_A).unwrap();
        mesh.execute_h_refinements(vec![(0, HRef::U), (3, HRef::V)]).unwrap();
        mesh.h_refine_elems(vec![4], HRef::T).unwrap();
        assert_eq!(mesh.elem_refinement(0), Some(HRef::U));
        assert_eq!(mesh.elem_refinement(3), Some(HRef::V));
        assert_eq!(mesh.elem_refinement(1), None);

        let (coarse, new_ids) = mesh.coarsened().unwrap();
        // Elem 3 loses its children, Elem 4 its T refinement, Elem 0 keeps its U refinement
        assert_eq!(coarse.active_elems().count(), 5);
        assert_eq!(coarse.elem_refinement(0), Some(HRef::U));
        assert_eq!(coarse.elems[new_ids[&4]].cell(), mesh.elems[4].cell());
        assert!(!new_ids.contains_key(&8));
        assert_eq!(coarse.elements[1].marker, 1);

        let base = mesh.base_mesh().unwrap();
        assert_eq!(base.elems.len(), 4);
        assert_eq!(base.nodes.len(), 9);
        assert_eq!(base.num_h1_dofs(), 9);
    }
}
