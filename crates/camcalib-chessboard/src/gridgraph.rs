use crate::geom::{angle_diff_abs, axis_vec_diff, is_orthogonal};
use crate::params::GridGraphParams;
use camcalib_core::{Corner, GridCoords};
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    fn slot(self) -> usize {
        match self {
            NeighborDirection::Right => 0,
            NeighborDirection::Left => 1,
            NeighborDirection::Up => 2,
            NeighborDirection::Down => 3,
        }
    }

    fn step(self) -> (i32, i32) {
        match self {
            NeighborDirection::Right => (1, 0),
            NeighborDirection::Left => (-1, 0),
            NeighborDirection::Up => (0, -1),
            NeighborDirection::Down => (0, 1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

/// Global grid axes in the image; `u` labels Right/Left, `v` Down/Up.
#[derive(Clone, Copy, Debug)]
pub struct GridAxes {
    pub u: Vector2<f32>,
    pub v: Vector2<f32>,
}

impl GridAxes {
    fn classify(&self, e: &Vector2<f32>) -> NeighborDirection {
        let (du, dv) = (e.dot(&self.u), e.dot(&self.v));
        if du.abs() >= dv.abs() {
            if du >= 0.0 {
                NeighborDirection::Right
            } else {
                NeighborDirection::Left
            }
        } else if dv >= 0.0 {
            NeighborDirection::Down
        } else {
            NeighborDirection::Up
        }
    }
}

fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
    spacing: [f32; 2],
    axes: &GridAxes,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();

    // 1. Adjacent corners have swapped colours, so their diagonals are orthogonal.
    if !is_orthogonal(corner.orientation, neighbor.orientation, tol) {
        return None;
    }

    // 2. Distance within the adaptive spacing window.
    let vec_to_neighbor = neighbor.position - corner.position;
    let distance = vec_to_neighbor.norm();
    if distance < spacing[0] || distance > spacing[1] {
        return None;
    }

    // 3. The edge runs at ~45° to each corner's diagonal.
    let edge_angle = vec_to_neighbor.y.atan2(vec_to_neighbor.x);
    let expected = std::f32::consts::FRAC_PI_4;
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - expected).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - expected).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    let score_orientation = (std::f32::consts::FRAC_PI_2
        - angle_diff_abs(corner.orientation, neighbor.orientation))
    .abs();
    // prefer the nearest candidate along a direction
    let score_distance = distance / spacing[1];

    Some(NodeNeighbor {
        direction: axes.classify(&vec_to_neighbor),
        index: neighbor_index,
        distance,
        score: score_corner + score_neighbor + score_orientation + score_distance,
    })
}

/// Keep at most one neighbor per direction, choosing the lowest-score candidate.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates.into_iter() {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

/// Median distance from each corner to its nearest other corner.
pub fn median_nearest_distance(corners: &[Corner]) -> Option<f32> {
    if corners.len() < 2 {
        return None;
    }
    let coords = corners
        .iter()
        .map(|c| [c.position.x, c.position.y])
        .collect::<Vec<_>>();
    let tree: KdTree<f32, 2> = (&coords).into();
    let mut nearest: Vec<f32> = coords
        .iter()
        .filter_map(|q| {
            tree.nearest_n::<SquaredEuclidean>(q, 2)
                .into_iter()
                .map(|nn| nn.distance)
                .find(|&d| d > 0.0)
                .map(f32::sqrt)
        })
        .collect();
    if nearest.is_empty() {
        return None;
    }
    nearest.sort_by(f32::total_cmp);
    Some(nearest[nearest.len() / 2])
}

pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>, // For each node, list of neighbors
}

impl GridGraph {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(corners, params, axes), fields(corners = corners.len()))
    )]
    pub fn new(
        corners: &[Corner],
        params: &GridGraphParams,
        spacing: [f32; 2],
        axes: &GridAxes,
    ) -> Self {
        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let spacing = [
            spacing[0].max(params.min_spacing_pix),
            spacing[1].min(params.max_spacing_pix),
        ];
        let k = params.k_neighbors.clamp(1, corners.len().max(1));
        let mut neighbors = Vec::with_capacity(corners.len());

        for (i, corner) in corners.iter().enumerate() {
            let mut node_neighbors = Vec::new();

            let query_point = [corner.position.x, corner.position.y];
            let results = tree.nearest_n::<SquaredEuclidean>(&query_point, k);

            for nn in results.into_iter() {
                let neighbor_index = nn.item as usize;
                if neighbor_index == i {
                    continue; // Skip self
                }
                let neighbor = &corners[neighbor_index];
                if let Some(entry) =
                    is_good_neighbor(corner, neighbor, neighbor_index, params, spacing, axes)
                {
                    node_neighbors.push(entry);
                }
            }

            neighbors.push(select_neighbors(node_neighbors));
        }

        let mut graph = Self { neighbors };
        graph.keep_mutual_edges();
        graph
    }

    /// Drop every edge whose reverse edge is missing or points the wrong way.
    fn keep_mutual_edges(&mut self) {
        let opposite = |d: NeighborDirection| match d {
            NeighborDirection::Right => NeighborDirection::Left,
            NeighborDirection::Left => NeighborDirection::Right,
            NeighborDirection::Up => NeighborDirection::Down,
            NeighborDirection::Down => NeighborDirection::Up,
        };
        let snapshot: Vec<Vec<(usize, NeighborDirection)>> = self
            .neighbors
            .iter()
            .map(|ns| ns.iter().map(|n| (n.index, n.direction)).collect())
            .collect();
        for (node, list) in self.neighbors.iter_mut().enumerate() {
            list.retain(|n| {
                snapshot[n.index]
                    .iter()
                    .any(|&(back, dir)| back == node && dir == opposite(n.direction))
            });
        }
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components
}

/// BFS-label a component with integer coordinates.
///
/// Returns `None` if two paths disagree on a node's coordinates or two nodes
/// land on the same coordinates.
pub fn assign_grid_coordinates(
    graph: &GridGraph,
    component: &[usize],
) -> Option<Vec<(usize, GridCoords)>> {
    let start = *component.first()?;
    let mut coords: HashMap<usize, GridCoords> = HashMap::with_capacity(component.len());
    let mut occupied: HashMap<GridCoords, usize> = HashMap::with_capacity(component.len());
    let mut queue = VecDeque::new();

    let origin = GridCoords { i: 0, j: 0 };
    coords.insert(start, origin);
    occupied.insert(origin, start);
    queue.push_back(start);

    while let Some(node_idx) = queue.pop_front() {
        let here = coords[&node_idx];
        for neighbor in &graph.neighbors[node_idx] {
            let (di, dj) = neighbor.direction.step();
            let there = GridCoords {
                i: here.i + di,
                j: here.j + dj,
            };
            match coords.get(&neighbor.index) {
                Some(existing) if *existing != there => return None,
                Some(_) => {}
                None => {
                    if occupied.insert(there, neighbor.index).is_some() {
                        return None;
                    }
                    coords.insert(neighbor.index, there);
                    queue.push_back(neighbor.index);
                }
            }
        }
    }

    let mut out: Vec<(usize, GridCoords)> = coords.into_iter().collect();
    out.sort_by_key(|(idx, _)| *idx);
    Some(out)
}
