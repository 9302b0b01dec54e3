use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

/// A trait for graphs that can be searched.
///
/// `Node`: The type of node identifiers (e.g., a field-cell index).
/// `Ctx`: A context object passed to cost calculations (e.g., a move-cost grid).
pub trait Graph<Node, Ctx> {
    /// Return an iterator over the neighbors of a node.
    fn neighbors(&self, node: Node, context: &Ctx) -> Vec<Node>;

    /// Calculate the cost to move from `from` to `to`.
    /// This allows dynamic weighting based on the provided context.
    /// Costs must be non-negative and finite.
    fn cost(&self, from: Node, to: Node, context: &Ctx) -> f64;

    /// Calculate the estimated cost (heuristic) from `from` to `target`.
    /// For A*, this must be admissible (never overestimate).
    fn heuristic(&self, from: Node, target: Node, context: &Ctx) -> f64;
}

/// A generic A* pathfinder.
pub struct AStar;

impl AStar {
    /// Find the shortest path from `start` to `goal`.
    pub fn find_path<Node, Ctx, G>(
        graph: &G,
        start: Node,
        goal: Node,
        context: &Ctx,
    ) -> Option<(Vec<Node>, f64)>
    where
        Node: Copy + Eq + Hash + std::fmt::Debug,
        G: Graph<Node, Ctx>,
    {
        let mut open_set = BinaryHeap::new();
        let mut came_from: HashMap<Node, Node> = HashMap::new();
        let mut g_score: HashMap<Node, f64> = HashMap::new();
        let mut closed_set: HashSet<Node> = HashSet::new();

        g_score.insert(start, 0.0);
        open_set.push(State {
            node: start,
            cost: 0.0,
            priority: graph.heuristic(start, goal, context),
        });

        while let Some(State { node: current, .. }) = open_set.pop() {
            // Skip if already processed with a better path
            if !closed_set.insert(current) {
                continue;
            }

            if current == goal {
                // Reconstruct path
                let mut path = vec![current];
                let mut curr = current;
                while let Some(&prev) = came_from.get(&curr) {
                    path.push(prev);
                    curr = prev;
                }
                path.reverse();
                return Some((path, g_score[&goal]));
            }

            let current_g = g_score[&current];

            for neighbor in graph.neighbors(current, context) {
                // Skip already-processed nodes
                if closed_set.contains(&neighbor) {
                    continue;
                }

                let tentative_g = current_g + graph.cost(current, neighbor, context);

                if tentative_g < *g_score.get(&neighbor).unwrap_or(&f64::INFINITY) {
                    came_from.insert(neighbor, current);
                    g_score.insert(neighbor, tentative_g);
                    open_set.push(State {
                        node: neighbor,
                        cost: tentative_g,
                        priority: tentative_g + graph.heuristic(neighbor, goal, context),
                    });
                }
            }
        }

        None
    }
}

/// Result of a multi-source Dijkstra sweep: travel time from the nearest seed,
/// plus the seed index that claimed each reached node.
pub struct ReachField<Node> {
    pub travel_time: HashMap<Node, f64>,
    pub nearest_seed: HashMap<Node, usize>,
}

/// Weighted multi-source Dijkstra (zero heuristic; seeds start at the given
/// initial costs). Used for control-reach fields and nearest-seed partitions.
///
/// Seeds are expanded in the order given; ties on cost resolve to the
/// lower-indexed seed, so the partition is deterministic.
pub fn multi_source_dijkstra<Node, Ctx, G>(
    graph: &G,
    seeds: &[(Node, f64)],
    context: &Ctx,
) -> ReachField<Node>
where
    Node: Copy + Eq + Hash + std::fmt::Debug,
    G: Graph<Node, Ctx>,
{
    let mut travel_time: HashMap<Node, f64> = HashMap::new();
    let mut nearest_seed: HashMap<Node, usize> = HashMap::new();
    let mut closed_set: HashSet<Node> = HashSet::new();
    let mut open_set = BinaryHeap::new();

    for (i, &(node, start_cost)) in seeds.iter().enumerate() {
        // First seed wins duplicate starting nodes.
        let better = match travel_time.get(&node) {
            Some(&t) => start_cost < t,
            None => true,
        };
        if better {
            travel_time.insert(node, start_cost);
            nearest_seed.insert(node, i);
            open_set.push(State {
                node,
                cost: start_cost,
                priority: start_cost,
            });
        }
    }

    while let Some(State { node: current, .. }) = open_set.pop() {
        if !closed_set.insert(current) {
            continue;
        }
        let current_g = travel_time[&current];
        let current_seed = nearest_seed[&current];

        for neighbor in graph.neighbors(current, context) {
            if closed_set.contains(&neighbor) {
                continue;
            }
            let tentative = current_g + graph.cost(current, neighbor, context);
            if tentative < *travel_time.get(&neighbor).unwrap_or(&f64::INFINITY) {
                travel_time.insert(neighbor, tentative);
                nearest_seed.insert(neighbor, current_seed);
                open_set.push(State {
                    node: neighbor,
                    cost: tentative,
                    priority: tentative,
                });
            }
        }
    }

    ReachField {
        travel_time,
        nearest_seed,
    }
}

/// Helper struct for the priority queue.
#[derive(Copy, Clone, PartialEq)]
struct State<Node> {
    node: Node,
    cost: f64,     // Actual cost from start (g_score)
    priority: f64, // Estimated total cost (f_score = g + h)
}

impl<Node: Eq> Eq for State<Node> {}

// The priority queue depends on `Ord`.
// Explicitly implement the trait so the queue becomes a min-heap.
// `total_cmp` gives floats a total order (costs are finite by contract).
impl<Node: Eq> Ord for State<Node> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Notice that we flip the ordering on costs.
        // In case of a tie we compare g-scores - this step is necessary
        // to make implementations of `PartialEq` and `Ord` consistent.
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.cost.total_cmp(&self.cost))
    }
}

// `PartialOrd` needs to be implemented as well.
impl<Node: Eq> PartialOrd for State<Node> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Simple grid graph for testing
    // 0 1 2
    // 3 4 5
    // 6 7 8
    struct GridGraph;

    impl Graph<u32, ()> for GridGraph {
        fn neighbors(&self, node: u32, _context: &()) -> Vec<u32> {
            let mut n = Vec::new();
            let x = node % 3;
            let y = node / 3;

            if x > 0 {
                n.push(node - 1);
            } // Left
            if x < 2 {
                n.push(node + 1);
            } // Right
            if y > 0 {
                n.push(node - 3);
            } // Up
            if y < 2 {
                n.push(node + 3);
            } // Down
            n
        }

        fn cost(&self, _from: u32, _to: u32, _context: &()) -> f64 {
            1.0 // Uniform cost
        }

        fn heuristic(&self, from: u32, target: u32, _context: &()) -> f64 {
            // Manhattan distance
            let x1 = (from % 3) as i32;
            let y1 = (from / 3) as i32;
            let x2 = (target % 3) as i32;
            let y2 = (target / 3) as i32;
            ((x1 - x2).abs() + (y1 - y2).abs()) as f64
        }
    }

    #[test]
    fn test_grid_pathfinding() {
        let graph = GridGraph;
        let start = 0; // Top-left
        let goal = 8; // Bottom-right

        let result = AStar::find_path(&graph, start, goal, &());
        assert!(result.is_some());

        let (path, cost) = result.unwrap();
        // Shortest path is 4 steps (e.g. 0->1->2->5->8 or 0->3->6->7->8)
        assert!((cost - 4.0).abs() < 1e-12);
        assert_eq!(path.first(), Some(&0));
        assert_eq!(path.last(), Some(&8));
        assert_eq!(path.len(), 5); // Includes start node
    }

    struct WeightedGraph; // 0 -> 1 (cost 10), 0 -> 2 (cost 1), 2 -> 1 (cost 1)

    impl Graph<u32, ()> for WeightedGraph {
        fn neighbors(&self, node: u32, _context: &()) -> Vec<u32> {
            match node {
                0 => vec![1, 2],
                2 => vec![1],
                _ => vec![],
            }
        }

        fn cost(&self, from: u32, to: u32, _context: &()) -> f64 {
            match (from, to) {
                (0, 1) => 10.0,
                (0, 2) => 1.0,
                (2, 1) => 1.0,
                _ => 1.0,
            }
        }

        fn heuristic(&self, _from: u32, _target: u32, _context: &()) -> f64 {
            0.0 // Dijkstra-like behavior
        }
    }

    #[test]
    fn test_weighted_route_choice() {
        let result = AStar::find_path(&WeightedGraph, 0, 1, &());
        let (path, cost) = result.unwrap();
        // Cheaper to detour through 2.
        assert_eq!(path, vec![0, 2, 1]);
        assert!((cost - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_path() {
        let result = AStar::find_path(&WeightedGraph, 1, 0, &());
        assert!(result.is_none());
    }

    #[test]
    fn test_multi_source_reach() {
        // Seeds at opposite corners of the 3x3 grid; center is 2 from both,
        // the tie resolves to the lower-indexed seed.
        let field = multi_source_dijkstra(&GridGraph, &[(0, 0.0), (8, 0.0)], &());
        assert_eq!(field.travel_time.len(), 9);
        assert!((field.travel_time[&4] - 2.0).abs() < 1e-12);
        assert_eq!(field.nearest_seed[&0], 0);
        assert_eq!(field.nearest_seed[&8], 1);
        assert_eq!(field.nearest_seed[&4], 0);
    }

    #[test]
    fn test_multi_source_start_cost_bias() {
        // A head start on seed 1 pulls the center into its partition.
        let field = multi_source_dijkstra(&GridGraph, &[(0, 1.5), (8, 0.0)], &());
        assert_eq!(field.nearest_seed[&4], 1);
        assert!((field.travel_time[&4] - 2.0).abs() < 1e-12);
    }
}
