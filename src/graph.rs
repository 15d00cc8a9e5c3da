//! Graph core for the optical mesh: canonical edges, removable links, and
//! deterministic shortest-path queries.
//!
//! Links alternate between present and removed as failures come and go, so the
//! graph remembers the attributes of removed edges and can restore them
//! losslessly. Both path queries take an optional masked edge instead of
//! mutating the graph.

use crate::*;

use std::collections::BTreeMap;
use std::str::FromStr;

use priority_queue::PriorityQueue;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
	#[error("edge {0} is not present in the graph")]
	EdgeNotInGraph(Edge),
	#[error("edge {0} is already present in the graph")]
	DuplicateEdge(Edge),
}

/// An undirected edge, canonicalized as the ordered pair `(min, max)`.
///
/// The textual form is `"u,v"` with `u < v`; it is the key grammar used for
/// every edge crossing a serialization boundary.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Edge {
	p1: NodeId,
	p2: NodeId,
}

impl Edge {
	pub fn new(u: NodeId, v: NodeId) -> Self {
		debug_assert_ne!(u, v, "an edge joins two distinct nodes");
		if u <= v {
			Self { p1: u, p2: v }
		} else {
			Self { p1: v, p2: u }
		}
	}
	/// Lower endpoint
	pub fn p1(&self) -> NodeId {
		self.p1
	}
	/// Upper endpoint
	pub fn p2(&self) -> NodeId {
		self.p2
	}
	/// Assuming `id` is one end of the edge, what is the other end
	pub fn other(&self, id: NodeId) -> NodeId {
		if id == self.p1 {
			self.p2
		} else {
			self.p1
		}
	}
}

impl std::fmt::Display for Edge {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{},{}", self.p1, self.p2)
	}
}

impl FromStr for Edge {
	type Err = String;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (u, v) = s
			.split_once(',')
			.ok_or_else(|| format!("edge key {:?} is not of the form \"u,v\"", s))?;
		let u: NodeId = u.trim().parse().map_err(|_| format!("bad node id {:?} in edge key {:?}", u, s))?;
		let v: NodeId = v.trim().parse().map_err(|_| format!("bad node id {:?} in edge key {:?}", v, s))?;
		if u == v {
			return Err(format!("edge key {:?} joins node {} to itself", s, u));
		}
		Ok(Edge::new(u, v))
	}
}

impl serde::Serialize for Edge {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> serde::Deserialize<'de> for Edge {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// A simple path: the visited node sequence plus its derived edge sequence.
///
/// Paths are immutable values; moving a service onto a different path always
/// replaces the whole thing.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Path {
	nodes: Vec<NodeId>,
	edges: Vec<Edge>,
}

impl Path {
	/// Derives the edge sequence from a node sequence.
	///
	/// Returns `None` for fewer than 2 nodes or a repeated consecutive node.
	pub fn from_nodes(nodes: Vec<NodeId>) -> Option<Self> {
		if nodes.len() < 2 {
			return None;
		}
		let mut edges = Vec::with_capacity(nodes.len() - 1);
		for w in nodes.windows(2) {
			if w[0] == w[1] {
				return None;
			}
			edges.push(Edge::new(w[0], w[1]));
		}
		Some(Self { nodes, edges })
	}
	pub fn src(&self) -> NodeId {
		self.nodes[0]
	}
	pub fn snk(&self) -> NodeId {
		self.nodes[self.nodes.len() - 1]
	}
	pub fn nodes(&self) -> &[NodeId] {
		&self.nodes
	}
	pub fn edges(&self) -> &[Edge] {
		&self.edges
	}
	pub fn contains_edge(&self, e: &Edge) -> bool {
		self.edges.contains(e)
	}
	/// Number of hops (edges)
	pub fn hops(&self) -> usize {
		self.edges.len()
	}
}

impl std::fmt::Display for Path {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		use itertools::Itertools;
		write!(f, "{}", self.nodes.iter().join("-"))
	}
}

/// Attributes of a link; `weight` is the path-selection cost, `distance` is
/// carried for reporting only.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct LinkAttrs {
	pub weight: N64,
	pub distance: N64,
}

/// Undirected weighted graph over `NodeId`s with removable edges.
///
/// Adjacency is kept in ordered maps so that every iteration, and therefore
/// every tie-break, is deterministic for a given load order.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Graph {
	adj: BTreeMap<NodeId, BTreeMap<NodeId, LinkAttrs>>,
	removed: BTreeMap<Edge, LinkAttrs>,
}

impl Graph {
	/// Adds a node with no edges (no-op if present)
	pub fn add_node(&mut self, n: NodeId) {
		self.adj.entry(n).or_default();
	}
	/// Inserts a canonical edge, creating endpoints as needed.
	///
	/// A pair may carry at most one edge; re-inserting it (present or
	/// removed) is an error.
	pub fn add_edge(&mut self, u: NodeId, v: NodeId, attrs: LinkAttrs) -> Result<(), GraphError> {
		let e = Edge::new(u, v);
		if self.has_edge(&e) || self.removed.contains_key(&e) {
			return Err(GraphError::DuplicateEdge(e));
		}
		self.adj.entry(u).or_default().insert(v, attrs);
		self.adj.entry(v).or_default().insert(u, attrs);
		Ok(())
	}
	/// Removes an edge, remembering its attributes for [`Graph::restore_edge`]
	pub fn remove_edge(&mut self, e: &Edge) -> Result<(), GraphError> {
		let attrs = self
			.adj
			.get_mut(&e.p1())
			.and_then(|n| n.remove(&e.p2()))
			.ok_or(GraphError::EdgeNotInGraph(*e))?;
		if let Some(n) = self.adj.get_mut(&e.p2()) {
			n.remove(&e.p1());
		}
		self.removed.insert(*e, attrs);
		Ok(())
	}
	/// Reinserts a previously removed edge with its original attributes
	pub fn restore_edge(&mut self, e: &Edge) -> Result<(), GraphError> {
		let attrs = self.removed.remove(e).ok_or(GraphError::EdgeNotInGraph(*e))?;
		self.adj.entry(e.p1()).or_default().insert(e.p2(), attrs);
		self.adj.entry(e.p2()).or_default().insert(e.p1(), attrs);
		Ok(())
	}
	pub fn has_edge(&self, e: &Edge) -> bool {
		self.adj.get(&e.p1()).map_or(false, |n| n.contains_key(&e.p2()))
	}
	pub fn attrs(&self, e: &Edge) -> Option<LinkAttrs> {
		self.adj.get(&e.p1()).and_then(|n| n.get(&e.p2())).copied()
	}
	pub fn has_node(&self, n: NodeId) -> bool {
		self.adj.contains_key(&n)
	}
	/// All nodes, ascending
	pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
		self.adj.keys().cloned()
	}
	/// All present edges, ascending
	pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
		self.adj
			.iter()
			.flat_map(|(&u, n)| n.keys().filter(move |&&v| u < v).map(move |&v| Edge::new(u, v)))
	}
	pub fn node_count(&self) -> usize {
		self.adj.len()
	}
	pub fn edge_count(&self) -> usize {
		self.adj.values().map(BTreeMap::len).sum::<usize>() / 2
	}

	/// Find the minimum-weight path between 2 nodes, optionally masking out
	/// one edge.
	///
	/// Uses heap-optimized Dijkstra from the sink, then walks forward from the
	/// source always taking the smallest optimal neighbor, so among all
	/// minimum-weight paths the lexicographically smallest node sequence is
	/// returned.
	///
	/// Arguments:
	/// - `src`, `snk`: endpoints (must be distinct)
	/// - `avoid`: an edge the path must not traverse, masked without mutation
	///
	/// Returns: the path, if one exists
	pub fn pathfind(&self, src: NodeId, snk: NodeId, avoid: Option<Edge>) -> Option<Path> {
		if src == snk {
			return None;
		}
		let dist = self.distances_from(snk, avoid);
		let mut left = *dist.get(&src)?;
		let mut nodes = vec![src];
		let mut u = src;
		while u != snk {
			let (v, dv) = self
				.adj
				.get(&u)?
				.iter()
				.filter(|(&v, _)| avoid != Some(Edge::new(u, v)))
				.find_map(|(&v, a)| {
					dist.get(&v)
						.copied()
						.filter(|dv| *dv + a.weight == left)
						.map(|dv| (v, dv))
				})?;
			nodes.push(v);
			left = dv;
			u = v;
		}
		Path::from_nodes(nodes)
	}

	/// Dijkstra distances from `origin` to every reachable node
	fn distances_from(&self, origin: NodeId, avoid: Option<Edge>) -> BTreeMap<NodeId, N64> {
		let mut dist: BTreeMap<NodeId, N64> = BTreeMap::new();
		if !self.adj.contains_key(&origin) {
			return dist;
		}
		dist.insert(origin, n64(0.0));
		let mut q = PriorityQueue::new();
		q.push(origin, -n64(0.0));
		while let Some((u, _)) = q.pop() {
			let du = dist[&u];
			for (&v, a) in self.adj.get(&u).into_iter().flatten() {
				if avoid == Some(Edge::new(u, v)) {
					continue;
				}
				let d = du + a.weight;
				if dist.get(&v).map_or(true, |&dv| dv > d) {
					dist.insert(v, d);
					q.push(v, -d);
				}
			}
		}
		dist
	}

	/// Find a minimum-hop path between 2 nodes via bidirectional breadth-first
	/// search, optionally masking out one edge.
	///
	/// The search alternates full-level expansions of the smaller frontier;
	/// frontiers and adjacency are iterated in ascending node order, parents
	/// are fixed at first discovery, and among meeting nodes the smallest
	/// (total hops, node id) wins, so the result is deterministic.
	pub fn pathfind_hops(&self, src: NodeId, snk: NodeId, avoid: Option<Edge>) -> Option<Path> {
		if src == snk || !self.adj.contains_key(&src) || !self.adj.contains_key(&snk) {
			return None;
		}
		// node -> (depth from its side's origin, parent)
		let mut fwd: BTreeMap<NodeId, (u32, Option<NodeId>)> = BTreeMap::new();
		let mut bwd: BTreeMap<NodeId, (u32, Option<NodeId>)> = BTreeMap::new();
		fwd.insert(src, (0, None));
		bwd.insert(snk, (0, None));
		let mut ff = vec![src];
		let mut fb = vec![snk];
		let (mut df, mut db) = (0u32, 0u32);
		loop {
			if ff.is_empty() || fb.is_empty() {
				return None;
			}
			let (frontier, seen, other, depth) = if ff.len() <= fb.len() {
				(&mut ff, &mut fwd, &bwd, &mut df)
			} else {
				(&mut fb, &mut bwd, &fwd, &mut db)
			};
			*depth += 1;
			let mut next = Vec::new();
			let mut meet: Option<(u32, NodeId)> = None;
			for &u in frontier.iter() {
				for (&v, _) in self.adj.get(&u).into_iter().flatten() {
					if avoid == Some(Edge::new(u, v)) || seen.contains_key(&v) {
						continue;
					}
					seen.insert(v, (*depth, Some(u)));
					if let Some(&(od, _)) = other.get(&v) {
						let m = (*depth + od, v);
						if meet.map_or(true, |best| m < best) {
							meet = Some(m);
						}
					}
					next.push(v);
				}
			}
			if let Some((_, m)) = meet {
				return Self::stitch(m, &fwd, &bwd);
			}
			next.sort_unstable();
			*frontier = next;
		}
	}

	/// Joins the two half-paths meeting at `m` into one source→sink path
	fn stitch(
		m: NodeId,
		fwd: &BTreeMap<NodeId, (u32, Option<NodeId>)>,
		bwd: &BTreeMap<NodeId, (u32, Option<NodeId>)>,
	) -> Option<Path> {
		let mut nodes = Vec::new();
		let mut u = m;
		loop {
			nodes.push(u);
			match fwd.get(&u)?.1 {
				Some(p) => u = p,
				None => break,
			}
		}
		nodes.reverse();
		let mut u = m;
		while let Some(p) = bwd.get(&u)?.1 {
			u = p;
			nodes.push(u);
		}
		Path::from_nodes(nodes)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	macro_rules! graph {
		($($u:expr, $v:expr => $w:expr);* $(;)?) => {
			{
				let mut g = Graph::default();
				$(g.add_edge($u, $v, LinkAttrs { weight: n64($w), distance: n64($w) }).unwrap();)*
				g
			}
		};
	}

	fn nodes(p: &Path) -> Vec<NodeId> {
		p.nodes().to_vec()
	}

	#[test]
	fn edge_canonicalization_and_key_grammar() {
		assert_eq!(Edge::new(7, 3), Edge::new(3, 7));
		assert_eq!(Edge::new(3, 7).to_string(), "3,7");
		assert_eq!("7,3".parse::<Edge>().unwrap(), Edge::new(3, 7));
		assert_eq!(" 3 , 7 ".parse::<Edge>().unwrap(), Edge::new(3, 7));
		assert!("3".parse::<Edge>().is_err());
		assert!("3,3".parse::<Edge>().is_err());
		assert!("3,x".parse::<Edge>().is_err());
		assert!("(3, 7)".parse::<Edge>().is_err());
	}

	#[test]
	fn duplicate_edges_are_rejected() {
		let mut g = graph!(1, 2 => 1.0);
		assert_eq!(
			g.add_edge(2, 1, LinkAttrs { weight: n64(5.0), distance: n64(5.0) }),
			Err(GraphError::DuplicateEdge(Edge::new(1, 2)))
		);
		g.remove_edge(&Edge::new(1, 2)).unwrap();
		// a removed edge still occupies its pair
		assert_eq!(
			g.add_edge(1, 2, LinkAttrs { weight: n64(5.0), distance: n64(5.0) }),
			Err(GraphError::DuplicateEdge(Edge::new(1, 2)))
		);
	}

	#[test]
	fn remove_then_restore_is_lossless() {
		let mut g = graph!(1, 2 => 1.0; 2, 3 => 2.0);
		let pristine = g.clone();
		let e = Edge::new(1, 2);
		g.remove_edge(&e).unwrap();
		assert!(!g.has_edge(&e));
		assert_eq!(g.remove_edge(&e), Err(GraphError::EdgeNotInGraph(e)));
		g.restore_edge(&e).unwrap();
		assert_eq!(g, pristine);
		assert_eq!(g.attrs(&e).unwrap().weight, n64(1.0));
		assert_eq!(g.restore_edge(&e), Err(GraphError::EdgeNotInGraph(e)));
	}

	#[test]
	fn weighted_pathfind_prefers_cheap_over_short() {
		let g = graph!(1, 2 => 1.0; 2, 3 => 1.0; 1, 3 => 3.0);
		assert_eq!(nodes(&g.pathfind(1, 3, None).unwrap()), vec![1, 2, 3]);
	}

	#[test]
	fn weighted_tie_breaks_to_lexicographic_minimum() {
		// 4-cycle, both ways around cost 2
		let g = graph!(1, 2 => 1.0; 2, 3 => 1.0; 3, 4 => 1.0; 1, 4 => 1.0);
		assert_eq!(nodes(&g.pathfind(1, 3, None).unwrap()), vec![1, 2, 3]);
		assert_eq!(nodes(&g.pathfind(2, 4, None).unwrap()), vec![2, 1, 4]);
		assert_eq!(nodes(&g.pathfind(3, 1, None).unwrap()), vec![3, 2, 1]);
	}

	#[test]
	fn masked_edge_is_not_traversed() {
		let g = graph!(1, 2 => 1.0; 2, 3 => 1.0; 1, 3 => 3.0);
		let p = g.pathfind(1, 3, Some(Edge::new(1, 2))).unwrap();
		assert_eq!(nodes(&p), vec![1, 3]);
		let p = g.pathfind_hops(1, 3, Some(Edge::new(1, 3))).unwrap();
		assert_eq!(nodes(&p), vec![1, 2, 3]);
	}

	#[test]
	fn hop_pathfind_finds_minimum_hops() {
		// weights pull Dijkstra the long way round, hops must not care
		let g = graph!(1, 2 => 10.0; 2, 5 => 10.0; 1, 3 => 1.0; 3, 4 => 1.0; 4, 5 => 1.0);
		assert_eq!(nodes(&g.pathfind_hops(1, 5, None).unwrap()), vec![1, 2, 5]);
		assert_eq!(nodes(&g.pathfind(1, 5, None).unwrap()), vec![1, 3, 4, 5]);
	}

	#[test]
	fn no_path_between_components() {
		let g = graph!(1, 2 => 1.0; 3, 4 => 1.0);
		assert!(g.pathfind(1, 4, None).is_none());
		assert!(g.pathfind_hops(1, 4, None).is_none());
		assert!(g.pathfind_hops(1, 9, None).is_none());
		assert!(g.pathfind(1, 1, None).is_none());
	}

	#[test]
	fn adjacent_endpoints() {
		let g = graph!(1, 2 => 1.0);
		assert_eq!(nodes(&g.pathfind_hops(1, 2, None).unwrap()), vec![1, 2]);
		assert!(g.pathfind_hops(1, 2, Some(Edge::new(1, 2))).is_none());
	}

	#[test]
	fn path_from_nodes_rejects_degenerates() {
		assert!(Path::from_nodes(vec![]).is_none());
		assert!(Path::from_nodes(vec![1]).is_none());
		assert!(Path::from_nodes(vec![1, 1]).is_none());
		let p = Path::from_nodes(vec![1, 2, 3]).unwrap();
		assert_eq!(p.src(), 1);
		assert_eq!(p.snk(), 3);
		assert_eq!(p.edges(), &[Edge::new(1, 2), Edge::new(2, 3)]);
		assert!(p.contains_edge(&Edge::new(2, 3)));
		assert!(!p.contains_edge(&Edge::new(1, 3)));
	}
}
