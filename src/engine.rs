//! The path engine: working paths, per-edge protection paths, and the
//! failure handling that keeps them consistent.
//!
//! The engine owns the graph and every table. Failure and recovery events run
//! to completion on the calling thread; affected services are always handled
//! in ascending index order so two engines fed the same inputs and events end
//! up with identical tables.

use crate::*;
use data::EngineState;
use graph::{Edge, Graph, GraphError, LinkAttrs, Path};
use meta::Parameters;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::convert::TryFrom;

use indexmap::IndexMap;
use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
	#[error(transparent)]
	Graph(#[from] GraphError),
	#[error("invalid event for edge {edge}: edge {reason}")]
	InvalidEvent { edge: Edge, reason: &'static str },
	#[error("{0}")]
	InvalidDocument(String),
}

/// What a single failure or recovery event did.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct EventSummary {
	pub edge: Edge,
	pub working_paths_changed: usize,
	pub backup_entries_repaired: usize,
}

impl EventSummary {
	fn new(edge: Edge) -> Self {
		Self {
			edge,
			working_paths_changed: 0,
			backup_entries_repaired: 0,
		}
	}
}

impl std::fmt::Display for EventSummary {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"edge {}: {} working paths changed, {} backup entries repaired",
			self.edge, self.working_paths_changed, self.backup_entries_repaired
		)
	}
}

/// Previously used paths of each service, kept as a secondary source of
/// alternatives. FIFO per service: once the capacity is reached the oldest
/// entry makes room.
///
/// Cached paths go stale. [`PathCache::find_avoiding`] only filters on the
/// excluded edge; whoever adopts a cached path must re-check it against the
/// live graph.
#[derive(Clone, Debug)]
pub struct PathCache {
	entries: BTreeMap<usize, VecDeque<Path>>,
	capacity: usize,
}

impl PathCache {
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: BTreeMap::new(),
			capacity: capacity.max(1),
		}
	}
	pub fn push(&mut self, s: usize, path: Path) {
		let q = self.entries.entry(s).or_default();
		if q.len() == self.capacity {
			q.pop_front();
		}
		q.push_back(path);
	}
	/// Cached paths of `s`, oldest first
	pub fn candidates(&self, s: usize) -> impl Iterator<Item = &Path> {
		self.entries.get(&s).into_iter().flatten()
	}
	/// First cached path of `s` whose edge set does not contain `e`
	pub fn find_avoiding(&self, s: usize, e: &Edge) -> Option<&Path> {
		self.candidates(s).find(|p| !p.contains_edge(e))
	}
	pub fn len(&self, s: usize) -> usize {
		self.entries.get(&s).map_or(0, VecDeque::len)
	}
}

/// The engine proper.
///
/// Tables:
/// - working paths: service index → its current path
/// - backups: service index → (working edge → protection path avoiding it)
/// - edge index: edge → services whose working path traverses it
/// - failed: edges currently removed from the graph by failure events
pub struct PathEngine {
	graph: Graph,
	services: data::Services,
	working: BTreeMap<usize, Path>,
	backups: BTreeMap<usize, IndexMap<Edge, Path>>,
	edge_index: IndexMap<Edge, BTreeSet<usize>>,
	cache: PathCache,
	failed: BTreeSet<Edge>,
}

impl PathEngine {
	/// Builds the graph from the network document and registers the services
	/// in supplied order. Rejects self-loops, non-positive costs and
	/// duplicate unordered pairs.
	pub fn new(network: &data::Network, services: data::Services, params: Parameters) -> Result<Self, EngineError> {
		let mut graph = Graph::default();
		for n in &network.nodes {
			graph.add_node(n.node_id);
		}
		for l in &network.links {
			if l.src == l.snk {
				return Err(EngineError::InvalidDocument(format!(
					"link {} rejected: source and sink are both node {}",
					l.oms_id, l.src
				)));
			}
			if l.cost <= n64(0.0) {
				return Err(EngineError::InvalidDocument(format!(
					"link {} ({}-{}) rejected: non-positive cost {}",
					l.oms_id, l.src, l.snk, l.cost
				)));
			}
			graph.add_edge(l.src, l.snk, LinkAttrs { weight: l.cost, distance: l.distance })?;
		}
		log::debug!(
			"constructed graph with {} nodes and {} links for {} services",
			graph.node_count(),
			graph.edge_count(),
			services.len()
		);
		Ok(Self {
			graph,
			services,
			working: BTreeMap::new(),
			backups: BTreeMap::new(),
			edge_index: IndexMap::new(),
			cache: PathCache::new(params.cache_capacity),
			failed: BTreeSet::new(),
		})
	}

	/// Computes the initial working path of every service, the reverse index,
	/// and one weighted protection path around every working edge.
	pub fn initialize(&mut self) {
		let routes: Vec<(usize, Option<Path>)> = self
			.services
			.iter()
			.enumerate()
			.map(|(s, svc)| (s, self.graph.pathfind(svc.src, svc.snk, None)))
			.collect();
		for (s, route) in routes {
			match route {
				Some(p) => {
					self.working.insert(s, p);
				}
				None => {
					let svc = &self.services[s];
					log::warn!("no available path from {} to {} for service {}", svc.src, svc.snk, s);
				}
			}
		}
		for (&s, p) in &self.working {
			for e in p.edges() {
				self.edge_index.entry(*e).or_insert_with(BTreeSet::new).insert(s);
			}
		}
		let jobs: Vec<(usize, NodeId, NodeId, Vec<Edge>)> = self
			.working
			.iter()
			.map(|(&s, p)| (s, p.src(), p.snk(), p.edges().to_vec()))
			.collect();
		for (s, src, snk, edges) in jobs {
			let mut row = IndexMap::new();
			for e in edges {
				match self.graph.pathfind(src, snk, Some(e)) {
					Some(p) => {
						row.insert(e, p);
					}
					None => log::debug!("no initial backup path for service {} around edge {}", s, e),
				}
			}
			self.backups.insert(s, row);
		}
		log::info!(
			"computed {} working paths and {} backup entries for {} services",
			self.working.len(),
			self.backups.values().map(IndexMap::len).sum::<usize>(),
			self.services.len()
		);
	}

	/// Fails a live edge: removes it from the graph, reroutes every service
	/// whose working path traversed it, then repairs the backup entries of
	/// unaffected services that leaned on it.
	pub fn on_failure(&mut self, e: Edge) -> Result<EventSummary, EngineError> {
		if self.failed.contains(&e) {
			return Err(EngineError::InvalidEvent { edge: e, reason: "has already failed" });
		}
		self.graph.remove_edge(&e)?;
		self.failed.insert(e);
		let mut summary = EventSummary::new(e);
		let affected: BTreeSet<usize> = self.edge_index.get(&e).cloned().unwrap_or_default();
		log::debug!("edge {} failed, affected services: [{}]", e, affected.iter().join(", "));
		for &s in &affected {
			self.switch_working_path(s, &e, &mut summary);
		}
		let repairs: Vec<(usize, Edge)> = self
			.backups
			.iter()
			.filter(|(s, _)| !affected.contains(s))
			.flat_map(|(&s, row)| {
				row.iter()
					.filter(|(_, p)| p.contains_edge(&e))
					.map(move |(k, _)| (s, *k))
			})
			.collect();
		for (s, k) in repairs {
			log::debug!(" backup of service {} around edge {} traverses failed edge {}", s, k, e);
			self.repair_backup_entry(s, k, &mut summary);
		}
		Ok(summary)
	}

	/// Recovers a failed edge: the graph gets it back with its original
	/// attributes. Nothing is re-optimized; the edge simply becomes eligible
	/// for subsequent recomputations.
	pub fn on_recovery(&mut self, e: Edge) -> Result<EventSummary, EngineError> {
		if !self.failed.contains(&e) {
			return Err(if self.graph.has_edge(&e) {
				EngineError::InvalidEvent { edge: e, reason: "is not in the failed state" }
			} else {
				GraphError::EdgeNotInGraph(e).into()
			});
		}
		self.graph.restore_edge(&e)?;
		self.failed.remove(&e);
		log::debug!("edge {} recovered, paths are left as they are", e);
		Ok(EventSummary::new(e))
	}

	/// Picks a replacement working path for `s` after `e` failed, trying in
	/// order: the precomputed backup, a local hop-count recompute, a still
	/// live cached path, a fresh weighted recompute. The previous path goes
	/// into the cache either way; with no replacement at all the service is
	/// left pathless.
	fn switch_working_path(&mut self, s: usize, e: &Edge, summary: &mut EventSummary) {
		if let Some(old) = self.working.get(&s).cloned() {
			self.cache.push(s, old);
		}
		let (src, snk) = self.endpoints(s);
		let next = if let Some(p) = self.backups.get(&s).and_then(|row| row.get(e)).cloned() {
			log::debug!(" switching service {} to the precomputed backup for edge {}", s, e);
			Some(p)
		} else if let Some(p) = self.graph.pathfind_hops(src, snk, None) {
			log::debug!(" switching service {} to a locally recomputed path", s);
			Some(p)
		} else if let Some(p) = self.cached_live(s, e) {
			log::debug!(" switching service {} to a cached path", s);
			Some(p)
		} else if let Some(p) = self.graph.pathfind(src, snk, None) {
			log::debug!(" switching service {} to a freshly computed weighted path", s);
			Some(p)
		} else {
			None
		};
		match next {
			Some(p) => {
				self.set_working(s, p);
				summary.working_paths_changed += 1;
				self.rebuild_backups(s, summary);
			}
			None => {
				log::warn!("no replacement path for service {} after failure of edge {}", s, e);
				self.clear_working(s);
			}
		}
	}

	/// Rebuilds the whole backup row of `s` for the edges of its current
	/// working path. Replaced entries are cached first.
	fn rebuild_backups(&mut self, s: usize, summary: &mut EventSummary) {
		let path = match self.working.get(&s).cloned() {
			Some(p) => p,
			None => return,
		};
		let old_row = self.backups.remove(&s).unwrap_or_default();
		let mut row = IndexMap::new();
		for e in path.edges() {
			if let Some(prev) = old_row.get(e).cloned() {
				self.cache.push(s, prev);
			}
			match self.compute_backup(s, e) {
				Some(p) => {
					row.insert(*e, p);
					summary.backup_entries_repaired += 1;
				}
				None => log::debug!(" no backup path for service {} around edge {}", s, e),
			}
		}
		self.backups.insert(s, row);
	}

	/// Recomputes the single backup entry of `s` keyed on `e`; the entry is
	/// dropped when no replacement exists.
	fn repair_backup_entry(&mut self, s: usize, e: Edge, summary: &mut EventSummary) {
		if let Some(prev) = self.backups.get(&s).and_then(|row| row.get(&e)).cloned() {
			self.cache.push(s, prev);
		}
		match self.compute_backup(s, &e) {
			Some(p) => {
				self.backups.entry(s).or_default().insert(e, p);
				summary.backup_entries_repaired += 1;
			}
			None => {
				log::debug!(" dropping backup of service {} around edge {}: no replacement", s, e);
				if let Some(row) = self.backups.get_mut(&s) {
					row.shift_remove(&e);
				}
			}
		}
	}

	/// The repair ladder for one backup entry: local hop-count recompute with
	/// `e` masked, then a live cached path, then a weighted recompute with
	/// `e` masked.
	fn compute_backup(&self, s: usize, e: &Edge) -> Option<Path> {
		let (src, snk) = self.endpoints(s);
		if let Some(p) = self.graph.pathfind_hops(src, snk, Some(*e)) {
			log::trace!("  backup for service {} around {} found locally", s, e);
			return Some(p);
		}
		if let Some(p) = self.cached_live(s, e) {
			log::trace!("  backup for service {} around {} taken from the cache", s, e);
			return Some(p);
		}
		if let Some(p) = self.graph.pathfind(src, snk, Some(*e)) {
			log::trace!("  backup for service {} around {} recomputed with Dijkstra", s, e);
			return Some(p);
		}
		None
	}

	/// First cached path of `s` that avoids `e` and whose every edge is still
	/// present on the live graph
	fn cached_live(&self, s: usize, e: &Edge) -> Option<Path> {
		self.cache
			.candidates(s)
			.find(|p| !p.contains_edge(e) && p.edges().iter().all(|pe| self.graph.has_edge(pe)))
			.cloned()
	}

	/// Atomically replaces the working path of `s`, keeping the reverse index
	/// in step
	fn set_working(&mut self, s: usize, path: Path) {
		let old = self.working.insert(s, path.clone());
		let old_edges: BTreeSet<Edge> = old.iter().flat_map(|p| p.edges().iter().cloned()).collect();
		let new_edges: BTreeSet<Edge> = path.edges().iter().cloned().collect();
		for e in old_edges.difference(&new_edges) {
			if let Some(set) = self.edge_index.get_mut(e) {
				set.remove(&s);
			}
		}
		for e in new_edges.difference(&old_edges) {
			self.edge_index.entry(*e).or_insert_with(BTreeSet::new).insert(s);
		}
	}

	/// Leaves `s` without a working path, deregistering its index entries
	fn clear_working(&mut self, s: usize) {
		if let Some(old) = self.working.remove(&s) {
			for e in old.edges() {
				if let Some(set) = self.edge_index.get_mut(e) {
					set.remove(&s);
				}
			}
		}
	}

	fn endpoints(&self, s: usize) -> (NodeId, NodeId) {
		let svc = &self.services[s];
		(svc.src, svc.snk)
	}

	pub fn graph(&self) -> &Graph {
		&self.graph
	}
	pub fn service_count(&self) -> usize {
		self.services.len()
	}
	pub fn working_path(&self, s: usize) -> Option<&Path> {
		self.working.get(&s)
	}
	/// Working paths in ascending service order
	pub fn working_paths(&self) -> impl Iterator<Item = (usize, &Path)> {
		self.working.iter().map(|(&s, p)| (s, p))
	}
	pub fn backup_path(&self, s: usize, e: &Edge) -> Option<&Path> {
		self.backups.get(&s).and_then(|row| row.get(e))
	}
	/// Backup entries of a service, in working-path edge order
	pub fn backup_paths(&self, s: usize) -> impl Iterator<Item = (&Edge, &Path)> {
		self.backups.get(&s).into_iter().flatten()
	}
	/// Services whose working path traverses `e`; a missing entry reads as
	/// the empty set
	pub fn edge_services(&self, e: &Edge) -> BTreeSet<usize> {
		self.edge_index.get(e).cloned().unwrap_or_default()
	}
	/// Every edge ever seen by the reverse index
	pub fn indexed_edges(&self) -> Vec<Edge> {
		self.edge_index.keys().cloned().collect()
	}
	pub fn failed_edges(&self) -> &BTreeSet<Edge> {
		&self.failed
	}
	pub fn is_failed(&self, e: &Edge) -> bool {
		self.failed.contains(e)
	}
	pub fn cache(&self) -> &PathCache {
		&self.cache
	}

	/// The engine state as plain values, for persistence
	pub fn snapshot(&self) -> EngineState {
		EngineState {
			working_paths: self.working.iter().map(|(&s, p)| (s, p.into())).collect(),
			backup_paths: self
				.backups
				.iter()
				.filter(|(_, row)| !row.is_empty())
				.map(|(&s, row)| (s, row.iter().map(|(e, p)| (*e, p.into())).collect()))
				.collect(),
			edge_service_index: self
				.edge_index
				.iter()
				.filter(|(_, set)| !set.is_empty())
				.map(|(e, set)| (*e, set.iter().cloned().collect()))
				.collect(),
			failed_edges: self.failed.iter().cloned().collect(),
		}
	}

	/// Resumes from a persisted state on a freshly constructed engine:
	/// re-applies the failed edges, adopts the persisted paths, and rebuilds
	/// the reverse index from them (the index is derived data and is not
	/// trusted from the document).
	pub fn restore(&mut self, state: EngineState) -> Result<(), EngineError> {
		for e in &state.failed_edges {
			self.graph.remove_edge(e)?;
			self.failed.insert(*e);
		}
		let working: BTreeMap<usize, Path> = state
			.working_paths
			.into_iter()
			.try_map_all(|(s, rec)| {
				if s >= self.services.len() {
					return Err(EngineError::InvalidDocument(format!("working path for unknown service {}", s)));
				}
				Path::try_from(rec)
					.map_err(|err| EngineError::InvalidDocument(format!("working path of service {}: {}", s, err)))
					.map(|p| (s, p))
			})?
			.collect();
		for (s, p) in &working {
			let svc = &self.services[*s];
			if p.src() != svc.src || p.snk() != svc.snk {
				return Err(EngineError::InvalidDocument(format!(
					"working path {} of service {} does not join {} to {}",
					p, s, svc.src, svc.snk
				)));
			}
			for e in p.edges() {
				if !self.graph.has_edge(e) {
					return Err(EngineError::InvalidDocument(format!(
						"working path of service {} traverses edge {} which is not live",
						s, e
					)));
				}
			}
		}
		let mut backups: BTreeMap<usize, IndexMap<Edge, Path>> = BTreeMap::new();
		for (s, row) in state.backup_paths {
			if s >= self.services.len() {
				return Err(EngineError::InvalidDocument(format!("backup paths for unknown service {}", s)));
			}
			let mut converted = IndexMap::new();
			for (e, rec) in row {
				let p = Path::try_from(rec).map_err(|err| {
					EngineError::InvalidDocument(format!("backup path of service {} for edge {}: {}", s, e, err))
				})?;
				if p.contains_edge(&e) {
					return Err(EngineError::InvalidDocument(format!(
						"backup path {} of service {} traverses the edge {} it protects against",
						p, s, e
					)));
				}
				converted.insert(e, p);
			}
			backups.insert(s, converted);
		}
		self.working = working;
		self.backups = backups;
		self.edge_index.clear();
		for (&s, p) in &self.working {
			for e in p.edges() {
				self.edge_index.entry(*e).or_insert_with(BTreeSet::new).insert(s);
			}
		}
		log::info!(
			"restored {} working paths, {} backup rows and {} failed edges",
			self.working.len(),
			self.backups.len(),
			self.failed.len()
		);
		Ok(())
	}
}
