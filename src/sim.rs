//! Simulation facade: validates and canonicalizes external events before
//! handing them to the engine.

use crate::*;
use engine::{EngineError, EventSummary, PathEngine};
use graph::Edge;

use rand::prelude::SliceRandom;
use rand::Rng;

/// Owns the engine for the duration of a simulation. All events are
/// synchronous and run to completion before returning.
pub struct Simulator {
	engine: PathEngine,
}

impl Simulator {
	pub fn new(engine: PathEngine) -> Self {
		Self { engine }
	}
	pub fn engine(&self) -> &PathEngine {
		&self.engine
	}

	/// Fails the edge `{u, v}`. The pair is canonicalized here; rejection
	/// leaves the engine untouched.
	pub fn simulate_failure(&mut self, u: NodeId, v: NodeId) -> Result<EventSummary, EngineError> {
		let e = self.canonical(u, v)?;
		log::info!("simulating failure of edge {}", e);
		let summary = self.engine.on_failure(e)?;
		log::info!("{}", summary);
		Ok(summary)
	}

	/// Recovers the edge `{u, v}`; only edges currently in the failed state
	/// qualify.
	pub fn simulate_recovery(&mut self, u: NodeId, v: NodeId) -> Result<EventSummary, EngineError> {
		let e = self.canonical(u, v)?;
		log::info!("simulating recovery of edge {}", e);
		let summary = self.engine.on_recovery(e)?;
		log::info!("{}", summary);
		Ok(summary)
	}

	/// Picks a random known edge and flips its state: a live edge fails, a
	/// failed edge recovers. Returns `None` when there is nothing to flip.
	pub fn random_event(&mut self) -> Result<Option<EventSummary>, EngineError> {
		let edges = self.engine.indexed_edges();
		let mut rng = rand::thread_rng();
		let e = match edges.choose(&mut rng) {
			Some(e) => *e,
			None => return Ok(None),
		};
		if rng.gen_bool(0.5) && !self.engine.is_failed(&e) {
			self.simulate_failure(e.p1(), e.p2()).map(Some)
		} else if self.engine.is_failed(&e) {
			self.simulate_recovery(e.p1(), e.p2()).map(Some)
		} else {
			log::debug!("random event left edge {} alone", e);
			Ok(None)
		}
	}

	fn canonical(&self, u: NodeId, v: NodeId) -> Result<Edge, EngineError> {
		if u == v {
			return Err(EngineError::InvalidDocument(format!(
				"edge endpoints must be distinct, got {},{}",
				u, v
			)));
		}
		Ok(Edge::new(u, v))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use meta::Parameters;

	fn simulator() -> Simulator {
		let network = data::Network {
			nodes: (1..=3).map(|node_id| data::NodeRecord { node_id }).collect(),
			links: vec![
				link(0, 1, 2, 1.0),
				link(1, 2, 3, 1.0),
				link(2, 1, 3, 3.0),
			],
			relays: vec![],
		};
		let services = vec![data::ServiceRecord {
			src: 1,
			snk: 3,
			source_otu: "OTU4".into(),
			target_otu: "OTU4".into(),
			m_width: 8,
			band_type: "C".into(),
			source_dim_colors: Default::default(),
			target_dim_colors: Default::default(),
		}];
		let mut engine = PathEngine::new(&network, services, Parameters::default()).unwrap();
		engine.initialize();
		Simulator::new(engine)
	}

	fn link(i: u64, u: NodeId, v: NodeId, w: f64) -> data::OmsLink {
		data::OmsLink {
			oms_id: i,
			remote_oms_id: i + 1000,
			src: u,
			snk: v,
			cost: n64(w),
			distance: n64(w * 40.0),
			ots: format!("OTS-{}", i),
			osnr: n64(20.0),
			slice: 4,
			colors: Default::default(),
		}
	}

	#[test]
	fn events_are_canonicalized() {
		let mut sim = simulator();
		// reversed endpoints still name the same edge
		let summary = sim.simulate_failure(2, 1).unwrap();
		assert_eq!(summary.edge, Edge::new(1, 2));
		assert_eq!(summary.working_paths_changed, 1);
		sim.simulate_recovery(2, 1).unwrap();
		assert!(sim.engine().failed_edges().is_empty());
	}

	#[test]
	fn degenerate_and_unknown_edges_are_rejected() {
		let mut sim = simulator();
		assert!(matches!(sim.simulate_failure(2, 2), Err(EngineError::InvalidDocument(_))));
		assert!(sim.simulate_failure(1, 9).is_err());
		assert!(sim.simulate_recovery(1, 2).is_err());
	}

	#[test]
	fn random_events_keep_the_engine_consistent() {
		let mut sim = simulator();
		for _ in 0..32 {
			sim.random_event().unwrap();
		}
		// every flip is validated, so the failed set and graph stay in step
		for e in sim.engine().failed_edges() {
			assert!(!sim.engine().graph().has_edge(e));
		}
	}
}
