//! Data types for the network, service and state documents.
//!
//! Link, relay and service records carry a number of optical attributes (OTU
//! types, band, colour sets) that path selection never consults; they are
//! parsed, validated and passed through untouched.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::str::FromStr;

use crate::*;
use graph::{Edge, Path};

use serde::*;

/// A set of usable colours, written as `:`-separated items, each a single
/// number or an inclusive `a-b` range (e.g. `"1-4:7:9-10"`).
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct ColorSet(Vec<u32>);

impl ColorSet {
	pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
		self.0.iter().cloned()
	}
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
	pub fn len(&self) -> usize {
		self.0.len()
	}
}

impl FromStr for ColorSet {
	type Err = String;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut colors = Vec::new();
		for item in s.split(':') {
			let item = item.trim();
			if item.is_empty() {
				continue;
			}
			if let Some((a, b)) = item.split_once('-') {
				let a: u32 = a.trim().parse().map_err(|_| format!("bad colour range {:?}", item))?;
				let b: u32 = b.trim().parse().map_err(|_| format!("bad colour range {:?}", item))?;
				if a > b {
					return Err(format!("descending colour range {:?}", item));
				}
				colors.extend(a..=b);
			} else {
				colors.push(item.parse().map_err(|_| format!("bad colour {:?}", item))?);
			}
		}
		colors.sort_unstable();
		colors.dedup();
		Ok(Self(colors))
	}
}

impl std::fmt::Display for ColorSet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut first = true;
		let mut i = 0;
		while i < self.0.len() {
			// compress a consecutive run back into a-b form
			let mut j = i;
			while j + 1 < self.0.len() && self.0[j + 1] == self.0[j] + 1 {
				j += 1;
			}
			if !first {
				write!(f, ":")?;
			}
			if j > i {
				write!(f, "{}-{}", self.0[i], self.0[j])?;
			} else {
				write!(f, "{}", self.0[i])?;
			}
			first = false;
			i = j + 1;
		}
		Ok(())
	}
}

impl Serialize for ColorSet {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for ColorSet {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(de::Error::custom)
	}
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
	pub node_id: NodeId,
}

/// One OMS link of the mesh. `cost` drives path selection; everything after
/// `distance` is opaque optical data.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OmsLink {
	pub oms_id: u64,
	pub remote_oms_id: u64,
	pub src: NodeId,
	pub snk: NodeId,
	pub cost: N64,
	pub distance: N64,
	pub ots: String,
	pub osnr: N64,
	pub slice: u64,
	#[serde(default)]
	pub colors: ColorSet,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Relay {
	pub relay_id: u64,
	pub related_relay_id: u64,
	pub node_id: NodeId,
	pub local_id: u64,
	pub related_local_id: u64,
	#[serde(default)]
	pub dim_colors: ColorSet,
}

/// A service to be carried from `src` to `snk`. Only the endpoints influence
/// path selection.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
	pub src: NodeId,
	pub snk: NodeId,
	pub source_otu: String,
	pub target_otu: String,
	#[serde(rename = "m_width")]
	pub m_width: u64,
	pub band_type: String,
	#[serde(default)]
	pub source_dim_colors: ColorSet,
	#[serde(default)]
	pub target_dim_colors: ColorSet,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Network {
	pub nodes: Vec<NodeRecord>,
	pub links: Vec<OmsLink>,
	#[serde(default)]
	pub relays: Vec<Relay>,
}

pub type Services = Vec<ServiceRecord>;

/// A path as persisted: node sequence plus edge sequence, edges in the
/// `"u,v"` key grammar.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct PathRecord {
	pub nodes: Vec<NodeId>,
	pub edges: Vec<Edge>,
}

impl From<&Path> for PathRecord {
	fn from(p: &Path) -> Self {
		Self {
			nodes: p.nodes().to_vec(),
			edges: p.edges().to_vec(),
		}
	}
}

impl TryFrom<PathRecord> for Path {
	type Error = String;
	fn try_from(rec: PathRecord) -> Result<Self, Self::Error> {
		let path = Path::from_nodes(rec.nodes).ok_or_else(|| "path record with a degenerate node sequence".to_string())?;
		if path.edges() != &rec.edges[..] {
			return Err(format!("path record edges do not match node sequence {}", path));
		}
		Ok(path)
	}
}

/// The persisted engine state: everything needed to resume a simulation on
/// top of a freshly loaded network.
#[derive(Serialize, Deserialize, Clone, PartialEq, Default, Debug)]
pub struct EngineState {
	pub working_paths: BTreeMap<usize, PathRecord>,
	pub backup_paths: BTreeMap<usize, BTreeMap<Edge, PathRecord>>,
	pub edge_service_index: BTreeMap<Edge, Vec<usize>>,
	pub failed_edges: Vec<Edge>,
}
