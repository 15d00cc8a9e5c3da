//! Tabular export functions.
//!
//! Renders a persisted engine state into CSV files for inspection. Node
//! sequences are written as `1-2-3`, edge sequences as `;`-separated `u,v`
//! keys; any field containing the key grammar gets quoted.

use crate::*;
use data::{EngineState, PathRecord};

use std::io::Write;

use itertools::Itertools;

/// Writes the four state tables next to each other as
/// `{prefix}.paths.csv`, `{prefix}.backup_paths.csv`,
/// `{prefix}.edge_services.csv` and `{prefix}.failed_edges.csv`.
pub fn write_csvs(state: &EngineState, prefix: &str) -> std::io::Result<()> {
	let mut f = std::fs::File::create(format!("{}.paths.csv", prefix))?;
	writeln!(f, "service_index,path,edges")?;
	for (s, rec) in &state.working_paths {
		writeln!(f, "{},{},{}", s, fmt_nodes(rec), field(&fmt_edges(rec)))?;
	}

	let mut f = std::fs::File::create(format!("{}.backup_paths.csv", prefix))?;
	writeln!(f, "service_index,failed_edge,path,edges")?;
	for (s, row) in &state.backup_paths {
		for (e, rec) in row {
			writeln!(f, "{},{},{},{}", s, field(&e.to_string()), fmt_nodes(rec), field(&fmt_edges(rec)))?;
		}
	}

	let mut f = std::fs::File::create(format!("{}.edge_services.csv", prefix))?;
	writeln!(f, "edge,services")?;
	for (e, services) in &state.edge_service_index {
		writeln!(f, "{},{}", field(&e.to_string()), services.iter().join(";"))?;
	}

	let mut f = std::fs::File::create(format!("{}.failed_edges.csv", prefix))?;
	writeln!(f, "edge")?;
	for e in &state.failed_edges {
		writeln!(f, "{}", field(&e.to_string()))?;
	}
	Ok(())
}

fn fmt_nodes(rec: &PathRecord) -> String {
	rec.nodes.iter().join("-")
}

fn fmt_edges(rec: &PathRecord) -> String {
	rec.edges.iter().join(";")
}

/// Minimal CSV quoting: wrap the field when it contains a separator
fn field(s: &str) -> String {
	if s.contains(',') || s.contains('"') {
		format!("\"{}\"", s.replace('"', "\"\""))
	} else {
		s.to_string()
	}
}
