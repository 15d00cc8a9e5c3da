//! # _fail 'em & heal 'em_
//!
//! CLI for computing working & protection paths of services over an optical
//! mesh network, and for replaying link failure/recovery events against them.

use std::io::{BufRead, Write};

use clap::{crate_version, App, Arg, SubCommand};
mod data;
mod engine;
mod export;
mod graph;
mod meta;
mod sim;
pub use noisy_float::prelude::{n64, N64};
pub use try_all::TryMapAll;

pub type NodeId = u64;

#[derive(Clone, Copy, PartialEq, Debug)]
enum Command {
	Fail(NodeId, NodeId),
	Recover(NodeId, NodeId),
	Random,
	Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
	let mut parts = line.trim().split_whitespace();
	let command = match parts.next() {
		Some("f") | Some("fail") => {
			let (u, v) = parse_pair(parts.next())?;
			Command::Fail(u, v)
		}
		Some("r") | Some("recover") => {
			let (u, v) = parse_pair(parts.next())?;
			Command::Recover(u, v)
		}
		Some("x") | Some("random") => Command::Random,
		Some("q") | Some("quit") => Command::Quit,
		Some(other) => return Err(format!("unknown command {:?} (expected f, r, x or q)", other)),
		None => return Err("empty command".to_string()),
	};
	if parts.next().is_some() {
		return Err("trailing input after command".to_string());
	}
	Ok(command)
}

fn parse_pair(part: Option<&str>) -> Result<(NodeId, NodeId), String> {
	let part = part.ok_or_else(|| "expected an edge as 'u,v'".to_string())?;
	let (u, v) = part
		.split_once(',')
		.ok_or_else(|| format!("edge {:?} is not of the form 'u,v'", part))?;
	let u = u.trim().parse().map_err(|_| format!("bad node id {:?}", u))?;
	let v = v.trim().parse().map_err(|_| format!("bad node id {:?}", v))?;
	Ok((u, v))
}

fn build_engine(matches: &clap::ArgMatches<'_>) -> std::io::Result<engine::PathEngine> {
	let network: data::Network = serde_json::from_reader(&std::fs::File::open(matches.value_of("network").unwrap())?)
		.expect("Network invalid JSON");
	let services: data::Services = serde_json::from_reader(&std::fs::File::open(matches.value_of("services").unwrap())?)
		.expect("Services invalid JSON");
	let params: meta::Parameters = match matches.value_of("meta") {
		Some(f) => serde_yaml::from_reader(&std::fs::File::open(f)?).expect("Meta parameters invalid YAML"),
		None => Default::default(),
	};
	log::info!(
		"Loaded {} nodes, {} links, {} relays and {} services",
		network.nodes.len(),
		network.links.len(),
		network.relays.len(),
		services.len()
	);
	match engine::PathEngine::new(&network, services, params) {
		Ok(e) => Ok(e),
		Err(e) => {
			log::error!("{}", e);
			std::process::exit(2);
		}
	}
}

fn save_state(state: &data::EngineState, path: &str, csv: Option<&str>) -> std::io::Result<()> {
	serde_json::to_writer_pretty(&std::fs::File::create(path)?, state).expect("Failed to serialize state");
	if let Some(prefix) = csv {
		export::write_csvs(state, prefix)?;
	}
	Ok(())
}

fn report(
	outcome: Result<Option<engine::EventSummary>, engine::EngineError>,
	sim: &sim::Simulator,
	state_out: &str,
	csv: Option<&str>,
) -> std::io::Result<()> {
	match outcome {
		Ok(Some(summary)) => {
			println!("{}", summary);
			save_state(&sim.engine().snapshot(), state_out, csv)?;
			println!("simulation state saved");
		}
		Ok(None) => println!("nothing to do"),
		Err(e) => println!("rejected: {}", e),
	}
	Ok(())
}

fn prompt() -> std::io::Result<()> {
	print!("> ");
	std::io::stdout().flush()
}

fn run_event_loop(sim: &mut sim::Simulator, state_out: &str, csv: Option<&str>) -> std::io::Result<()> {
	println!("commands: 'f u,v' fail an edge | 'r u,v' recover it | 'x' random event | 'q' quit");
	prompt()?;
	let stdin = std::io::stdin();
	for line in stdin.lock().lines() {
		let line = line?;
		if !line.trim().is_empty() {
			match parse_command(&line) {
				Ok(Command::Quit) => break,
				Ok(Command::Fail(u, v)) => {
					let outcome = sim.simulate_failure(u, v).map(Some);
					report(outcome, sim, state_out, csv)?;
				}
				Ok(Command::Recover(u, v)) => {
					let outcome = sim.simulate_recovery(u, v).map(Some);
					report(outcome, sim, state_out, csv)?;
				}
				Ok(Command::Random) => {
					let outcome = sim.random_event();
					report(outcome, sim, state_out, csv)?;
				}
				Err(e) => println!("{}", e),
			}
		}
		prompt()?;
	}
	Ok(())
}

fn main() -> std::io::Result<()> {
	env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));
	let matches = App::new("Mesh Path Protection")
							.version(crate_version!())
							.about("Keep the light flowing!")
							.subcommand(SubCommand::with_name("init")
								.about("Compute initial working and protection paths")
								.arg(Arg::with_name("network")
										.takes_value(true)
										.required(true)
										.index(1)
										.help("Network JSON (nodes, links, relays)"))
								.arg(Arg::with_name("services")
										.takes_value(true)
										.required(true)
										.index(2)
										.help("Services JSON"))
								.arg(Arg::with_name("output")
										.takes_value(true)
										.required(true)
										.index(3)
										.help("Output state JSON"))
								.arg(Arg::with_name("meta")
										.short("m")
										.takes_value(true)
										.help("Engine parameters YAML"))
								.arg(Arg::with_name("csv")
										.short("c")
										.takes_value(true)
										.help("Also export the CSV tables under this prefix"))
							)
							.subcommand(SubCommand::with_name("simulate")
								.about("Replay failure and recovery events interactively")
								.arg(Arg::with_name("network")
										.takes_value(true)
										.required(true)
										.index(1)
										.help("Network JSON (nodes, links, relays)"))
								.arg(Arg::with_name("services")
										.takes_value(true)
										.required(true)
										.index(2)
										.help("Services JSON"))
								.arg(Arg::with_name("state")
										.takes_value(true)
										.required(true)
										.index(3)
										.help("State JSON to resume from"))
								.arg(Arg::with_name("output")
										.takes_value(true)
										.required(true)
										.index(4)
										.help("Output state JSON, rewritten after every event"))
								.arg(Arg::with_name("meta")
										.short("m")
										.takes_value(true)
										.help("Engine parameters YAML"))
								.arg(Arg::with_name("csv")
										.short("c")
										.takes_value(true)
										.help("Also export the CSV tables under this prefix"))
							)
							.subcommand(SubCommand::with_name("export")
								.about("Convert a state JSON into CSV tables")
								.arg(Arg::with_name("state")
										.takes_value(true)
										.required(true)
										.index(1)
										.help("State JSON"))
								.arg(Arg::with_name("prefix")
										.takes_value(true)
										.required(true)
										.index(2)
										.help(r#"CSV files prefix - the generated files will be named alike "{prefix}.paths.csv""#))
							)
							.get_matches();
	log::info!("Loading...");
	if let Some(matches) = matches.subcommand_matches("init") {
		let mut engine = build_engine(matches)?;
		engine.initialize();
		save_state(&engine.snapshot(), matches.value_of("output").unwrap(), matches.value_of("csv"))?;
		log::info!("Initial path computation complete and state saved");
	} else if let Some(matches) = matches.subcommand_matches("simulate") {
		let mut engine = build_engine(matches)?;
		let state: data::EngineState =
			serde_json::from_reader(&std::fs::File::open(matches.value_of("state").unwrap())?).expect("State invalid JSON");
		if let Err(e) = engine.restore(state) {
			log::error!("{}", e);
			std::process::exit(2);
		}
		let mut sim = sim::Simulator::new(engine);
		run_event_loop(&mut sim, matches.value_of("output").unwrap(), matches.value_of("csv"))?;
	} else if let Some(matches) = matches.subcommand_matches("export") {
		let state: data::EngineState =
			serde_json::from_reader(&std::fs::File::open(matches.value_of("state").unwrap())?).expect("State invalid JSON");
		export::write_csvs(&state, matches.value_of("prefix").unwrap())?;
		log::info!("Exported CSV tables");
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn command_grammar() {
		assert_eq!(parse_command("f 1,2"), Ok(Command::Fail(1, 2)));
		assert_eq!(parse_command("  fail 9,3 "), Ok(Command::Fail(9, 3)));
		assert_eq!(parse_command("r 2,1"), Ok(Command::Recover(2, 1)));
		assert_eq!(parse_command("x"), Ok(Command::Random));
		assert_eq!(parse_command("q"), Ok(Command::Quit));
		assert!(parse_command("f").is_err());
		assert!(parse_command("f 1").is_err());
		assert!(parse_command("f 1,b").is_err());
		assert!(parse_command("f 1,2 3").is_err());
		assert!(parse_command("g 1,2").is_err());
		assert!(parse_command("").is_err());
	}
}
