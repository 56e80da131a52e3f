use std::path::PathBuf;

use structopt::StructOpt;

use strata_util::error::Error;

use crate::server;

#[derive(StructOpt, Debug)]
#[structopt(name = "strata")]
pub struct Opt {
	#[structopt(subcommand)]
	pub cmd: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
	/// Run the coordinator (metadata, membership, placement)
	#[structopt(name = "coordinator")]
	Coordinator(ServerOpt),

	/// Run a block server (storage, replication)
	#[structopt(name = "block")]
	Block(ServerOpt),
}

#[derive(StructOpt, Debug)]
pub struct ServerOpt {
	/// Configuration file
	#[structopt(short = "c", long = "config", default_value = "./config.toml")]
	pub config_file: PathBuf,
}

pub async fn run(opt: Opt) -> Result<(), Error> {
	match opt.cmd {
		Command::Coordinator(server_opt) => server::run_coordinator(server_opt.config_file).await,
		Command::Block(server_opt) => server::run_block_server(server_opt.config_file).await,
	}
}
