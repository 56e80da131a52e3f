#[macro_use]
extern crate tracing;

mod cli;
mod server;

use std::process::ExitCode;

use structopt::StructOpt;

fn main() -> ExitCode {
	tracing_subscriber::fmt::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let opt = cli::Opt::from_args();

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("Failed to initialize tokio runtime");

	let result = runtime.block_on(cli::run(opt));

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{}", e);
			ExitCode::FAILURE
		}
	}
}
