use clap::Parser;
use color_eyre::Result;
use core_client::tick_reporter::TickReporter;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
	/// How many local ticks to simulate before exiting.
	#[clap(long, default_value_t = 5)]
	ticks: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let env_filter =
		EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();

	tracing_subscriber::fmt()
		.with_target(true)
		.with_level(true)
		.with_env_filter(env_filter)
		.init();

	let args = Args::parse();
	let mut reporter = TickReporter::new();

	for _ in 0..args.ticks {
		let tick = reporter.advance();
		let heartbeat = reporter.heartbeat(tick * 50);
		info!(?heartbeat, "sending heartbeat");
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;
	}

	Ok(())
}
