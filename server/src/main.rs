use clap::Parser;
use core_server::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	let args = Args::parse();
	core_server::main(args).await
}
