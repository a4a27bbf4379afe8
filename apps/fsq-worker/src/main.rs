use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = fsq_worker::Args::parse();

	fsq_worker::run(args).await
}
