use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = fsq_api::Args::parse();

	fsq_api::run(args).await
}
