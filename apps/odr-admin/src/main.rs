use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = odr_admin::Args::parse();

	odr_admin::run(args).await
}
