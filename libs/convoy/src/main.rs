use clap::Parser;
use convoy::config::Config;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    let args = Cli::parse();
    let config = if args.inner.demo {
        Config::demo()?
    } else {
        Config::parse(args.config)?
    };
    args.inner.run(config).await
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    // Path to the config file
    #[arg(short, long)]
    config: Option<String>,
    #[clap(flatten)]
    inner: convoy::cli::Args,
}
