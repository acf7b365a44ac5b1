//! Binary entrypoint (§4.L): parses CLI args, starts the logger, builds a
//! single-upstream resolver from the configured target, and serves the
//! gateway's axum router.

mod args;
mod logger;

use std::sync::Arc;

use clap::Parser;
use gateway::resolver::StaticResolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // §4.I/§6.5: startup failures (missing config, bad flags) exit 1, not
    // clap's default exit(2) for a missing required argument.
    let args = match args::Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let config = args.into_config()?;

    logger::init(config.log_level.as_filter_str());

    let resolver = Arc::new(StaticResolver::new(
        config.upstream_base_url.clone(),
        config.upstream_api_path.clone(),
        config.upstream_api_key.clone(),
    ));

    let router = gateway::router(resolver);

    let addr = format!("0.0.0.0:{}", config.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!(target: "gateway", "listening on {addr}");

    axum::serve(listener, router).await?;

    Ok(())
}
