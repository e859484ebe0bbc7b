use anyhow::Context;
use clap::Parser;
use hcc_pipeline::config::studio::{StudioConfig, DEFAULT_STUDIO_CONFIG};
use hcc_pipeline::server::auth::{BasicCredentials, DEFAULT_PASSWORD, DEFAULT_USERNAME};
use hcc_pipeline::server::{self, AppState, GraphRegistry};
use hcc_pipeline::utils::{logger, validation::{self, Validate}};
use hcc_pipeline::Settings;
use std::net::SocketAddr;

#[derive(Debug, Parser)]
#[command(name = "hcc-server")]
#[command(about = "Job API and graph studio for the HCC pipeline")]
struct ServerArgs {
    #[command(flatten)]
    settings: Settings,

    /// Studio config listing the graphs to serve and the env file to load
    #[arg(long, default_value = DEFAULT_STUDIO_CONFIG)]
    config: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 2024)]
    port: u16,

    #[arg(long, env = "DEMO_USERNAME", default_value = DEFAULT_USERNAME)]
    username: String,

    #[arg(long, env = "DEMO_PASSWORD", default_value = DEFAULT_PASSWORD, hide_env_values = true)]
    password: String,

    #[arg(long, help = "Enable verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_result = dotenvy::dotenv();
    let args = ServerArgs::parse();
    logger::init_server_logger(args.verbose);
    hcc_pipeline::config::log_dotenv_result(&dotenv_result);

    let studio = StudioConfig::load_or_default(&args.config)?;
    // 重新解析，讓 studio env 檔中的變數生效
    let args = match studio.load_env()? {
        Some(_) => ServerArgs::parse(),
        None => args,
    };

    args.settings.validate()?;
    validation::validate_range("port", args.port, 1, u16::MAX)?;

    let credentials = BasicCredentials::new(&args.username, &args.password);
    if credentials.is_default() {
        tracing::warn!(
            "⚠️ Using default demo credentials for '{}'; set DEMO_USERNAME and DEMO_PASSWORD",
            credentials.username()
        );
    }

    let graphs = GraphRegistry::from_config(&studio, &args.settings)
        .context("Failed to build studio graphs")?;
    tracing::info!("Serving {} graph(s)", graphs.len());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;

    let state = AppState::new(args.settings, graphs);
    server::serve(addr, state, credentials).await?;
    Ok(())
}
