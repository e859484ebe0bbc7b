use clap::Parser;
use hcc_pipeline::utils::error::{PipelineError, EXIT_FAILURE};
use hcc_pipeline::utils::{logger, validation::Validate};
use hcc_pipeline::{BatchEngine, Settings};

#[derive(Debug, Parser)]
#[command(name = "hcc-pipeline")]
#[command(about = "Extract conditions from clinical notes and enrich them with HCC/ICD-10 codes")]
struct CliArgs {
    #[command(flatten)]
    settings: Settings,

    #[arg(long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(long, help = "Log CPU and memory usage at phase boundaries")]
    monitor: bool,
}

fn report_failure(e: &PipelineError) {
    tracing::error!(
        "❌ Batch failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("Error: {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
}

#[tokio::main]
async fn main() {
    // .env 先載入，已存在的環境變數優先
    let dotenv_result = dotenvy::dotenv();
    let args = CliArgs::parse();

    logger::init_cli_logger(args.verbose);
    tracing::info!("Starting hcc-pipeline CLI");
    hcc_pipeline::config::log_dotenv_result(&dotenv_result);
    if args.verbose {
        tracing::debug!("Settings: {:?}", args.settings);
    }

    if let Err(e) = args.settings.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("Error: {}", e.user_friendly_message());
        std::process::exit(EXIT_FAILURE);
    }

    if args.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let engine = BatchEngine::new(args.settings).with_monitoring(args.monitor);

    match engine.run().await {
        Ok(report) if report.is_success() => {
            println!(
                "✅ Processed {} note(s), output saved to: {}",
                report.outputs.len(),
                engine.settings().output_dir
            );
        }
        Ok(report) => {
            println!(
                "⚠️ Processed {}/{} note(s), {} failed, output saved to: {}",
                report.outputs.len(),
                report.total(),
                report.errors.len(),
                engine.settings().output_dir
            );
            std::process::exit(report.exit_code());
        }
        Err(e) => {
            report_failure(&e);
            std::process::exit(e.exit_code());
        }
    }
}
