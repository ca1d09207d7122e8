use anyhow::Context;
use cloudtree_core::ExportTarget;
use cloudtreed::app::App;
use cloudtreed::config::AppConfig;
use cloudtreed::logging::init_logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Help,
    CheckConfig,
    Verify,
    Export,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--check-config" => mode = CliMode::CheckConfig,
            "--verify" => mode = CliMode::Verify,
            "--export" => mode = CliMode::Export,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: cloudtreed [--check-config | --verify | --export]");
        println!("  (no flag)        Serve JSON-lines session requests on stdin/stdout");
        println!("  --check-config   Validate configuration and print the resolved values");
        println!("  --verify         Compare the byte store and metadata against the tree");
        println!("  --export         Export the tree as XML to the configured target");
        return Ok(());
    }

    let config = AppConfig::from_env().context("invalid configuration")?;
    init_logging(config.log_level);
    if mode == CliMode::CheckConfig {
        println!("{config}");
        return Ok(());
    }

    let app = App::bootstrap(config).await?;
    match mode {
        CliMode::Verify => {
            let result = app.service.verify().await;
            println!("{}", result.message);
            if let Some(report) = &result.payload {
                for missing in &report.missing {
                    println!("missing on disk: {missing}");
                }
            }
            match result.payload {
                Some(report) if report.missing.is_empty() && report.metadata_matches => Ok(()),
                Some(_) => anyhow::bail!("stores have drifted"),
                None => anyhow::bail!("verification failed: {}", result.message),
            }
        }
        CliMode::Export => {
            let result = app.service.export_xml().await;
            if !result.success {
                anyhow::bail!("export failed: {}", result.message);
            }
            match (app.config.export.target, result.payload) {
                (ExportTarget::Console, Some(xml)) => print!("{xml}"),
                _ => eprintln!("{}", result.message),
            }
            Ok(())
        }
        CliMode::Run | CliMode::Help | CliMode::CheckConfig => app.serve_stdio().await,
    }
}
