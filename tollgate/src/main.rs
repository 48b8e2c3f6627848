use clap::Parser;
use tokio::time::sleep;
use tracing::info;

use tollgate::app_state::AppState;
use tollgate::http::setup_http_server;
use tollgate::init_telemetry::init_telemetry_and_tracing;
use tollgate::scheduler::setup_scheduler;
use tollgate::settings::{config::Settings, load_env_files};

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Tiered token-bucket admission gate for HTTP APIs")]
#[clap(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Parser)]
enum Commands {
    /// Show current configuration and exit
    Config,
    /// Start the tollgate server (default)
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_files(std::path::Path::new("."));

    let cli = Cli::parse();

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Config => {
            let settings = Settings::new()?;
            println!("{:#?}", &settings);
            return Ok(());
        }
        Commands::Run => {
            // Continue with the normal server startup
        }
    }

    let mut handles = vec![];

    let settings = Settings::new()?;
    init_telemetry_and_tracing(&settings)?;
    let app_state = AppState::new(settings).await?;

    let telemetry_enabled = app_state.settings.telemetry_enabled("traces");

    // Setup http server.
    {
        let handle = setup_http_server(
            app_state.clone(),
            &app_state.settings.api.bind_address,
            telemetry_enabled,
        )
        .await?;

        handles.push(handle);
    }

    // Setup bucket eviction
    {
        let handle = setup_scheduler(app_state.clone()).await?;
        handles.push(handle);
    }

    sleep(std::time::Duration::from_millis(100)).await;

    loop {
        // Remove and await completed handles
        handles.retain(|handle| !handle.is_finished());

        // Break the loop if no more handles are running
        if handles.is_empty() {
            info!("All tasks are done");
            break;
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    }

    Ok(())
}
