use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use zerobuild_preview::export::StaticExporter;
use zerobuild_preview::sandbox::local::LocalEnvironment;
use zerobuild_preview::store::BuildStore;
use zerobuild_preview::{gateway, SandboxContext, WorkspaceConfig, WorkspaceSession};

/// Live preview workspace for sandboxed dev servers.
#[derive(Parser, Debug)]
#[command(name = "zerobuild-preview", version, about)]
struct Cli {
    /// Config file (defaults to config.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot the sandbox, start the dev server and print the preview URL
    Up,

    /// Run one command inside a prepared sandbox
    Run {
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Serve static export builds over HTTP
    Serve {
        /// Overrides `gateway.bind`
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = WorkspaceConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Up => up(config).await,
        Commands::Run { program, args } => {
            let code = run(config, &program, &args).await?;
            std::process::exit(code);
        }
        Commands::Serve { bind } => {
            let mut gateway_config = config.gateway.clone();
            if let Some(bind) = bind {
                gateway_config.bind = bind;
            }
            let exporter = StaticExporter::new(config.export.clone(), BuildStore::new());
            gateway::serve(exporter, &gateway_config).await
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .init();
}

fn open_session(config: WorkspaceConfig) -> Result<(Arc<SandboxContext>, WorkspaceSession)> {
    let environment = Arc::new(LocalEnvironment::from_config(&config));
    let context = Arc::new(SandboxContext::new(environment, config)?);
    let session = WorkspaceSession::new(Arc::clone(&context));
    Ok((context, session))
}

async fn shutdown(context: &SandboxContext, session: &WorkspaceSession) {
    session.teardown();
    context.shutdown().await;
}

async fn up(config: WorkspaceConfig) -> Result<()> {
    let (context, session) = open_session(config)?;
    session.ensure_ready().await;
    if let Some(err) = session.state().last_error.filter(|_| !session.state().ready) {
        anyhow::bail!(err);
    }

    tokio::select! {
        url = session.wait_for_preview() => match url {
            Some(url) => println!("Preview ready at {url}"),
            None => tracing::warn!(
                error = session.state().last_error.as_deref().unwrap_or("unknown"),
                "Dev server did not report a preview URL"
            ),
        },
        _ = tokio::signal::ctrl_c() => {
            shutdown(&context, &session).await;
            return Ok(());
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown(&context, &session).await;
    Ok(())
}

async fn run(config: WorkspaceConfig, program: &str, args: &[String]) -> Result<i32> {
    let (context, session) = open_session(config)?;
    session.ensure_sandbox().await;

    let result = async {
        let running = session.run_command(program, args).await?;
        let output = running.output().clone();
        let code = running.wait().await?;
        print!("{}", output.joined());
        Ok::<_, anyhow::Error>(code)
    }
    .await;

    shutdown(&context, &session).await;
    result
}
