//! leadstream: terminal front end for the lead pipeline.
//!
//! ## Subcommands
//!
//! - `login` / `logout`: manage the local session
//! - `stages`, `leads`, `show`, `funnel`: read-only views
//! - `advance` / `retreat`: move a lead one stage
//! - `watch`: keep a session open and reprint leads on every change

mod identity;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use leadstream_core::{
    is_terminal, pipeline_view, AppConfig, AuthState, Authenticator, Direction, FunnelSummary,
    LeadId, LocalStore, Notifier, Session, SessionDeps, StageCatalog,
};
use leadstream_observability::LogConfig;
use tracing::info;

use crate::identity::LocalIdentityProvider;
use crate::render::ConsoleNotifier;

#[derive(Parser)]
#[command(name = "leadstream")]
#[command(about = "Track sales leads through the stage pipeline")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(long, global = true, env = "LEADSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print command output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and remember the client
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Sign out and forget the client
    Logout,

    /// List the pipeline stages
    Stages,

    /// List leads for the signed-in client
    Leads,

    /// Show one lead and its pipeline
    Show {
        #[arg(value_name = "LEAD_ID")]
        id: String,
    },

    /// Move a lead to the next stage
    Advance {
        #[arg(value_name = "LEAD_ID")]
        id: String,
    },

    /// Move a lead back one stage
    Retreat {
        #[arg(value_name = "LEAD_ID")]
        id: String,
    },

    /// Lead counts per stage
    Funnel,

    /// Keep the session open, refreshing in the background
    Watch,
}

struct App {
    config: AppConfig,
    local: LocalStore,
    auth: Arc<Authenticator>,
    http: reqwest::Client,
    json: bool,
}

impl App {
    fn new(config: AppConfig, json: bool) -> anyhow::Result<Self> {
        let data_dir = config
            .resolve_data_dir()
            .context("resolving data directory")?;
        let local = LocalStore::new(data_dir);
        let provider = Arc::new(LocalIdentityProvider::new(
            local.clone(),
            config.client_name.clone(),
        ));
        let auth = Arc::new(Authenticator::new(provider, local.clone()));
        Ok(Self {
            config,
            local,
            auth,
            http: reqwest::Client::new(),
            json,
        })
    }

    fn catalog(&self) -> Arc<StageCatalog> {
        Arc::new(StageCatalog::new(self.config.stage_source(self.http.clone())))
    }

    async fn session(&self) -> anyhow::Result<Session> {
        if let AuthState::SignedOut = self.auth.restore().await {
            anyhow::bail!("Not signed in. Run `leadstream login --email <EMAIL> --password <PASSWORD>`.");
        }
        let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
        let mut deps = SessionDeps::new(
            self.config.lead_gateway(self.http.clone()),
            self.catalog(),
            Arc::clone(&self.auth),
            notifier,
        );
        deps.local = Some(self.local.clone());
        deps.poll_interval = self.config.poll_interval();
        deps.session_budget = self.config.session_budget();
        let session = Session::start(deps).await?;
        session.synced().await;
        Ok(session)
    }

    fn print<T: serde::Serialize + ?Sized>(&self, value: &T, text: String) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            print!("{text}");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let log_dir = config.resolve_data_dir().ok().map(|d| d.join("logs"));
    let _log_guard = leadstream_observability::init(LogConfig {
        json: cli.json_logs,
        log_dir,
    })?;
    info!(backend = ?config.backend, "leadstream starting");

    let app = App::new(config, cli.json)?;
    run(&app, cli.command).await
}

async fn run(app: &App, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Login { email, password } => {
            let client = app.auth.sign_in(&email, &password).await?;
            println!("Signed in as {client}");
        }
        Commands::Logout => {
            app.auth.sign_out().await?;
            println!("Signed out");
        }
        Commands::Stages => {
            let stages = app.catalog().fetch_stages().await;
            app.print(stages.stages(), render::stages_table(&stages))?;
        }
        Commands::Leads => {
            let session = app.session().await?;
            let leads = session.store().leads();
            app.print(&leads, render::leads_table(session.stages(), &leads))?;
            session.shutdown().await;
        }
        Commands::Show { id } => {
            let session = app.session().await?;
            let lead = session.controller().select(&LeadId::new(id.as_str()));
            let result = match lead {
                Some(lead) => {
                    let steps = pipeline_view(session.stages(), &lead);
                    let terminal = is_terminal(session.stages(), &lead);
                    app.print(&steps, render::lead_detail(&lead, &steps, terminal))
                }
                None => Err(anyhow::anyhow!("Lead {id} not found")),
            };
            session.shutdown().await;
            result?;
        }
        Commands::Advance { id } => transition(app, &id, Direction::Forward).await?,
        Commands::Retreat { id } => transition(app, &id, Direction::Backward).await?,
        Commands::Funnel => {
            let session = app.session().await?;
            let summary = FunnelSummary::compute(session.stages(), &session.store().leads());
            app.print(&summary, render::funnel_table(&summary))?;
            session.shutdown().await;
        }
        Commands::Watch => watch(app).await?,
    }
    Ok(())
}

async fn transition(app: &App, id: &str, direction: Direction) -> anyhow::Result<()> {
    let session = app.session().await?;
    let outcome = session
        .controller()
        .transition_by_id(&LeadId::new(id), direction)
        .await;
    println!("{}", render::outcome_line(&outcome, session.stages()));
    session.shutdown().await;
    Ok(())
}

async fn watch(app: &App) -> anyhow::Result<()> {
    let session = app.session().await?;
    let mut changes = session.store().subscribe();
    print!(
        "{}",
        render::leads_table(session.stages(), &session.store().leads())
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                break;
            }
            _ = session.closed() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                println!();
                print!(
                    "{}",
                    render::leads_table(session.stages(), &session.store().leads())
                );
            }
        }
    }
    session.shutdown().await;
    Ok(())
}
