use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vtwiki_core::PageId;
use vtwiki_storage::PgStore;
use vtwiki_sync::{Pipeline, SweepKind, SweepRun, SyncConfig};

#[derive(Debug, Parser)]
#[command(name = "vtwiki-cli")]
#[command(about = "VTuber wiki profile synthesizer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TreeKind {
    Family,
    Agency,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rebuild one profile from its wiki page.
    Synthesize {
        id: PageId,
        /// Skip the staleness check.
        #[arg(long)]
        force: bool,
    },
    /// Rebuild one agency from its category page.
    SynthesizeAgency { id: PageId },
    /// Refresh profiles and agencies past their stale age.
    SweepStale {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Synthesize wiki pages and agencies that have no record yet.
    SweepMissing {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a relationship tree as JSON.
    Tree {
        #[arg(value_enum)]
        kind: TreeKind,
    },
    /// Consume refresh requests and run the cron sweeps until ctrl-c.
    Run,
    Migrate,
}

fn report(kind: SweepKind, run: &SweepRun) {
    println!(
        "{kind:?}: enqueued={} profiles ok={} failed={} agencies ok={} failed={}",
        run.enqueued,
        run.profiles.succeeded,
        run.profiles.failed,
        run.agencies.succeeded,
        run.agencies.failed
    );
}

async fn sweep_pair(pipeline: &Pipeline, kinds: [SweepKind; 2], limit: usize) -> Result<()> {
    for kind in kinds {
        let run = pipeline.run_sweep(kind, limit).await?;
        report(kind, &run);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("loading configuration")?;

    if let Commands::Migrate = cli.command {
        let store = PgStore::connect(&config.database_url)
            .await
            .context("connecting to database")?;
        store.migrate().await.context("running migrations")?;
        println!("migrations applied");
        return Ok(());
    }

    let default_limit = config.sweep_limit;
    let pipeline = Pipeline::connect(config).await?;
    match cli.command {
        Commands::Synthesize { id, force } => {
            let outcome = pipeline.synthesizer().synthesize_profile(id, force).await?;
            println!("profile {id}: {outcome:?}");
        }
        Commands::SynthesizeAgency { id } => {
            let outcome = pipeline.synthesizer().synthesize_agency(id).await?;
            println!("agency {id}: {outcome:?}");
        }
        Commands::SweepStale { limit } => {
            sweep_pair(
                &pipeline,
                [SweepKind::StaleAgencies, SweepKind::StaleProfiles],
                limit.unwrap_or(default_limit),
            )
            .await?;
        }
        Commands::SweepMissing { limit } => {
            sweep_pair(
                &pipeline,
                [SweepKind::MissingAgencies, SweepKind::MissingProfiles],
                limit.unwrap_or(default_limit),
            )
            .await?;
        }
        Commands::Tree { kind } => {
            let tree = match kind {
                TreeKind::Family => pipeline.family_tree().await?,
                TreeKind::Agency => pipeline.agency_tree().await?,
            };
            info!(nodes = tree.nodes.len(), edges = tree.edges.len(), "tree built");
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Commands::Run => pipeline.run().await?,
        Commands::Migrate => {}
    }

    Ok(())
}
