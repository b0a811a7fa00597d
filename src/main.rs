// -----------------------------------------------------------------------------
// rbdfio-bench - librbd fio benchmark driver for Ceph clusters
// -----------------------------------------------------------------------------

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rbdfio_bench::cluster::CephCluster;
use rbdfio_bench::collector::ResultCollector;
use rbdfio_bench::command::{ClientContext, CommandBuilder, FioSettings};
use rbdfio_bench::config::{BenchConfig, ExecutorKind};
use rbdfio_bench::coordinator::{plan_runs, run_directory};
use rbdfio_bench::executor::{self, HostGroup};
use rbdfio_bench::{monitoring, Collaborators, RunCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Builder as RtBuilder;
use tracing::info;

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(name = "rbdfio-bench", version, about = "Orchestrates librbd fio benchmarks across Ceph client nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark described by a config file
    ///
    /// Examples:
    ///   rbdfio-bench run --config bench.yaml --archive results/run1
    ///   rbdfio-bench -v run --config bench.yaml --archive /tmp/r --dry-run
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Local results directory; the run is skipped if it already exists
        #[arg(long)]
        archive: PathBuf,
        /// Remote scratch directory on the clients
        #[arg(long, default_value = "/tmp/cbt/00000000/LibrbdFio")]
        run_dir: PathBuf,
        /// Log every remote command instead of running it
        #[arg(long)]
        dry_run: bool,
        /// Skip pool/image creation and idle monitoring
        #[arg(long)]
        skip_init: bool,
    },
    /// Print the ordered runs and their directories without touching any host
    Plan {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "/tmp/cbt/00000000/LibrbdFio")]
        run_dir: PathBuf,
    },
    /// Print the fio command of the first planned run
    Command {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value_t = 0)]
        volume: u32,
        /// Override the configured runtime (seconds)
        #[arg(long)]
        runtime: Option<u64>,
        #[arg(long, default_value = "/tmp/cbt/00000000/LibrbdFio")]
        run_dir: PathBuf,
    },
    /// Extract json payloads from collected fio output
    ///
    /// Examples:
    ///   rbdfio-bench parse --dir results/run1/op_size-04194304/... --hosts c1,c2 --volumes 2
    Parse {
        #[arg(long)]
        dir: PathBuf,
        /// Comma-separated client hosts
        #[arg(long, value_delimiter = ',')]
        hosts: Vec<String>,
        #[arg(long, default_value_t = 1)]
        volumes: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env may carry RUST_LOG and ssh settings
    dotenvy::dotenv().ok();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rbdfio_bench={}", level)));
    fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            config,
            archive,
            run_dir,
            dry_run,
            skip_init,
        } => run_cmd(config, archive, run_dir, dry_run, skip_init),
        Commands::Plan { config, run_dir } => plan_cmd(config, run_dir),
        Commands::Command {
            config,
            volume,
            runtime,
            run_dir,
        } => command_cmd(config, volume, runtime, run_dir),
        Commands::Parse { dir, hosts, volumes } => parse_cmd(dir, hosts, volumes),
    }
}

fn run_cmd(config_path: PathBuf, archive: PathBuf, run_dir: PathBuf, dry_run: bool, skip_init: bool) -> Result<()> {
    let mut config = BenchConfig::from_file(&config_path)?;
    if dry_run {
        config.executor.kind = ExecutorKind::DryRun;
    }

    let rt = RtBuilder::new_multi_thread().enable_all().build()?;
    rt.block_on(async {
        let executor = executor::from_config(&config.executor);
        let monitor = monitoring::from_config(&config.monitoring, Arc::clone(&executor), &config.clients());
        let cluster = Arc::new(CephCluster::new(&config, Arc::clone(&executor)));
        let collaborators = Collaborators {
            executor,
            monitor,
            cluster,
        };

        let mut coordinator = RunCoordinator::new(config, collaborators, run_dir, &archive)
            .with_config_path(&config_path);
        if coordinator.exists() {
            println!("Already complete: {}", archive.display());
            return Ok(());
        }
        if !skip_init {
            coordinator.initialize().await.context("Initialization failed")?;
        }

        let report = coordinator.run().await?;
        let failures = report.dispatch_failures().count();
        info!("{} runs finished, {} dispatch failures", report.runs.len(), failures);
        for failure in report.dispatch_failures() {
            eprintln!("  {}", failure);
        }
        if report.is_partial() {
            println!(
                "Results in {} are PARTIAL: {} dispatch failures, {} empty payloads",
                archive.display(),
                failures,
                report.empty_results()
            );
        } else {
            println!("Results saved to {}", archive.display());
        }
        Ok(())
    })
}

fn plan_cmd(config_path: PathBuf, run_dir: PathBuf) -> Result<()> {
    let config = BenchConfig::from_file(&config_path)?;
    let plan = plan_runs(&config)?;
    println!("{} runs:", plan.len());
    for (idx, spec) in plan.iter().enumerate() {
        println!("{:>3}. {}", idx + 1, spec);
        println!("     {}", run_directory(&config, &run_dir, spec).path().display());
    }
    Ok(())
}

fn command_cmd(config_path: PathBuf, volume: u32, runtime: Option<u64>, run_dir: PathBuf) -> Result<()> {
    let config = BenchConfig::from_file(&config_path)?;
    if volume >= config.librbdfio.volumes_per_client {
        bail!(
            "volume {} out of range, volumes_per_client is {}",
            volume,
            config.librbdfio.volumes_per_client
        );
    }
    let builder = CommandBuilder::new(FioSettings::from_config(&config.librbdfio));
    let recovery_active = config.recovery_mode().is_active();
    let spec = plan_runs(&config)?.into_iter().next().context("nothing planned")?;
    let dir = run_directory(&config, &run_dir, &spec);
    let ctx = ClientContext {
        volume,
        run_dir: dir.path(),
        recovery_active,
    };
    println!("{}", builder.build(&spec, &ctx, runtime));
    Ok(())
}

fn parse_cmd(dir: PathBuf, hosts: Vec<String>, volumes: u32) -> Result<()> {
    if hosts.is_empty() {
        bail!("--hosts must name at least one client");
    }
    let clients = HostGroup::from_addresses(&hosts);
    let outcomes = ResultCollector::new().collect_dir(&dir, &clients, volumes)?;
    let with_data = outcomes.iter().filter(|o| o.has_data()).count();
    for outcome in &outcomes {
        println!("{:?}", outcome);
    }
    println!("{}/{} payloads extracted", with_data, outcomes.len());
    Ok(())
}
