use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vmdeploy::logging::{LogSettings, init_logging};
use vmdeploy::task::join;
use vmdeploy::{
    AsyncOperations, Credential, DeployConfig, Operations, RollbackOutcome, ServiceAction,
    SnapshotHandle, SshConnector, VmrunHypervisor,
};

#[derive(Parser)]
#[command(name = "vmdeploy")]
#[command(version, about = "Snapshot-guarded VM deployment over SSH", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// VM name (defaults to the first configured VM)
    #[arg(long, global = true)]
    vm: Option<String>,

    /// Environment variable holding the key passphrase
    #[arg(long, global = true, value_name = "VAR")]
    passphrase_env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot, start, provision, and roll back on failure
    Deploy {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Revert the VM to a snapshot
    Rollback {
        /// Snapshot name (defaults to the latest)
        #[arg(short, long)]
        snapshot: Option<String>,
    },

    /// Wait for SSH and try to log in
    TestSsh,

    /// Show disk, memory, uptime, processes, addresses and recent log
    Status,

    /// Copy a local file to the VM
    Upload { local: PathBuf, remote: PathBuf },

    /// Copy a file from the VM
    Download { remote: PathBuf, local: PathBuf },

    /// Start, stop, restart or query a systemd service
    Service {
        /// Unit name, e.g. "nginx"
        name: String,

        /// start | stop | restart | status
        action: ServiceAction,
    },

    /// Open a URL in Firefox on the guest display
    OpenWeb {
        #[arg(long)]
        url: Option<String>,
    },

    /// Request a soft shutdown of the VM
    Shutdown,

    /// List snapshots
    Snapshots,

    /// Print the deployment log
    Logs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = DeployConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if let Commands::Logs = cli.command {
        let log = vmdeploy::logging::read_log(&config.log_file)
            .with_context(|| format!("reading {}", config.log_file.display()))?;
        print!("{log}");
        return Ok(true);
    }

    init_logging(&LogSettings::new(&config.log_file)).context("initialising logging")?;

    let hypervisor = Arc::new(VmrunHypervisor::new(&config.hypervisor_executable));
    let connector = Arc::new(SshConnector::from_config(&config));
    let ops = AsyncOperations::new(Operations::new(config, hypervisor, connector));

    let vm = ops.operations().vm(cli.vm.as_deref())?.clone();
    let credential = cli.passphrase_env.as_deref().and_then(Credential::from_env);

    match cli.command {
        Commands::Deploy { json } => {
            let report = ops.deploy(vm, credential).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Outcome: {}", report.outcome);
                let path: Vec<String> = report.transitions.iter().map(|s| s.to_string()).collect();
                println!("States: {}", path.join(" -> "));
                if let Some(rollback) = &report.rollback {
                    println!("Rollback: {rollback:?}");
                }
            }
            Ok(report.is_success())
        }
        Commands::Rollback { snapshot } => {
            let outcome = join(ops.rollback(vm, snapshot.map(SnapshotHandle::new))).await?;
            match &outcome {
                RollbackOutcome::Reverted(handle) => println!("Reverted to {handle}"),
                RollbackOutcome::NoSnapshot => println!("No snapshot to roll back to"),
                RollbackOutcome::RevertFailed(reason) => println!("Rollback failed: {reason}"),
            }
            Ok(outcome.is_reverted())
        }
        Commands::TestSsh => {
            join(ops.test_connectivity(vm, credential)).await?;
            println!("SSH connection OK");
            Ok(true)
        }
        Commands::Status => {
            let report = join(ops.system_status(vm, credential)).await?;
            print!("{report}");
            Ok(true)
        }
        Commands::Upload { local, remote } => {
            let bytes = join(ops.upload_file(vm, credential, local.clone(), remote.clone())).await?;
            println!("Uploaded {} -> {} ({bytes} bytes)", local.display(), remote.display());
            Ok(true)
        }
        Commands::Download { remote, local } => {
            let bytes =
                join(ops.download_file(vm, credential, remote.clone(), local.clone())).await?;
            println!("Downloaded {} -> {} ({bytes} bytes)", remote.display(), local.display());
            Ok(true)
        }
        Commands::Service { name, action } => {
            let report = join(ops.manage_service(vm, credential, name, action)).await?;
            println!("STDOUT:\n{}\nSTDERR:\n{}", report.stdout, report.stderr);
            Ok(true)
        }
        Commands::OpenWeb { url } => {
            let result = join(ops.open_webpage(vm, credential, url)).await?;
            println!("stdout: {}\nstderr: {}", result.stdout, result.stderr);
            Ok(true)
        }
        Commands::Shutdown => {
            join(ops.shutdown_vm(vm)).await?;
            println!("Shutdown requested");
            Ok(true)
        }
        Commands::Snapshots => {
            for snapshot in join(ops.list_snapshots(vm)).await? {
                println!("{snapshot}");
            }
            Ok(true)
        }
        Commands::Logs => Ok(true),
    }
}
