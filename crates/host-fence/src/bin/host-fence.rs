//! host-fence - host failure hook: confirm, fence, remediate.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use host_fence::config::DEFAULT_CONFIG_PATH;
use host_fence::orchestrator::DEFAULT_REPEAT;
use host_fence::remediation::Escalation;
use host_fence::{
    FenceOrchestrator, HookConfig, HookError, HookOutcome, HookRequest, OneCli, PowerFencer,
    ProcessRunner, RemediationPlan, RemediationPolicy,
};

/// Host failure hook.
///
/// Waits for the failed host to stay down, power-cycles it via IPMI, then
/// migrates, recreates or deletes the VMs that were running on it.
#[derive(Parser)]
#[command(name = "host-fence")]
#[command(about = "Fence a failed host and remediate its VMs")]
struct Cli {
    /// ID of the failed host.
    host_id: String,

    /// Base64-encoded host record (carries IPMI_IP, IPMI_USER, IPMI_PASS).
    host_metadata: String,

    /// Reschedule VMs onto other hosts (shared storage only).
    #[arg(short, long, group = "policy")]
    migrate: bool,

    /// Delete VMs.
    #[arg(short, long, group = "policy")]
    delete: bool,

    /// Delete and recreate VMs; their state is lost (default).
    #[arg(short, long, group = "policy")]
    recreate: bool,

    /// Also remediate suspended VMs.
    #[arg(short, long)]
    force: bool,

    /// Monitoring cycles the host must stay down before it is fenced.
    #[arg(short, long, value_name = "N", default_value_t = DEFAULT_REPEAT)]
    pause: u32,

    /// Configuration file.
    #[arg(long, env = "HOST_FENCE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Wait and log the actions, but neither fence nor touch VMs.
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn plan(&self) -> RemediationPlan {
        let policy = if self.migrate {
            RemediationPolicy::Migrate
        } else if self.delete {
            RemediationPolicy::Delete
        } else {
            RemediationPolicy::Recreate
        };

        RemediationPlan {
            policy,
            include_suspended: self.force,
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: &Cli) -> Result<HookOutcome> {
    let config = HookConfig::load(&cli.config)
        .await
        .map_err(HookError::from)
        .context("Failed to load configuration")?;

    let runner = Arc::new(ProcessRunner);
    let cluster = Arc::new(OneCli::new(&config.cluster, runner.clone()));
    let fencer = PowerFencer::new(config.fence.clone(), runner);
    let orchestrator = FenceOrchestrator::new(cluster, fencer, config.remediation.clone());

    let request = HookRequest {
        host_id: cli.host_id.clone(),
        host_metadata: cli.host_metadata.clone(),
        plan: cli.plan(),
        repeat: cli.pause,
        dry_run: cli.dry_run,
    };

    Ok(orchestrator.run(&request).await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli).await {
        Ok(HookOutcome::Recovered { state }) => {
            info!(%state, "Host recovered on its own, no action taken");
            ExitCode::SUCCESS
        }
        Ok(HookOutcome::Remediated {
            fence_attempts,
            report,
        }) => {
            for vm in report.vms.iter().filter(|vm| vm.failed()) {
                let escalation = match &vm.escalation {
                    Escalation::Failed(reason) => reason.as_str(),
                    _ => "",
                };
                error!(
                    vm_id = vm.vm_id,
                    action = %vm.action,
                    error = vm.result.as_ref().err().map_or("", String::as_str),
                    escalation,
                    "VM needs manual attention"
                );
            }
            info!(
                fence_attempts,
                vms = report.vms.len(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                skipped = report.skipped(),
                "Done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            let code = e.downcast_ref::<HookError>().map_or(1, HookError::exit_code);
            error!(exit_code = code, "{e:#}");
            ExitCode::from(code)
        }
    }
}
