use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::error;
use utpc_stack_provision::adapters::assets::AssetPackager;
use utpc_stack_provision::adapters::state_file::StateFileControlPlane;
use utpc_stack_provision::handlers::apply::Provisioner;
use utpc_stack_provision::handlers::destroy::Teardown;
use utpc_stack_provision::handlers::pipeline::{load_config, load_stack, synthesize, PipelineError};
use utpc_stack_provision::handlers::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use utpc_stack_provision::logging::init_tracing;

#[derive(Parser)]
#[command(
    name = "utpc_stack",
    about = "Synthesize, apply and destroy the UTPC serverless stack"
)]
struct Cli {
    /// Stack definition file
    #[arg(long, global = true, env = "UTPC_STACK_FILE", default_value = "stacks/utpc.json")]
    stack: PathBuf,
    /// Control-plane state file
    #[arg(long, global = true, env = "UTPC_STATE_FILE", default_value = ".utpc/state.json")]
    state: PathBuf,
    /// Env file layered under the process environment; skipped when absent
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,
    /// Directory that layer and function code locations are relative to
    #[arg(long, global = true, default_value = ".")]
    asset_root: PathBuf,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Package assets and print the resolved deploy plan
    Synth {
        #[arg(long, default_value = "cdk.out")]
        assets_out: PathBuf,
    },
    /// Provision the stack against the state-file control plane
    Apply {
        #[arg(long, default_value = "cdk.out")]
        assets_out: PathBuf,
        /// Apply each dependency level concurrently
        #[arg(long)]
        parallel: bool,
        /// Keep provisioned resources the stack no longer declares
        #[arg(long)]
        no_prune: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,
    },
    /// Delete every provisioned resource in reverse plan order
    Destroy {
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %error, "utpc_stack failed");
            if let Some(report) = partial_report(&error) {
                print_json("failed", report);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), PipelineError> {
    let definition = load_stack(&cli.stack)?;
    match &cli.command {
        Command::Synth { assets_out } => {
            let config = load_config(Some(&cli.env_file))?;
            let packager = AssetPackager::new(&cli.asset_root, assets_out);
            let plan = synthesize(&definition, Some(&packager))?.resolve(&config)?;
            print_json("synth", json!({ "stack": definition.name, "plan": plan }));
        }
        Command::Apply {
            assets_out,
            parallel,
            no_prune,
            max_attempts,
        } => {
            let config = load_config(Some(&cli.env_file))?;
            let packager = AssetPackager::new(&cli.asset_root, assets_out);
            let plan = synthesize(&definition, Some(&packager))?.resolve(&config)?;

            let control_plane = open_state(&cli.state)?;
            let retry = RetryPolicy::new(*max_attempts);
            let provisioner = Provisioner::new(&control_plane).with_retry(retry);
            let report = if *parallel {
                provisioner.apply_parallel(&plan)?
            } else {
                provisioner.apply(&plan)?
            };
            let pruned = if *no_prune {
                Vec::new()
            } else {
                Teardown::new(&control_plane)
                    .with_retry(retry)
                    .prune(&plan.resources())?
                    .pruned
            };
            print_json(
                "apply",
                json!({ "stack": definition.name, "report": report, "pruned": pruned }),
            );
        }
        Command::Destroy { max_attempts } => {
            let plan = synthesize(&definition, None)?;
            let control_plane = open_state(&cli.state)?;
            let report = Teardown::new(&control_plane)
                .with_retry(RetryPolicy::new(*max_attempts))
                .destroy(&plan)?;
            print_json("destroy", json!({ "stack": definition.name, "report": report }));
        }
    }
    Ok(())
}

fn open_state(path: &Path) -> Result<StateFileControlPlane, PipelineError> {
    Ok(StateFileControlPlane::open(path)?)
}

fn partial_report(error: &PipelineError) -> Option<serde_json::Value> {
    match error {
        PipelineError::Apply(error) => serde_json::to_value(error.report()).ok(),
        PipelineError::Destroy(error) => serde_json::to_value(error.report()).ok(),
        _ => None,
    }
}

fn print_json(command: &str, body: impl Serialize) {
    let envelope = json!({
        "command": command,
        "completed_at": Utc::now().to_rfc3339(),
        "result": body,
    });
    match serde_json::to_string_pretty(&envelope) {
        Ok(text) => println!("{text}"),
        Err(error) => error!(error = %error, "failed to render output"),
    }
}
