use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the UTPC stack workspace",
    long_about = "A unified CLI for synthesizing, applying and destroying the UTPC\n\
                  stack locally, and for running CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved deploy plan
    Synth,
    /// Apply the stack against the local state file
    Apply {
        /// Apply each dependency level concurrently
        #[arg(long)]
        parallel: bool,
    },
    /// Destroy everything recorded in the local state file
    Destroy,
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Synthesize the shipped stack definition
    Synth,
    /// Run check + synth
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_stack(args: &[&str]) {
    let mut cargo_args = vec!["run", "-p", "utpc_stack_provision", "--bin", "utpc_stack", "--"];
    cargo_args.extend_from_slice(args);
    run_cargo(&cargo_args);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test utpc_stack_core");
    run_cargo(&["test", "-p", "utpc_stack_core"]);

    step("Test utpc_stack_provision");
    run_cargo(&["test", "-p", "utpc_stack_provision"]);
}

fn ci_synth() {
    step("Test shipped stack definition");
    run_cargo(&[
        "test",
        "-p",
        "utpc_stack_core",
        "--test",
        "stack_definition_tests",
    ]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Synth => run_stack(&["synth"]),
        Commands::Apply { parallel } => {
            if parallel {
                run_stack(&["apply", "--parallel"]);
            } else {
                run_stack(&["apply"]);
            }
        }
        Commands::Destroy => run_stack(&["destroy"]),
        Commands::Ci { job } => match job {
            CiJob::Check => ci_check(),
            CiJob::Synth => ci_synth(),
            CiJob::All => {
                ci_check();
                ci_synth();
            }
        },
    }
}
