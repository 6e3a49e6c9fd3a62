//! steadfast example driver.
//!
//! Binary name: `stead`
//!
//! Runs the employee onboarding workflow against a SQLite checkpoint store.
//! Re-running with the same `--workflow-id` resumes from the persisted step
//! checkpoints; the `--crash` flag simulates a process death at a chosen
//! point to exercise that recovery.
//!
//! Exit codes: 0 on success, 1 on workflow failure, 42 when a crash point
//! fires.

mod onboarding;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use steadfast_core::{StepStore, run_workflow};
use steadfast_infra::sqlite::SqliteStepStore;
use steadfast_types::step::StepStatus;

use onboarding::{CrashSpec, Input, Options};

/// Durable execution example: employee onboarding.
#[derive(Parser)]
#[command(name = "stead", version, about, long_about = None)]
struct Cli {
    /// Path to the sqlite checkpoint database.
    #[arg(long, default_value = "./durable.db")]
    db: PathBuf,

    /// Directory for simulated side-effect state.
    #[arg(long, default_value = "./state")]
    state_dir: PathBuf,

    /// Workflow instance id; reruns with the same id resume.
    #[arg(long, default_value = "employee-onboarding-001")]
    workflow_id: String,

    /// Employee id.
    #[arg(long, default_value = "emp-001")]
    employee_id: String,

    /// Employee name.
    #[arg(long, default_value = "Ada Lovelace")]
    name: String,

    /// Employee email.
    #[arg(long, default_value = "ada@example.com")]
    email: String,

    /// Simulate a crash at <step>:<before|after>, e.g. provision_laptop:after.
    #[arg(long, default_value = "")]
    crash: String,

    /// Detailed output (-v for engine debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,steadfast_core=debug,steadfast_infra=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("workflow failed:").red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let crash = CrashSpec::parse(&cli.crash)?;
    let store = Arc::new(SqliteStepStore::open(&cli.db).await?);

    println!(
        "starting workflow {:?} at {}",
        cli.workflow_id,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    let input = Input {
        employee_id: cli.employee_id,
        name: cli.name,
        email: cli.email,
    };
    let options = Options {
        state_dir: cli.state_dir,
        crash,
    };

    let result = run_workflow(Arc::clone(&store), cli.workflow_id.clone(), |ctx| {
        onboarding::run(ctx, input, options)
    })
    .await;

    match result {
        Ok(()) => {
            println!("{}", style("workflow completed successfully").green());
            print_steps(store.as_ref(), &cli.workflow_id).await;
            Ok(())
        }
        Err(err) => {
            print_steps(store.as_ref(), &cli.workflow_id).await;
            Err(err)
        }
    }
}

/// Print the checkpoint table for one workflow.
async fn print_steps<S: StepStore>(store: &S, workflow_id: &str) {
    let steps = match store.list_steps(workflow_id).await {
        Ok(steps) => steps,
        Err(err) => {
            eprintln!("unable to read workflow steps: {err}");
            return;
        }
    };
    if steps.is_empty() {
        println!("no step rows found");
        return;
    }

    println!("step checkpoints:");
    for step in steps {
        let status = match step.status {
            StepStatus::Completed => style(step.status.to_string()).green(),
            StepStatus::Failed => style(step.status.to_string()).red(),
            _ => style(step.status.to_string()).yellow(),
        };
        println!(
            "  - {} status={} run={} updated={}",
            step.step_key, status, step.run_id, step.updated_at
        );
    }
}
