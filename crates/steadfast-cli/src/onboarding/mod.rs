//! Example workflow: employee onboarding.
//!
//! `create_record` -> parallel {`provision_laptop`, `provision_access`} ->
//! `send_welcome_email`. Every side effect runs through `Context::step`, so
//! the process can be killed at any point and re-run with the same workflow
//! id: completed steps replay from the checkpoint store instead of hitting
//! the services again.

pub mod services;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, bail};

use steadfast_core::{Context, JoinGroup, StepStore};

use services::{AccessProvision, LaptopProvision, Services};

/// Process exit code used by the crash injector.
pub const CRASH_EXIT_CODE: u8 = 42;

/// Employee fields fed to the workflow.
#[derive(Debug, Clone)]
pub struct Input {
    pub employee_id: String,
    pub name: String,
    pub email: String,
}

/// Workflow options: where the simulated services keep state, and the
/// optional crash injection point.
#[derive(Debug, Clone)]
pub struct Options {
    pub state_dir: PathBuf,
    pub crash: CrashSpec,
}

/// Which side of a step's side effect a simulated crash fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    Before,
    After,
}

impl fmt::Display for CrashPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashPoint::Before => f.write_str("before"),
            CrashPoint::After => f.write_str("after"),
        }
    }
}

impl FromStr for CrashPoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(CrashPoint::Before),
            "after" => Ok(CrashPoint::After),
            _ => bail!("crash point must be before or after"),
        }
    }
}

/// Crash injection: kill the process with exit code 42 when the named step
/// reaches the named point. Used by the crash-matrix exercises to prove that
/// a rerun recovers from any interruption.
#[derive(Debug, Clone, Default)]
pub struct CrashSpec {
    target: Option<(String, CrashPoint)>,
}

impl CrashSpec {
    /// Parse `<step>:<before|after>`; an empty spec disables injection.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self::default());
        }
        let Some((step, point)) = spec.split_once(':') else {
            bail!("crash must be in format <step>:<before|after>");
        };
        let step = step.trim();
        if step.is_empty() {
            bail!("crash step cannot be empty");
        }
        let point = point.trim().to_lowercase().parse()?;
        Ok(Self {
            target: Some((step.to_string(), point)),
        })
    }

    /// Exit the process when this spec targets `step_id` at `point`.
    pub fn maybe_crash(&self, step_id: &str, point: CrashPoint) {
        if let Some((step, at)) = &self.target {
            if step.eq_ignore_ascii_case(step_id) && *at == point {
                eprintln!("simulating crash at {step_id} ({point} side effect)");
                std::process::exit(CRASH_EXIT_CODE.into());
            }
        }
    }
}

/// Run the onboarding workflow for `input` against the shared context.
pub async fn run<S>(ctx: Arc<Context<S>>, input: Input, opts: Options) -> anyhow::Result<()>
where
    S: StepStore + 'static,
{
    if input.employee_id.is_empty() {
        bail!("employee id is required");
    }
    if input.email.is_empty() {
        bail!("employee email is required");
    }
    if input.name.is_empty() {
        bail!("employee name is required");
    }

    let services = Arc::new(Services::new(&opts.state_dir).await?);
    let crash = opts.crash;

    let record = {
        let services = Arc::clone(&services);
        let crash = crash.clone();
        let input = input.clone();
        ctx.step("create_record", move || async move {
            crash.maybe_crash("create_record", CrashPoint::Before);
            let out = services.create_record(&input).await;
            crash.maybe_crash("create_record", CrashPoint::After);
            out
        })
        .await?
    };

    let laptop_result: Arc<Mutex<Option<LaptopProvision>>> = Arc::new(Mutex::new(None));
    let access_result: Arc<Mutex<Option<AccessProvision>>> = Arc::new(Mutex::new(None));

    let mut group: JoinGroup<anyhow::Error> = JoinGroup::new();

    {
        let ctx = Arc::clone(&ctx);
        let services = Arc::clone(&services);
        let crash = crash.clone();
        let slot = Arc::clone(&laptop_result);
        let employee_id = record.employee_id.clone();
        group.spawn(async move {
            let provision = ctx
                .step("provision_laptop", move || async move {
                    crash.maybe_crash("provision_laptop", CrashPoint::Before);
                    let out = services.provision_laptop(&employee_id).await;
                    crash.maybe_crash("provision_laptop", CrashPoint::After);
                    out
                })
                .await?;
            *slot.lock().expect("laptop result lock poisoned") = Some(provision);
            Ok(())
        });
    }

    {
        let ctx = Arc::clone(&ctx);
        let services = Arc::clone(&services);
        let crash = crash.clone();
        let slot = Arc::clone(&access_result);
        let employee_id = record.employee_id.clone();
        group.spawn(async move {
            let provision = ctx
                .step("provision_access", move || async move {
                    crash.maybe_crash("provision_access", CrashPoint::Before);
                    let out = services.provision_access(&employee_id).await;
                    crash.maybe_crash("provision_access", CrashPoint::After);
                    out
                })
                .await?;
            *slot.lock().expect("access result lock poisoned") = Some(provision);
            Ok(())
        });
    }

    group.wait().await?;

    let laptop = laptop_result
        .lock()
        .expect("laptop result lock poisoned")
        .take()
        .context("laptop provisioning produced no result")?;
    let access = access_result
        .lock()
        .expect("access result lock poisoned")
        .take()
        .context("access provisioning produced no result")?;

    {
        let services = Arc::clone(&services);
        let crash = crash.clone();
        let employee_id = record.employee_id.clone();
        let email = record.email.clone();
        let laptop_id = laptop.laptop_id.clone();
        let role = access.role.clone();
        ctx.step("send_welcome_email", move || async move {
            crash.maybe_crash("send_welcome_email", CrashPoint::Before);
            let out = services
                .send_welcome_email(&employee_id, &email, &laptop_id, &role)
                .await;
            crash.maybe_crash("send_welcome_email", CrashPoint::After);
            out
        })
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use steadfast_core::StepStore;
    use steadfast_infra::sqlite::SqliteStepStore;
    use steadfast_types::step::StepStatus;

    fn sample_input() -> Input {
        Input {
            employee_id: "emp-001".to_string(),
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        }
    }

    fn options(state_dir: PathBuf) -> Options {
        Options {
            state_dir,
            crash: CrashSpec::default(),
        }
    }

    #[tokio::test]
    async fn onboarding_completes_all_four_steps() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteStepStore::open(dir.path().join("durable.db"))
                .await
                .unwrap(),
        );

        let ctx = Arc::new(Context::new("wf-basic", Arc::clone(&store)));
        run(ctx, sample_input(), options(dir.path().join("state")))
            .await
            .unwrap();

        let rows = store.list_steps("wf-basic").await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.status == StepStatus::Completed));

        let ids: Vec<&str> = rows.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "create_record",
                "provision_access",
                "provision_laptop",
                "send_welcome_email"
            ]
        );

        for row in &rows {
            let payload = row.output_json.as_deref().unwrap();
            serde_json::from_str::<serde_json::Value>(payload).unwrap();
        }
    }

    #[tokio::test]
    async fn rerun_replays_cached_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteStepStore::open(dir.path().join("durable.db"))
                .await
                .unwrap(),
        );
        let state_dir = dir.path().join("state");

        let ctx = Arc::new(Context::new("wf-rerun", Arc::clone(&store)));
        run(ctx, sample_input(), options(state_dir.clone()))
            .await
            .unwrap();
        let first: Vec<_> = store
            .list_steps("wf-rerun")
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.step_key, r.output_json))
            .collect();

        let ctx = Arc::new(Context::new("wf-rerun", Arc::clone(&store)));
        run(ctx, sample_input(), options(state_dir)).await.unwrap();
        let second: Vec<_> = store
            .list_steps("wf-rerun")
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.step_key, r.output_json))
            .collect();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failed_create_record_recovers_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteStepStore::open(dir.path().join("durable.db"))
                .await
                .unwrap(),
        );
        let state_dir = dir.path().join("state");

        // A directory where the employees file should be makes the first
        // create_record write fail.
        tokio::fs::create_dir_all(state_dir.join("employees.json"))
            .await
            .unwrap();

        let ctx = Arc::new(Context::new("wf-recover", Arc::clone(&store)));
        run(ctx, sample_input(), options(state_dir.clone()))
            .await
            .unwrap_err();

        let rows = store.list_steps("wf-recover").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, StepStatus::Failed);

        tokio::fs::remove_dir(state_dir.join("employees.json"))
            .await
            .unwrap();

        let ctx = Arc::new(Context::new("wf-recover", Arc::clone(&store)));
        run(ctx, sample_input(), options(state_dir)).await.unwrap();

        let rows = store.list_steps("wf-recover").await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.status == StepStatus::Completed));
    }

    #[test]
    fn crash_spec_parses_step_and_point() {
        let spec = CrashSpec::parse("provision_laptop:after").unwrap();
        assert!(spec.target.is_some());
        let (step, point) = spec.target.unwrap();
        assert_eq!(step, "provision_laptop");
        assert_eq!(point, CrashPoint::After);
    }

    #[test]
    fn crash_spec_empty_disables_injection() {
        let spec = CrashSpec::parse("  ").unwrap();
        assert!(spec.target.is_none());
    }

    #[test]
    fn crash_spec_rejects_malformed_input() {
        assert!(CrashSpec::parse("no-colon").is_err());
        assert!(CrashSpec::parse(":before").is_err());
        assert!(CrashSpec::parse("step:sideways").is_err());
    }
}
