//! Simulated side-effect services backed by JSON files.
//!
//! Each service persists its records under the state directory and is
//! idempotent per employee: a repeat call returns the existing entry
//! unchanged. Provisioning calls sleep briefly to imitate a remote service.
//! Idempotence here is what makes immediate zombie takeover safe for the
//! example: re-executing a taken-over step cannot double-provision.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::Input;

const SIMULATED_LATENCY: Duration = Duration::from_millis(250);

/// An employee row in the simulated HR system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub employee_id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

/// A laptop assignment from the simulated IT system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaptopProvision {
    pub employee_id: String,
    pub laptop_id: String,
    pub status: String,
}

/// An access grant from the simulated IAM system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessProvision {
    pub employee_id: String,
    pub role: String,
    pub status: String,
}

/// A welcome email receipt from the simulated mailer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeEmail {
    pub employee_id: String,
    pub email: String,
    pub laptop_id: String,
    pub role: String,
    pub email_id: String,
    pub sent_at: String,
}

/// File-backed stand-ins for the external systems an onboarding workflow
/// would call.
pub struct Services {
    state_dir: PathBuf,
    lock: Mutex<()>,
}

impl Services {
    /// Create the state directory and the service handle.
    pub async fn new(state_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let state_dir = state_dir.into();
        tokio::fs::create_dir_all(&state_dir)
            .await
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        Ok(Self {
            state_dir,
            lock: Mutex::new(()),
        })
    }

    pub async fn create_record(&self, input: &Input) -> anyhow::Result<EmployeeRecord> {
        let _guard = self.lock.lock().await;

        let path = self.state_dir.join("employees.json");
        let mut records: HashMap<String, EmployeeRecord> = read_json(&path).await?;
        if let Some(existing) = records.get(&input.employee_id) {
            return Ok(existing.clone());
        }

        let record = EmployeeRecord {
            employee_id: input.employee_id.clone(),
            name: input.name.clone(),
            email: input.email.clone(),
            created_at: now(),
        };
        records.insert(record.employee_id.clone(), record.clone());
        write_json(&path, &records).await?;
        Ok(record)
    }

    pub async fn provision_laptop(&self, employee_id: &str) -> anyhow::Result<LaptopProvision> {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        let _guard = self.lock.lock().await;

        let path = self.state_dir.join("laptops.json");
        let mut records: HashMap<String, LaptopProvision> = read_json(&path).await?;
        if let Some(existing) = records.get(employee_id) {
            return Ok(existing.clone());
        }

        let provision = LaptopProvision {
            employee_id: employee_id.to_string(),
            laptop_id: format!("LAP-{employee_id}"),
            status: "provisioned".to_string(),
        };
        records.insert(employee_id.to_string(), provision.clone());
        write_json(&path, &records).await?;
        Ok(provision)
    }

    pub async fn provision_access(&self, employee_id: &str) -> anyhow::Result<AccessProvision> {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        let _guard = self.lock.lock().await;

        let path = self.state_dir.join("access.json");
        let mut records: HashMap<String, AccessProvision> = read_json(&path).await?;
        if let Some(existing) = records.get(employee_id) {
            return Ok(existing.clone());
        }

        let provision = AccessProvision {
            employee_id: employee_id.to_string(),
            role: "employee".to_string(),
            status: "granted".to_string(),
        };
        records.insert(employee_id.to_string(), provision.clone());
        write_json(&path, &records).await?;
        Ok(provision)
    }

    pub async fn send_welcome_email(
        &self,
        employee_id: &str,
        email: &str,
        laptop_id: &str,
        role: &str,
    ) -> anyhow::Result<WelcomeEmail> {
        let _guard = self.lock.lock().await;

        let path = self.state_dir.join("emails.json");
        let mut records: HashMap<String, WelcomeEmail> = read_json(&path).await?;
        if let Some(existing) = records.get(employee_id) {
            return Ok(existing.clone());
        }

        let sent = WelcomeEmail {
            employee_id: employee_id.to_string(),
            email: email.to_string(),
            laptop_id: laptop_id.to_string(),
            role: role.to_string(),
            email_id: format!("WELCOME-{employee_id}"),
            sent_at: now(),
        };
        records.insert(employee_id.to_string(), sent.clone());
        write_json(&path, &records).await?;
        Ok(sent)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

async fn read_json<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(data) if data.is_empty() => Ok(T::default()),
        Ok(data) => {
            serde_json::from_slice(&data).with_context(|| format!("decode {}", path.display()))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut data =
        serde_json::to_vec_pretty(value).with_context(|| format!("encode {}", path.display()))?;
    data.push(b'\n');
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("write {}", path.display()))
}
