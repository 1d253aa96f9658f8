//! Module interface traits and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::modules::arguments::ArgReference;
use crate::modules::error::{ModuleExecutionError, ValidationError};
use crate::secrets::Redactor;
use crate::transport::{CommandOutput, Transport};
use crate::types::{ConnectionTarget, Facts, Host};

/// An idempotent action: a read-only probe plus the mutation that closes
/// the gap it reports
#[async_trait]
pub trait ConvergenceModule: Send + Sync {
    /// Module name as written in playbooks (e.g. "user", "package")
    fn name(&self) -> &'static str;

    /// Validate arguments when the playbook is loaded
    fn validate_args(&self, args: &ModuleArgs) -> Result<(), ValidationError>;

    /// Probe current state. Must not change the host.
    async fn check(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<StateCheck, ModuleExecutionError>;

    /// Converge the host; returns a short description of what changed
    async fn apply(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<String, ModuleExecutionError>;

    /// Whether the module may run under the host's fallback identity
    fn uses_bootstrap_identity(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateCheck {
    Satisfied,
    Drift { reason: String },
}

impl StateCheck {
    pub fn drift(reason: impl Into<String>) -> Self {
        Self::Drift {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Present,
    Absent,
}

/// Module arguments. At load time values may still be `{var: ..}` or
/// `{secret: ..}` references; modules only see resolved values at run time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleArgs {
    pub args: HashMap<String, Value>,
    /// Masks the secrets that were substituted into `args`
    #[serde(skip)]
    redactor: Redactor,
}

impl ModuleArgs {
    pub fn new(args: HashMap<String, Value>) -> Self {
        Self {
            args,
            redactor: Redactor::default(),
        }
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn required_str(&self, key: &str) -> Result<&str, ValidationError> {
        self.get_str(key)
            .ok_or_else(|| ValidationError::MissingRequiredArg {
                arg: key.to_string(),
            })
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.args.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Reject arguments the module does not understand
    pub fn ensure_known(&self, allowed: &[&str]) -> Result<(), ValidationError> {
        let mut keys: Vec<&String> = self.args.keys().collect();
        keys.sort();
        match keys.into_iter().find(|k| !allowed.contains(&k.as_str())) {
            Some(arg) => Err(ValidationError::UnknownArg { arg: arg.clone() }),
            None => Ok(()),
        }
    }

    /// A string argument, or a reference that will resolve to one
    pub fn expect_string(&self, key: &str, required: bool) -> Result<(), ValidationError> {
        match self.args.get(key) {
            None | Some(Value::Null) if required => Err(ValidationError::MissingRequiredArg {
                arg: key.to_string(),
            }),
            None | Some(Value::Null) => Ok(()),
            Some(Value::String(s)) if required && s.is_empty() => {
                Err(ValidationError::InvalidArgValue {
                    arg: key.to_string(),
                    value: String::new(),
                    reason: "must not be empty".to_string(),
                })
            }
            Some(Value::String(_)) => Ok(()),
            Some(value) if ArgReference::parse(value).is_some() => Ok(()),
            Some(value) => Err(ValidationError::InvalidArgValue {
                arg: key.to_string(),
                value: value.to_string(),
                reason: "expected a string".to_string(),
            }),
        }
    }

    pub fn expect_bool(&self, key: &str) -> Result<(), ValidationError> {
        match self.args.get(key) {
            None | Some(Value::Null) | Some(Value::Bool(_)) => Ok(()),
            Some(value) => Err(ValidationError::InvalidArgValue {
                arg: key.to_string(),
                value: value.to_string(),
                reason: "expected true or false".to_string(),
            }),
        }
    }

    /// `state: present | absent`, defaulting to present
    pub fn state(&self) -> Result<DesiredState, ValidationError> {
        match self.args.get("state") {
            None | Some(Value::Null) => Ok(DesiredState::Present),
            Some(Value::String(s)) if s == "present" => Ok(DesiredState::Present),
            Some(Value::String(s)) if s == "absent" => Ok(DesiredState::Absent),
            Some(value) => Err(ValidationError::InvalidArgValue {
                arg: "state".to_string(),
                value: value.to_string(),
                reason: "expected present or absent".to_string(),
            }),
        }
    }
}

/// Everything a module needs to talk to one host
pub struct ModuleContext<'a> {
    pub host: &'a Host,
    pub target: ConnectionTarget,
    pub facts: &'a Facts,
    pub transport: &'a dyn Transport,
    redactor: Redactor,
}

impl<'a> ModuleContext<'a> {
    pub fn new(
        host: &'a Host,
        target: ConnectionTarget,
        facts: &'a Facts,
        transport: &'a dyn Transport,
    ) -> Self {
        Self {
            host,
            target,
            facts,
            transport,
            redactor: Redactor::default(),
        }
    }

    /// Commands are logged through `redactor`
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    /// Prefix with non-interactive sudo unless already root
    pub fn privileged(&self, command: &str) -> String {
        if self.target.identity.is_root() {
            command.to_string()
        } else {
            format!("sudo -n {command}")
        }
    }

    pub async fn run(&self, command: &str) -> Result<CommandOutput, ModuleExecutionError> {
        debug!("{}: {}", self.target, self.redactor.redact(command));
        Ok(self.transport.run(&self.target, command).await?)
    }

    pub async fn run_privileged(
        &self,
        command: &str,
    ) -> Result<CommandOutput, ModuleExecutionError> {
        self.run(&self.privileged(command)).await
    }

    /// Privileged command that must exit zero
    pub async fn run_checked(
        &self,
        action: &str,
        command: &str,
    ) -> Result<CommandOutput, ModuleExecutionError> {
        let output = self.run_privileged(command).await?;
        if !output.success() {
            return Err(ModuleExecutionError::CommandFailed {
                action: action.to_string(),
                exit_code: output.exit_code,
                stderr: output.error_text(),
            });
        }
        Ok(output)
    }

    /// Upload `content` to `dest` with the given mode and owner. The bytes
    /// land in a private temp path first; `validate` (e.g. `visudo -cf`) is
    /// run against that path before anything is installed.
    pub async fn upload(
        &self,
        content: &[u8],
        dest: &str,
        mode: u32,
        owner: &str,
        validate: Option<&str>,
    ) -> Result<(), ModuleExecutionError> {
        let staging = format!("/tmp/.rustle-{}", Uuid::new_v4().simple());
        self.transport.copy(&self.target, content, &staging).await?;

        let staged = shell_words::quote(&staging);
        let result = match validate {
            Some(validator) => match self
                .run_checked("validate", &format!("{validator} {staged}"))
                .await
            {
                Ok(_) => self.install(&staged, dest, mode, owner).await,
                Err(e) => Err(e),
            },
            None => self.install(&staged, dest, mode, owner).await,
        };

        match self.run(&format!("rm -f {staged}")).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(
                "Could not remove staging file {} on {}: {}",
                staging,
                self.host.name,
                output.error_text()
            ),
            Err(e) => warn!("Could not remove staging file {}: {}", staging, e),
        }

        result
    }

    async fn install(
        &self,
        staged: &str,
        dest: &str,
        mode: u32,
        owner: &str,
    ) -> Result<(), ModuleExecutionError> {
        self.run_checked(
            "install",
            &format!(
                "install -m {:04o} -o {} {} {}",
                mode,
                shell_words::quote(owner),
                staged,
                shell_words::quote(dest)
            ),
        )
        .await?;
        Ok(())
    }
}
