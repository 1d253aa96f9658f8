//! Bootstrap module - brings a host under management: control user,
//! passwordless sudo and an authorized key

use async_trait::async_trait;
use shell_words::quote;

use crate::modules::{
    core::{
        authorized_key::{authorized_keys_path, install_key, key_present},
        user::{create_user, lookup_user, resolved_username, validate_username},
    },
    error::{ModuleExecutionError, ValidationError},
    interface::{ConvergenceModule, ModuleArgs, ModuleContext, StateCheck},
};

const SUDOERS_DIR: &str = "/etc/sudoers.d";
const SUDOERS_MODE: u32 = 0o440;

/// sudo skips drop-ins whose names contain a dot
pub fn sudoers_path(user: &str) -> String {
    format!("{SUDOERS_DIR}/{}", user.replace('.', "_"))
}

pub fn sudoers_rule(user: &str) -> String {
    format!("{user} ALL=(ALL) NOPASSWD:ALL\n")
}

async fn sudoers_current(
    context: &ModuleContext<'_>,
    user: &str,
) -> Result<bool, ModuleExecutionError> {
    let output = context
        .run_privileged(&format!("cat {}", quote(&sudoers_path(user))))
        .await?;
    Ok(output.success() && output.stdout == sudoers_rule(user))
}

pub struct BootstrapModule;

#[async_trait]
impl ConvergenceModule for BootstrapModule {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    fn validate_args(&self, args: &ModuleArgs) -> Result<(), ValidationError> {
        args.ensure_known(&["user", "public_key", "shell"])?;
        args.expect_string("user", true)?;
        args.expect_string("public_key", false)?;
        args.expect_string("shell", false)?;
        if let Some(user) = args.get_str("user") {
            validate_username("user", user)?;
        }
        Ok(())
    }

    async fn check(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<StateCheck, ModuleExecutionError> {
        let user = resolved_username(args, "user")?;

        if lookup_user(context, user).await?.is_none() {
            return Ok(StateCheck::drift(format!("control user {user} missing")));
        }
        if !sudoers_current(context, user).await? {
            return Ok(StateCheck::drift(format!(
                "{} missing or differs",
                sudoers_path(user)
            )));
        }
        if let Some(key) = args.get_str("public_key") {
            let authorized = match authorized_keys_path(context, user, None).await? {
                Some(path) => key_present(context, &path, key).await?,
                None => false,
            };
            if !authorized {
                return Ok(StateCheck::drift(format!("key for {user} not authorized")));
            }
        }
        Ok(StateCheck::Satisfied)
    }

    async fn apply(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<String, ModuleExecutionError> {
        let user = resolved_username(args, "user")?;
        let mut changes = Vec::new();

        if lookup_user(context, user).await?.is_none() {
            create_user(context, user, args.get_str("shell")).await?;
            changes.push(format!("created user {user}"));
        }

        if !sudoers_current(context, user).await? {
            context
                .upload(
                    sudoers_rule(user).as_bytes(),
                    &sudoers_path(user),
                    SUDOERS_MODE,
                    "root",
                    Some("visudo -cf"),
                )
                .await?;
            changes.push("granted passwordless sudo".to_string());
        }

        if let Some(key) = args.get_str("public_key") {
            let path = authorized_keys_path(context, user, None)
                .await?
                .ok_or_else(|| ModuleExecutionError::MissingPrerequisite {
                    reason: format!("user {user} does not exist"),
                })?;
            if install_key(context, user, &path, key).await? {
                changes.push("authorized key".to_string());
            }
        }

        Ok(changes.join(", "))
    }

    fn uses_bootstrap_identity(&self) -> bool {
        true
    }
}
