//! Authorized key module - ensures an SSH public key is authorized for a user

use async_trait::async_trait;
use shell_words::quote;

use crate::modules::{
    core::user::{lookup_user, resolved_username},
    error::{ModuleExecutionError, ValidationError},
    interface::{ConvergenceModule, ModuleArgs, ModuleContext, StateCheck},
};

const KEY_FILE_MODE: u32 = 0o600;

/// Key type and base64 blob; the trailing comment does not identify a key
fn key_identity(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split_whitespace();
    Some((fields.next()?, fields.next()?))
}

fn contains_key(authorized_keys: &str, key: &str) -> bool {
    let Some(wanted) = key_identity(key) else {
        return false;
    };
    authorized_keys
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(key_identity)
        .any(|found| found == wanted)
}

fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => ".",
    }
}

/// Where the key file lives: explicit path or `~user/.ssh/authorized_keys`.
/// None when the user does not exist yet.
pub async fn authorized_keys_path(
    context: &ModuleContext<'_>,
    user: &str,
    explicit: Option<&str>,
) -> Result<Option<String>, ModuleExecutionError> {
    let Some(entry) = lookup_user(context, user).await? else {
        return Ok(None);
    };
    Ok(Some(match explicit {
        Some(path) => path.to_string(),
        None => format!("{}/.ssh/authorized_keys", entry.home.trim_end_matches('/')),
    }))
}

async fn read_keys(
    context: &ModuleContext<'_>,
    path: &str,
) -> Result<Option<String>, ModuleExecutionError> {
    let output = context
        .run_privileged(&format!("cat {}", quote(path)))
        .await?;
    Ok(output.success().then_some(output.stdout))
}

pub async fn key_present(
    context: &ModuleContext<'_>,
    path: &str,
    key: &str,
) -> Result<bool, ModuleExecutionError> {
    Ok(read_keys(context, path)
        .await?
        .is_some_and(|keys| contains_key(&keys, key)))
}

/// Append `key` to the user's key file, creating `.ssh` as needed
pub async fn install_key(
    context: &ModuleContext<'_>,
    user: &str,
    path: &str,
    key: &str,
) -> Result<bool, ModuleExecutionError> {
    let existing = read_keys(context, path).await?.unwrap_or_default();
    if contains_key(&existing, key) {
        return Ok(false);
    }

    context
        .run_checked(
            "install",
            &format!(
                "install -d -m 700 -o {} {}",
                quote(user),
                quote(parent_dir(path))
            ),
        )
        .await?;

    let mut content = existing.trim_end().to_string();
    if !content.is_empty() {
        content.push('\n');
    }
    content.push_str(key.trim());
    content.push('\n');

    context
        .upload(content.as_bytes(), path, KEY_FILE_MODE, user, None)
        .await?;
    Ok(true)
}

pub struct AuthorizedKeyModule;

#[async_trait]
impl ConvergenceModule for AuthorizedKeyModule {
    fn name(&self) -> &'static str {
        "authorized_key"
    }

    fn validate_args(&self, args: &ModuleArgs) -> Result<(), ValidationError> {
        args.ensure_known(&["user", "key", "path"])?;
        args.expect_string("user", true)?;
        args.expect_string("key", true)?;
        args.expect_string("path", false)?;

        if let Some(key) = args.get_str("key") {
            if key_identity(key).is_none() {
                return Err(ValidationError::InvalidArgValue {
                    arg: "key".to_string(),
                    value: key.to_string(),
                    reason: "expected `<type> <base64> [comment]`".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn check(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<StateCheck, ModuleExecutionError> {
        let user = resolved_username(args, "user")?;
        let key = args.required_str("key")?;

        let Some(path) = authorized_keys_path(context, user, args.get_str("path")).await? else {
            return Ok(StateCheck::drift(format!("user {user} does not exist")));
        };
        if key_present(context, &path, key).await? {
            Ok(StateCheck::Satisfied)
        } else {
            Ok(StateCheck::drift(format!("key not in {path}")))
        }
    }

    async fn apply(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<String, ModuleExecutionError> {
        let user = resolved_username(args, "user")?;
        let key = args.required_str("key")?;

        let path = authorized_keys_path(context, user, args.get_str("path"))
            .await?
            .ok_or_else(|| ModuleExecutionError::MissingPrerequisite {
                reason: format!("user {user} does not exist"),
            })?;
        install_key(context, user, &path, key).await?;
        Ok(format!("authorized key for {user}"))
    }
}
