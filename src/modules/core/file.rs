//! File module - ensures a file has the given content, mode and owner

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use shell_words::quote;

use crate::modules::{
    error::{ModuleExecutionError, ValidationError},
    interface::{ConvergenceModule, ModuleArgs, ModuleContext, StateCheck},
};

const DEFAULT_MODE: u32 = 0o644;
const DEFAULT_OWNER: &str = "root";

pub fn content_digest(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Accepts `"0644"`, `"644"`, `"0o644"` or a YAML integer written as octal
/// digits (`0644` loads as decimal 644)
pub fn parse_mode(value: &Value) -> Result<u32, String> {
    let digits = match value {
        Value::String(s) => s.trim().trim_start_matches("0o").to_string(),
        Value::Number(n) => n
            .as_u64()
            .map(|n| n.to_string())
            .ok_or_else(|| format!("{n} is not a file mode"))?,
        other => return Err(format!("{other} is not a file mode")),
    };
    let mode = u32::from_str_radix(&digits, 8).map_err(|_| format!("{digits} is not octal"))?;
    if mode > 0o7777 {
        return Err(format!("{digits} is out of range"));
    }
    Ok(mode)
}

/// Remote sha256 of `path`, None when it cannot be read
pub async fn remote_digest(
    context: &ModuleContext<'_>,
    path: &str,
) -> Result<Option<String>, ModuleExecutionError> {
    let output = context
        .run_privileged(&format!("sha256sum {}", quote(path)))
        .await?;
    if !output.success() {
        return Ok(None);
    }
    Ok(output.stdout.split_whitespace().next().map(str::to_string))
}

/// Remote `(mode, owner)` of `path`
async fn remote_attributes(
    context: &ModuleContext<'_>,
    path: &str,
) -> Result<(u32, String), ModuleExecutionError> {
    let output = context
        .run_checked("stat", &format!("stat -c '%a %U' {}", quote(path)))
        .await?;
    let unexpected = || ModuleExecutionError::UnexpectedOutput {
        action: "stat".to_string(),
        output: output.stdout.trim().to_string(),
    };

    let mut fields = output.stdout.split_whitespace();
    let mode = fields
        .next()
        .and_then(|m| u32::from_str_radix(m, 8).ok())
        .ok_or_else(unexpected)?;
    let owner = fields.next().ok_or_else(unexpected)?;
    Ok((mode, owner.to_string()))
}

struct FileSpec<'a> {
    path: &'a str,
    content: &'a str,
    mode: u32,
    owner: &'a str,
}

impl<'a> FileSpec<'a> {
    fn from_args(args: &'a ModuleArgs) -> Result<Self, ModuleExecutionError> {
        let mode = match args.args.get("mode") {
            None | Some(Value::Null) => DEFAULT_MODE,
            Some(value) => {
                parse_mode(value).map_err(|message| ModuleExecutionError::InvalidArgs { message })?
            }
        };
        Ok(Self {
            path: args.required_str("path")?,
            content: args.required_str("content")?,
            mode,
            owner: args.get_str("owner").unwrap_or(DEFAULT_OWNER),
        })
    }
}

pub struct FileModule;

#[async_trait]
impl ConvergenceModule for FileModule {
    fn name(&self) -> &'static str {
        "file"
    }

    fn validate_args(&self, args: &ModuleArgs) -> Result<(), ValidationError> {
        args.ensure_known(&["path", "content", "mode", "owner"])?;
        args.expect_string("path", true)?;
        args.expect_string("content", true)?;
        args.expect_string("owner", false)?;

        if let Some(path) = args.get_str("path") {
            if !path.starts_with('/') {
                return Err(ValidationError::InvalidArgValue {
                    arg: "path".to_string(),
                    value: path.to_string(),
                    reason: "must be absolute".to_string(),
                });
            }
        }
        if let Some(mode) = args.args.get("mode").filter(|v| !v.is_null()) {
            parse_mode(mode).map_err(|reason| ValidationError::InvalidArgValue {
                arg: "mode".to_string(),
                value: mode.to_string(),
                reason,
            })?;
        }
        Ok(())
    }

    async fn check(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<StateCheck, ModuleExecutionError> {
        let spec = FileSpec::from_args(args)?;

        let Some(digest) = remote_digest(context, spec.path).await? else {
            return Ok(StateCheck::drift(format!("{} missing", spec.path)));
        };
        if digest != content_digest(spec.content.as_bytes()) {
            return Ok(StateCheck::drift(format!("{} content differs", spec.path)));
        }

        let (mode, owner) = remote_attributes(context, spec.path).await?;
        if mode != spec.mode {
            return Ok(StateCheck::drift(format!(
                "{} mode {:04o}, want {:04o}",
                spec.path, mode, spec.mode
            )));
        }
        if owner != spec.owner {
            return Ok(StateCheck::drift(format!(
                "{} owned by {owner}, want {}",
                spec.path, spec.owner
            )));
        }
        Ok(StateCheck::Satisfied)
    }

    async fn apply(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<String, ModuleExecutionError> {
        let spec = FileSpec::from_args(args)?;
        context
            .upload(spec.content.as_bytes(), spec.path, spec.mode, spec.owner, None)
            .await?;
        Ok(format!("wrote {}", spec.path))
    }
}
