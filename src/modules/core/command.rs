//! Command module - runs a command unless its `creates` guard exists

use async_trait::async_trait;
use serde_json::Value;
use shell_words::quote;

use crate::modules::{
    error::{ModuleExecutionError, ValidationError},
    interface::{ConvergenceModule, ModuleArgs, ModuleContext, StateCheck},
};

/// Command module - runs a command unless its `creates` guard exists
pub struct CommandModule;

impl CommandModule {
    /// Command line from `cmd`: a string passed to the remote shell as is,
    /// or an argv list that is quoted word by word
    fn command_line(args: &ModuleArgs) -> Result<String, ModuleExecutionError> {
        match args.args.get("cmd") {
            Some(Value::String(cmd)) if !cmd.trim().is_empty() => Ok(cmd.clone()),
            Some(Value::Array(argv)) if !argv.is_empty() => {
                let words: Vec<String> = argv
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                Ok(shell_words::join(words))
            }
            _ => Err(ModuleExecutionError::InvalidArgs {
                message: "No command specified".to_string(),
            }),
        }
    }

    fn program(command: &str) -> String {
        shell_words::split(command)
            .ok()
            .and_then(|words| words.into_iter().next())
            .unwrap_or_else(|| "command".to_string())
    }
}

#[async_trait]
impl ConvergenceModule for CommandModule {
    fn name(&self) -> &'static str {
        "command"
    }

    fn validate_args(&self, args: &ModuleArgs) -> Result<(), ValidationError> {
        args.ensure_known(&["cmd", "creates", "become"])?;
        args.expect_string("creates", false)?;
        args.expect_bool("become")?;

        match args.args.get("cmd") {
            Some(Value::Array(argv)) if !argv.is_empty() => Ok(()),
            Some(Value::Array(_)) => Err(ValidationError::InvalidArgValue {
                arg: "cmd".to_string(),
                value: "[]".to_string(),
                reason: "must not be empty".to_string(),
            }),
            _ => args.expect_string("cmd", true),
        }
    }

    async fn check(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<StateCheck, ModuleExecutionError> {
        let Some(creates) = args.get_str("creates") else {
            return Ok(StateCheck::drift("command has no creates guard"));
        };

        let probe = format!("test -e {}", quote(creates));
        let output = if args.get_bool("become") {
            context.run_privileged(&probe).await?
        } else {
            context.run(&probe).await?
        };

        if output.success() {
            Ok(StateCheck::Satisfied)
        } else {
            Ok(StateCheck::drift(format!("{creates} does not exist")))
        }
    }

    async fn apply(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<String, ModuleExecutionError> {
        let command = Self::command_line(args)?;
        let program = Self::program(&command);

        if args.get_bool("become") {
            context.run_checked(&program, &command).await?;
        } else {
            let output = context.run(&command).await?;
            if !output.success() {
                return Err(ModuleExecutionError::CommandFailed {
                    action: program,
                    exit_code: output.exit_code,
                    stderr: output.error_text(),
                });
            }
        }
        Ok(format!("ran {program}"))
    }
}
