//! User module - ensures a local account exists (or does not)

use async_trait::async_trait;
use shell_words::quote;

use crate::modules::{
    error::{ModuleExecutionError, ValidationError},
    interface::{ConvergenceModule, DesiredState, ModuleArgs, ModuleContext, StateCheck},
};

/// `getent` exits with this status when the key is not in the database
const GETENT_NOT_FOUND: i32 = 2;

/// One line of the passwd database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub home: String,
    pub shell: String,
}

impl PasswdEntry {
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim().split(':').collect();
        if fields.len() < 7 {
            return None;
        }
        Some(Self {
            name: fields[0].to_string(),
            uid: fields[2].parse().ok()?,
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
        })
    }
}

pub async fn lookup_user(
    context: &ModuleContext<'_>,
    name: &str,
) -> Result<Option<PasswdEntry>, ModuleExecutionError> {
    let output = context
        .run(&format!("getent passwd {}", quote(name)))
        .await?;

    match output.exit_code {
        0 => PasswdEntry::parse(&output.stdout).map(Some).ok_or_else(|| {
            ModuleExecutionError::UnexpectedOutput {
                action: "getent passwd".to_string(),
                output: output.stdout.trim().to_string(),
            }
        }),
        GETENT_NOT_FOUND => Ok(None),
        exit_code => Err(ModuleExecutionError::CommandFailed {
            action: "getent passwd".to_string(),
            exit_code,
            stderr: output.error_text(),
        }),
    }
}

pub async fn create_user(
    context: &ModuleContext<'_>,
    name: &str,
    shell: Option<&str>,
) -> Result<(), ModuleExecutionError> {
    let mut command = String::from("useradd -m");
    if let Some(shell) = shell {
        command.push_str(&format!(" -s {}", quote(shell)));
    }
    command.push_str(&format!(" {}", quote(name)));
    context.run_checked("useradd", &command).await?;
    Ok(())
}

/// Usernames accepted by useradd in its default configuration
pub fn validate_username(arg: &str, name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_.-".contains(c));
    if valid_first && valid_rest && name.len() <= 32 {
        Ok(())
    } else {
        Err(ValidationError::InvalidArgValue {
            arg: arg.to_string(),
            value: name.to_string(),
            reason: "not a valid user name".to_string(),
        })
    }
}

/// A user name argument after `{var: ..}` references were substituted;
/// load-time validation only sees literal names
pub fn resolved_username<'a>(
    args: &'a ModuleArgs,
    arg: &str,
) -> Result<&'a str, ModuleExecutionError> {
    let name = args.required_str(arg)?;
    validate_username(arg, name)?;
    Ok(name)
}

pub struct UserModule;

#[async_trait]
impl ConvergenceModule for UserModule {
    fn name(&self) -> &'static str {
        "user"
    }

    fn validate_args(&self, args: &ModuleArgs) -> Result<(), ValidationError> {
        args.ensure_known(&["name", "shell", "state"])?;
        args.expect_string("name", true)?;
        args.expect_string("shell", false)?;
        args.state()?;
        if let Some(name) = args.get_str("name") {
            validate_username("name", name)?;
        }
        Ok(())
    }

    async fn check(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<StateCheck, ModuleExecutionError> {
        let name = resolved_username(args, "name")?;
        let shell = args.get_str("shell");
        let entry = lookup_user(context, name).await?;

        let check = match (args.state()?, entry) {
            (DesiredState::Present, None) => StateCheck::drift(format!("user {name} missing")),
            (DesiredState::Present, Some(entry)) => match shell {
                Some(shell) if entry.shell != shell => StateCheck::drift(format!(
                    "shell of {name} is {}, want {shell}",
                    entry.shell
                )),
                _ => StateCheck::Satisfied,
            },
            (DesiredState::Absent, Some(_)) => StateCheck::drift(format!("user {name} present")),
            (DesiredState::Absent, None) => StateCheck::Satisfied,
        };
        Ok(check)
    }

    async fn apply(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<String, ModuleExecutionError> {
        let name = resolved_username(args, "name")?;
        let shell = args.get_str("shell");

        match args.state()? {
            DesiredState::Absent => {
                context
                    .run_checked("userdel", &format!("userdel -r {}", quote(name)))
                    .await?;
                Ok(format!("removed user {name}"))
            }
            DesiredState::Present => match (lookup_user(context, name).await?, shell) {
                (None, _) => {
                    create_user(context, name, shell).await?;
                    Ok(format!("created user {name}"))
                }
                (Some(_), Some(shell)) => {
                    context
                        .run_checked(
                            "usermod",
                            &format!("usermod -s {} {}", quote(shell), quote(name)),
                        )
                        .await?;
                    Ok(format!("set shell of {name} to {shell}"))
                }
                (Some(_), None) => Ok(format!("user {name} present")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_passwd_line() {
        let entry =
            PasswdEntry::parse("deploy:x:1001:1001:Deploy,,,:/home/deploy:/bin/bash\n").unwrap();
        assert_eq!(entry.name, "deploy");
        assert_eq!(entry.uid, 1001);
        assert_eq!(entry.home, "/home/deploy");
        assert_eq!(entry.shell, "/bin/bash");
        assert!(PasswdEntry::parse("garbage").is_none());
    }

    #[test]
    fn test_resolved_username_is_validated() {
        let args = |name: &str| {
            ModuleArgs::new([("name".to_string(), serde_json::json!(name))].into())
        };
        assert_eq!(resolved_username(&args("alice"), "name").unwrap(), "alice");
        assert!(matches!(
            resolved_username(&args("Bad User"), "name"),
            Err(ModuleExecutionError::Validation(_))
        ));
    }

    #[test]
    fn test_username_validation() {
        assert!(validate_username("name", "deploy").is_ok());
        assert!(validate_username("name", "_svc-1.x").is_ok());
        assert!(validate_username("name", "Deploy").is_err());
        assert!(validate_username("name", "1st").is_err());
        assert!(validate_username("name", "a b").is_err());
    }
}
