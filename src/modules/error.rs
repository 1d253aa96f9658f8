use crate::secrets::SecretError;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors raised while probing or converging a host
#[derive(Error, Debug)]
pub enum ModuleExecutionError {
    #[error("{action} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        action: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Unsupported on this host: {reason}")]
    Unsupported { reason: String },

    #[error("Prerequisite not met: {reason}")]
    MissingPrerequisite { reason: String },

    #[error("Unexpected output from {action}: {output}")]
    UnexpectedOutput { action: String, output: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Invalid arguments: {message}")]
    InvalidArgs { message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors found while validating task arguments at load time
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required argument: {arg}")]
    MissingRequiredArg { arg: String },

    #[error("Invalid argument value: {arg} = {value} - {reason}")]
    InvalidArgValue {
        arg: String,
        value: String,
        reason: String,
    },

    #[error("Unknown argument: {arg}")]
    UnknownArg { arg: String },
}
