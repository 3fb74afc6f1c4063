//! Command-line usage errors

use thiserror::Error;

/// Problems with the command line itself. Request failures are reported by
/// the library's own error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("no command given")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command} requires <{argument}>")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("{0} requires a value")]
    MissingFlagValue(String),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}
