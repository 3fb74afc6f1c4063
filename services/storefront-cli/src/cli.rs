//! Argument parsing
//!
//! `storefront [--config PATH] [--metrics] <command> [args]`

use crate::error::UsageError;

pub const USAGE: &str = "usage: storefront [--config PATH] [--metrics] <command>

commands:
  login <email> <password>     sign in and store the session
  register <email> <password>  create an account and sign in
  logout                       forget the stored session
  whoami                       show the signed-in user
  get <path>                   GET an API path and print the JSON body
  refresh                      refresh the access token explicitly";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    Register { email: String, password: String },
    Logout,
    Whoami,
    Get { path: String },
    Refresh,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<String>,
    pub metrics: bool,
    pub command: Command,
}

impl Cli {
    /// Parse arguments (without the program name).
    pub fn parse(args: &[String]) -> Result<Self, UsageError> {
        let mut config = None;
        let mut metrics = false;
        let mut positional = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| UsageError::MissingFlagValue(arg.clone()))?;
                    config = Some(value.clone());
                }
                "--metrics" => metrics = true,
                _ => positional.push(arg.as_str()),
            }
        }

        let (name, rest) = positional
            .split_first()
            .ok_or(UsageError::MissingCommand)?;
        let command = match *name {
            "login" => {
                let (email, password) = credentials("login", rest)?;
                Command::Login { email, password }
            }
            "register" => {
                let (email, password) = credentials("register", rest)?;
                Command::Register { email, password }
            }
            "logout" => no_args(Command::Logout, rest)?,
            "whoami" => no_args(Command::Whoami, rest)?,
            "refresh" => no_args(Command::Refresh, rest)?,
            "get" => match rest {
                [path] => Command::Get {
                    path: (*path).to_string(),
                },
                [] => {
                    return Err(UsageError::MissingArgument {
                        command: "get",
                        argument: "path",
                    });
                }
                [_, extra, ..] => return Err(UsageError::UnexpectedArgument((*extra).into())),
            },
            other => return Err(UsageError::UnknownCommand(other.to_string())),
        };

        Ok(Self {
            config,
            metrics,
            command,
        })
    }
}

fn credentials(command: &'static str, rest: &[&str]) -> Result<(String, String), UsageError> {
    match rest {
        [email, password] => Ok(((*email).to_string(), (*password).to_string())),
        [] => Err(UsageError::MissingArgument {
            command,
            argument: "email",
        }),
        [_] => Err(UsageError::MissingArgument {
            command,
            argument: "password",
        }),
        [_, _, extra, ..] => Err(UsageError::UnexpectedArgument((*extra).into())),
    }
}

fn no_args(command: Command, rest: &[&str]) -> Result<Command, UsageError> {
    match rest.first() {
        None => Ok(command),
        Some(extra) => Err(UsageError::UnexpectedArgument((*extra).into())),
    }
}
