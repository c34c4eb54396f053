//! Line-oriented command protocol between host and helper.
//!
//! Every request is one line; every request gets exactly one response line starting with
//! `OK` or `FAIL`.

use crate::error::{BridgeError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Response payload for an acknowledged `exit`.
pub const EXIT_ACK: &str = "EXIT";

/// How the helper services a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Handled on the channel thread before responding.
    Immediate,
    /// Runs on the main thread; the channel thread blocks for the result.
    Sync,
    /// Appended to the main-thread queue and acknowledged right away.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Exit,
    GetState,
    LoadPlugin,
    LoadAndSetState,
    Init,
    InitWithState,
    SetState,
    ShowGui,
    HideGui,
}

impl CommandKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "exit" => Some(Self::Exit),
            "get_state" => Some(Self::GetState),
            "load_plugin" => Some(Self::LoadPlugin),
            "load_and_set_state" => Some(Self::LoadAndSetState),
            "init" => Some(Self::Init),
            "init_with_state" => Some(Self::InitWithState),
            "set_state" => Some(Self::SetState),
            "show_gui" => Some(Self::ShowGui),
            "hide_gui" => Some(Self::HideGui),
            _ => None,
        }
    }

    /// Classifies a raw line by its first word.
    pub fn of_line(line: &str) -> Option<Self> {
        line.split_whitespace().next().and_then(Self::from_keyword)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::GetState => "get_state",
            Self::LoadPlugin => "load_plugin",
            Self::LoadAndSetState => "load_and_set_state",
            Self::Init => "init",
            Self::InitWithState => "init_with_state",
            Self::SetState => "set_state",
            Self::ShowGui => "show_gui",
            Self::HideGui => "hide_gui",
        }
    }

    pub fn class(&self) -> CommandClass {
        match self {
            Self::Exit => CommandClass::Immediate,
            Self::GetState => CommandClass::Sync,
            _ => CommandClass::Queued,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Exit,
    GetState,
    LoadPlugin {
        path: PathBuf,
        sample_rate: f64,
        block_len: usize,
    },
    LoadAndSetState {
        path: PathBuf,
        sample_rate: f64,
        block_len: usize,
        state: String,
    },
    /// Standalone helpers load their own processor.
    Init { sample_rate: f64, block_len: usize },
    InitWithState {
        sample_rate: f64,
        block_len: usize,
        state: String,
    },
    SetState(String),
    ShowGui,
    HideGui,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Exit => CommandKind::Exit,
            Self::GetState => CommandKind::GetState,
            Self::LoadPlugin { .. } => CommandKind::LoadPlugin,
            Self::LoadAndSetState { .. } => CommandKind::LoadAndSetState,
            Self::Init { .. } => CommandKind::Init,
            Self::InitWithState { .. } => CommandKind::InitWithState,
            Self::SetState(_) => CommandKind::SetState,
            Self::ShowGui => CommandKind::ShowGui,
            Self::HideGui => CommandKind::HideGui,
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (keyword, rest) = match line.find(char::is_whitespace) {
            Some(pos) => (&line[..pos], line[pos..].trim_start()),
            None => (line, ""),
        };

        let kind = CommandKind::from_keyword(keyword)
            .ok_or_else(|| BridgeError::Protocol(format!("unknown command '{}'", keyword)))?;

        let command = match kind {
            CommandKind::Exit => Self::Exit,
            CommandKind::GetState => Self::GetState,
            CommandKind::ShowGui => Self::ShowGui,
            CommandKind::HideGui => Self::HideGui,
            CommandKind::LoadPlugin => {
                let (path, rest) = take_quoted(rest)?;
                let mut args = rest.split_whitespace();
                let sample_rate = parse_rate(args.next())?;
                let block_len = parse_block_len(args.next())?;
                Self::LoadPlugin {
                    path: PathBuf::from(path),
                    sample_rate,
                    block_len,
                }
            }
            CommandKind::LoadAndSetState => {
                let (path, rest) = take_quoted(rest)?;
                let mut args = rest.split_whitespace();
                let sample_rate = parse_rate(args.next())?;
                let block_len = parse_block_len(args.next())?;
                let state = parse_token(args.next())?;
                Self::LoadAndSetState {
                    path: PathBuf::from(path),
                    sample_rate,
                    block_len,
                    state,
                }
            }
            CommandKind::Init => {
                let mut args = rest.split_whitespace();
                Self::Init {
                    sample_rate: parse_rate(args.next())?,
                    block_len: parse_block_len(args.next())?,
                }
            }
            CommandKind::InitWithState => {
                let mut args = rest.split_whitespace();
                Self::InitWithState {
                    sample_rate: parse_rate(args.next())?,
                    block_len: parse_block_len(args.next())?,
                    state: parse_token(args.next())?,
                }
            }
            CommandKind::SetState => Self::SetState(parse_token(rest.split_whitespace().next())?),
        };

        Ok(command)
    }

    /// Serializes to a single protocol line (without the terminator).
    pub fn to_line(&self) -> Result<String> {
        let line = match self {
            Self::Exit | Self::GetState | Self::ShowGui | Self::HideGui => {
                self.kind().keyword().to_string()
            }
            Self::LoadPlugin {
                path,
                sample_rate,
                block_len,
            } => format!(
                "load_plugin \"{}\" {} {}",
                quotable(path)?,
                sample_rate,
                block_len
            ),
            Self::LoadAndSetState {
                path,
                sample_rate,
                block_len,
                state,
            } => format!(
                "load_and_set_state \"{}\" {} {} {}",
                quotable(path)?,
                sample_rate,
                block_len,
                checked_token(state)?
            ),
            Self::Init {
                sample_rate,
                block_len,
            } => format!("init {} {}", sample_rate, block_len),
            Self::InitWithState {
                sample_rate,
                block_len,
                state,
            } => format!(
                "init_with_state {} {} {}",
                sample_rate,
                block_len,
                checked_token(state)?
            ),
            Self::SetState(state) => format!("set_state {}", checked_token(state)?),
        };
        Ok(line)
    }
}

fn take_quoted(input: &str) -> Result<(&str, &str)> {
    let body = input
        .strip_prefix('"')
        .ok_or_else(|| BridgeError::MalformedCommand("expected quoted plugin path".to_string()))?;
    let end = body
        .find('"')
        .ok_or_else(|| BridgeError::MalformedCommand("unterminated plugin path".to_string()))?;
    let path = &body[..end];
    if path.is_empty() {
        return Err(BridgeError::MalformedCommand("empty plugin path".to_string()));
    }
    Ok((path, &body[end + 1..]))
}

fn parse_rate(arg: Option<&str>) -> Result<f64> {
    let arg = arg.ok_or_else(|| BridgeError::MalformedCommand("missing sample rate".to_string()))?;
    match arg.parse::<f64>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
        _ => Err(BridgeError::MalformedCommand(format!(
            "invalid sample rate '{}'",
            arg
        ))),
    }
}

fn parse_block_len(arg: Option<&str>) -> Result<usize> {
    let arg = arg.ok_or_else(|| BridgeError::MalformedCommand("missing block length".to_string()))?;
    match arg.parse::<usize>() {
        Ok(len) if len > 0 => Ok(len),
        _ => Err(BridgeError::MalformedCommand(format!(
            "invalid block length '{}'",
            arg
        ))),
    }
}

fn parse_token(arg: Option<&str>) -> Result<String> {
    arg.map(str::to_string)
        .ok_or_else(|| BridgeError::MalformedCommand("missing state token".to_string()))
}

fn quotable(path: &Path) -> Result<String> {
    let text = path.to_string_lossy();
    if text.is_empty() || text.contains('"') || text.contains('\n') || text.contains('\r') {
        return Err(BridgeError::MalformedCommand(format!(
            "plugin path cannot be sent over the channel: {}",
            text
        )));
    }
    Ok(text.into_owned())
}

fn checked_token(token: &str) -> Result<&str> {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(BridgeError::MalformedCommand(
            "state token must be a single non-empty word".to_string(),
        ));
    }
    Ok(token)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Option<String>),
    Fail(String),
}

impl Response {
    pub fn ok() -> Self {
        Self::Ok(None)
    }

    pub fn ok_with(payload: impl Into<String>) -> Self {
        Self::Ok(Some(payload.into()))
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Ok(payload) => payload.as_deref(),
            Self::Fail(_) => None,
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end();
        let (status, rest) = match line.split_once(' ') {
            Some((status, rest)) => (status, rest.trim()),
            None => (line, ""),
        };

        match status {
            "OK" if rest.is_empty() => Ok(Self::Ok(None)),
            "OK" => Ok(Self::Ok(Some(rest.to_string()))),
            "FAIL" => Ok(Self::Fail(rest.to_string())),
            _ => Err(BridgeError::Protocol(format!(
                "response without status token: '{}'",
                line
            ))),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(None) => write!(f, "OK"),
            Self::Ok(Some(payload)) => write!(f, "OK {}", payload),
            Self::Fail(reason) if reason.is_empty() => write!(f, "FAIL"),
            Self::Fail(reason) => write!(f, "FAIL {}", reason),
        }
    }
}
