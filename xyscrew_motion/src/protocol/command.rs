//! Command grammar.
//!
//! A line is split on whitespace into at most [`MAX_TOKENS`] tokens. The
//! first token is the verb (case-insensitive); the remaining tokens are
//! arguments. Letter arguments (`X10`, `y-2.5`, `F3000`) may appear in any
//! order, each at most once.
//!
//! Every verb maps onto one [`Command`] variant; nothing else is accepted.

use heapless::Vec;
use thiserror::Error;
use xyscrew_common::protocol::ErrorCode;

use crate::axis::AxisId;
use crate::engine::{FeedPreset, HomeTarget};

/// Longest accepted line, in whitespace-separated tokens.
pub const MAX_TOKENS: usize = 8;

/// How a move treats the MIN endstops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    /// Stop an axis moving toward MIN when its endstop triggers.
    Guarded,
    /// Ignore endstops.
    Fast,
}

impl MoveMode {
    #[inline]
    pub const fn is_guarded(&self) -> bool {
        matches!(self, Self::Guarded)
    }
}

/// Runtime parameter changes (`SET ...`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetCommand {
    Work {
        x: f64,
        y: f64,
        feed: Option<f64>,
    },
    Limit {
        x: Option<f64>,
        y: Option<f64>,
    },
    StepsPerRev {
        x: Option<f64>,
        y: Option<f64>,
    },
    StepsPerMm {
        x: Option<f64>,
        y: Option<f64>,
    },
    Zero(HomeTarget),
}

/// Every command the motion node understands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Ping,
    /// `M114`
    Status,
    /// `M119`
    Endstops,
    /// `M112`
    EmergencyStop,
    /// `M999`
    ClearEstop,
    /// `M17`
    EnableDrivers,
    /// `M18`
    DisableDrivers,
    Home(HomeTarget),
    /// Home both axes, then settle at (0, 0).
    Calibrate,
    /// Guarded move to (0, 0).
    Zero,
    Move {
        x: Option<f64>,
        y: Option<f64>,
        feed: Option<f64>,
        preset: FeedPreset,
        mode: MoveMode,
    },
    Jog {
        axis: AxisId,
        delta: f64,
        feed: Option<f64>,
        preset: FeedPreset,
        mode: MoveMode,
    },
    /// `WORK` with explicit coordinates, or the stored position when `None`.
    Work {
        target: Option<(f64, f64)>,
        feed: Option<f64>,
    },
    Set(SetCommand),
    Quit,
}

impl Command {
    /// Commands still served while the E-STOP latch is set.
    pub const fn allowed_during_estop(&self) -> bool {
        matches!(
            self,
            Self::Ping | Self::Status | Self::Endstops | Self::ClearEstop
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("bad arguments: {0}")]
    BadArgs(String),
    #[error("bad SET: {0}")]
    BadSet(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unknown(_) => ErrorCode::Unknown,
            Self::BadArgs(_) => ErrorCode::BadArgs,
            Self::BadSet(_) => ErrorCode::BadSet,
            Self::InvalidNumber(_) => ErrorCode::InvalidNumber,
        }
    }
}

// ─── Parsing ────────────────────────────────────────────────────────

/// Parse one command line (already stripped of framing).
pub fn parse(line: &str) -> Result<Command, ProtocolError> {
    let mut tokens: Vec<&str, MAX_TOKENS> = Vec::new();
    for token in line.split_whitespace() {
        tokens
            .push(token)
            .map_err(|_| ProtocolError::BadArgs(format!("more than {MAX_TOKENS} tokens")))?;
    }
    let Some((verb, args)) = tokens.split_first() else {
        return Err(ProtocolError::Unknown(String::new()));
    };
    let verb = verb.to_ascii_uppercase();

    match verb.as_str() {
        "PING" => bare(args, Command::Ping),
        "M114" => bare(args, Command::Status),
        "M119" => bare(args, Command::Endstops),
        "M112" => bare(args, Command::EmergencyStop),
        "M999" => bare(args, Command::ClearEstop),
        "M17" => bare(args, Command::EnableDrivers),
        "M18" => bare(args, Command::DisableDrivers),
        "G28" | "HOME" => parse_home(args),
        "CAL" => bare(args, Command::Calibrate),
        "ZERO" => bare(args, Command::Zero),
        "G" => parse_move(args, MoveMode::Guarded, FeedPreset::Default),
        "G1" => parse_move(args, MoveMode::Fast, FeedPreset::Default),
        "GF" | "G0" => parse_move(args, MoveMode::Fast, FeedPreset::Max),
        "WORK" => parse_work(args),
        "SET" => parse_set(args),
        "QUIT" | "EXIT" => bare(args, Command::Quit),
        other => parse_jog(other, args),
    }
}

fn bare(args: &[&str], command: Command) -> Result<Command, ProtocolError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(ProtocolError::BadArgs(format!("unexpected '{}'", args[0])))
    }
}

fn parse_number(text: &str) -> Result<f64, ProtocolError> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ProtocolError::InvalidNumber(text.to_string()))
}

/// Letter-prefixed arguments.
#[derive(Debug, Default)]
struct LetterArgs {
    x: Option<f64>,
    y: Option<f64>,
    f: Option<f64>,
}

impl LetterArgs {
    /// Parse `args`, accepting only letters listed in `allowed`.
    ///
    /// Structural problems are reported through `malformed`, so `SET`
    /// can map them to `BAD_SET` instead of `BAD_ARGS`.
    fn parse(
        args: &[&str],
        allowed: &str,
        malformed: fn(String) -> ProtocolError,
    ) -> Result<Self, ProtocolError> {
        let mut out = Self::default();
        for arg in args {
            let mut chars = arg.chars();
            let Some(letter) = chars.next().map(|c| c.to_ascii_uppercase()) else {
                continue;
            };
            if !allowed.contains(letter) {
                return Err(malformed(format!("unexpected argument '{arg}'")));
            }
            let value = chars.as_str();
            if value.is_empty() {
                return Err(malformed(format!("missing value for {letter}")));
            }
            let value = parse_number(value)?;
            let slot = match letter {
                'X' => &mut out.x,
                'Y' => &mut out.y,
                _ => &mut out.f,
            };
            if slot.replace(value).is_some() {
                return Err(malformed(format!("duplicate {letter}")));
            }
        }
        Ok(out)
    }
}

fn parse_home(args: &[&str]) -> Result<Command, ProtocolError> {
    match args {
        [] => Ok(Command::Home(HomeTarget::All)),
        [axis] => match axis.to_ascii_uppercase().as_str() {
            "X" => Ok(Command::Home(HomeTarget::Axis(AxisId::X))),
            "Y" => Ok(Command::Home(HomeTarget::Axis(AxisId::Y))),
            "XY" => Ok(Command::Home(HomeTarget::All)),
            _ => Err(ProtocolError::BadArgs(format!("unknown axis '{axis}'"))),
        },
        _ => Err(ProtocolError::BadArgs("HOME takes at most one axis".to_string())),
    }
}

fn parse_move(args: &[&str], mode: MoveMode, preset: FeedPreset) -> Result<Command, ProtocolError> {
    let letters = LetterArgs::parse(args, "XYF", ProtocolError::BadArgs)?;
    if letters.x.is_none() && letters.y.is_none() {
        return Err(ProtocolError::BadArgs("move needs X and/or Y".to_string()));
    }
    Ok(Command::Move {
        x: letters.x,
        y: letters.y,
        feed: letters.f,
        preset,
        mode,
    })
}

/// `DX`/`DY` (guarded) and `JX`/`JY` (fast) jogs, as `DX 5` or `DX5`.
fn parse_jog(verb: &str, args: &[&str]) -> Result<Command, ProtocolError> {
    let unknown = || ProtocolError::Unknown(verb.to_string());
    if verb.len() < 2 || !verb.is_char_boundary(2) {
        return Err(unknown());
    }
    let (head, inline) = verb.split_at(2);
    let (axis, mode, preset) = match head {
        "DX" => (AxisId::X, MoveMode::Guarded, FeedPreset::Default),
        "DY" => (AxisId::Y, MoveMode::Guarded, FeedPreset::Default),
        "JX" => (AxisId::X, MoveMode::Fast, FeedPreset::Jog),
        "JY" => (AxisId::Y, MoveMode::Fast, FeedPreset::Jog),
        _ => return Err(unknown()),
    };

    let (delta, rest) = if inline.is_empty() {
        let Some((first, rest)) = args.split_first() else {
            return Err(ProtocolError::BadArgs(format!("{head} needs a distance")));
        };
        (parse_number(first)?, rest)
    } else {
        match parse_number(inline) {
            Ok(delta) => (delta, args),
            Err(_) => return Err(unknown()),
        }
    };
    let letters = LetterArgs::parse(rest, "F", ProtocolError::BadArgs)?;

    Ok(Command::Jog {
        axis,
        delta,
        feed: letters.f,
        preset,
        mode,
    })
}

fn parse_work(args: &[&str]) -> Result<Command, ProtocolError> {
    let letters = LetterArgs::parse(args, "XYF", ProtocolError::BadArgs)?;
    match (letters.x, letters.y) {
        (Some(x), Some(y)) => Ok(Command::Work {
            target: Some((x, y)),
            feed: letters.f,
        }),
        (None, None) => Ok(Command::Work {
            target: None,
            feed: letters.f,
        }),
        _ => Err(ProtocolError::BadArgs("WORK needs both X and Y".to_string())),
    }
}

fn parse_set(args: &[&str]) -> Result<Command, ProtocolError> {
    let Some((key, rest)) = args.split_first() else {
        return Err(ProtocolError::BadSet("missing parameter".to_string()));
    };
    let key = key.to_ascii_uppercase();
    let set = match key.as_str() {
        "WORK" => {
            let letters = LetterArgs::parse(rest, "XYF", ProtocolError::BadSet)?;
            let (Some(x), Some(y)) = (letters.x, letters.y) else {
                return Err(ProtocolError::BadSet("SET WORK needs X and Y".to_string()));
            };
            SetCommand::Work {
                x,
                y,
                feed: letters.f,
            }
        }
        "LIM" | "STEPS" | "SPMM" => {
            let letters = LetterArgs::parse(rest, "XY", ProtocolError::BadSet)?;
            if letters.x.is_none() && letters.y.is_none() {
                return Err(ProtocolError::BadSet(format!("SET {key} needs X and/or Y")));
            }
            for value in [letters.x, letters.y].into_iter().flatten() {
                if value <= 0.0 {
                    return Err(ProtocolError::BadSet(format!("SET {key} must be > 0")));
                }
            }
            let (x, y) = (letters.x, letters.y);
            match key.as_str() {
                "LIM" => SetCommand::Limit { x, y },
                "STEPS" => SetCommand::StepsPerRev { x, y },
                _ => SetCommand::StepsPerMm { x, y },
            }
        }
        "X0" | "Y0" | "XY0" => {
            if !rest.is_empty() {
                return Err(ProtocolError::BadSet(format!("SET {key} takes no arguments")));
            }
            SetCommand::Zero(match key.as_str() {
                "X0" => HomeTarget::Axis(AxisId::X),
                "Y0" => HomeTarget::Axis(AxisId::Y),
                _ => HomeTarget::All,
            })
        }
        _ => return Err(ProtocolError::BadSet(format!("unknown parameter '{key}'"))),
    };
    Ok(Command::Set(set))
}
