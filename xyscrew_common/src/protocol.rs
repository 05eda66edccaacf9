//! Wire-protocol response vocabulary.
//!
//! The motion node answers every command line with exactly one response
//! line. This module owns the formatting of those lines (used by the
//! dispatcher) and their parsing (used by the cycle node's motion link), so
//! both ends agree on a single vocabulary.
//!
//! | Response | Meaning |
//! |----------|---------|
//! | `ok` / `ok <TOKEN>` | command finished; token qualifies the result |
//! | `PONG` | answer to `PING` |
//! | `err <CODE>` | command rejected or failed |
//! | anything else | status line (`M114`, `M119`) |
//!
//! One byte sits outside the line framing: [`REALTIME_ESTOP`] asserts
//! E-STOP the moment the transport reads it, even while a move is running,
//! and is never answered.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Out-of-band E-STOP byte (Ctrl-X).
pub const REALTIME_ESTOP: u8 = 0x18;

/// Result tokens carried by `ok` responses.
pub mod token {
    pub const IN_HOME_POS: &str = "IN_HOME_POS";
    pub const IN_ZERO_POS: &str = "IN_ZERO_POS";
    pub const IN_WORK_POS: &str = "IN_WORK_POS";
    pub const CALIBRATED: &str = "CALIBRATED";
    pub const ESTOP: &str = "ESTOP";
    pub const BYE: &str = "BYE";
    pub const ENDSTOP_X: &str = "ENDSTOP_X";
    pub const ENDSTOP_Y: &str = "ENDSTOP_Y";
    pub const ENDSTOP_XY: &str = "ENDSTOP_XY";
}

/// Protocol error codes (`err <CODE>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Emergency stop active.
    Estop,
    /// Unknown verb.
    Unknown,
    /// Missing, duplicate or unexpected argument.
    BadArgs,
    /// Malformed or out-of-range `SET`.
    BadSet,
    /// Argument value is not a finite number.
    InvalidNumber,
    /// Neither axis found its endstop.
    HomeNotFound,
    /// X axis did not find its endstop.
    HomeXNotFound,
    /// Y axis did not find its endstop.
    HomeYNotFound,
    /// Motion requested on an axis that is not homed.
    NotHomed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 9] = [
        Self::Estop,
        Self::Unknown,
        Self::BadArgs,
        Self::BadSet,
        Self::InvalidNumber,
        Self::HomeNotFound,
        Self::HomeXNotFound,
        Self::HomeYNotFound,
        Self::NotHomed,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Estop => "ESTOP",
            Self::Unknown => "UNKNOWN",
            Self::BadArgs => "BAD_ARGS",
            Self::BadSet => "BAD_SET",
            Self::InvalidNumber => "INVALID_NUMBER",
            Self::HomeNotFound => "HOME_NOT_FOUND",
            Self::HomeXNotFound => "HOME_X_NOT_FOUND",
            Self::HomeYNotFound => "HOME_Y_NOT_FOUND",
            Self::NotHomed => "NOT_HOMED",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == token)
    }

    /// True for the homing failure family.
    #[inline]
    pub const fn is_homing_failure(&self) -> bool {
        matches!(
            self,
            Self::HomeNotFound | Self::HomeXNotFound | Self::HomeYNotFound
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response line could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("empty response line")]
    Empty,
    #[error("unknown error code in response: {0}")]
    UnknownCode(String),
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Option<String>),
    Pong,
    Status(String),
    Err(ErrorCode),
}

impl Response {
    #[inline]
    pub fn ok() -> Self {
        Self::Ok(None)
    }

    #[inline]
    pub fn ok_with(token: &str) -> Self {
        Self::Ok(Some(token.to_string()))
    }

    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Token of an `ok` response, if any.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Ok(Some(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Err(code) => Some(*code),
            _ => None,
        }
    }

    /// Parse one response line (trailing CR/LF tolerated).
    pub fn parse(line: &str) -> Result<Self, ResponseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ResponseError::Empty);
        }
        if line == "PONG" {
            return Ok(Self::Pong);
        }
        if line == "ok" {
            return Ok(Self::Ok(None));
        }
        if let Some(rest) = line.strip_prefix("ok ") {
            return Ok(Self::Ok(Some(rest.trim().to_string())));
        }
        if let Some(rest) = line.strip_prefix("err ") {
            let code = rest.trim();
            return ErrorCode::from_token(code)
                .map(Self::Err)
                .ok_or_else(|| ResponseError::UnknownCode(code.to_string()));
        }
        Ok(Self::Status(line.to_string()))
    }
}

impl FromStr for Response {
    type Err = ResponseError;

    fn from_str(s: &str) -> Result<Self, ResponseError> {
        Self::parse(s)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(None) => f.write_str("ok"),
            Self::Ok(Some(token)) => write!(f, "ok {token}"),
            Self::Pong => f.write_str("PONG"),
            Self::Status(line) => f.write_str(line),
            Self::Err(code) => write!(f, "err {code}"),
        }
    }
}
