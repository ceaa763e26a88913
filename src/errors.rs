// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error-location conversion for driver errors. Errors raised inside the
//! rewrite pipeline may carry an input location; before they surface to the
//! caller they are reformatted according to the analyzer's
//! `error_message_mode`, using the original SQL text for context.

use core::fmt;

use serde::Serialize;

/// 1-based line/column position in the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

impl ErrorLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Computes the location of `byte_offset` within `sql`. Offsets past
    /// the end clamp to the last character.
    pub fn from_byte_offset(sql: &str, byte_offset: usize) -> Self {
        let mut line = 1u32;
        let mut column = 1u32;
        for (i, ch) in sql.char_indices() {
            if i >= byte_offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self { line, column }
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// How driver errors are rendered for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorMessageMode {
    /// Keep the message untouched; the location stays available as a
    /// downcastable payload.
    WithPayload,
    /// Append ` [at line:column]` to the message.
    OneLine,
    /// Append the offending source line with a caret under the column.
    MultiLineWithCaret,
}

/// A driver error that knows where in the SQL text it was caused.
#[derive(Debug)]
pub struct LocatedError {
    location: ErrorLocation,
    message: String,
}

impl LocatedError {
    pub fn location(&self) -> ErrorLocation {
        self.location
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LocatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LocatedError {}

/// Builds an error carrying an input location.
pub fn located_error(location: ErrorLocation, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(LocatedError {
        location,
        message: message.into(),
    })
}

/// Routes a driver result through error-location conversion. Errors
/// without a location pass through unchanged in every mode.
pub fn convert_internal_error_location<T>(
    mode: ErrorMessageMode,
    attach_error_location_payload: bool,
    sql: &str,
    result: anyhow::Result<T>,
) -> anyhow::Result<T> {
    result.map_err(|err| convert_error(mode, attach_error_location_payload, sql, err))
}

fn convert_error(
    mode: ErrorMessageMode,
    attach_error_location_payload: bool,
    sql: &str,
    err: anyhow::Error,
) -> anyhow::Error {
    let Some(located) = err.downcast_ref::<LocatedError>() else {
        return err;
    };
    let location = located.location();
    let message = match mode {
        ErrorMessageMode::WithPayload => return err,
        ErrorMessageMode::OneLine => format!("{} [at {}]", located.message(), location),
        ErrorMessageMode::MultiLineWithCaret => caret_message(sql, location, located.message()),
    };
    if attach_error_location_payload {
        located_error(location, message)
    } else {
        anyhow::anyhow!(message)
    }
}

/// Formats `message` with the offending line of `sql` and a caret under
/// the error column.
pub fn caret_message(sql: &str, location: ErrorLocation, message: &str) -> String {
    let line_text = sql
        .lines()
        .nth(location.line.saturating_sub(1) as usize)
        .unwrap_or("");
    let caret_indent = " ".repeat(location.column.saturating_sub(1) as usize);
    format!("{message} [at {location}]\n{line_text}\n{caret_indent}^")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_offset_tracks_newlines() {
        let sql = "SELECT 1\nFROM t";
        let location = ErrorLocation::from_byte_offset(sql, 9);
        assert_eq!(location, ErrorLocation::new(2, 1));
    }

    #[test]
    fn one_line_mode_appends_location() {
        let err = located_error(ErrorLocation::new(1, 8), "no such function");
        let converted = convert_internal_error_location::<()>(
            ErrorMessageMode::OneLine,
            false,
            "SELECT nope()",
            Err(err),
        );
        let message = converted.map_or_else(|e| e.to_string(), |()| String::new());
        assert_eq!(message, "no such function [at 1:8]");
    }

    #[test]
    fn caret_mode_points_at_the_column() {
        let sql = "SELECT 1\nFROM no_such_table";
        let err = located_error(ErrorLocation::new(2, 6), "table not found");
        let converted = convert_internal_error_location::<()>(
            ErrorMessageMode::MultiLineWithCaret,
            false,
            sql,
            Err(err),
        );
        let message = converted.map_or_else(|e| e.to_string(), |()| String::new());
        assert_eq!(
            message,
            "table not found [at 2:6]\nFROM no_such_table\n     ^"
        );
    }

    #[test]
    fn payload_mode_keeps_location_downcastable() -> anyhow::Result<()> {
        let err = located_error(ErrorLocation::new(3, 4), "bad hint");
        let converted = convert_internal_error_location::<()>(
            ErrorMessageMode::WithPayload,
            true,
            "",
            Err(err),
        );
        let Err(err) = converted else {
            anyhow::bail!("conversion of an error must stay an error");
        };
        let located = err.downcast_ref::<LocatedError>();
        assert!(located.is_some(), "payload mode must keep the location");
        Ok(())
    }

    #[test]
    fn unlocated_errors_pass_through() {
        let err = anyhow::anyhow!("plain failure");
        let converted = convert_internal_error_location::<()>(
            ErrorMessageMode::MultiLineWithCaret,
            true,
            "SELECT 1",
            Err(err),
        );
        let message = converted.map_or_else(|e| e.to_string(), |()| String::new());
        assert_eq!(message, "plain failure");
    }
}
