//! Parsing of textual instrument replies.
//!
//! Keithley instruments answer numeric queries in exponent notation
//! (`"+1.234567E-03"`). The strict parser splits on the exponent marker and
//! rebuilds the value as mantissa × 10^exponent; the lenient parser also
//! accepts plain decimals.

use crate::error::{AppResult, DaqError};
use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `code,"message"` as returned by `:SYSTem:ERRor?`.
static ERROR_REPLY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"^\s*([+-]?\d+)\s*,\s*"?([^"]*)"?\s*$"#).ok());

/// Parse a reply that must be in exponent notation.
///
/// Fails with [`DaqError::Protocol`] if there is no `E`/`e` marker, if either
/// side is not a number, or if the result is not finite.
pub fn parse_scientific(reply: &str) -> AppResult<f64> {
    let trimmed = reply.trim();
    let (mantissa, exponent) = trimmed
        .split_once(['E', 'e'])
        .ok_or_else(|| DaqError::Protocol(format!("no exponent marker in reply '{trimmed}'")))?;

    let mantissa: f64 = mantissa
        .trim()
        .parse()
        .map_err(|_| DaqError::Protocol(format!("bad mantissa in reply '{trimmed}'")))?;
    let exponent: i32 = exponent
        .trim()
        .parse()
        .map_err(|_| DaqError::Protocol(format!("bad exponent in reply '{trimmed}'")))?;

    // Powers of ten up to 1e22 are exact, so dividing keeps "1.5E-3" == 0.0015.
    let value = if exponent >= 0 {
        mantissa * 10f64.powi(exponent)
    } else {
        mantissa / 10f64.powi(-exponent)
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(DaqError::Protocol(format!(
            "reply '{trimmed}' is not a finite number"
        )))
    }
}

/// Parse a numeric reply in either exponent or plain decimal notation.
pub fn parse_numeric(reply: &str) -> AppResult<f64> {
    let trimmed = reply.trim();
    if trimmed.contains(['E', 'e']) {
        return parse_scientific(trimmed);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DaqError::Protocol(format!("reply '{trimmed}' is not a number")))
}

/// Parse a comma-separated list of numbers (trace buffer dumps).
///
/// An empty reply is an empty list.
pub fn parse_values(reply: &str) -> AppResult<Vec<f64>> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed.split(',').map(parse_numeric).collect()
}

/// Parse an error-queue entry `code,"message"`.
pub fn parse_error_reply(reply: &str) -> AppResult<(i32, String)> {
    let regex = ERROR_REPLY
        .as_ref()
        .ok_or_else(|| DaqError::Protocol("error reply pattern failed to compile".into()))?;
    let captures = regex
        .captures(reply)
        .ok_or_else(|| DaqError::Protocol(format!("malformed error reply '{}'", reply.trim())))?;

    let code = captures[1]
        .parse::<i32>()
        .map_err(|_| DaqError::Protocol(format!("bad error code in '{}'", reply.trim())))?;
    Ok((code, captures[2].trim().to_string()))
}
