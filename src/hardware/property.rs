//! Validated instrument properties.
//!
//! Instruments expose dozens of settings that all follow the same shape: a query
//! command to read the value, a command template to write it, a domain the value
//! must respect, and a type the reply should be converted to. Each device declares
//! its settings once as a `static` table of [`PropertyDescriptor`]s and the façade
//! methods are thin wrappers over [`PropertyDescriptor::get`] and
//! [`PropertyDescriptor::set`].
//!
//! # Validation policy
//!
//! - [`truncated_range`] clamps out-of-range numbers to the nearest bound and logs
//!   a warning. Boundary values pass unchanged.
//! - [`strict_range`] rejects out-of-range numbers.
//! - [`strict_discrete_set`] requires an exact member of the declared set.
//!
//! # Example
//!
//! ```rust,ignore
//! static COMPLIANCE: PropertyDescriptor = PropertyDescriptor {
//!     name: "compliance_voltage",
//!     get_command: Some("CURRent:COMPliance?"),
//!     set_command: Some("CURRent:COMPliance {value}"),
//!     validator: Some(truncated_range),
//!     values: Domain::Range { min: 0.1, max: 105.0 },
//!     cast: None,
//!     unit: Some("V"),
//! };
//!
//! COMPLIANCE.set(transport, 200.0).await?; // writes "CURRent:COMPliance 105"
//! let volts = COMPLIANCE.get(transport).await?.as_f64();
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::reply::parse_numeric;
use crate::hardware::transport::ScpiTransport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Placeholder used in set-command templates.
pub const VALUE_PLACEHOLDER: &str = "value";

/// Typed value of an instrument property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Integer setting (counts, codes).
    Int(i64),
    /// Floating point setting (amps, volts, seconds).
    Float(f64),
    /// Keyword setting (`ON`, `OFF`, ...).
    Text(String),
}

impl PropertyValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Text(_) => None,
        }
    }

    /// Integer view of the value, if it is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            PropertyValue::Float(v) => float_to_i64(*v),
            _ => None,
        }
    }

    /// Keyword view of the value, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Int(i64::from(v))
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Text(if v { "ON" } else { "OFF" }.to_string())
    }
}

/// Declared domain of a property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    /// Any value is accepted.
    Unbounded,
    /// Inclusive numeric bounds.
    Range {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Exact keyword members.
    Set(&'static [&'static str]),
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Unbounded => f.write_str("any value"),
            Domain::Range { min, max } => write!(f, "[{min}, {max}]"),
            Domain::Set(members) => write!(f, "{{{}}}", members.join(", ")),
        }
    }
}

/// Checks (and possibly coerces) a value before it is written.
pub type ValidatorFn = fn(&PropertyDescriptor, PropertyValue) -> AppResult<PropertyValue>;

/// Converts a raw reply into a typed value after it is read.
pub type CastFn = fn(&str) -> AppResult<PropertyValue>;

/// Declarative mapping of one logical instrument attribute onto SCPI commands.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDescriptor {
    /// Logical name, used for lookup and error messages.
    pub name: &'static str,
    /// Query issued by [`get`](Self::get); `None` for write-only settings.
    pub get_command: Option<&'static str>,
    /// Template issued by [`set`](Self::set), with a `{value}` placeholder.
    pub set_command: Option<&'static str>,
    /// Validation applied before writing.
    pub validator: Option<ValidatorFn>,
    /// Domain handed to the validator.
    pub values: Domain,
    /// Conversion applied after reading; defaults to a float parse.
    pub cast: Option<CastFn>,
    /// Physical unit, for display only.
    pub unit: Option<&'static str>,
}

impl PropertyDescriptor {
    /// Run the declared validator over `value`.
    pub fn validate(&self, value: PropertyValue) -> AppResult<PropertyValue> {
        match self.validator {
            Some(validator) => validator(self, value),
            None => Ok(value),
        }
    }

    /// Render the set-command for an already validated value.
    pub fn format_set(&self, value: &PropertyValue) -> AppResult<String> {
        let template = self
            .set_command
            .ok_or_else(|| DaqError::validation(self.name, "property is read-only"))?;
        render_template(template, &[(VALUE_PLACEHOLDER, value.to_string())])
    }

    /// Convert a raw reply using the declared cast.
    pub fn cast_reply(&self, reply: &str) -> AppResult<PropertyValue> {
        match self.cast {
            Some(cast) => cast(reply),
            None => cast_float(reply),
        }
    }

    /// Query the instrument and return the typed value.
    pub async fn get(&self, transport: &dyn ScpiTransport) -> AppResult<PropertyValue> {
        let command = self
            .get_command
            .ok_or_else(|| DaqError::validation(self.name, "property is write-only"))?;
        let reply = transport.query(command).await?;
        let value = self.cast_reply(&reply)?;
        debug!(property = self.name, %value, "property read");
        Ok(value)
    }

    /// Validate `value`, write it, and return what was actually written.
    pub async fn set(
        &self,
        transport: &dyn ScpiTransport,
        value: impl Into<PropertyValue> + Send,
    ) -> AppResult<PropertyValue> {
        let value = self.validate(value.into())?;
        let command = self.format_set(&value)?;
        transport.write(&command).await?;
        debug!(property = self.name, %value, "property written");
        Ok(value)
    }
}

/// Look up a descriptor by name in a device table.
pub fn find_property(
    table: &'static [&'static PropertyDescriptor],
    name: &str,
) -> AppResult<&'static PropertyDescriptor> {
    table
        .iter()
        .copied()
        .find(|desc| desc.name == name)
        .ok_or_else(|| DaqError::validation(name, "unknown property"))
}

/// Fill `{key}` placeholders of a command template.
pub fn render_template(template: &str, vars: &[(&str, String)]) -> AppResult<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect();
    strfmt::strfmt(template, &vars)
        .map_err(|e| DaqError::Protocol(format!("cannot render command '{template}': {e}")))
}

// =============================================================================
// Validators
// =============================================================================

fn range_bounds(desc: &PropertyDescriptor) -> AppResult<(f64, f64)> {
    match desc.values {
        Domain::Range { min, max } => Ok((min, max)),
        other => Err(DaqError::validation(
            desc.name,
            format!("range validator used with domain {other}"),
        )),
    }
}

fn numeric(desc: &PropertyDescriptor, value: &PropertyValue) -> AppResult<f64> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DaqError::validation(desc.name, format!("'{value}' is not a finite number")))
}

/// Clamp numeric values into `[min, max]`.
pub fn truncated_range(desc: &PropertyDescriptor, value: PropertyValue) -> AppResult<PropertyValue> {
    let (min, max) = range_bounds(desc)?;
    let raw = numeric(desc, &value)?;
    let clamped = raw.clamp(min, max);
    if clamped != raw {
        warn!(
            property = desc.name,
            requested = raw,
            applied = clamped,
            "value outside {}, truncated",
            desc.values
        );
    }
    Ok(match value {
        PropertyValue::Int(_) => PropertyValue::Int(clamped.round() as i64),
        _ => PropertyValue::Float(clamped),
    })
}

/// Reject numeric values outside `[min, max]`.
pub fn strict_range(desc: &PropertyDescriptor, value: PropertyValue) -> AppResult<PropertyValue> {
    let (min, max) = range_bounds(desc)?;
    let raw = numeric(desc, &value)?;
    if (min..=max).contains(&raw) {
        Ok(value)
    } else {
        Err(DaqError::validation(
            desc.name,
            format!("{raw} is outside {}", desc.values),
        ))
    }
}

/// Require an exact member of the declared keyword set.
pub fn strict_discrete_set(
    desc: &PropertyDescriptor,
    value: PropertyValue,
) -> AppResult<PropertyValue> {
    let Domain::Set(members) = desc.values else {
        return Err(DaqError::validation(
            desc.name,
            format!("set validator used with domain {}", desc.values),
        ));
    };
    let rendered = value.to_string();
    if members.iter().any(|m| *m == rendered) {
        Ok(PropertyValue::Text(rendered))
    } else {
        Err(DaqError::validation(
            desc.name,
            format!("'{rendered}' is not one of {}", desc.values),
        ))
    }
}

// =============================================================================
// Casts
// =============================================================================

/// Parse the reply as a float (exponent or plain notation).
pub fn cast_float(reply: &str) -> AppResult<PropertyValue> {
    parse_numeric(reply).map(PropertyValue::Float)
}

/// Parse the reply as an integer; `"5.000000E+00"` is accepted.
pub fn cast_int(reply: &str) -> AppResult<PropertyValue> {
    let value = parse_numeric(reply)?;
    float_to_i64(value).map(PropertyValue::Int).ok_or_else(|| {
        DaqError::Protocol(format!("reply '{}' is not an i64 integer", reply.trim()))
    })
}

/// `Some` only for integral values inside the `i64` range.
fn float_to_i64(value: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict bound.
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (in_range && value.fract() == 0.0).then_some(value as i64)
}

/// Keep the reply as a keyword, trimmed.
pub fn cast_text(reply: &str) -> AppResult<PropertyValue> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(DaqError::Protocol("empty reply".into()));
    }
    Ok(PropertyValue::Text(trimmed.to_string()))
}
