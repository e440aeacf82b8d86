use core::fmt;

use indexmap::IndexMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::Capabilities;
use crate::device::DeviceKind;

/// The color reported by color-capable devices before any command sets one.
pub const DEFAULT_COLOR: &str = "FFFFFF";

/// The mutable, type-specific payload of a device.
///
/// Field order is preserved, so views and metric samples serialize the
/// payload the way it was built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceData(IndexMap<String, Value>);

impl DeviceData {
    /// The payload a freshly created device of `kind` starts with.
    #[must_use]
    pub fn initial(kind: DeviceKind) -> Self {
        let mut fields = IndexMap::new();
        fields.insert("state".to_owned(), Value::from("off"));
        if matches!(kind, DeviceKind::RgbLamp) {
            fields.insert("color".to_owned(), Value::from(DEFAULT_COLOR));
        }

        Self(fields)
    }

    /// Returns the value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_owned(), value);
    }
}

/// The fields an execute operation applied, in application order.
pub type AppliedFields = IndexMap<String, Value>;

/// A command payload submitted for execution on a device or pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(IndexMap<String, Value>);

impl Command {
    /// Creates an empty command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field to the command.
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_owned(), value.into());
        self
    }

    /// Returns whether the command carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges the fields accepted by `capabilities` into `data`, overwriting
    /// prior values field by field, and returns the fields actually applied.
    ///
    /// Fields outside the command schema are ignored rather than rejected.
    /// Values are checked before anything is written, so a rejected command
    /// leaves `data` untouched.
    ///
    /// # Errors
    ///
    /// Fails when the command is empty or a schema field carries an
    /// ill-shaped value.
    pub fn apply(
        &self,
        capabilities: &Capabilities,
        data: &mut DeviceData,
    ) -> Result<AppliedFields, CommandError> {
        if self.0.is_empty() {
            return Err(CommandError::Empty);
        }

        for (field, value) in &self.0 {
            if capabilities.accepts_command_field(field) {
                check_field(field, value)?;
            }
        }

        let mut applied = AppliedFields::new();
        for (field, value) in &self.0 {
            if capabilities.accepts_command_field(field) {
                data.set(field, value.clone());
                applied.insert(field.clone(), value.clone());
            }
        }

        Ok(applied)
    }
}

// Value checks mirror what the appliances themselves enforce.
fn check_field(field: &str, value: &Value) -> Result<(), CommandError> {
    match field {
        "state" => match value.as_str() {
            Some("on" | "off") => Ok(()),
            _ => Err(CommandError::InvalidState),
        },
        "color" if !value.is_string() => Err(CommandError::InvalidColor),
        _ => Ok(()),
    }
}

/// All possible reasons a command payload is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// The command carries no fields at all.
    Empty,
    /// `state` accepts only `"on"` and `"off"`.
    InvalidState,
    /// `color` accepts only strings.
    InvalidColor,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => "a command requires at least one field",
            Self::InvalidState => "invalid new state",
            Self::InvalidColor => "invalid color type",
        }
        .fmt(f)
    }
}

impl std::error::Error for CommandError {}
