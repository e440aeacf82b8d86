use crate::device::DeviceKind;

/// The capability set of a device kind: the configuration fields it accepts
/// and the command fields it honors during execution.
///
/// The catalog is consulted in two places: configuration validation on
/// create/modify, and the permissive command merge of an execute operation.
/// It also backs pool type-compatibility checks, since a pool accepts only
/// members whose kind — and therefore capability set — matches its own.
#[derive(Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Accepted `device_properties` keys.
    pub config_fields: &'static [&'static str],
    /// Accepted data fields for command execution.
    pub command_fields: &'static [&'static str],
}

impl Capabilities {
    /// Returns whether `field` belongs to the command schema of this kind.
    #[must_use]
    pub fn accepts_command_field(&self, field: &str) -> bool {
        self.command_fields.contains(&field)
    }
}

// Every supported kind is a networked appliance.
const NETWORKED_CONFIG: &[&str] = &["host", "port", "update_time"];

const SWITCH_COMMANDS: &[&str] = &["state"];
const COLOR_COMMANDS: &[&str] = &["state", "color"];

static SWITCH: Capabilities = Capabilities {
    config_fields: NETWORKED_CONFIG,
    command_fields: SWITCH_COMMANDS,
};

static COLOR: Capabilities = Capabilities {
    config_fields: NETWORKED_CONFIG,
    command_fields: COLOR_COMMANDS,
};

/// Looks up the [`Capabilities`] of a device kind.
#[must_use]
pub const fn capabilities(kind: DeviceKind) -> &'static Capabilities {
    match kind {
        DeviceKind::Lamp | DeviceKind::Window | DeviceKind::Door => &SWITCH,
        DeviceKind::RgbLamp => &COLOR,
    }
}
