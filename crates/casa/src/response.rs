use serde::{Deserialize, Serialize};

use crate::command::DeviceData;
use crate::device::{DeviceId, DeviceKind, DeviceState};
use crate::properties::DeviceProperties;

/// The action a lifecycle operation settled on, as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    /// The device (re)entered [`DeviceState::Connected`].
    Connected,
    /// The device released its connection.
    Disconnected,
    /// The device accepted a power-off order.
    PowerOff,
}

/// The body returned by the connect, disconnect, reboot, and power-off
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// The action the device settled on.
    pub command_action: CommandAction,
}

impl ActionResponse {
    /// The body reported after a successful connect or reboot.
    #[must_use]
    pub const fn connected() -> Self {
        Self {
            command_action: CommandAction::Connected,
        }
    }

    /// The body reported after a successful disconnect.
    #[must_use]
    pub const fn disconnected() -> Self {
        Self {
            command_action: CommandAction::Disconnected,
        }
    }

    /// The body reported after a successful power-off.
    #[must_use]
    pub const fn power_off() -> Self {
        Self {
            command_action: CommandAction::PowerOff,
        }
    }
}

/// The connection-status block embedded in a device view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    /// Current connection state.
    pub status: DeviceState,
}

/// The externally visible snapshot of a registered device or pool.
///
/// Views are detached copies: mutating a view never touches the registry.
/// Sections that do not apply to the entity variant are omitted from the
/// serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceView {
    /// Registry identifier.
    pub id: DeviceId,
    /// Kind tag, shared by a pool and all of its members.
    pub device_type: DeviceKind,
    /// Connection-status block.
    pub status: StatusView,
    /// Configuration; absent for pools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_properties: Option<DeviceProperties>,
    /// Data payload; absent for pools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DeviceData>,
    /// Identifier of the owning pool, for pooled devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_of: Option<DeviceId>,
    /// Member identifiers in insertion order; present only for pools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<DeviceId>>,
}
