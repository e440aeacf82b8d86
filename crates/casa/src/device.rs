use core::fmt;

use serde::{Deserialize, Serialize};

/// A unique identifier assigned by the registry when an entity is created.
///
/// Identifiers have the form `device-{n}`, where `n` grows monotonically for
/// the lifetime of the process, so an identifier is never reused even after
/// its entity has been deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Builds the identifier of the `index`-th created entity.
    #[must_use]
    pub fn from_index(index: u64) -> Self {
        Self(format!("device-{index}"))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The fixed set of appliance kinds the registry manages.
///
/// The kind of an entity is chosen at creation and immutable afterwards; it
/// selects the entity's [`crate::catalog::Capabilities`] and constrains pool
/// membership to same-kind devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// A plain on/off lamp.
    Lamp,
    /// A lamp with a configurable color.
    RgbLamp,
    /// A motorized window.
    Window,
    /// A motorized door.
    Door,
}

impl DeviceKind {
    /// Every supported kind, in catalog order.
    pub const ALL: [Self; 4] = [Self::Lamp, Self::RgbLamp, Self::Window, Self::Door];

    /// Returns the kind tag used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lamp => "lamp",
            Self::RgbLamp => "rgb_lamp",
            Self::Window => "window",
            Self::Door => "door",
        }
    }

    /// Parses a wire tag into a kind, returning [`None`] for unsupported
    /// tags.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The connection states an entity moves through.
///
/// Every entity starts in [`DeviceState::Connected`]. `connect` is the only
/// lifecycle action accepted from every state; the remaining actions require
/// [`DeviceState::Connected`] as their precondition and fail otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// The device is reachable and accepts lifecycle actions.
    Connected,
    /// The device released its connection in an orderly fashion.
    Disconnected,
    /// The device failed while releasing its connection.
    Error,
    /// The device accepted a power-off order.
    PoweredOff,
}

impl DeviceState {
    /// Returns whether lifecycle actions other than `connect` are accepted.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Error => "Error",
            Self::PoweredOff => "PoweredOff",
        }
        .fmt(f)
    }
}
