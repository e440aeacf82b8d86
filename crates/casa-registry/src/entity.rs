use std::sync::Arc;

use casa::catalog;
use casa::command::{AppliedFields, Command, DeviceData};
use casa::device::{DeviceId, DeviceKind, DeviceState};
use casa::properties::{DeviceProperties, PropertiesPatch};
use casa::response::{ActionResponse, DeviceView, StatusView};

use indexmap::IndexSet;

use tokio::sync::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::sampler::{MetricsHistory, Sampler};

/// An entity entry shared between the store, the dispatcher, and the
/// sampler task bound to it.
pub(crate) type SharedEntity = Arc<Mutex<Entity>>;

/// Lifecycle actions routed through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Connect,
    Disconnect,
    Reboot,
    PowerOff,
}

impl Action {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Reboot => "reboot",
            Self::PowerOff => "power_off",
        }
    }
}

/// The common envelope of devices and pools: identifier, kind tag, and
/// connection state, next to the variant payload.
#[derive(Debug)]
pub(crate) struct Entity {
    pub(crate) id: DeviceId,
    pub(crate) kind: DeviceKind,
    pub(crate) status: DeviceState,
    pub(crate) payload: Payload,
}

/// The variant payload distinguishing plain devices from pools.
#[derive(Debug)]
pub(crate) enum Payload {
    Device(DeviceEntry),
    Pool(PoolEntry),
}

#[derive(Debug)]
pub(crate) struct DeviceEntry {
    pub(crate) properties: DeviceProperties,
    pub(crate) data: DeviceData,
    pub(crate) history: MetricsHistory,
    pub(crate) sampler: Option<Sampler>,
    pub(crate) member_of: Option<DeviceId>,
}

#[derive(Debug)]
pub(crate) struct PoolEntry {
    pub(crate) members: IndexSet<DeviceId>,
}

impl Entity {
    /// A freshly created device: `Connected`, initial data payload, empty
    /// history, no sampler armed yet.
    pub(crate) fn device(id: DeviceId, kind: DeviceKind, properties: DeviceProperties) -> Self {
        Self {
            id,
            kind,
            status: DeviceState::Connected,
            payload: Payload::Device(DeviceEntry {
                data: DeviceData::initial(kind),
                properties,
                history: MetricsHistory::default(),
                sampler: None,
                member_of: None,
            }),
        }
    }

    /// A freshly created empty pool.
    pub(crate) fn pool(id: DeviceId, kind: DeviceKind) -> Self {
        Self {
            id,
            kind,
            status: DeviceState::Connected,
            payload: Payload::Pool(PoolEntry {
                members: IndexSet::new(),
            }),
        }
    }

    /// Builds the externally visible snapshot of this entity.
    pub(crate) fn view(&self) -> DeviceView {
        let status = StatusView {
            status: self.status,
        };

        match &self.payload {
            Payload::Device(entry) => DeviceView {
                id: self.id.clone(),
                device_type: self.kind,
                status,
                device_properties: Some(entry.properties.clone()),
                data: Some(entry.data.clone()),
                member_of: entry.member_of.clone(),
                devices: None,
            },
            Payload::Pool(pool) => DeviceView {
                id: self.id.clone(),
                device_type: self.kind,
                status,
                device_properties: None,
                data: None,
                member_of: None,
                devices: Some(pool.members.iter().cloned().collect()),
            },
        }
    }

    /// Runs one lifecycle action against the connection state machine.
    pub(crate) fn apply_action(&mut self, action: Action) -> Result<ActionResponse> {
        match action {
            Action::Connect => {
                self.status = DeviceState::Connected;
                Ok(ActionResponse::connected())
            }
            Action::Disconnect => {
                self.require_connected(action)?;
                self.status = DeviceState::Disconnected;
                Ok(ActionResponse::disconnected())
            }
            Action::Reboot => {
                self.require_connected(action)?;
                // A reboot is a disconnect followed by an immediate
                // reconnection, so the state settles back on `Connected`.
                self.status = DeviceState::Connected;
                Ok(ActionResponse::connected())
            }
            Action::PowerOff => {
                self.require_connected(action)?;
                self.status = DeviceState::PoweredOff;
                Ok(ActionResponse::power_off())
            }
        }
    }

    /// Merges an execute command into the data payload, returning the
    /// fields actually applied.
    pub(crate) fn apply_command(&mut self, command: &Command) -> Result<AppliedFields> {
        if !self.status.is_connected() {
            return Err(Error::unavailable("execute", &self.id, self.status));
        }

        let Payload::Device(entry) = &mut self.payload else {
            return Err(Error::new(
                ErrorKind::TypeMismatch,
                "pools delegate command execution to their members",
            ));
        };

        Ok(command.apply(catalog::capabilities(self.kind), &mut entry.data)?)
    }

    /// Applies a properties patch; returns whether the sampling cadence
    /// changed. Pools hold no properties of their own, so the patch is a
    /// no-op for them.
    pub(crate) fn apply_properties(&mut self, patch: PropertiesPatch) -> Result<bool> {
        let Payload::Device(entry) = &mut self.payload else {
            return Ok(false);
        };

        Ok(entry.properties.apply(patch)?)
    }

    /// Replaces the sampler task with one armed at the current cadence.
    ///
    /// Replacing the handle cancels the previous task; a zero cadence
    /// leaves sampling disabled.
    pub(crate) fn rearm_sampler(&mut self, shared: &SharedEntity) {
        if let Payload::Device(entry) = &mut self.payload {
            entry.sampler = Sampler::arm(shared, entry.properties.update_time);
        }
    }

    /// Appends one capture of the current data payload to the history.
    pub(crate) fn record_sample(&mut self) {
        if let Payload::Device(entry) = &mut self.payload {
            entry.history.record(&entry.data);
        }
    }

    fn require_connected(&self, action: Action) -> Result<()> {
        if self.status.is_connected() {
            Ok(())
        } else {
            Err(Error::unavailable(action.as_str(), &self.id, self.status))
        }
    }
}
