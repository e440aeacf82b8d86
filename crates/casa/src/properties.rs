use core::fmt;

use serde::{Deserialize, Serialize};

/// Largest accepted sampling cadence, in seconds (one week).
pub const MAX_UPDATE_TIME: i64 = 604_800;

/// The type-scoped configuration of a device.
///
/// Every supported kind is network-reachable, so the configuration always
/// carries the `host`/`port` pair next to the sampling cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Host the appliance is reachable at.
    pub host: String,
    /// Port the appliance listens on.
    pub port: u16,
    /// Sampling cadence in seconds; `0` disables sampling.
    pub update_time: u32,
}

impl DeviceProperties {
    /// Builds validated properties from a creation payload.
    ///
    /// `update_time` defaults to `0` (sampling disabled) when absent.
    ///
    /// # Errors
    ///
    /// Fails when `host` or `port` is missing, or when `update_time` lies
    /// outside its accepted range; nothing is constructed on failure.
    pub fn from_patch(patch: PropertiesPatch) -> Result<Self, PropertyError> {
        let host = patch.host.ok_or(PropertyError::MissingField("host"))?;
        let port = patch.port.ok_or(PropertyError::MissingField("port"))?;
        let update_time = validate_update_time(patch.update_time.unwrap_or(0))?;

        Ok(Self {
            host,
            port,
            update_time,
        })
    }

    /// Checks that hand-built properties respect the cadence bounds.
    ///
    /// # Errors
    ///
    /// Fails when `update_time` lies outside its accepted range.
    pub fn validate(&self) -> Result<(), PropertyError> {
        let _ = validate_update_time(i64::from(self.update_time))?;
        Ok(())
    }

    /// Applies a partial update, leaving `self` untouched when any field is
    /// rejected.
    ///
    /// Returns whether the sampling cadence changed.
    ///
    /// # Errors
    ///
    /// Fails when `update_time` lies outside its accepted range.
    pub fn apply(&mut self, patch: PropertiesPatch) -> Result<bool, PropertyError> {
        let update_time = patch.update_time.map(validate_update_time).transpose()?;

        if let Some(host) = patch.host {
            self.host = host;
        }
        if let Some(port) = patch.port {
            self.port = port;
        }

        let mut cadence_changed = false;
        if let Some(update_time) = update_time {
            cadence_changed = update_time != self.update_time;
            self.update_time = update_time;
        }

        Ok(cadence_changed)
    }
}

/// A partial update to [`DeviceProperties`], as carried by creation and
/// modify payloads.
///
/// `update_time` stays signed here so an out-of-range negative value is
/// reported as such instead of failing obscurely at the integer boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PropertiesPatch {
    /// New host, if any.
    pub host: Option<String>,
    /// New port, if any.
    pub port: Option<u16>,
    /// New sampling cadence, if any.
    pub update_time: Option<i64>,
}

impl PropertiesPatch {
    /// A patch that only changes the sampling cadence.
    #[must_use]
    pub fn cadence(update_time: i64) -> Self {
        Self {
            update_time: Some(update_time),
            ..Self::default()
        }
    }
}

/// Checks a sampling cadence candidate against its accepted range.
///
/// # Errors
///
/// Fails when `value` lies outside `0..=`[`MAX_UPDATE_TIME`].
pub fn validate_update_time(value: i64) -> Result<u32, PropertyError> {
    if (0..=MAX_UPDATE_TIME).contains(&value) {
        Ok(value as u32)
    } else {
        Err(PropertyError::UpdateTimeOutOfRange(value))
    }
}

/// All possible reasons a properties payload is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyError {
    /// A required field is missing from a creation payload.
    MissingField(&'static str),
    /// `update_time` lies outside `0..=`[`MAX_UPDATE_TIME`].
    UpdateTimeOutOfRange(i64),
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "`{field}` is a required field"),
            Self::UpdateTimeOutOfRange(value) => write!(
                f,
                "`update_time` should lie within 0..={MAX_UPDATE_TIME} seconds, got {value}"
            ),
        }
    }
}

impl std::error::Error for PropertyError {}

#[cfg(test)]
mod tests {
    use super::{
        DeviceProperties, MAX_UPDATE_TIME, PropertiesPatch, PropertyError, validate_update_time,
    };

    fn properties() -> DeviceProperties {
        DeviceProperties {
            host: "192.168.1.10".to_owned(),
            port: 8888,
            update_time: 60,
        }
    }

    #[test]
    fn creation_defaults_cadence_to_disabled() {
        let properties = DeviceProperties::from_patch(PropertiesPatch {
            host: Some("192.168.1.10".to_owned()),
            port: Some(8888),
            update_time: None,
        })
        .unwrap();

        assert_eq!(properties.update_time, 0);
    }

    #[test]
    fn creation_requires_host_and_port() {
        let missing_host = DeviceProperties::from_patch(PropertiesPatch {
            port: Some(8888),
            ..PropertiesPatch::default()
        });

        assert_eq!(missing_host, Err(PropertyError::MissingField("host")));

        let missing_port = DeviceProperties::from_patch(PropertiesPatch {
            host: Some("192.168.1.10".to_owned()),
            ..PropertiesPatch::default()
        });

        assert_eq!(missing_port, Err(PropertyError::MissingField("port")));
    }

    #[test]
    fn cadence_bounds() {
        assert_eq!(validate_update_time(0), Ok(0));
        assert_eq!(validate_update_time(MAX_UPDATE_TIME), Ok(604_800));
        assert_eq!(
            validate_update_time(MAX_UPDATE_TIME + 1),
            Err(PropertyError::UpdateTimeOutOfRange(604_801))
        );
        assert_eq!(
            validate_update_time(-1),
            Err(PropertyError::UpdateTimeOutOfRange(-1))
        );
    }

    #[test]
    fn rejected_patch_leaves_properties_untouched() {
        let mut current = properties();

        let rejected = current.apply(PropertiesPatch {
            host: Some("10.0.0.1".to_owned()),
            port: Some(9999),
            update_time: Some(-1),
        });

        assert_eq!(rejected, Err(PropertyError::UpdateTimeOutOfRange(-1)));
        assert_eq!(current, properties());
    }

    #[test]
    fn patch_reports_cadence_change() {
        let mut current = properties();

        assert_eq!(current.apply(PropertiesPatch::cadence(60)), Ok(false));
        assert_eq!(current.apply(PropertiesPatch::cadence(1)), Ok(true));
        assert_eq!(current.update_time, 1);
    }

    #[test]
    fn patch_updates_endpoint() {
        let mut current = properties();

        let changed = current.apply(PropertiesPatch {
            host: Some("10.0.0.1".to_owned()),
            port: Some(9999),
            update_time: None,
        });

        assert_eq!(changed, Ok(false));
        assert_eq!(current.host, "10.0.0.1");
        assert_eq!(current.port, 9999);
        assert_eq!(current.update_time, 60);
    }
}
