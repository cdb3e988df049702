use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::Error;
use crate::session::Session;
use crate::util::types::DeviceId;

/// A device registered to the logged in user
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

impl Device {
    /// The device name, or a generic label built from its id when the
    /// remote did not provide one.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Device {}", self.id))
    }
}

/// The remote replies with either a bare list or a `{"data": [...]}` envelope,
/// `data` may be absent or null when the user has no devices
#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceList {
    List(Vec<Device>),
    Envelope {
        #[serde(default)]
        data: Option<Vec<Device>>,
    },
}

impl From<DeviceList> for Vec<Device> {
    fn from(value: DeviceList) -> Self {
        match value {
            DeviceList::List(devices) => devices,
            DeviceList::Envelope { data } => data.unwrap_or_default(),
        }
    }
}

/// List the devices of the logged in user.
///
/// Fails with [Error::NoDevices] if the user has no devices, there is
/// nothing to poll in that case.
#[instrument(skip_all, err)]
pub async fn list_devices(session: &Session) -> Result<Vec<Device>, Error> {
    let user_id = session
        .user_id()
        .await
        .ok_or_else(|| Error::Auth("no user id, login first".into()))?;

    let response: DeviceList = session
        .get(&format!("/apiv2/user/{user_id}/devices"), None)
        .await?;

    let devices: Vec<Device> = response.into();
    if devices.is_empty() {
        return Err(Error::NoDevices);
    }

    debug!("found {} devices", devices.len());
    Ok(devices)
}
