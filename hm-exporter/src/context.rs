//! Tracking of the device element currently open in the statelist.

use tracing::trace;

use crate::ingest::Attributes;

/// Identifying attributes of an open `<device>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    /// Device name, exported as the `device` label.
    pub name: String,
    /// CCU internal id, kept for diagnostics.
    pub ise_id: Option<String>,
}

impl DeviceContext {
    /// Build a context from the attributes of a device element.
    ///
    /// A device without a `name` attribute gets an empty name.
    pub fn from_attributes(attributes: &Attributes) -> Self {
        Self {
            name: attributes.get("name").cloned().unwrap_or_default(),
            ise_id: attributes.get("ise_id").cloned(),
        }
    }
}

/// Holds at most one live [`DeviceContext`].
///
/// Devices do not nest in the statelist, so opening a device replaces any
/// previous context. Pairing of open and close calls is the caller's job.
#[derive(Debug, Default)]
pub struct ContextTracker {
    current: Option<DeviceContext>,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A non self-closing device element was opened.
    pub fn on_device_open(&mut self, attributes: &Attributes) {
        let context = DeviceContext::from_attributes(attributes);
        trace!(device = %context.name, ise_id = ?context.ise_id, "Device opened");
        self.current = Some(context);
    }

    /// The device element was closed; returns the context that was live.
    pub fn on_device_close(&mut self) -> Option<DeviceContext> {
        self.current.take()
    }

    /// The live context, if a device is open.
    pub fn current(&self) -> Option<&DeviceContext> {
        self.current.as_ref()
    }
}
