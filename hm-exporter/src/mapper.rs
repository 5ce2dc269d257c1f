//! Mapping of datapoints onto registry gauges.

use std::sync::Arc;

use tracing::{error, trace};

use crate::context::DeviceContext;
use crate::ingest::Attributes;
use crate::registry::{DatapointLabels, MetricKind, MetricRegistry};
use crate::value::{ValueType, coerce};

/// Separator between the segments of a datapoint name.
pub const NAME_SEPARATOR: char = '.';

/// The attributes of one `<datapoint>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatapointEvent {
    /// Hierarchical name, `<channel type>.<address>.<kind>`.
    pub name: Option<String>,
    /// Raw value literal.
    pub value: Option<String>,
    /// Value type code.
    pub value_type: Option<String>,
    /// Kind key matched against [`MetricKind`].
    pub kind: Option<String>,
}

impl DatapointEvent {
    pub fn from_attributes(attributes: &Attributes) -> Self {
        Self {
            name: attributes.get("name").cloned(),
            value: attributes.get("value").cloned(),
            value_type: attributes.get("valuetype").cloned(),
            kind: attributes.get("type").cloned(),
        }
    }
}

/// The three segments of a datapoint name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatapointName<'a> {
    pub channel_type: &'a str,
    pub address: &'a str,
    pub suffix: &'a str,
}

impl<'a> DatapointName<'a> {
    /// Split a name into exactly three segments.
    pub fn parse(name: &'a str) -> Option<Self> {
        let mut parts = name.split(NAME_SEPARATOR);
        let channel_type = parts.next()?;
        let address = parts.next()?;
        let suffix = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            channel_type,
            address,
            suffix,
        })
    }
}

/// What happened to a single datapoint.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    /// A gauge series was set.
    Recorded {
        kind: MetricKind,
        labels: DatapointLabels,
        value: f64,
    },
    /// The kind is not in the registry.
    UnknownKind,
    /// The name did not have exactly three segments.
    MalformedName,
    /// The value did not decode under its declared type.
    DecodeFailed,
    /// Missing or empty value, or an unrecognized value type.
    NoValue,
}

/// Routes datapoints into the [`MetricRegistry`].
#[derive(Debug, Clone)]
pub struct MetricMapper {
    registry: Arc<MetricRegistry>,
}

impl MetricMapper {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Map one datapoint observed inside `device`.
    pub fn map(&self, device: &DeviceContext, event: &DatapointEvent) -> MapOutcome {
        let Some(kind) = event.kind.as_deref().and_then(MetricKind::from_key) else {
            trace!(kind = ?event.kind, device = %device.name, "Ignoring unknown datapoint kind");
            return MapOutcome::UnknownKind;
        };

        let Some(name) = event.name.as_deref().and_then(DatapointName::parse) else {
            error!(
                device = %device.name,
                attributes = ?event,
                "Malformed datapoint name, expected <type>.<address>.<kind>"
            );
            return MapOutcome::MalformedName;
        };

        let value_type = event.value_type.as_deref().and_then(ValueType::from_code);
        let value = match coerce(event.value.as_deref(), value_type) {
            Ok(Some(value)) => value,
            Ok(None) => return MapOutcome::NoValue,
            Err(e) => {
                error!(
                    device = %device.name,
                    attributes = ?event,
                    error = %e,
                    "Failed to decode datapoint value"
                );
                return MapOutcome::DecodeFailed;
            }
        };

        let labels = DatapointLabels::new(&device.name, name.channel_type, name.address);
        self.registry.set(kind, &labels, value);

        trace!(
            metric = kind.metric_name(),
            device = %device.name,
            channel_type = name.channel_type,
            address = name.address,
            value,
            "Recorded datapoint"
        );

        MapOutcome::Recorded {
            kind,
            labels,
            value,
        }
    }
}
