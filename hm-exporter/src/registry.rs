//! Closed registry of datapoint kinds and the gauges they are exported as.
//!
//! Every kind the exporter understands is a variant of [`MetricKind`]. The
//! [`MetricRegistry`] creates one labelled gauge family per kind when it is
//! built and never registers anything afterwards; ingestion only sets values.

use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::ingest::CycleReport;

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "hm";

/// A datapoint kind with a dedicated exported gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    ActualTemperature,
    State,
    ActualHumidity,
    WindowState,
    ValveState,
    Level,
    BatteryState,
    SetTemperature,
    RssiDevice,
    RssiPeer,
    Temperature,
    Humidity,
    ManuMode,
    OperatingVoltage,
    Current,
    EnergyCounter,
    Frequency,
    Power,
    Voltage,
    Illumination,
    Motion,
    PresenceDetectionState,
}

impl MetricKind {
    /// Number of known kinds.
    pub const COUNT: usize = 22;

    /// All known kinds, in registration order.
    pub const ALL: [MetricKind; MetricKind::COUNT] = [
        MetricKind::ActualTemperature,
        MetricKind::State,
        MetricKind::ActualHumidity,
        MetricKind::WindowState,
        MetricKind::ValveState,
        MetricKind::Level,
        MetricKind::BatteryState,
        MetricKind::SetTemperature,
        MetricKind::RssiDevice,
        MetricKind::RssiPeer,
        MetricKind::Temperature,
        MetricKind::Humidity,
        MetricKind::ManuMode,
        MetricKind::OperatingVoltage,
        MetricKind::Current,
        MetricKind::EnergyCounter,
        MetricKind::Frequency,
        MetricKind::Power,
        MetricKind::Voltage,
        MetricKind::Illumination,
        MetricKind::Motion,
        MetricKind::PresenceDetectionState,
    ];

    /// Look up a kind by the `type` attribute of a datapoint.
    pub fn from_key(key: &str) -> Option<Self> {
        let kind = match key {
            "ACTUAL_TEMPERATURE" => MetricKind::ActualTemperature,
            "STATE" => MetricKind::State,
            "ACTUAL_HUMIDITY" => MetricKind::ActualHumidity,
            "WINDOW_STATE" => MetricKind::WindowState,
            "VALVE_STATE" => MetricKind::ValveState,
            "LEVEL" => MetricKind::Level,
            "BATTERY_STATE" => MetricKind::BatteryState,
            "SET_TEMPERATURE" => MetricKind::SetTemperature,
            "RSSI_DEVICE" => MetricKind::RssiDevice,
            "RSSI_PEER" => MetricKind::RssiPeer,
            "TEMPERATURE" => MetricKind::Temperature,
            "HUMIDITY" => MetricKind::Humidity,
            "MANU_MODE" => MetricKind::ManuMode,
            "OPERATING_VOLTAGE" => MetricKind::OperatingVoltage,
            "CURRENT" => MetricKind::Current,
            "ENERGY_COUNTER" => MetricKind::EnergyCounter,
            "FREQUENCY" => MetricKind::Frequency,
            "POWER" => MetricKind::Power,
            "VOLTAGE" => MetricKind::Voltage,
            "ILLUMINATION" => MetricKind::Illumination,
            "MOTION" => MetricKind::Motion,
            "PRESENCE_DETECTION_STATE" => MetricKind::PresenceDetectionState,
            _ => return None,
        };
        Some(kind)
    }

    /// The raw key as it appears in the statelist.
    pub fn key(self) -> &'static str {
        self.describe().0
    }

    /// Exported metric name without the prefix.
    pub fn metric_name(self) -> &'static str {
        self.describe().1
    }

    /// Help text for the exported metric.
    pub fn help(self) -> &'static str {
        self.describe().2
    }

    fn describe(self) -> (&'static str, &'static str, &'static str) {
        match self {
            MetricKind::ActualTemperature => (
                "ACTUAL_TEMPERATURE",
                "temperature",
                "Actual temperature in C",
            ),
            MetricKind::State => (
                "STATE",
                "state",
                "Generic state of the channel (1 for on/true)",
            ),
            MetricKind::ActualHumidity => ("ACTUAL_HUMIDITY", "humidity", "Actual humidity in %"),
            MetricKind::WindowState => (
                "WINDOW_STATE",
                "windowState",
                "State of the window 1 for open and 0 for closed",
            ),
            MetricKind::ValveState => (
                "VALVE_STATE",
                "ventil_state",
                "Open state of the ventil of the heating in %",
            ),
            MetricKind::Level => ("LEVEL", "ventil_level", "Ventil level of the heating"),
            MetricKind::BatteryState => (
                "BATTERY_STATE",
                "battery",
                "Battery voltage level in Volt",
            ),
            MetricKind::SetTemperature => (
                "SET_TEMPERATURE",
                "target_temperature",
                "Target temperature that is configured on the device at the moment",
            ),
            MetricKind::RssiDevice => (
                "RSSI_DEVICE",
                "rssi_receive",
                "Signal strength from CCU to Device, negative in DB",
            ),
            MetricKind::RssiPeer => (
                "RSSI_PEER",
                "rssi_send",
                "Signal strength from Device to CCU, negative in DB",
            ),
            MetricKind::Temperature => (
                "TEMPERATURE",
                "measured_temperature",
                "Temperature actually measured by the wall thermostat",
            ),
            MetricKind::Humidity => (
                "HUMIDITY",
                "measured_humidity",
                "Humidity actually measured by the wall thermostat",
            ),
            MetricKind::ManuMode => (
                "MANU_MODE",
                "manual_set_temperature",
                "Manually set target temperature",
            ),
            MetricKind::OperatingVoltage => (
                "OPERATING_VOLTAGE",
                "operating_voltage",
                "Operating Voltage in Volts",
            ),
            MetricKind::Current => ("CURRENT", "current", "Current in mA"),
            MetricKind::EnergyCounter => (
                "ENERGY_COUNTER",
                "energy_counter",
                "Consumed energy in Wh",
            ),
            MetricKind::Frequency => (
                "FREQUENCY",
                "frequency",
                "Electrical current frequency in Hz",
            ),
            MetricKind::Power => ("POWER", "power", "Current power consumption in W"),
            MetricKind::Voltage => ("VOLTAGE", "current_voltage", "Current current voltage"),
            MetricKind::Illumination => (
                "ILLUMINATION",
                "illumination",
                "Current illumination of the illumination sensor",
            ),
            MetricKind::Motion => ("MOTION", "motion", "Motion detected status (1==true)"),
            MetricKind::PresenceDetectionState => (
                "PRESENCE_DETECTION_STATE",
                "presence",
                "State of the presence, 1==presence detected",
            ),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Label set shared by every datapoint gauge.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DatapointLabels {
    /// Name of the enclosing device.
    pub device: String,
    /// Channel type, the first segment of the datapoint name.
    pub r#type: String,
    /// Channel address, the second segment of the datapoint name.
    pub address: String,
}

impl DatapointLabels {
    pub fn new(
        device: impl Into<String>,
        channel_type: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            r#type: channel_type.into(),
            address: address.into(),
        }
    }
}

/// A gauge family keyed by [`DatapointLabels`].
pub type GaugeFamily = Family<DatapointLabels, Gauge<f64, AtomicU64>>;

/// Labels for the per-outcome datapoint counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: &'static str,
}

/// Counters and gauges describing the exporter itself.
#[derive(Debug, Default)]
pub struct ExporterMetrics {
    refreshes: Counter,
    refresh_errors: Counter,
    datapoints: Family<OutcomeLabels, Counter>,
    last_refresh_duration: Gauge<f64, AtomicU64>,
    last_refresh_success: Gauge,
}

impl ExporterMetrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "exporter_refreshes",
            "Ingestion cycles run",
            self.refreshes.clone(),
        );
        registry.register(
            "exporter_refresh_errors",
            "Ingestion cycles aborted by a fetch or parse error",
            self.refresh_errors.clone(),
        );
        registry.register(
            "exporter_datapoints",
            "Datapoints seen by outcome",
            self.datapoints.clone(),
        );
        registry.register(
            "exporter_last_refresh_duration_seconds",
            "Duration of the last ingestion cycle",
            self.last_refresh_duration.clone(),
        );
        registry.register(
            "exporter_last_refresh_success",
            "Whether the last ingestion cycle succeeded (1) or failed (0)",
            self.last_refresh_success.clone(),
        );
    }

    /// Record a completed cycle.
    pub fn record_success(&self, report: &CycleReport) {
        self.refreshes.inc();
        self.last_refresh_success.set(1);
        self.last_refresh_duration.set(report.elapsed.as_secs_f64());

        let outcomes = [
            ("recorded", report.recorded),
            ("unknown_kind", report.unknown_kind),
            ("malformed_name", report.malformed_name),
            ("decode_failed", report.decode_failed),
            ("no_value", report.no_value),
            ("orphaned", report.orphaned),
        ];
        for (outcome, count) in outcomes {
            self.datapoints
                .get_or_create(&OutcomeLabels { outcome })
                .inc_by(count);
        }
    }

    /// Record a cycle that was aborted.
    pub fn record_failure(&self, elapsed_secs: f64) {
        self.refreshes.inc();
        self.refresh_errors.inc();
        self.last_refresh_success.set(0);
        self.last_refresh_duration.set(elapsed_secs);
    }
}

/// The exporter's metric registry.
///
/// Owns the `prometheus_client` registry, one gauge family per
/// [`MetricKind`] and the exporter's own metrics.
#[derive(Debug)]
pub struct MetricRegistry {
    registry: Registry,
    gauges: Vec<GaugeFamily>,
    exporter: ExporterMetrics,
    prefix: String,
}

impl MetricRegistry {
    /// Build the registry, registering every known kind under `prefix`.
    pub fn new(prefix: &str) -> Self {
        let mut registry = if prefix.is_empty() {
            Registry::default()
        } else {
            Registry::with_prefix(prefix)
        };

        let gauges = MetricKind::ALL
            .iter()
            .map(|kind| {
                let family = GaugeFamily::default();
                registry.register(kind.metric_name(), kind.help(), family.clone());
                family
            })
            .collect();

        let exporter = ExporterMetrics::default();
        exporter.register(&mut registry);

        Self {
            registry,
            gauges,
            exporter,
            prefix: prefix.to_string(),
        }
    }

    /// The gauge family for a kind.
    pub fn gauge(&self, kind: MetricKind) -> &GaugeFamily {
        &self.gauges[kind.index()]
    }

    /// Set the value of one series, replacing whatever was there.
    pub fn set(&self, kind: MetricKind, labels: &DatapointLabels, value: f64) {
        self.gauge(kind).get_or_create(labels).set(value);
    }

    /// Exporter self-metrics.
    pub fn exporter(&self) -> &ExporterMetrics {
        &self.exporter
    }

    /// Full exported name of a kind, including the prefix.
    pub fn exported_name(&self, kind: MetricKind) -> String {
        if self.prefix.is_empty() {
            kind.metric_name().to_string()
        } else {
            format!("{}_{}", self.prefix, kind.metric_name())
        }
    }

    /// Encode the registry in OpenMetrics text format.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut output = String::new();
        prometheus_client::encoding::text::encode(&mut output, &self.registry)?;
        Ok(output)
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
