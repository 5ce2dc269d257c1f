//! Streaming ingestion of the CCU statelist.
//!
//! The document is read event by event with `quick-xml`; only the open device
//! and the element currently being decoded are held in memory.
//!
//! ```text
//! <stateList>
//!   <device name="HEATING_1" ise_id="1234">
//!     <channel name="HEATING_1:1" ise_id="1235">
//!       <datapoint name="CLIMATECONTROL_RT_TC.1.ACTUAL_TEMPERATURE"
//!                  type="ACTUAL_TEMPERATURE" valuetype="4" value="21.3"/>
//!     </channel>
//!   </device>
//! </stateList>
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tracing::{debug, trace, warn};

use crate::context::ContextTracker;
use crate::mapper::{DatapointEvent, MapOutcome, MetricMapper};
use crate::source::SourceError;

/// Attributes of an element, keyed by lower-cased attribute name.
pub type Attributes = HashMap<String, String>;

/// Errors that abort an ingestion cycle.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to fetch export document: {0}")]
    Source(#[from] SourceError),

    #[error("Export stream failed at byte {position}: {source}")]
    Stream {
        position: u64,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Failed to parse export document at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
}

/// Summary of one completed ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Device elements that opened a context.
    pub devices: u64,
    /// Datapoint elements seen, including orphaned ones.
    pub datapoints: u64,
    /// Datapoints that set a gauge.
    pub recorded: u64,
    pub unknown_kind: u64,
    pub malformed_name: u64,
    pub decode_failed: u64,
    pub no_value: u64,
    /// Datapoints found outside any device.
    pub orphaned: u64,
    /// Wall time of the cycle.
    pub elapsed: Duration,
}

impl CycleReport {
    fn count(&mut self, outcome: &MapOutcome) {
        match outcome {
            MapOutcome::Recorded { .. } => self.recorded += 1,
            MapOutcome::UnknownKind => self.unknown_kind += 1,
            MapOutcome::MalformedName => self.malformed_name += 1,
            MapOutcome::DecodeFailed => self.decode_failed += 1,
            MapOutcome::NoValue => self.no_value += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementClass {
    Device,
    Datapoint,
}

impl ElementClass {
    fn of(name: &[u8]) -> Option<Self> {
        if name.eq_ignore_ascii_case(b"device") {
            Some(ElementClass::Device)
        } else if name.eq_ignore_ascii_case(b"datapoint") {
            Some(ElementClass::Datapoint)
        } else {
            None
        }
    }
}

/// Drives one parse of the statelist through the [`MetricMapper`].
#[derive(Debug, Clone)]
pub struct Ingestor {
    mapper: MetricMapper,
}

impl Ingestor {
    pub fn new(mapper: MetricMapper) -> Self {
        Self { mapper }
    }

    pub fn mapper(&self) -> &MetricMapper {
        &self.mapper
    }

    /// Consume `input` until the end of the document.
    ///
    /// Gauge updates are applied as datapoints are read. On error the updates
    /// made so far are kept.
    pub async fn ingest<R>(&self, input: R) -> Result<CycleReport, IngestError>
    where
        R: AsyncBufRead + Unpin,
    {
        let started = Instant::now();
        let mut reader = Reader::from_reader(input);
        let mut buf = Vec::new();
        let mut tracker = ContextTracker::new();
        let mut report = CycleReport::default();

        loop {
            match reader.read_event_into_async(&mut buf).await {
                Ok(Event::Start(element)) => match ElementClass::of(element.name().as_ref()) {
                    Some(ElementClass::Device) => {
                        tracker.on_device_open(&attributes(&element));
                        report.devices += 1;
                    }
                    Some(ElementClass::Datapoint) => {
                        self.on_datapoint(&tracker, &element, &mut report);
                    }
                    None => {}
                },
                Ok(Event::Empty(element)) => match ElementClass::of(element.name().as_ref()) {
                    Some(ElementClass::Device) => {
                        trace!("Skipping self-closing device element");
                    }
                    Some(ElementClass::Datapoint) => {
                        self.on_datapoint(&tracker, &element, &mut report);
                    }
                    None => {}
                },
                Ok(Event::End(element)) => {
                    if ElementClass::of(element.name().as_ref()) == Some(ElementClass::Device) {
                        tracker.on_device_close();
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(quick_xml::Error::Io(source)) => {
                    return Err(IngestError::Stream {
                        position: reader.buffer_position() as u64,
                        source,
                    });
                }
                Err(source) => {
                    return Err(IngestError::Xml {
                        position: reader.buffer_position() as u64,
                        source,
                    });
                }
            }
            buf.clear();
        }

        report.elapsed = started.elapsed();
        debug!(
            devices = report.devices,
            datapoints = report.datapoints,
            recorded = report.recorded,
            unknown_kind = report.unknown_kind,
            malformed_name = report.malformed_name,
            decode_failed = report.decode_failed,
            no_value = report.no_value,
            orphaned = report.orphaned,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Statelist ingested"
        );

        Ok(report)
    }

    fn on_datapoint(
        &self,
        tracker: &ContextTracker,
        element: &BytesStart<'_>,
        report: &mut CycleReport,
    ) {
        report.datapoints += 1;

        let Some(device) = tracker.current() else {
            report.orphaned += 1;
            debug!("Ignoring datapoint outside of a device element");
            return;
        };

        let event = DatapointEvent::from_attributes(&attributes(element));
        let outcome = self.mapper.map(device, &event);
        report.count(&outcome);
    }
}

/// Collect and unescape the attributes of an element.
///
/// The CCU declares ISO-8859-1; values that are not valid UTF-8 are decoded
/// lossily instead of being dropped.
fn attributes(element: &BytesStart<'_>) -> Attributes {
    let mut attributes = Attributes::new();

    for attribute in element.attributes() {
        let attribute = match attribute {
            Ok(attribute) => attribute,
            Err(e) => {
                warn!(error = %e, "Skipping malformed attribute");
                continue;
            }
        };

        let key = String::from_utf8_lossy(attribute.key.as_ref()).to_ascii_lowercase();
        let raw = String::from_utf8_lossy(&attribute.value);
        match quick_xml::escape::unescape(&raw) {
            Ok(value) => {
                attributes.insert(key, value.into_owned());
            }
            Err(e) => {
                warn!(attribute = %key, error = %e, "Skipping undecodable attribute");
            }
        }
    }

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DatapointLabels, MetricKind, MetricRegistry};
    use std::sync::Arc;

    fn ingestor() -> Ingestor {
        Ingestor::new(MetricMapper::new(Arc::new(MetricRegistry::default())))
    }

    fn gauge(ingestor: &Ingestor, kind: MetricKind, labels: &DatapointLabels) -> f64 {
        ingestor
            .mapper()
            .registry()
            .gauge(kind)
            .get_or_create(labels)
            .get()
    }

    #[tokio::test]
    async fn test_single_device() {
        let xml = r#"<?xml version="1.0" encoding="ISO-8859-1" ?>
<stateList>
  <device name="HEATING_1" ise_id="1234" unreach="false">
    <channel name="HEATING_1:1" ise_id="1235">
      <datapoint name="CLIMATECONTROL_RT_TC.1.ACTUAL_TEMPERATURE" type="ACTUAL_TEMPERATURE" ise_id="1236" value="21.3" valuetype="4" valueunit="" timestamp="1700000000"/>
      <datapoint name="CLIMATECONTROL_RT_TC.1.SET_TEMPERATURE" type="SET_TEMPERATURE" ise_id="1237" value="20.5" valuetype="4" valueunit="" timestamp="1700000000"/>
    </channel>
  </device>
</stateList>"#;

        let ingestor = ingestor();
        let report = ingestor.ingest(xml.as_bytes()).await.unwrap();

        assert_eq!(report.devices, 1);
        assert_eq!(report.datapoints, 2);
        assert_eq!(report.recorded, 2);

        let labels = DatapointLabels::new("HEATING_1", "CLIMATECONTROL_RT_TC", "1");
        assert_eq!(gauge(&ingestor, MetricKind::ActualTemperature, &labels), 21.3);
        assert_eq!(gauge(&ingestor, MetricKind::SetTemperature, &labels), 20.5);
    }

    #[tokio::test]
    async fn test_self_closing_device_opens_no_context() {
        let xml = r#"<stateList>
  <device name="EMPTY" ise_id="1"/>
  <datapoint name="A.1.POWER" type="POWER" value="5.0" valuetype="4"/>
</stateList>"#;

        let report = ingestor().ingest(xml.as_bytes()).await.unwrap();

        assert_eq!(report.devices, 0);
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.recorded, 0);
    }

    #[tokio::test]
    async fn test_datapoint_before_any_device() {
        let xml = r#"<stateList>
  <datapoint name="A.1.POWER" type="POWER" value="5.0" valuetype="4"/>
  <device name="PLUG">
    <datapoint name="SWITCH.1.POWER" type="POWER" value="7.5" valuetype="4"/>
  </device>
</stateList>"#;

        let ingestor = ingestor();
        let report = ingestor.ingest(xml.as_bytes()).await.unwrap();

        assert_eq!(report.orphaned, 1);
        assert_eq!(report.recorded, 1);
        assert_eq!(
            gauge(
                &ingestor,
                MetricKind::Power,
                &DatapointLabels::new("PLUG", "SWITCH", "1")
            ),
            7.5
        );
    }

    #[tokio::test]
    async fn test_context_cleared_after_device_close() {
        let xml = r#"<stateList>
  <device name="FIRST"><channel/></device>
  <datapoint name="A.1.POWER" type="POWER" value="1.0" valuetype="4"/>
  <device name="SECOND">
    <datapoint name="A.2.POWER" type="POWER" value="2.0" valuetype="4"></datapoint>
  </device>
</stateList>"#;

        let report = ingestor().ingest(xml.as_bytes()).await.unwrap();

        assert_eq!(report.devices, 2);
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.recorded, 1);
    }

    #[tokio::test]
    async fn test_element_names_case_insensitive() {
        let xml = r#"<STATELIST>
  <Device NAME="LAMP">
    <DataPoint Name="SWITCH.4.STATE" Type="STATE" Value="true" ValueType="2"/>
  </Device>
</STATELIST>"#;

        let ingestor = ingestor();
        let report = ingestor.ingest(xml.as_bytes()).await.unwrap();

        assert_eq!(report.recorded, 1);
        assert_eq!(
            gauge(
                &ingestor,
                MetricKind::State,
                &DatapointLabels::new("LAMP", "SWITCH", "4")
            ),
            1.0
        );
    }

    #[tokio::test]
    async fn test_outcomes_counted() {
        let xml = r#"<stateList>
  <device name="MIX">
    <datapoint name="A.1.SABOTAGE" type="SABOTAGE" value="false" valuetype="2"/>
    <datapoint name="A.1" type="POWER" value="1.0" valuetype="4"/>
    <datapoint name="A.1.POWER" type="POWER" value="abc" valuetype="4"/>
    <datapoint name="A.1.CURRENT" type="CURRENT" value="" valuetype="4"/>
    <datapoint name="A.1.VOLTAGE" type="VOLTAGE" value="230.1" valuetype="4"/>
  </device>
</stateList>"#;

        let report = ingestor().ingest(xml.as_bytes()).await.unwrap();

        assert_eq!(report.datapoints, 5);
        assert_eq!(report.unknown_kind, 1);
        assert_eq!(report.malformed_name, 1);
        assert_eq!(report.decode_failed, 1);
        assert_eq!(report.no_value, 1);
        assert_eq!(report.recorded, 1);
    }

    #[tokio::test]
    async fn test_escaped_device_name() {
        let xml = r#"<stateList>
  <device name="Bad &amp; Kitchen">
    <datapoint name="WEATHER.1.HUMIDITY" type="HUMIDITY" value="55" valuetype="8"/>
  </device>
</stateList>"#;

        let ingestor = ingestor();
        ingestor.ingest(xml.as_bytes()).await.unwrap();

        assert_eq!(
            gauge(
                &ingestor,
                MetricKind::Humidity,
                &DatapointLabels::new("Bad & Kitchen", "WEATHER", "1")
            ),
            55.0
        );
    }

    #[tokio::test]
    async fn test_parse_error_keeps_earlier_updates() {
        let xml = r#"<stateList>
  <device name="OK">
    <datapoint name="A.1.POWER" type="POWER" value="3.0" valuetype="4"/>
  </device>
  <device name="BROKEN">
  </oops>
</stateList>"#;

        let ingestor = ingestor();
        let err = ingestor.ingest(xml.as_bytes()).await.unwrap_err();
        assert!(matches!(err, IngestError::Xml { .. }));

        assert_eq!(
            gauge(
                &ingestor,
                MetricKind::Power,
                &DatapointLabels::new("OK", "A", "1")
            ),
            3.0
        );
    }

    #[tokio::test]
    async fn test_stream_failure_is_not_a_parse_error() {
        use futures::stream;
        use tokio_util::io::StreamReader;

        let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
            Ok(br#"<stateList><device name="D"><datapoint name="A.1.POWER" type="POWER" value="1.5" valuetype="4"/>"#),
            Err(std::io::Error::other("connection reset")),
        ];

        let ingestor = ingestor();
        let err = ingestor
            .ingest(StreamReader::new(stream::iter(chunks)))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Stream { .. }), "{:?}", err);
        assert!(err.to_string().contains("connection reset"));
        assert!(!err.to_string().contains("parse"));

        assert_eq!(
            gauge(
                &ingestor,
                MetricKind::Power,
                &DatapointLabels::new("D", "A", "1")
            ),
            1.5
        );
    }
}
