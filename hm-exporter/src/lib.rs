//! Prometheus exporter for HomeMatic CCU device state.
//!
//! On every scrape the exporter streams the CCU XML-API statelist, follows
//! the device element each datapoint belongs to, decodes the datapoint value
//! by its `valuetype` code and sets the matching gauge.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   CCU XML-API   │────>│    Ingestor     │────>│ MetricRegistry  │
//! │ (statelist.cgi) │     │ context + mapper│     │    (gauges)     │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!          ^                                               │
//!          │ refresh                                       v
//!     ┌────────────────────────────────────────────────────────┐
//!     │                 HTTP Server (/metrics)                 │
//!     └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! hm-exporter --url http://ccu.local/addons/xmlapi/statelist.cgi
//! hm-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod context;
pub mod http;
pub mod ingest;
pub mod mapper;
pub mod refresh;
pub mod registry;
pub mod source;
pub mod value;

pub use config::ExporterConfig;
pub use context::{ContextTracker, DeviceContext};
pub use http::HttpServer;
pub use ingest::{CycleReport, IngestError, Ingestor};
pub use mapper::{DatapointEvent, MapOutcome, MetricMapper};
pub use refresh::{Refresher, SharedRefresher};
pub use registry::{DatapointLabels, MetricKind, MetricRegistry};
pub use source::{ExportSource, HttpSource, SourceError, StaticSource};
pub use value::{ValueType, coerce};
