//! Batch data model and metric taxonomy
//!
//! A [`Batch`] is one scrape cycle's worth of entities. Each entity is a
//! [`Set`] addressed by a typed [`ResourceKey`]. The label and metric
//! catalogs in [`labels`] and [`descriptors`] are the stable contract the
//! exporter relies on.

mod batch;
pub mod descriptors;
mod key;
pub mod labels;

pub use batch::{Batch, BatchError, LabeledValue, MetricValue, Set, ValueKind};
pub use descriptors::{MetricDescriptor, MetricType, Units};
pub use key::{EntityKind, ResourceKey};
pub use labels::LabelDescriptor;
