//! Catalog of metrics the collector produces itself

use super::ValueKind;
use serde::Serialize;
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// A point-in-time value
    Gauge,
    /// A monotonically increasing value
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    None,
    Bytes,
    Millicores,
    Count,
}

/// Name, type and unit of one metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub name: Cow<'static, str>,
    pub description: Cow<'static, str>,
    pub metric_type: MetricType,
    pub value_kind: ValueKind,
    pub units: Units,
}

const fn gauge(
    name: &'static str,
    description: &'static str,
    units: Units,
) -> MetricDescriptor {
    MetricDescriptor {
        name: Cow::Borrowed(name),
        description: Cow::Borrowed(description),
        metric_type: MetricType::Gauge,
        value_kind: ValueKind::Int64,
        units,
    }
}

pub const CPU_REQUEST: MetricDescriptor = gauge(
    "cpu/request",
    "CPU request (the guaranteed amount of resources) in millicores.",
    Units::Millicores,
);
pub const MEMORY_REQUEST: MetricDescriptor = gauge(
    "memory/request",
    "Memory request (the guaranteed amount of resources) in bytes.",
    Units::Bytes,
);
pub const EPHEMERAL_STORAGE_REQUEST: MetricDescriptor = gauge(
    "ephemeral_storage/request",
    "Ephemeral storage request (the guaranteed amount of resources) in bytes.",
    Units::Bytes,
);
pub const CPU_LIMIT: MetricDescriptor = gauge(
    "cpu/limit",
    "CPU hard limit in millicores.",
    Units::Millicores,
);
pub const MEMORY_LIMIT: MetricDescriptor = gauge(
    "memory/limit",
    "Memory hard limit in bytes.",
    Units::Bytes,
);
pub const EPHEMERAL_STORAGE_LIMIT: MetricDescriptor = gauge(
    "ephemeral_storage/limit",
    "Ephemeral storage hard limit in bytes.",
    Units::Bytes,
);
pub const RESTART_COUNT: MetricDescriptor = MetricDescriptor {
    name: Cow::Borrowed("restart_count"),
    description: Cow::Borrowed("Number of container restarts"),
    metric_type: MetricType::Cumulative,
    value_kind: ValueKind::Int64,
    units: Units::Count,
};
pub const CONTAINER_STATUS: MetricDescriptor = gauge(
    "status",
    "Container state: 1 running, 2 waiting, 3 terminated, 0 unknown",
    Units::None,
);
pub const POD_PHASE: MetricDescriptor = gauge(
    "pod/phase",
    "Pod phase: 1 pending, 2 running, 3 succeeded, 4 failed, 5 unknown",
    Units::None,
);
pub const WORKLOAD_STATUS: MetricDescriptor = gauge(
    "workload/status",
    "Workload availability: 1 available, 0 not available",
    Units::None,
);

/// Metric names summed up the entity hierarchy unless configured otherwise
pub const RESOURCE_METRICS: &[MetricDescriptor] = &[
    CPU_REQUEST,
    MEMORY_REQUEST,
    EPHEMERAL_STORAGE_REQUEST,
    CPU_LIMIT,
    MEMORY_LIMIT,
    EPHEMERAL_STORAGE_LIMIT,
];

/// Descriptor for the request metric of a Kubernetes resource name.
///
/// Well-known resources map onto the catalog; anything else (extended
/// resources such as `nvidia.com/gpu`) gets a `<resource>/request` count.
pub fn request_metric(resource: &str) -> MetricDescriptor {
    match resource {
        "cpu" => CPU_REQUEST,
        "memory" => MEMORY_REQUEST,
        "ephemeral-storage" => EPHEMERAL_STORAGE_REQUEST,
        other => MetricDescriptor {
            name: Cow::Owned(format!("{}/request", other)),
            description: Cow::Owned(format!(
                "{} resource request. This metric is Kubernetes specific.",
                other
            )),
            metric_type: MetricType::Gauge,
            value_kind: ValueKind::Int64,
            units: Units::Count,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_metric_known_resources() {
        assert_eq!(request_metric("cpu"), CPU_REQUEST);
        assert_eq!(request_metric("memory"), MEMORY_REQUEST);
        assert_eq!(request_metric("ephemeral-storage"), EPHEMERAL_STORAGE_REQUEST);
    }

    #[test]
    fn test_request_metric_extended_resource() {
        let metric = request_metric("nvidia.com/gpu");
        assert_eq!(metric.name, "nvidia.com/gpu/request");
        assert_eq!(metric.units, Units::Count);
        assert_eq!(metric.value_kind, ValueKind::Int64);
    }

    #[test]
    fn test_restart_count_is_cumulative() {
        assert_eq!(RESTART_COUNT.metric_type, MetricType::Cumulative);
        assert_eq!(RESTART_COUNT.name, "restart_count");
    }
}
