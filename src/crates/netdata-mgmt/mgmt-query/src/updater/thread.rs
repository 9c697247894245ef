//! Built-in queries for per-thread charts.
//!
//! The threading object reports per-thread values through operations taking
//! a thread id, some of them only when the matching feature is supported
//! and enabled on the endpoint.

use crate::endpoint::ManagementEndpoint;
use crate::error::{CollectorError, Result};
use crate::query::QueryNode;
use crate::value::{ObjectName, Value};

pub const THREADING_OBJECT_NAME: &str = "java.lang:type=Threading";

/// Sample returned for a thread that died or a disabled feature.
pub const THREAD_VALUE_MISSING: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feature {
    CpuTime,
    Contention,
}

impl Feature {
    fn supported_attribute(self) -> &'static str {
        match self {
            Feature::CpuTime => "ThreadCpuTimeSupported",
            Feature::Contention => "ThreadContentionMonitoringSupported",
        }
    }

    fn enabled_attribute(self) -> &'static str {
        match self {
            Feature::CpuTime => "ThreadCpuTimeEnabled",
            Feature::Contention => "ThreadContentionMonitoringEnabled",
        }
    }
}

/// A per-thread value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAttribute {
    CpuTime,
    UserTime,
    WaitedTime,
    WaitedCount,
    BlockedCount,
}

impl ThreadAttribute {
    pub const ALL: [ThreadAttribute; 5] = [
        ThreadAttribute::CpuTime,
        ThreadAttribute::UserTime,
        ThreadAttribute::WaitedTime,
        ThreadAttribute::WaitedCount,
        ThreadAttribute::BlockedCount,
    ];

    /// Name used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            ThreadAttribute::CpuTime => "ThreadCpuTime",
            ThreadAttribute::UserTime => "ThreadUserTime",
            ThreadAttribute::WaitedTime => "ThreadInfo.WaitedTime",
            ThreadAttribute::WaitedCount => "ThreadInfo.WaitedCount",
            ThreadAttribute::BlockedCount => "ThreadInfo.BlockedCount",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    fn feature(&self) -> Feature {
        match self {
            ThreadAttribute::CpuTime | ThreadAttribute::UserTime => Feature::CpuTime,
            _ => Feature::Contention,
        }
    }

    fn value_query(&self, threading: &ObjectName) -> Result<QueryNode> {
        let object = QueryNode::object(threading.clone());
        let info_field = |field: &str| -> Result<QueryNode> {
            let info = QueryNode::placeholder_method(QueryNode::object(threading.clone()), "getThreadInfo")?;
            Ok(QueryNode::composite_field(info, field))
        };
        match self {
            ThreadAttribute::CpuTime => QueryNode::placeholder_method(object, "getThreadCpuTime"),
            ThreadAttribute::UserTime => QueryNode::placeholder_method(object, "getThreadUserTime"),
            ThreadAttribute::WaitedTime => info_field("waitedTime"),
            ThreadAttribute::WaitedCount => info_field("waitedCount"),
            ThreadAttribute::BlockedCount => info_field("blockedCount"),
        }
    }
}

/// The three queries feeding a per-thread dynamic updater.
#[derive(Debug)]
pub struct ThreadQueries {
    /// All live thread ids
    pub parameters: QueryNode,
    /// Thread name for an id
    pub name_query: QueryNode,
    /// Requested value for an id
    pub value_query: QueryNode,
}

/// Build the queries reading `attribute` for every live thread.
pub fn thread_queries(endpoint: &dyn ManagementEndpoint, attribute: &str) -> Result<ThreadQueries> {
    let threading = ObjectName::parse(THREADING_OBJECT_NAME)?;
    let registered = endpoint
        .is_registered(&threading)
        .map_err(|e| CollectorError::query(format!("'{threading}'"), e))?;
    if !registered {
        return Err(CollectorError::config(format!(
            "{} does not expose '{threading}'",
            endpoint.describe()
        )));
    }

    let available = available_attributes(endpoint, &threading)?;
    let Some(attribute) = ThreadAttribute::from_name(attribute).filter(|a| available.contains(a)) else {
        let names: Vec<&str> = available.iter().map(ThreadAttribute::name).collect();
        return Err(CollectorError::config(format!(
            "unhandled thread value '{attribute}' (available: {})",
            names.join(", ")
        )));
    };

    let parameters = QueryNode::attribute(threading.clone(), "AllThreadIds");
    let info = QueryNode::placeholder_method(QueryNode::object(threading.clone()), "getThreadInfo")?;
    let name_query = QueryNode::composite_field(info, "threadName");
    let value_query = attribute.value_query(&threading)?;

    Ok(ThreadQueries {
        parameters,
        name_query,
        value_query,
    })
}

/// Attributes whose feature is supported. Supported but disabled features
/// are kept with a warning: their samples read as missing until enabled.
fn available_attributes(endpoint: &dyn ManagementEndpoint, threading: &ObjectName) -> Result<Vec<ThreadAttribute>> {
    let flag = |attribute: &str| -> Result<bool> {
        match endpoint.read_attribute(threading, attribute) {
            Ok(Value::Bool(b)) => Ok(b),
            Ok(_) => Ok(false),
            Err(e) if e.is_retryable() => Err(CollectorError::query(format!("'{attribute}' of '{threading}'"), e)),
            Err(_) => Ok(false),
        }
    };

    let mut available = Vec::new();
    for feature in [Feature::CpuTime, Feature::Contention] {
        if !flag(feature.supported_attribute())? {
            tracing::debug!("{} is not supported on {}", feature.supported_attribute(), endpoint.describe());
            continue;
        }
        if !flag(feature.enabled_attribute())? {
            tracing::warn!(
                "{} is disabled on {}, per-thread values will be missing",
                feature.enabled_attribute(),
                endpoint.describe()
            );
        }
        available.extend(ThreadAttribute::ALL.into_iter().filter(|a| a.feature() == feature));
    }
    Ok(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticEndpoint;

    fn threading_endpoint(cpu: bool, contention: bool) -> StaticEndpoint {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute(THREADING_OBJECT_NAME, "AllThreadIds", vec![1i64, 2]);
        endpoint.set_attribute(THREADING_OBJECT_NAME, "ThreadCpuTimeSupported", cpu);
        endpoint.set_attribute(THREADING_OBJECT_NAME, "ThreadCpuTimeEnabled", cpu);
        endpoint.set_attribute(THREADING_OBJECT_NAME, "ThreadContentionMonitoringSupported", contention);
        endpoint.set_attribute(THREADING_OBJECT_NAME, "ThreadContentionMonitoringEnabled", false);
        endpoint.set_operation(THREADING_OBJECT_NAME, "getThreadCpuTime", &["long"], "long", |args| {
            Ok(Value::Long(args[0].as_i64().unwrap_or_default() * 1000))
        });
        endpoint.set_operation(
            THREADING_OBJECT_NAME,
            "getThreadInfo",
            &["long"],
            "javax.management.openmbean.CompositeData",
            |args| {
                let id = args[0].as_i64().unwrap_or_default();
                Ok([
                    ("threadName".to_string(), Value::String(format!("thread-{id}"))),
                    ("waitedTime".to_string(), Value::Long(THREAD_VALUE_MISSING)),
                    ("blockedCount".to_string(), Value::Long(id)),
                ]
                .into_iter()
                .collect())
            },
        );
        endpoint
    }

    #[test]
    fn cpu_time_queries() {
        let endpoint = threading_endpoint(true, false);
        let queries = thread_queries(&endpoint, "ThreadCpuTime").unwrap();

        assert_eq!(queries.parameters.get(&endpoint).unwrap(), Value::from(vec![1i64, 2]));
        assert_eq!(
            queries.name_query.apply(&endpoint, &Value::Long(2)).unwrap(),
            Value::from("thread-2")
        );
        assert_eq!(queries.value_query.apply(&endpoint, &Value::Long(2)).unwrap(), Value::Long(2000));
    }

    #[test]
    fn contention_values_come_from_thread_info() {
        let endpoint = threading_endpoint(false, true);
        let queries = thread_queries(&endpoint, "ThreadInfo.BlockedCount").unwrap();
        assert_eq!(queries.value_query.apply(&endpoint, &Value::Long(7)).unwrap(), Value::Long(7));
    }

    #[test]
    fn unsupported_features_are_configuration_errors() {
        let endpoint = threading_endpoint(false, true);
        let err = thread_queries(&endpoint, "ThreadCpuTime").unwrap_err();
        assert!(matches!(err, CollectorError::Configuration { .. }));
        assert!(err.to_string().contains("ThreadInfo.WaitedTime"));

        assert!(thread_queries(&endpoint, "ThreadAllocatedBytes").is_err());
    }

    #[test]
    fn threading_object_must_exist() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute("java.lang:type=Memory", "HeapMemoryUsage", 0i64);
        assert!(matches!(
            thread_queries(&endpoint, "ThreadCpuTime"),
            Err(CollectorError::Configuration { .. })
        ));
    }
}
