//! Management endpoint reached through a Jolokia agent (JSON over HTTP).

use std::collections::BTreeMap;
use std::time::Duration;

use mgmt_query::{
    AttributeInfo, EndpointError, ManagementEndpoint, ObjectName, OperationInfo, TypeDescriptor, Value,
};
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Request<'a> {
    Read {
        mbean: &'a str,
        attribute: &'a str,
    },
    Exec {
        mbean: &'a str,
        operation: String,
        arguments: Vec<serde_json::Value>,
    },
    Search {
        mbean: &'a str,
    },
    List {
        path: String,
    },
}

#[derive(Debug, Deserialize)]
struct Response {
    status: u16,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

impl Response {
    fn into_result(self, request: &Request<'_>) -> Result<serde_json::Value, EndpointError> {
        if self.status == 200 {
            return Ok(self.value);
        }

        let error_type = self.error_type.unwrap_or_default();
        let message = self.error.unwrap_or_else(|| format!("status {}", self.status));
        let not_found = |kind: &str| error_type.ends_with(kind);

        Err(match request {
            Request::Read { mbean, attribute } if not_found("AttributeNotFoundException") => {
                EndpointError::AttributeNotFound {
                    object: mbean.to_string(),
                    attribute: attribute.to_string(),
                }
            }
            Request::Read { mbean, .. } | Request::Exec { mbean, .. } | Request::Search { mbean }
                if not_found("InstanceNotFoundException") =>
            {
                EndpointError::ObjectNotFound(mbean.to_string())
            }
            Request::List { path } if self.status == 404 || not_found("IllegalArgumentException") => {
                EndpointError::ObjectNotFound(path.clone())
            }
            Request::Exec { mbean, operation, .. } => EndpointError::Invocation {
                object: mbean.to_string(),
                operation: operation.clone(),
                message,
            },
            _ => EndpointError::Protocol {
                message: format!("{error_type} (status {}): {message}", self.status),
            },
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListedObject {
    #[serde(default)]
    class: String,
    #[serde(default)]
    attr: BTreeMap<String, ListedAttribute>,
    #[serde(default)]
    op: BTreeMap<String, Overloads>,
}

#[derive(Debug, Deserialize)]
struct ListedAttribute {
    #[serde(rename = "type", default)]
    type_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Overloads {
    Many(Vec<ListedOperation>),
    One(ListedOperation),
}

#[derive(Debug, Deserialize)]
struct ListedOperation {
    #[serde(default)]
    args: Vec<ListedArgument>,
    #[serde(default)]
    ret: String,
}

#[derive(Debug, Deserialize)]
struct ListedArgument {
    #[serde(rename = "type")]
    type_name: String,
}

/// Convert the `list` answer for one object into a type descriptor.
fn type_descriptor(value: serde_json::Value) -> Result<TypeDescriptor, serde_json::Error> {
    let listed: ListedObject = serde_json::from_value(value)?;

    let attributes = listed
        .attr
        .into_iter()
        .map(|(name, attr)| AttributeInfo {
            name,
            type_name: attr.type_name,
        })
        .collect();

    let mut operations = Vec::new();
    for (name, overloads) in listed.op {
        let overloads = match overloads {
            Overloads::One(op) => vec![op],
            Overloads::Many(ops) => ops,
        };
        for op in overloads {
            operations.push(OperationInfo {
                name: name.clone(),
                parameters: op.args.into_iter().map(|a| a.type_name).collect(),
                return_type: op.ret,
            });
        }
    }

    Ok(TypeDescriptor {
        class_name: listed.class,
        attributes,
        operations,
    })
}

/// `list` path of an object: domain and property list, with `!` and `/`
/// escaped by `!`.
fn list_path(object: &ObjectName) -> String {
    let escape = |s: &str| s.replace('!', "!!").replace('/', "!/");
    let properties = object
        .canonical()
        .split_once(':')
        .map(|(_, properties)| properties)
        .unwrap_or_default();
    format!("{}/{}", escape(object.domain()), escape(properties))
}

pub struct JolokiaEndpoint {
    name: String,
    url: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl JolokiaEndpoint {
    /// Must not be called from an async context.
    pub fn new(server: &ServerConfig) -> Result<Self, EndpointError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(server.timeout)
            .connect_timeout(server.timeout)
            .build()
            .map_err(|e| EndpointError::Connection {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            name: server.name.clone(),
            url: server.url.clone(),
            timeout: server.timeout,
            client,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> EndpointError {
        if e.is_timeout() {
            EndpointError::Timeout(self.timeout)
        } else if e.is_connect() || e.is_request() {
            EndpointError::Connection {
                message: format!("{}: {e}", self.url),
            }
        } else {
            EndpointError::Protocol {
                message: format!("{}: {e}", self.url),
            }
        }
    }

    fn send(&self, request: &Request<'_>) -> Result<serde_json::Value, EndpointError> {
        tracing::trace!("{}: {:?}", self.name, request);

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EndpointError::Connection {
                message: format!("{} answered {status}", self.url),
            });
        }
        if !status.is_success() {
            return Err(EndpointError::Protocol {
                message: format!("{} answered {status}", self.url),
            });
        }

        let response: Response = response.json().map_err(|e| self.transport_error(e))?;
        response.into_result(request)
    }
}

impl ManagementEndpoint for JolokiaEndpoint {
    fn read_attribute(&self, object: &ObjectName, attribute: &str) -> Result<Value, EndpointError> {
        let request = Request::Read {
            mbean: object.as_str(),
            attribute,
        };
        self.send(&request).map(Value::from_json)
    }

    fn invoke(&self, object: &ObjectName, operation: &OperationInfo, args: &[Value]) -> Result<Value, EndpointError> {
        let request = Request::Exec {
            mbean: object.as_str(),
            operation: operation.signature(),
            arguments: args.iter().map(Value::to_json).collect(),
        };
        self.send(&request).map(Value::from_json)
    }

    fn enumerate_instances(&self, selector: &ObjectName) -> Result<Vec<ObjectName>, EndpointError> {
        let request = Request::Search {
            mbean: selector.as_str(),
        };
        let names = match self.send(&request)? {
            serde_json::Value::Array(names) => names,
            other => {
                return Err(EndpointError::Protocol {
                    message: format!("search for '{selector}' returned {other}"),
                });
            }
        };

        let mut objects = Vec::with_capacity(names.len());
        for name in names {
            let Some(name) = name.as_str() else { continue };
            match ObjectName::parse(name) {
                Ok(object) => objects.push(object),
                Err(e) => tracing::debug!("{}: skipping object: {}", self.name, e),
            }
        }
        objects.sort();
        Ok(objects)
    }

    fn resolve_object_type(&self, object: &ObjectName) -> Result<TypeDescriptor, EndpointError> {
        let request = Request::List {
            path: list_path(object),
        };
        match self.send(&request)? {
            serde_json::Value::Null => Err(EndpointError::ObjectNotFound(object.to_string())),
            serde_json::Value::Object(map) if map.is_empty() => {
                Err(EndpointError::ObjectNotFound(object.to_string()))
            }
            value => type_descriptor(value).map_err(|e| EndpointError::Protocol {
                message: format!("cannot read type of '{object}': {e}"),
            }),
        }
    }

    fn is_registered(&self, object: &ObjectName) -> Result<bool, EndpointError> {
        match self.enumerate_instances(object) {
            Ok(objects) => Ok(objects.iter().any(|o| o == object)),
            Err(EndpointError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn describe(&self) -> String {
        format!("'{}' ({})", self.name, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(json: serde_json::Value) -> Response {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn requests_are_tagged_by_type() {
        let read = Request::Read {
            mbean: "java.lang:type=Memory",
            attribute: "HeapMemoryUsage",
        };
        assert_eq!(
            serde_json::to_value(&read).unwrap(),
            json!({"type": "read", "mbean": "java.lang:type=Memory", "attribute": "HeapMemoryUsage"})
        );

        let exec = Request::Exec {
            mbean: "java.lang:type=Threading",
            operation: OperationInfo::new("getThreadCpuTime", &["long"], "long").signature(),
            arguments: vec![Value::Long(7).to_json()],
        };
        assert_eq!(
            serde_json::to_value(&exec).unwrap(),
            json!({
                "type": "exec",
                "mbean": "java.lang:type=Threading",
                "operation": "getThreadCpuTime(long)",
                "arguments": [7]
            })
        );
    }

    #[test]
    fn successful_responses_carry_the_value() {
        let request = Request::Search { mbean: "java.lang:*" };
        let value = response(json!({"status": 200, "value": {"used": 10, "max": -1}}))
            .into_result(&request)
            .unwrap();
        let value = Value::from_json(value);
        assert_eq!(value.field("used"), Some(&Value::Long(10)));
    }

    #[test]
    fn error_types_map_to_endpoint_errors() {
        let read = Request::Read {
            mbean: "app:type=Cache",
            attribute: "Hits",
        };
        let err = response(json!({
            "status": 404,
            "error_type": "javax.management.AttributeNotFoundException",
            "error": "No such attribute: Hits"
        }))
        .into_result(&read)
        .unwrap_err();
        assert!(matches!(err, EndpointError::AttributeNotFound { .. }));

        let err = response(json!({
            "status": 404,
            "error_type": "javax.management.InstanceNotFoundException",
            "error": "app:type=Cache"
        }))
        .into_result(&read)
        .unwrap_err();
        assert_eq!(err, EndpointError::ObjectNotFound("app:type=Cache".to_string()));

        let exec = Request::Exec {
            mbean: "app:type=Cache",
            operation: "evict(java.lang.String)".to_string(),
            arguments: vec![],
        };
        let err = response(json!({
            "status": 500,
            "error_type": "java.lang.IllegalStateException",
            "error": "closed"
        }))
        .into_result(&exec)
        .unwrap_err();
        assert!(matches!(err, EndpointError::Invocation { ref message, .. } if message == "closed"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn lists_become_type_descriptors() {
        let listed = json!({
            "class": "sun.management.ThreadImpl",
            "attr": {
                "ThreadCount": {"type": "int", "rw": false, "desc": "ThreadCount"},
                "AllThreadIds": {"type": "[J", "rw": false, "desc": "AllThreadIds"}
            },
            "op": {
                "getThreadCpuTime": [
                    {"args": [{"name": "p0", "type": "[J", "desc": ""}], "ret": "[J", "desc": ""},
                    {"args": [{"name": "p0", "type": "long", "desc": ""}], "ret": "long", "desc": ""}
                ],
                "resetPeakThreadCount": {"args": [], "ret": "void", "desc": ""}
            }
        });
        let descriptor = type_descriptor(listed).unwrap();

        assert_eq!(descriptor.class_name, "sun.management.ThreadImpl");
        assert_eq!(descriptor.attribute("ThreadCount").unwrap().type_name, "int");
        let cpu: Vec<String> = descriptor
            .operations_named("getThreadCpuTime")
            .map(OperationInfo::signature)
            .collect();
        assert_eq!(cpu, ["getThreadCpuTime([J)", "getThreadCpuTime(long)"]);
        assert_eq!(descriptor.operations.len(), 3);
    }

    #[test]
    fn list_paths_use_canonical_properties() {
        let name = ObjectName::parse("java.lang:type=MemoryPool,name=G1 Eden/Space").unwrap();
        assert_eq!(list_path(&name), "java.lang/name=G1 Eden!/Space,type=MemoryPool");
    }
}
