//! The boundary between the query engine and a live management endpoint.

use crate::error::EndpointError;
use crate::value::{ObjectName, Value};

/// An introspectable process exposing named objects with attributes and
/// operations.
///
/// Implementations must be safe to share between the collector and the run
/// loop. Connectivity failures should be reported as
/// [`EndpointError::Connection`] or [`EndpointError::Timeout`] so that the
/// collector retries them at the next cycle.
pub trait ManagementEndpoint: Send + Sync {
    /// Read one attribute of an object.
    fn read_attribute(&self, object: &ObjectName, attribute: &str) -> Result<Value, EndpointError>;

    /// Invoke a remote operation. `operation` is the overload picked from the
    /// object's [`TypeDescriptor`].
    fn invoke(
        &self,
        object: &ObjectName,
        operation: &OperationInfo,
        args: &[Value],
    ) -> Result<Value, EndpointError>;

    /// Names of the registered objects matching `selector`.
    fn enumerate_instances(&self, selector: &ObjectName) -> Result<Vec<ObjectName>, EndpointError>;

    /// Attributes and operations of an object.
    fn resolve_object_type(&self, object: &ObjectName) -> Result<TypeDescriptor, EndpointError>;

    fn is_registered(&self, object: &ObjectName) -> Result<bool, EndpointError> {
        match self.resolve_object_type(object) {
            Ok(_) => Ok(true),
            Err(EndpointError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Short human readable description, used in logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationInfo {
    pub name: String,
    /// Declared parameter types, e.g. `long` or `java.lang.String`
    pub parameters: Vec<String>,
    pub return_type: String,
}

impl OperationInfo {
    pub fn new(name: impl Into<String>, parameters: &[&str], return_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            return_type: return_type.into(),
        }
    }

    /// `name(type,type)`, the form used to address an overload.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.parameters.join(","))
    }
}

/// What an object exposes, as reported by the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub class_name: String,
    pub attributes: Vec<AttributeInfo>,
    pub operations: Vec<OperationInfo>,
}

impl TypeDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn operations_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a OperationInfo> + 'a {
        self.operations.iter().filter(move |op| op.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_signature() {
        let op = OperationInfo::new("getThreadInfo", &["long", "int"], "javax.management.openmbean.CompositeData");
        assert_eq!(op.signature(), "getThreadInfo(long,int)");
        assert_eq!(OperationInfo::new("gc", &[], "void").signature(), "gc()");
    }

    #[test]
    fn overloads_are_listed_in_declaration_order() {
        let descriptor = TypeDescriptor {
            class_name: "sun.management.ThreadImpl".to_string(),
            attributes: vec![],
            operations: vec![
                OperationInfo::new("getThreadInfo", &["long"], "CompositeData"),
                OperationInfo::new("dumpAllThreads", &["boolean", "boolean"], "CompositeData[]"),
                OperationInfo::new("getThreadInfo", &["long[]"], "CompositeData[]"),
            ],
        };

        let overloads: Vec<_> = descriptor
            .operations_named("getThreadInfo")
            .map(OperationInfo::signature)
            .collect();
        assert_eq!(overloads, ["getThreadInfo(long)", "getThreadInfo(long[])"]);
    }
}
