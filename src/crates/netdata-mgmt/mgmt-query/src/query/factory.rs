use crate::endpoint::ManagementEndpoint;
use crate::error::{CollectorError, Result};
use crate::query::config::{QueryConfig, TransformArg, TransformConfig};
use crate::query::node::{Arity, QueryNode};
use crate::updater::{AttributeQuery, QueryDestination};
use crate::value::{ObjectName, Value};

/// Builds query nodes and static updaters from configuration.
///
/// Chains are validated completely before the endpoint is contacted.
pub struct QueryFactory<'a> {
    endpoint: &'a dyn ManagementEndpoint,
}

impl<'a> QueryFactory<'a> {
    pub fn new(endpoint: &'a dyn ManagementEndpoint) -> Self {
        Self { endpoint }
    }

    /// Build a query that produces a value on its own.
    pub fn build_query(&self, config: &QueryConfig) -> Result<QueryNode> {
        self.build(config, Arity::Query)
    }

    /// Build a query taking one parameter, marked with `{}` in the chain.
    pub fn build_query_function(&self, config: &QueryConfig) -> Result<QueryNode> {
        self.build(config, Arity::Function)
    }

    fn build(&self, config: &QueryConfig, arity: Arity) -> Result<QueryNode> {
        let object = ObjectName::parse(&config.from)?;
        let mut root = match &config.value {
            Some(attribute) if object.is_pattern() => {
                return Err(CollectorError::config(format!(
                    "cannot read '{attribute}' of several objects '{object}'"
                )));
            }
            Some(attribute) => QueryNode::attribute(object, attribute.as_str()),
            None => QueryNode::object(object),
        };
        if let Some(key) = &config.composite_data_key {
            root = QueryNode::bound_method(root, "get", Value::from(key.as_str()))?;
        }

        let node = build_chain(root, &config.transform, arity)?;
        if config.value.is_none() && !node.root().0.is_pattern() {
            self.ensure_registered(node.root().0)?;
        }
        Ok(node)
    }

    /// Build the updater serving `destination`, picking its flavour from one
    /// exploratory query.
    pub fn build_updater(&self, destination: &QueryDestination) -> Result<AttributeQuery> {
        let node = build_chain(destination.root_node(), &destination.transform, Arity::Query)?;
        let example = node.get(self.endpoint)?;
        AttributeQuery::new(destination.clone(), node, &example)
    }

    fn ensure_registered(&self, object: &ObjectName) -> Result<()> {
        match self.endpoint.is_registered(object) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CollectorError::config(format!(
                "object '{object}' is not registered on {}",
                self.endpoint.describe()
            ))),
            Err(e) => Err(CollectorError::query(format!("'{object}'"), e)),
        }
    }
}

/// Append `steps` to `root` and check the result has the wanted arity.
fn build_chain(root: QueryNode, steps: &[TransformConfig], arity: Arity) -> Result<QueryNode> {
    let mut node = root;
    for step in steps {
        node = match step.args.as_slice() {
            [] => QueryNode::no_arg_method(node, step.method.as_str()),
            [TransformArg::Placeholder] => {
                if arity != Arity::Function {
                    return Err(CollectorError::config(format!(
                        "cannot use a placeholder in '{}' here, a value without parameter is expected",
                        step.method
                    )));
                }
                QueryNode::placeholder_method(node, step.method.as_str())?
            }
            [TransformArg::Literal(argument)] => {
                QueryNode::bound_method(node, step.method.as_str(), argument.clone())?
            }
            args => {
                return Err(CollectorError::config(format!(
                    "'{}' has {} arguments, at most one is supported",
                    step.method,
                    args.len()
                )));
            }
        };
    }

    if node.arity() != arity {
        let message = match arity {
            Arity::Query => format!("{node} cannot take a parameter here"),
            Arity::Function => format!("{node} should use a placeholder {{}} for the parameter"),
        };
        return Err(CollectorError::config(message));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticEndpoint;

    const THREADING: &str = "java.lang:type=Threading";

    fn threading_endpoint() -> StaticEndpoint {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute(THREADING, "AllThreadIds", vec![1i64, 2]);
        endpoint.set_operation(THREADING, "getThreadCpuTime", &["long"], "long", |args| {
            Ok(Value::Long(args[0].as_i64().unwrap_or_default() * 10))
        });
        endpoint
    }

    #[test]
    fn two_placeholders_fail_without_touching_the_endpoint() {
        let endpoint = threading_endpoint();
        let config = QueryConfig::new(THREADING)
            .then(TransformConfig::with_placeholder("getThreadInfo"))
            .then(TransformConfig::with_placeholder("getThreadCpuTime"));

        let err = QueryFactory::new(&endpoint).build_query_function(&config).unwrap_err();
        assert!(matches!(err, CollectorError::Configuration { .. }));
        assert_eq!(endpoint.call_count(), 0);
    }

    #[test]
    fn placeholder_in_a_plain_query_is_rejected() {
        let endpoint = threading_endpoint();
        let config = QueryConfig::new(THREADING).then(TransformConfig::with_placeholder("getThreadCpuTime"));

        let err = QueryFactory::new(&endpoint).build_query(&config).unwrap_err();
        assert!(matches!(err, CollectorError::Configuration { .. }));
        assert_eq!(endpoint.call_count(), 0);
    }

    #[test]
    fn function_without_placeholder_is_rejected() {
        let endpoint = threading_endpoint();
        let config = QueryConfig::new(THREADING).attribute("AllThreadIds");

        let err = QueryFactory::new(&endpoint).build_query_function(&config).unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn too_many_arguments() {
        let endpoint = threading_endpoint();
        let mut step = TransformConfig::with_arg("getThreadInfo", 1i64);
        step.args.push(TransformArg::Literal(Value::Long(3)));
        let config = QueryConfig::new(THREADING).then(step);

        assert!(matches!(
            QueryFactory::new(&endpoint).build_query(&config),
            Err(CollectorError::Configuration { .. })
        ));
    }

    #[test]
    fn object_root_must_be_registered() {
        let endpoint = threading_endpoint();
        let config = QueryConfig::new("java.lang:type=Compilation").then(TransformConfig::call("toString"));

        let err = QueryFactory::new(&endpoint).build_query(&config).unwrap_err();
        assert!(matches!(err, CollectorError::Configuration { .. }));
    }

    #[test]
    fn builds_a_working_function() {
        let endpoint = threading_endpoint();
        let config = QueryConfig::new(THREADING).then(TransformConfig::with_placeholder("getThreadCpuTime"));

        let node = QueryFactory::new(&endpoint).build_query_function(&config).unwrap();
        assert_eq!(node.apply(&endpoint, &Value::Long(4)).unwrap(), Value::Long(40));
    }

    #[test]
    fn legacy_composite_key_becomes_a_get() {
        let endpoint = StaticEndpoint::new();
        let usage: Value = [("used".to_string(), Value::Long(5))].into_iter().collect();
        endpoint.set_attribute("java.lang:type=Memory", "HeapMemoryUsage", usage);

        let config = QueryConfig::new("java.lang:type=Memory")
            .attribute("HeapMemoryUsage")
            .composite_data_key("used");
        let node = QueryFactory::new(&endpoint).build_query(&config).unwrap();
        assert_eq!(node.get(&endpoint).unwrap(), Value::Long(5));
    }

    #[test]
    fn pattern_roots_enumerate_without_registration_check() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute("java.lang:type=MemoryPool,name=Eden", "Valid", true);
        endpoint.set_attribute("java.lang:type=MemoryPool,name=Metaspace", "Valid", true);
        let factory = QueryFactory::new(&endpoint);

        let node = factory.build_query(&QueryConfig::new("java.lang:type=MemoryPool,*")).unwrap();
        assert!(matches!(node.get(&endpoint).unwrap(), Value::List(pools) if pools.len() == 2));

        let reading = QueryConfig::new("java.lang:type=MemoryPool,*").attribute("Valid");
        assert!(matches!(
            factory.build_query(&reading),
            Err(CollectorError::Configuration { .. })
        ));
    }
}
