//! Dimensions created on the fly, one per instance of a varying set.
//!
//! Every cycle the parameter query enumerates the live instances (thread
//! ids, pool names, ...). Each instance gets a name, the loader maps that
//! name to a dimension, and the value query produces the instance's sample.
//! Instances that vanish lose their cached state at the end of the cycle.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dimension::{DimensionAlgorithm, DimensionHandle};
use crate::endpoint::ManagementEndpoint;
use crate::error::{CollectorError, Result};
use crate::query::{Arity, QueryNode};
use crate::updater::{DimensionUpdater, UpdaterState};
use crate::value::Value;

/// Hashable form of a per-cycle parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKey {
    Long(i64),
    Text(String),
}

impl InstanceKey {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Long(v) => InstanceKey::Long(*v),
            Value::String(s) => InstanceKey::Text(s.clone()),
            Value::Object(name) => InstanceKey::Text(name.canonical().to_string()),
            other => InstanceKey::Text(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKey::Long(v) => write!(f, "{v}"),
            InstanceKey::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Default)]
struct InstanceState {
    name: Option<String>,
    last_raw: Option<i64>,
}

/// Per-instance caches, swept once per cycle.
#[derive(Debug, Default)]
pub struct InstanceArena {
    entries: HashMap<InstanceKey, InstanceState>,
}

impl InstanceArena {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn name(&self, key: &InstanceKey) -> Option<&str> {
        self.entries.get(key).and_then(|e| e.name.as_deref())
    }

    pub fn last_raw(&self, key: &InstanceKey) -> Option<i64> {
        self.entries.get(key).and_then(|e| e.last_raw)
    }

    fn set_name(&mut self, key: &InstanceKey, name: &str) {
        self.entries.entry(key.clone()).or_default().name = Some(name.to_string());
    }

    /// Remember `raw` for `key` and return the difference with the previous
    /// sample, or `raw` itself the first time the key is seen.
    pub fn record(&mut self, key: &InstanceKey, raw: i64) -> i64 {
        let entry = self.entries.entry(key.clone()).or_default();
        let delta = match entry.last_raw {
            Some(previous) => raw.wrapping_sub(previous),
            None => raw,
        };
        entry.last_raw = Some(raw);
        delta
    }

    /// Drop every key not in `alive`. Returns how many were dropped.
    pub fn sweep(&mut self, alive: &HashSet<InstanceKey>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| alive.contains(key));
        before - self.entries.len()
    }
}

/// What happens when several instances map to the same dimension in one
/// cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Add the instances' contributions
    #[default]
    Sum,
    /// Keep the contribution of the last instance
    Overwrite,
}

/// Outcome of a [`DimensionLoader`] call.
pub type LoadResult = std::result::Result<Option<DimensionHandle>, String>;

/// Maps an instance to the dimension it feeds.
///
/// Returning `Ok(None)` skips the instance for this cycle.
pub trait DimensionLoader: Send {
    fn load(&mut self, key: &InstanceKey, name: &str) -> LoadResult;
}

impl<F> DimensionLoader for F
where
    F: FnMut(&InstanceKey, &str) -> LoadResult + Send,
{
    fn load(&mut self, key: &InstanceKey, name: &str) -> LoadResult {
        self(key, name)
    }
}

#[derive(Debug)]
struct KnownDimension {
    handle: DimensionHandle,
    algorithm: DimensionAlgorithm,
    /// Running counter of an incremental dimension at the start of the cycle
    base: Option<i64>,
    /// Running counter including this cycle
    counter: Option<i64>,
    /// Contribution of this cycle's instances
    increment: Option<i64>,
}

impl KnownDimension {
    fn begin_cycle(&mut self) {
        self.base = self.counter;
        self.increment = None;
        self.handle.clear();
    }

    fn apply(&mut self, contribution: i64, policy: AggregationPolicy) {
        let increment = match (self.increment, policy) {
            (Some(current), AggregationPolicy::Sum) => current.saturating_add(contribution),
            _ => contribution,
        };
        self.increment = Some(increment);

        let raw = match self.algorithm {
            DimensionAlgorithm::Incremental => {
                let counter = self.base.unwrap_or(0).saturating_add(increment);
                self.counter = Some(counter);
                counter
            }
            _ => increment,
        };
        let mut dimension = self.handle.write();
        let value = dimension.scale(raw);
        dimension.set_current_value(Some(value));
    }
}

/// Updater for a chart whose dimensions follow a varying set of instances.
pub struct DynamicDimensionUpdater {
    parameters: QueryNode,
    name_query: Option<QueryNode>,
    value_query: QueryNode,
    loader: Box<dyn DimensionLoader>,
    policy: AggregationPolicy,
    missing_value: Option<i64>,
    known: Vec<KnownDimension>,
    known_index: HashMap<String, usize>,
    arena: InstanceArena,
    state: UpdaterState,
}

impl DynamicDimensionUpdater {
    /// `parameters` enumerates the instances; `name_query` and `value_query`
    /// are evaluated with each instance as their parameter. Without a name
    /// query an instance is named after its key.
    pub fn new(
        parameters: QueryNode,
        name_query: Option<QueryNode>,
        value_query: QueryNode,
        loader: impl DimensionLoader + 'static,
    ) -> Result<Self> {
        if parameters.arity() != Arity::Query {
            return Err(CollectorError::config(format!(
                "parameter query {parameters} must not take a parameter"
            )));
        }
        if let Some(name_query) = &name_query {
            if name_query.arity() != Arity::Function {
                return Err(CollectorError::config(format!(
                    "name query {name_query} must use a placeholder"
                )));
            }
        }
        if value_query.arity() != Arity::Function {
            return Err(CollectorError::config(format!(
                "value query {value_query} must use a placeholder"
            )));
        }

        Ok(Self {
            parameters,
            name_query,
            value_query,
            loader: Box::new(loader),
            policy: AggregationPolicy::default(),
            missing_value: None,
            known: Vec::new(),
            known_index: HashMap::new(),
            arena: InstanceArena::default(),
            state: UpdaterState::default(),
        })
    }

    pub fn with_policy(mut self, policy: AggregationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// A sample equal to `sentinel` is treated as missing.
    pub fn with_missing_value(mut self, sentinel: i64) -> Self {
        self.missing_value = Some(sentinel);
        self
    }

    pub fn arena(&self) -> &InstanceArena {
        &self.arena
    }

    /// This cycle's contribution to a dimension, before scaling. For an
    /// incremental dimension that is the sum of the instance deltas.
    pub fn increment(&self, dimension_id: &str) -> Option<i64> {
        self.known_index
            .get(dimension_id)
            .and_then(|&i| self.known[i].increment)
    }

    /// The instances enumerated right now.
    pub fn query_parameters(&self, endpoint: &dyn ManagementEndpoint) -> Result<Vec<Value>> {
        Ok(match self.parameters.get(endpoint)? {
            Value::Null => Vec::new(),
            Value::List(items) => items,
            scalar => vec![scalar],
        })
    }

    fn instance_name(
        &mut self,
        endpoint: &dyn ManagementEndpoint,
        key: &InstanceKey,
        parameter: &Value,
    ) -> Result<Option<String>> {
        if let Some(name) = self.arena.name(key) {
            return Ok(Some(name.to_string()));
        }
        let name = match &self.name_query {
            Some(query) => match query.apply(endpoint, parameter)? {
                Value::Null => return Ok(None),
                Value::String(name) => name,
                other => other.to_string(),
            },
            None => key.to_string(),
        };
        self.arena.set_name(key, &name);
        Ok(Some(name))
    }

    fn register(&mut self, dimension: DimensionHandle) -> Result<usize> {
        let (id, algorithm) = {
            let d = dimension.read();
            (d.id.clone(), d.algorithm)
        };
        if let Some(&index) = self.known_index.get(&id) {
            return Ok(index);
        }
        if !matches!(algorithm, DimensionAlgorithm::Absolute | DimensionAlgorithm::Incremental) {
            return Err(CollectorError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        tracing::debug!("tracking dimension '{}' ({})", id, algorithm);
        self.known.push(KnownDimension {
            handle: dimension,
            algorithm,
            base: None,
            counter: None,
            increment: None,
        });
        self.known_index.insert(id, self.known.len() - 1);
        Ok(self.known.len() - 1)
    }

    fn sample(&self, value: Value) -> Result<Option<i64>> {
        let raw = match value {
            Value::Null => return Ok(None),
            Value::Long(v) => v,
            Value::Bool(b) => i64::from(b),
            other => {
                return Err(CollectorError::UnexpectedValue {
                    destination: self.value_query.to_string(),
                    expected: "long".to_string(),
                    found: other.kind().to_string(),
                });
            }
        };
        Ok((Some(raw) != self.missing_value).then_some(raw))
    }
}

impl DimensionUpdater for DynamicDimensionUpdater {
    fn update_dimension_values(&mut self, endpoint: &dyn ManagementEndpoint) -> Result<()> {
        let parameters = self.query_parameters(endpoint)?;

        // absent instances must read as "no data"
        for known in &mut self.known {
            known.begin_cycle();
        }

        let mut alive = HashSet::with_capacity(parameters.len());
        for parameter in &parameters {
            let key = InstanceKey::from_value(parameter);
            alive.insert(key.clone());

            let Some(name) = self.instance_name(endpoint, &key, parameter)? else {
                continue;
            };
            let dimension = self
                .loader
                .load(&key, &name)
                .map_err(|message| CollectorError::DimensionLoader { name: name.clone(), message })?;
            let Some(dimension) = dimension else {
                continue;
            };
            let index = self.register(dimension)?;

            let value = self.value_query.apply(endpoint, parameter)?;
            let Some(raw) = self.sample(value)? else {
                continue;
            };
            let contribution = match self.known[index].algorithm {
                DimensionAlgorithm::Incremental => self.arena.record(&key, raw),
                _ => raw,
            };
            self.known[index].apply(contribution, self.policy);
        }

        let evicted = self.arena.sweep(&alive);
        if evicted > 0 {
            tracing::debug!("{}: forgot {} vanished instances", self.parameters, evicted);
        }
        self.state = UpdaterState::Running;
        Ok(())
    }

    fn dimensions(&self) -> Vec<DimensionHandle> {
        self.known.iter().map(|k| k.handle.clone()).collect()
    }

    fn state(&self) -> UpdaterState {
        self.state
    }
}

impl fmt::Debug for DynamicDimensionUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicDimensionUpdater")
            .field("parameters", &self.parameters.to_string())
            .field("value_query", &self.value_query.to_string())
            .field("policy", &self.policy)
            .field("known", &self.known.len())
            .field("instances", &self.arena.len())
            .field("state", &self.state)
            .finish()
    }
}
