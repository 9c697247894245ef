//! Collection of all charts of one management endpoint.

use std::sync::Arc;
use std::time::Duration;

use mgmt_query::updater::{LoadResult, THREAD_VALUE_MISSING, THREADING_OBJECT_NAME, thread_queries};
use mgmt_query::{
    Chart, ChartHandle, CollectorError, Dimension, DimensionAlgorithm, DimensionHandle, DimensionLoader,
    DimensionMapping, DimensionUpdater, DynamicDimensionUpdater, InstanceKey, ManagementEndpoint,
    MappingDimensionUpdater, ObjectName, QueryFactory, Result, Value,
};

use crate::config::{ChartClass, ChartConfig, DimensionConfig, DimensionTemplateConfig, NameQueryConfig};
use crate::name_filter::{NameFilter, sanitize_to_dimension_id};
use crate::budget::CycleBudget;

const RUNTIME_OBJECT_NAME: &str = "java.lang:type=Runtime";

enum RegisteredUpdater {
    /// Static query, shared by every dimension reading the same destination
    Mapping(Box<dyn MappingDimensionUpdater>),
    Dynamic {
        chart: String,
        updater: Box<DynamicDimensionUpdater>,
    },
}

impl RegisteredUpdater {
    fn update(&mut self, endpoint: &dyn ManagementEndpoint) -> Result<()> {
        match self {
            RegisteredUpdater::Mapping(updater) => updater.update_dimension_values(endpoint),
            RegisteredUpdater::Dynamic { updater, .. } => updater.update_dimension_values(endpoint),
        }
    }

    fn clear(&self) {
        let dimensions = match self {
            RegisteredUpdater::Mapping(updater) => updater.dimensions(),
            RegisteredUpdater::Dynamic { updater, .. } => updater.dimensions(),
        };
        for dimension in dimensions {
            dimension.clear();
        }
    }

    fn describe(&self) -> String {
        match self {
            RegisteredUpdater::Mapping(updater) => updater.destination().to_string(),
            RegisteredUpdater::Dynamic { chart, .. } => format!("dimensions of {chart}"),
        }
    }
}

/// Creates the dimensions of a dynamic chart from its template.
struct TemplateLoader {
    chart: ChartHandle,
    filter: NameFilter,
    dimension_name: String,
    algorithm: DimensionAlgorithm,
    multiplier: i64,
    divisor: i64,
    hidden: bool,
}

impl TemplateLoader {
    fn new(
        chart: ChartHandle,
        config: &ChartConfig,
        template: &DimensionTemplateConfig,
        names: &NameQueryConfig,
    ) -> Result<Self> {
        Ok(Self {
            chart,
            filter: NameFilter::new(names)?,
            dimension_name: names.dimension_name.clone(),
            algorithm: config.dimension_algorithm,
            multiplier: template.multiplier,
            divisor: template.divisor,
            hidden: template.hidden,
        })
    }
}

impl DimensionLoader for TemplateLoader {
    fn load(&mut self, key: &InstanceKey, name: &str) -> LoadResult {
        if !self.filter.accepts(name) {
            return Ok(None);
        }

        let name = self.filter.rewrite(name);
        let dimension_name = self
            .dimension_name
            .replace("{name}", &name)
            .replace("{key}", &key.to_string());
        let id = sanitize_to_dimension_id(&dimension_name);

        let mut chart = self.chart.write();
        if let Some(dimension) = chart.dimension(&id) {
            return Ok(Some(dimension));
        }

        tracing::debug!("adding dimension {} to {}", id, chart.full_id());
        let mut dimension = Dimension::new(id)
            .with_name(dimension_name)
            .with_algorithm(self.algorithm)
            .with_scale(self.multiplier, self.divisor);
        dimension.hidden = self.hidden;
        let dimension = DimensionHandle::new(dimension);
        chart
            .add_dimension(dimension.clone())
            .map_err(|e| e.to_string())?;
        Ok(Some(dimension))
    }
}

/// Collects the configured charts of one endpoint.
pub struct ChartCollector {
    name: String,
    endpoint: Arc<dyn ManagementEndpoint>,
    update_every: u64,
    cycle_budget: Option<CycleBudget>,
    updaters: Vec<RegisteredUpdater>,
    charts: Vec<ChartHandle>,
}

impl ChartCollector {
    pub fn new(name: impl Into<String>, endpoint: Arc<dyn ManagementEndpoint>) -> Self {
        Self {
            name: name.into(),
            endpoint,
            update_every: 1,
            cycle_budget: None,
            updaters: Vec::new(),
            charts: Vec::new(),
        }
    }

    pub fn with_update_every(mut self, update_every: u64) -> Self {
        self.update_every = update_every.max(1);
        self
    }

    /// Updaters not started within `budget` are postponed to the next cycle.
    pub fn with_cycle_budget(mut self, budget: Duration) -> Self {
        self.cycle_budget = Some(CycleBudget::new(budget));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn charts(&self) -> &[ChartHandle] {
        &self.charts
    }

    pub fn updater_count(&self) -> usize {
        self.updaters.len()
    }

    /// Name of the runtime behind the endpoint, unique per process.
    pub fn runtime_name(&self) -> Result<String> {
        let runtime = ObjectName::parse(RUNTIME_OBJECT_NAME)?;
        let destination = format!("'Name' of '{runtime}'");
        match self.endpoint.read_attribute(&runtime, "Name") {
            Ok(Value::String(name)) => Ok(name),
            Ok(other) => Err(CollectorError::UnexpectedValue {
                destination,
                expected: "string".to_string(),
                found: other.kind().to_string(),
            }),
            Err(e) => Err(CollectorError::query(destination, e)),
        }
    }

    /// Create every chart that can be collected. A chart that fails is
    /// logged and left out.
    pub fn initialize<'a>(&mut self, configs: impl IntoIterator<Item = &'a ChartConfig>) -> &[ChartHandle] {
        for config in configs {
            if let Err(e) = self.create_chart(config) {
                tracing::error!("{}: skipping chart '{}': {:#}", self.name, config.id, e);
            }
        }
        tracing::info!(
            "{}: collecting {} charts with {} queries",
            self.name,
            self.charts.len(),
            self.updaters.len()
        );
        &self.charts
    }

    pub fn create_chart(&mut self, config: &ChartConfig) -> Result<ChartHandle> {
        if self.charts.iter().any(|c| c.read().id == config.id) {
            return Err(CollectorError::config(format!("duplicate chart id '{}'", config.id)));
        }

        let chart = match config.class {
            ChartClass::Default => self.create_static_chart(config)?,
            ChartClass::Dynamic => self.create_dynamic_chart(config)?,
        };
        self.charts.push(chart.clone());
        Ok(chart)
    }

    fn initialize_chart(&self, config: &ChartConfig) -> Chart {
        let mut chart = Chart::new(
            format!("mgmt_{}", sanitize_to_dimension_id(&self.name)),
            config.id.as_str(),
        );
        chart.title = config.title.clone();
        chart.units = config.units.clone();
        chart.family = config.family.clone();
        chart.context = format!("mgmt.{}", config.id);
        chart.chart_type = config.chart_type;
        if let Some(priority) = config.priority {
            chart.priority = priority;
        }
        chart.update_every = self.update_every;
        chart
    }

    fn initialize_dimension(chart: &ChartConfig, config: &DimensionConfig) -> Dimension {
        let mut dimension = Dimension::new(sanitize_to_dimension_id(&config.name))
            .with_name(config.name.as_str())
            .with_algorithm(chart.dimension_algorithm)
            .with_scale(config.multiplier, config.divisor);
        dimension.hidden = config.hidden;
        dimension
    }

    fn create_static_chart(&mut self, config: &ChartConfig) -> Result<ChartHandle> {
        let chart = ChartHandle::new(self.initialize_chart(config));

        for dimension_config in &config.dimensions {
            if let Err(e) = self.add_static_dimension(&chart, config, dimension_config) {
                tracing::error!(
                    "{}: could not query dimension '{}' of chart '{}', skipping it: {:#}",
                    self.name,
                    dimension_config.name,
                    config.id,
                    e
                );
            }
        }

        if chart.read().dimensions().is_empty() {
            return Err(CollectorError::config("no dimension can be collected"));
        }
        Ok(chart)
    }

    /// Attach a dimension to the updater already reading its destination, or
    /// to a new one.
    fn add_static_dimension(
        &mut self,
        chart: &ChartHandle,
        chart_config: &ChartConfig,
        config: &DimensionConfig,
    ) -> Result<()> {
        let dimension = Self::initialize_dimension(chart_config, config);
        if chart.read().dimension(&dimension.id).is_some() {
            return Err(CollectorError::config(format!("duplicate dimension id '{}'", dimension.id)));
        }

        let dimension = DimensionHandle::new(dimension);
        let mapping = DimensionMapping::from_query(dimension.clone(), &config.query)?;
        let endpoint = Arc::clone(&self.endpoint);

        let existing = self.updaters.iter_mut().find_map(|registered| match registered {
            RegisteredUpdater::Mapping(updater) if updater.query_destination_equals(&mapping.destination) => {
                Some(updater)
            }
            _ => None,
        });
        match existing {
            Some(updater) => updater.add_dimension(&mapping, endpoint.as_ref())?,
            None => {
                let mut updater = QueryFactory::new(endpoint.as_ref()).build_updater(&mapping.destination)?;
                updater.add_dimension(&mapping, endpoint.as_ref())?;
                tracing::debug!("{}: new query {} ({:?})", self.name, mapping.destination, updater.kind());
                self.updaters.push(RegisteredUpdater::Mapping(Box::new(updater)));
            }
        }

        chart.write().add_dimension(dimension)
    }

    fn create_dynamic_chart(&mut self, config: &ChartConfig) -> Result<ChartHandle> {
        let Some(template) = &config.dimension_template else {
            return Err(CollectorError::config("a dynamic chart needs a dimension_template"));
        };
        if !matches!(
            config.dimension_algorithm,
            DimensionAlgorithm::Absolute | DimensionAlgorithm::Incremental
        ) {
            return Err(CollectorError::UnsupportedAlgorithm(config.dimension_algorithm.to_string()));
        }

        let names = template.name_query.clone().unwrap_or_default();
        let chart = ChartHandle::new(self.initialize_chart(config));
        let loader = TemplateLoader::new(chart.clone(), config, template, &names)?;
        let endpoint = Arc::clone(&self.endpoint);

        let updater = match thread_attribute(template)? {
            Some(attribute) => {
                if names.query().is_some() {
                    tracing::warn!(
                        "{}: chart '{}' names threads after their thread name, ignoring its name query",
                        self.name,
                        config.id
                    );
                }
                let queries = thread_queries(endpoint.as_ref(), attribute)?;
                DynamicDimensionUpdater::new(
                    queries.parameters,
                    // threads are named after their id unless names are configured
                    template.name_query.as_ref().map(|_| queries.name_query),
                    queries.value_query,
                    loader,
                )?
                .with_missing_value(THREAD_VALUE_MISSING)
            }
            None => {
                let Some(parameter) = &template.query_parameter else {
                    return Err(CollectorError::config("a dynamic chart needs a query_parameter"));
                };
                let factory = QueryFactory::new(endpoint.as_ref());
                let parameters = factory.build_query(parameter)?;
                let name_query = names
                    .query()
                    .map(|query| factory.build_query_function(&query))
                    .transpose()?;
                let value_query = factory.build_query_function(&template.value_query)?;
                DynamicDimensionUpdater::new(parameters, name_query, value_query, loader)?
            }
        };

        self.updaters.push(RegisteredUpdater::Dynamic {
            chart: chart.read().full_id(),
            updater: Box::new(updater.with_policy(template.aggregation)),
        });
        Ok(chart)
    }

    /// Run every updater once and return the charts.
    ///
    /// An updater failing with a connectivity error is retried next cycle;
    /// any other failure removes it. Either way its dimensions read as
    /// missing for this cycle.
    pub fn collect_values(&mut self) -> &[ChartHandle] {
        if let Some(budget) = &mut self.cycle_budget {
            budget.restart();
        }

        let endpoint = Arc::clone(&self.endpoint);
        let budget = self.cycle_budget.as_ref();
        let name = &self.name;
        let mut postponed = 0usize;
        let mut kept = 0usize;
        let mut first_postponed = None;

        self.updaters.retain_mut(|updater| {
            if budget.is_some_and(CycleBudget::is_exhausted) {
                postponed += 1;
                first_postponed.get_or_insert(kept);
                kept += 1;
                updater.clear();
                return true;
            }

            let keep = match updater.update(endpoint.as_ref()) {
                Ok(()) => true,
                Err(e) => {
                    updater.clear();
                    if e.is_retryable() {
                        tracing::warn!("{}: failed to collect {}, retrying next cycle: {:#}", name, updater.describe(), e);
                        true
                    } else {
                        tracing::warn!("{}: stop collecting {}: {:#}", name, updater.describe(), e);
                        false
                    }
                }
            };
            kept += usize::from(keep);
            keep
        });

        // postponed updaters go first next cycle
        if let Some(first) = first_postponed {
            self.updaters.rotate_left(first);
        }

        if postponed > 0 {
            tracing::warn!(
                "{}: cycle budget of {:?} exhausted, {} queries postponed",
                self.name,
                self.cycle_budget.as_ref().map(CycleBudget::budget).unwrap_or_default(),
                postponed
            );
        }
        &self.charts
    }
}

/// The per-thread attribute when the template reads the threading object
/// by attribute name only.
fn thread_attribute(template: &DimensionTemplateConfig) -> Result<Option<&str>> {
    let query = &template.value_query;
    if ObjectName::parse(&query.from)? != ObjectName::parse(THREADING_OBJECT_NAME)? {
        return Ok(None);
    }
    if !query.transform.is_empty() || query.composite_data_key.is_some() {
        return Ok(None);
    }
    if let Some(parameter) = &template.query_parameter {
        if ObjectName::parse(&parameter.from)? != ObjectName::parse(THREADING_OBJECT_NAME)? {
            return Ok(None);
        }
    }
    Ok(query.value.as_deref())
}
