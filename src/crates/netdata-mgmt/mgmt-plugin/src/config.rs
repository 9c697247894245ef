use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mgmt_query::{AggregationPolicy, ChartType, DimensionAlgorithm, QueryConfig, TransformConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "mgmt.yaml";

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "mgmt-plugin")]
#[command(about = "Collects metrics from management endpoints.")]
#[command(version = "0.1")]
pub struct PluginArgs {
    /// Collection interval in seconds, as passed by the agent
    pub update_every: Option<u64>,

    /// Configuration file; the Netdata config directories are searched when absent
    #[arg(long = "config", env = "MGMT_PLUGIN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Directories handed over by the agent.
#[derive(Debug, Clone, Default)]
pub struct NetdataEnv {
    pub user_config_dir: Option<PathBuf>,
    pub stock_config_dir: Option<PathBuf>,
    pub update_every: Option<u64>,
}

impl NetdataEnv {
    pub fn from_environment() -> Self {
        Self {
            user_config_dir: env::var("NETDATA_USER_CONFIG_DIR").ok().map(PathBuf::from),
            stock_config_dir: env::var("NETDATA_STOCK_CONFIG_DIR").ok().map(PathBuf::from),
            update_every: env::var("NETDATA_UPDATE_EVERY")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

fn default_update_every() -> u64 {
    1
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_scale() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_dimension_name() -> String {
    String::from("{name}")
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Collection interval in seconds
    #[serde(default = "default_update_every")]
    pub update_every: u64,

    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Charts collected from every server
    #[serde(default)]
    pub common_charts: Vec<ChartConfig>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            update_every: default_update_every(),
            servers: Vec::new(),
            common_charts: Vec::new(),
        }
    }
}

/// One endpoint to collect from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Used in chart types, `mgmt_<name>`
    pub name: String,

    /// Base URL of the agent, e.g. `http://127.0.0.1:8778/jolokia`
    pub url: String,

    /// Per-request timeout (accepts human-readable durations like "5s", "500ms")
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Charts collected from this server only
    #[serde(default)]
    pub charts: Vec<ChartConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartClass {
    /// Fixed list of dimensions
    #[default]
    Default,
    /// One dimension per instance of a varying set
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChartConfig {
    #[serde(default)]
    pub class: ChartClass,

    /// Uniquely identifies the chart within its server
    pub id: String,

    pub title: String,

    pub units: String,

    /// Submenu on the dashboard
    #[serde(default)]
    pub family: String,

    #[serde(default)]
    pub priority: Option<i64>,

    #[serde(default)]
    pub chart_type: ChartType,

    #[serde(default)]
    pub dimension_algorithm: DimensionAlgorithm,

    /// Dimensions of a `default` chart
    #[serde(default)]
    pub dimensions: Vec<DimensionConfig>,

    /// Dimension template of a `dynamic` chart
    #[serde(default)]
    pub dimension_template: Option<DimensionTemplateConfig>,
}

/// A dimension of a `default` chart and the query feeding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub name: String,

    #[serde(default = "default_scale")]
    pub multiplier: i64,

    #[serde(default = "default_scale")]
    pub divisor: i64,

    #[serde(default)]
    pub hidden: bool,

    #[serde(flatten)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionTemplateConfig {
    #[serde(default = "default_scale")]
    pub multiplier: i64,

    #[serde(default = "default_scale")]
    pub divisor: i64,

    #[serde(default)]
    pub hidden: bool,

    /// Enumerates the instances; optional for the thread preset
    #[serde(default)]
    pub query_parameter: Option<QueryConfig>,

    /// Value of one instance, with the instance as `{}` argument
    pub value_query: QueryConfig,

    #[serde(default)]
    pub name_query: Option<NameQueryConfig>,

    /// How instances sharing a dimension are combined
    #[serde(default)]
    pub aggregation: AggregationPolicy,
}

/// Naming of dynamic dimensions.
///
/// Patterns are matched against the whole instance name, before rewriting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameQueryConfig {
    /// Object of the name query; instances are named after their key when absent
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub value: Option<String>,

    #[serde(default)]
    pub transform: Vec<TransformConfig>,

    #[serde(default)]
    pub include_pattern: Option<String>,

    #[serde(default)]
    pub exclude_pattern: Option<String>,

    #[serde(default)]
    pub rewrite_pattern: Option<String>,

    #[serde(default)]
    pub rewrite_pattern_replacement: String,

    #[serde(default = "default_true")]
    pub pattern_case_sensitive: bool,

    /// Dimension name, `{name}` and `{key}` are replaced
    #[serde(default = "default_dimension_name")]
    pub dimension_name: String,
}

impl NameQueryConfig {
    pub fn query(&self) -> Option<QueryConfig> {
        let from = self.from.as_ref()?;
        Some(QueryConfig {
            from: from.clone(),
            value: self.value.clone(),
            composite_data_key: None,
            transform: self.transform.clone(),
        })
    }
}

impl Default for NameQueryConfig {
    fn default() -> Self {
        Self {
            from: None,
            value: None,
            transform: Vec::new(),
            include_pattern: None,
            exclude_pattern: None,
            rewrite_pattern: None,
            rewrite_pattern_replacement: String::new(),
            pattern_case_sensitive: true,
            dimension_name: default_dimension_name(),
        }
    }
}

impl ModuleConfig {
    /// Load the configuration named on the command line, or the user config
    /// with the stock config as fallback.
    pub fn load(args: &PluginArgs, netdata_env: &NetdataEnv) -> Result<Self> {
        let mut config = if let Some(path) = &args.config {
            Self::from_yaml_file(path)?
        } else {
            let user_config = netdata_env
                .user_config_dir
                .as_ref()
                .map(|dir| dir.join(CONFIG_FILE_NAME))
                .filter(|path| path.exists())
                .and_then(|path| match Self::from_yaml_file(&path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::error!(
                            "failed to load user config from {}: {:#}. Falling back to stock config.",
                            path.display(),
                            e
                        );
                        None
                    }
                });

            if let Some(config) = user_config {
                config
            } else if let Some(stock_path) = netdata_env
                .stock_config_dir
                .as_ref()
                .map(|dir| dir.join(CONFIG_FILE_NAME))
            {
                Self::from_yaml_file(&stock_path)
                    .with_context(|| format!("loading stock config from {}", stock_path.display()))?
            } else {
                anyhow::bail!("no configuration file given and no configuration directories available");
            }
        };

        // the agent's interval is a lower bound
        let agent_update_every = args.update_every.or(netdata_env.update_every).unwrap_or(1);
        config.update_every = config.update_every.max(agent_update_every).max(1);

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: ModuleConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config file: {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, server) in self.servers.iter().enumerate() {
            if server.name.is_empty() {
                anyhow::bail!("server #{} has no name", i + 1);
            }
            if self.servers[..i].iter().any(|s| s.name == server.name) {
                anyhow::bail!("duplicate server name '{}'", server.name);
            }
            if !server.url.starts_with("http://") && !server.url.starts_with("https://") {
                anyhow::bail!("server '{}': url must be http(s), got: {}", server.name, server.url);
            }
            if server.timeout.is_zero() {
                anyhow::bail!("server '{}': timeout must not be zero", server.name);
            }
        }

        let charts = self
            .common_charts
            .iter()
            .chain(self.servers.iter().flat_map(|server| server.charts.iter()));
        for chart in charts {
            if let Some(dimension) = chart.dimensions.iter().find(|d| d.divisor == 0) {
                anyhow::bail!("chart '{}': dimension '{}' has a zero divisor", chart.id, dimension.name);
            }
            if chart.dimension_template.as_ref().is_some_and(|t| t.divisor == 0) {
                anyhow::bail!("chart '{}': dimension template has a zero divisor", chart.id);
            }
        }
        Ok(())
    }

    /// Common charts followed by the server's own charts.
    pub fn charts_of<'a>(&'a self, server: &'a ServerConfig) -> impl Iterator<Item = &'a ChartConfig> + 'a {
        self.common_charts.iter().chain(server.charts.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgmt_query::TransformArg;

    const SAMPLE: &str = r#"
update_every: 2
servers:
  - name: local
    url: http://127.0.0.1:8778/jolokia
    timeout: 750ms
common_charts:
  - id: memory
    title: Heap Memory
    units: KiB
    family: memory
    chart_type: stacked
    dimensions:
      - name: used
        divisor: 1024
        from: java.lang:type=Memory
        value: HeapMemoryUsage
        composite_data_key: used
      - name: committed
        divisor: 1024
        from: java.lang:type=Memory
        value: HeapMemoryUsage
        transform:
          - method: get
            args: [committed]
  - class: dynamic
    id: threads_cpu
    title: Thread CPU Time
    units: ms
    dimension_algorithm: incremental
    dimension_template:
      divisor: 1000000
      value_query:
        from: java.lang:type=Threading
        value: ThreadCpuTime
      name_query:
        exclude_pattern: "RMI .*"
        rewrite_pattern: "pool-\\d+-thread-\\d+"
        rewrite_pattern_replacement: pool
      aggregation: sum
"#;

    #[test]
    fn parses_full_config() {
        let config: ModuleConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.update_every, 2);

        let server = &config.servers[0];
        assert_eq!(server.timeout, Duration::from_millis(750));
        assert_eq!(config.charts_of(server).count(), 2);

        let memory = &config.common_charts[0];
        assert_eq!(memory.class, ChartClass::Default);
        assert_eq!(memory.chart_type, ChartType::Stacked);
        assert_eq!(memory.dimensions[0].divisor, 1024);
        assert_eq!(memory.dimensions[0].multiplier, 1);
        assert_eq!(memory.dimensions[0].query.composite_data_key.as_deref(), Some("used"));
        assert_eq!(
            memory.dimensions[1].query.transform[0].args,
            vec![TransformArg::Literal("committed".into())]
        );

        let threads = &config.common_charts[1];
        assert_eq!(threads.class, ChartClass::Dynamic);
        assert_eq!(threads.dimension_algorithm, DimensionAlgorithm::Incremental);
        let template = threads.dimension_template.as_ref().unwrap();
        assert!(template.query_parameter.is_none());
        let names = template.name_query.as_ref().unwrap();
        assert!(names.query().is_none());
        assert!(names.pattern_case_sensitive);
        assert_eq!(names.dimension_name, "{name}");
    }

    #[test]
    fn server_defaults() {
        let config: ModuleConfig = serde_yaml::from_str(
            "servers:\n  - name: app\n    url: https://app:8778/jolokia\n",
        )
        .unwrap();
        assert_eq!(config.update_every, 1);
        assert_eq!(config.servers[0].timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(serde_yaml::from_str::<ModuleConfig>("update_evry: 3\n").is_err());
    }

    #[test]
    fn rejects_bad_servers() {
        let mut config = ModuleConfig::default();
        config.servers.push(ServerConfig {
            name: "app".to_string(),
            url: "tcp://app:9010".to_string(),
            timeout: default_timeout(),
            charts: Vec::new(),
        });
        assert!(config.validate().is_err());

        config.servers[0].url = "http://app:8778/jolokia".to_string();
        config.servers.push(config.servers[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate server name"));
    }

    #[test]
    fn rejects_zero_divisors() {
        let mut config: ModuleConfig = serde_yaml::from_str(
            r#"
servers:
  - name: app
    url: http://app:8778/jolokia
    charts:
      - id: classes
        title: Classes
        units: classes
        dimensions:
          - name: loaded
            divisor: 0
            from: java.lang:type=ClassLoading
            value: LoadedClassCount
common_charts:
  - class: dynamic
    id: threads
    title: Threads
    units: ms
    dimension_template:
      divisor: 0
      value_query:
        from: java.lang:type=Threading
        value: ThreadCpuTime
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dimension template has a zero divisor"));

        config.common_charts[0].dimension_template.as_mut().unwrap().divisor = 1000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dimension 'loaded' has a zero divisor"));

        config.servers[0].charts[0].dimensions[0].divisor = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn name_query_with_object_builds_a_query() {
        let names: NameQueryConfig = serde_yaml::from_str(
            r#"
from: app:type=Pools
transform:
  - method: getDisplayName
    args: [{}]
dimension_name: "{name}_{key}"
"#,
        )
        .unwrap();
        let query = names.query().unwrap();
        assert_eq!(query.from, "app:type=Pools");
        assert_eq!(query.value, None);
        assert_eq!(query.transform[0].args, vec![TransformArg::Placeholder]);
    }
}
