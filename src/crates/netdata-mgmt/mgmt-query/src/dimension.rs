//! Charts and dimensions shared between updaters and the output layer.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::error::{CollectorError, Result};

/// Chart type supported by Netdata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Line,
    Area,
    Stacked,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Stacked => "stacked",
        }
    }
}

/// Dimension algorithm for value processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionAlgorithm {
    /// Store the value as-is
    #[default]
    Absolute,
    /// Calculate difference from previous value (for counters)
    Incremental,
    /// Calculate percentage of dimension relative to row total
    PercentageOfAbsoluteRow,
    /// Calculate percentage of dimension relative to incremental row
    PercentageOfIncrementalRow,
}

impl DimensionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionAlgorithm::Absolute => "absolute",
            DimensionAlgorithm::Incremental => "incremental",
            DimensionAlgorithm::PercentageOfAbsoluteRow => "percentage-of-absolute-row",
            DimensionAlgorithm::PercentageOfIncrementalRow => "percentage-of-incremental-row",
        }
    }
}

impl fmt::Display for DimensionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single time series of a chart.
///
/// Values written by the stores are already scaled by `multiplier` and
/// `divisor`. `resolution` is the extra factor applied to fractional sources
/// and is what the output layer declares as divisor.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    /// Dimension ID (used in SET commands)
    pub id: String,
    /// Display name (shown in UI)
    pub name: String,
    pub algorithm: DimensionAlgorithm,
    pub multiplier: i64,
    pub divisor: i64,
    pub hidden: bool,
    resolution: i64,
    current_value: Option<i64>,
}

impl Dimension {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            algorithm: DimensionAlgorithm::default(),
            multiplier: 1,
            divisor: 1,
            hidden: false,
            resolution: 1,
            current_value: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_algorithm(mut self, algorithm: DimensionAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_scale(mut self, multiplier: i64, divisor: i64) -> Self {
        self.multiplier = multiplier;
        self.divisor = divisor;
        self
    }

    pub fn current_value(&self) -> Option<i64> {
        self.current_value
    }

    pub fn set_current_value(&mut self, value: Option<i64>) {
        self.current_value = value;
    }

    pub fn clear(&mut self) {
        self.current_value = None;
    }

    pub fn resolution(&self) -> i64 {
        self.resolution
    }

    pub fn set_resolution(&mut self, resolution: i64) {
        self.resolution = resolution.max(1);
    }

    /// `raw * multiplier / divisor`, saturating at the `i64` bounds.
    pub fn scale(&self, raw: i64) -> i64 {
        let divisor = if self.divisor == 0 { 1 } else { self.divisor };
        let scaled = i128::from(raw) * i128::from(self.multiplier) / i128::from(divisor);
        scaled.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// `round(raw * multiplier * resolution / divisor)`.
    pub fn scale_fractional(&self, raw: f64) -> i64 {
        let divisor = if self.divisor == 0 { 1 } else { self.divisor };
        (raw * self.multiplier as f64 * self.resolution as f64 / divisor as f64).round() as i64
    }
}

/// Shared handle to a dimension owned by a chart.
#[derive(Clone)]
pub struct DimensionHandle(Arc<RwLock<Dimension>>);

impl DimensionHandle {
    pub fn new(dimension: Dimension) -> Self {
        Self(Arc::new(RwLock::new(dimension)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Dimension> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Dimension> {
        self.0.write()
    }

    pub fn id(&self) -> String {
        self.0.read().id.clone()
    }

    pub fn current_value(&self) -> Option<i64> {
        self.0.read().current_value
    }

    pub fn clear(&self) {
        self.0.write().clear();
    }

    /// Whether both handles point to the same dimension.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DimensionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0.read(), f)
    }
}

/// A chart and its dimensions, in declaration order.
#[derive(Debug, Clone)]
pub struct Chart {
    /// Chart type part of the full id (`type.id`)
    pub type_id: String,
    pub id: String,
    pub name: String,
    pub title: String,
    pub units: String,
    pub family: String,
    /// Context for alerts and API
    pub context: String,
    pub chart_type: ChartType,
    /// Priority for ordering (lower = higher priority)
    pub priority: i64,
    /// Update interval in seconds
    pub update_every: u64,
    dimensions: Vec<DimensionHandle>,
}

impl Chart {
    pub fn new(type_id: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            type_id: type_id.into(),
            name: String::new(),
            title: id.clone(),
            context: id.clone(),
            id,
            units: String::from("value"),
            family: String::new(),
            chart_type: ChartType::default(),
            priority: 1000,
            update_every: 1,
            dimensions: Vec::new(),
        }
    }

    /// `type.id`, the identifier used by the protocol.
    pub fn full_id(&self) -> String {
        format!("{}.{}", self.type_id, self.id)
    }

    pub fn dimensions(&self) -> &[DimensionHandle] {
        &self.dimensions
    }

    pub fn dimension(&self, id: &str) -> Option<DimensionHandle> {
        self.dimensions.iter().find(|d| d.read().id == id).cloned()
    }

    pub fn add_dimension(&mut self, dimension: DimensionHandle) -> Result<()> {
        let id = dimension.id();
        if self.dimension(&id).is_some() {
            return Err(CollectorError::config(format!(
                "duplicate dimension id '{id}' in chart '{}'",
                self.full_id()
            )));
        }
        self.dimensions.push(dimension);
        Ok(())
    }
}

/// Shared handle to a chart.
#[derive(Debug, Clone)]
pub struct ChartHandle(Arc<RwLock<Chart>>);

impl ChartHandle {
    pub fn new(chart: Chart) -> Self {
        Self(Arc::new(RwLock::new(chart)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Chart> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Chart> {
        self.0.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_scaling() {
        let dim = Dimension::new("heap").with_scale(1, 1024);
        assert_eq!(dim.scale(4096), 4);
        assert_eq!(dim.scale(1023), 0);

        let dim = Dimension::new("ms").with_scale(1000, 1);
        assert_eq!(dim.scale(i64::MAX), i64::MAX);
    }

    #[test]
    fn fractional_scaling_uses_resolution() {
        let mut dim = Dimension::new("load").with_scale(3, 2);
        dim.set_resolution(100);
        // 1.234 * 3 * 100 / 2 = 185.1
        assert_eq!(dim.scale_fractional(1.234), 185);
    }

    #[test]
    fn dimension_ids_are_unique_per_chart() {
        let mut chart = Chart::new("mgmt_local", "memory");
        chart.add_dimension(DimensionHandle::new(Dimension::new("used"))).unwrap();
        let err = chart.add_dimension(DimensionHandle::new(Dimension::new("used")));
        assert!(err.is_err());
        assert_eq!(chart.dimensions().len(), 1);
        assert_eq!(chart.full_id(), "mgmt_local.memory");
    }

    #[test]
    fn handles_share_state() {
        let handle = DimensionHandle::new(Dimension::new("a"));
        let other = handle.clone();
        handle.write().set_current_value(Some(3));
        assert_eq!(other.current_value(), Some(3));
        assert!(handle.ptr_eq(&other));
        other.clear();
        assert_eq!(handle.current_value(), None);
    }

    #[test]
    fn algorithm_names() {
        let parsed: DimensionAlgorithm = serde_json::from_str("\"percentage-of-incremental-row\"").unwrap();
        assert_eq!(parsed, DimensionAlgorithm::PercentageOfIncrementalRow);
        assert_eq!(parsed.as_str(), "percentage-of-incremental-row");
    }
}
