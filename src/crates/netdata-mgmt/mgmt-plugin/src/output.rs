//! Netdata external plugin protocol.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use mgmt_query::{Chart, Dimension};

/// Writer for the chart protocol into a reusable buffer.
pub struct ChartWriter {
    buffer: BytesMut,
}

impl ChartWriter {
    /// Create a new chart writer with default capacity (4KB)
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Write a chart definition (CHART + DIMENSION commands)
    pub fn write_chart_definition(&mut self, chart: &Chart) {
        self.buffer.put_slice(b"CHART ");
        self.buffer.put_slice(chart.type_id.as_bytes());
        self.buffer.put_u8(b'.');
        self.buffer.put_slice(chart.id.as_bytes());
        self.buffer.put_slice(b" '");
        self.buffer.put_slice(chart.name.as_bytes());
        self.buffer.put_slice(b"' '");
        self.buffer.put_slice(chart.title.as_bytes());
        self.buffer.put_slice(b"' '");
        self.buffer.put_slice(chart.units.as_bytes());
        self.buffer.put_slice(b"' '");
        self.buffer.put_slice(chart.family.as_bytes());
        self.buffer.put_slice(b"' '");
        self.buffer.put_slice(chart.context.as_bytes());
        self.buffer.put_slice(b"' ");
        self.buffer.put_slice(chart.chart_type.as_str().as_bytes());
        self.buffer.put_u8(b' ');
        self.write_i64(chart.priority);
        self.buffer.put_u8(b' ');
        self.write_u64(chart.update_every);
        self.buffer.put_u8(b'\n');

        for dim in chart.dimensions() {
            self.write_dimension_definition(&dim.read());
        }
    }

    /// Values are scaled before they reach the output, only the resolution
    /// of fractional sources is left for the agent to divide.
    fn write_dimension_definition(&mut self, dim: &Dimension) {
        self.buffer.put_slice(b"DIMENSION ");
        self.buffer.put_slice(dim.id.as_bytes());
        self.buffer.put_slice(b" '");
        self.buffer.put_slice(dim.name.as_bytes());
        self.buffer.put_slice(b"' ");
        self.buffer.put_slice(dim.algorithm.as_str().as_bytes());
        self.buffer.put_slice(b" 1 ");
        self.write_i64(dim.resolution());

        if dim.hidden {
            self.buffer.put_slice(b" hidden");
        }

        self.buffer.put_u8(b'\n');
    }

    /// Begin a chart update (BEGIN command)
    pub fn begin_chart(&mut self, chart_id: &str, update_every: Duration) {
        self.buffer.put_slice(b"BEGIN ");
        self.buffer.put_slice(chart_id.as_bytes());
        self.buffer.put_u8(b' ');
        // Netdata expects microseconds
        self.write_u64(update_every.as_micros() as u64);
        self.buffer.put_u8(b'\n');
    }

    /// Write a dimension value (SET command)
    pub fn write_dimension(&mut self, dimension_id: &str, value: i64) {
        self.buffer.put_slice(b"SET ");
        self.buffer.put_slice(dimension_id.as_bytes());
        self.buffer.put_slice(b" = ");
        self.write_i64(value);
        self.buffer.put_u8(b'\n');
    }

    /// End a chart update (END command)
    pub fn end_chart(&mut self, collection_time: SystemTime) {
        self.buffer.put_slice(b"END ");
        // Netdata expects Unix timestamp in seconds
        let secs = collection_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        self.write_u64(secs);
        self.buffer.put_u8(b'\n');
    }

    #[inline]
    fn write_i64(&mut self, value: i64) {
        let mut buf = itoa::Buffer::new();
        self.buffer.put_slice(buf.format(value).as_bytes());
    }

    #[inline]
    fn write_u64(&mut self, value: u64) {
        let mut buf = itoa::Buffer::new();
        self.buffer.put_slice(buf.format(value).as_bytes());
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Take everything written so far, leaving the writer empty.
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }
}

impl Default for ChartWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Prints chart values, emitting definitions for charts and dimensions the
/// agent has not seen yet.
#[derive(Default)]
pub struct ChartPrinter {
    writer: ChartWriter,
    known_dimension_ids_by_chart: HashMap<String, HashSet<String>>,
}

impl ChartPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the whole definition again when the chart is new or gained
    /// dimensions since the last time.
    pub fn ensure_chart_initialized(&mut self, chart: &Chart) {
        let full_id = chart.full_id();
        let ids: Vec<String> = chart.dimensions().iter().map(|d| d.id()).collect();

        let up_to_date = self
            .known_dimension_ids_by_chart
            .get(&full_id)
            .is_some_and(|known| ids.iter().all(|id| known.contains(id)));
        if up_to_date {
            return;
        }

        tracing::debug!("defining chart {} with {} dimensions", full_id, ids.len());
        self.writer.write_chart_definition(chart);
        self.known_dimension_ids_by_chart
            .entry(full_id)
            .or_default()
            .extend(ids);
    }

    /// Emit the values of `chart`. Dimensions without a value are left out.
    pub fn print_values(&mut self, chart: &Chart, collection_time: SystemTime) {
        self.ensure_chart_initialized(chart);

        self.writer
            .begin_chart(&chart.full_id(), Duration::from_secs(chart.update_every));
        for dim in chart.dimensions() {
            let dim = dim.read();
            if let Some(value) = dim.current_value() {
                self.writer.write_dimension(&dim.id, value);
            }
        }
        self.writer.end_chart(collection_time);
    }

    /// Take the protocol text printed since the last call.
    pub fn take(&mut self) -> Bytes {
        self.writer.take()
    }
}
