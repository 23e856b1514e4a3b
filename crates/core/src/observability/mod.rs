//! Observability sinks for engine metrics
//!
//! The engine never talks to a metrics backend directly. Executors, circuit
//! breakers and groups report through the [`MetricsCollector`] trait; pick a
//! sink per executor:
//!
//! - [`NoOpMetricsCollector`]: default, discards everything
//! - [`InMemoryMetricsCollector`]: keeps samples for tests and inspection
//! - `PrometheusMetricsCollector` (feature `prometheus`): registers vectors
//!   in a `prometheus::Registry`

pub mod memory;
#[cfg(feature = "prometheus")]
pub mod prometheus;
pub mod traits;

pub use memory::InMemoryMetricsCollector;
#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusMetricsCollector;
pub use traits::{MetricsCollector, NoOpMetricsCollector};
