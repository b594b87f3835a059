//! Data acquisition: upstream sources, schema mapping, and the frame cache.

pub mod augmento;
pub mod bitmex;
pub mod cache;
pub mod circuit_breaker;
pub mod http;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod synthetic;

pub use augmento::{ApiSummary, AugmentoProvider, CategorizedTopics};
pub use bitmex::BitmexProvider;
pub use cache::{read_parquet, write_parquet, CacheMeta, FrameCache};
pub use circuit_breaker::CircuitBreaker;
pub use provider::{CancelToken, WindowSource};
pub use retry::RetryPolicy;
pub use schema::{FieldTable, RequestMeta, SchemaMapper};
pub use synthetic::SyntheticSource;
