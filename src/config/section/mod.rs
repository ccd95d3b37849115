//! Configuration section definitions.

mod http;
mod resource;
mod runtime;
mod serve;

pub use http::HttpConfig;
pub use resource::ResourceConfig;
pub use runtime::ExecutionConfig;
pub use serve::ServeConfig;
