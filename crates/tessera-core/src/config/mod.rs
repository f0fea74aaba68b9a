pub mod dispatcher;
pub mod store;

pub use dispatcher::DispatcherConfig;
pub use store::{ProjectionStoreConfig, SynchronousMode};
