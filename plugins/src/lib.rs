pub mod backend;
pub mod executor;
pub mod factory;
pub mod runner;
pub mod topology;

#[cfg(test)]
mod test_support;

pub use factory::PluginBackendFactory;
