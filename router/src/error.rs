use crate::thread_pool::PoolError;
use eda_common::db::indices::NetId;
use eda_common::util::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),
    #[error("worker pool failure: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to build routing thread pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("routing task panicked: {0}")]
    TaskPanicked(String),
    #[error("routing resources are still held by in-flight tasks")]
    ResourcesBusy,
    #[error("{} net(s) cannot reach a sink even with a full-device bounding box: {nets:?}", nets.len())]
    Unroutable { nets: Vec<NetId> },
}
