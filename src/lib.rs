#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths, unreachable_pub)]
#![warn(
    missing_docs,
    clippy::doc_link_with_quotes,
    clippy::doc_markdown,
    clippy::missing_errors_doc
)]

mod column;
pub mod config;
mod env;
pub mod error;
mod factory;
mod metrics;
mod observer;
mod pool;
pub mod reexport;

pub use self::{
    column::{Column, NotificationType, ObservedColumn},
    config::{ObserverConfig, ObserverEntry, ObserversConfig, ObserversConfigBuilder},
    env::{Environment, Resolved},
    error::{ConfigurationError, Error},
    factory::{ObserverFactories, ObserverFactory, ObserverRegistration},
    metrics::PoolState,
    observer::{BoxError, Observer, ObserverContext},
    pool::{ObserverPool, PooledObserver},
};
