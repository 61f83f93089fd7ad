//! Types and pure logic shared by the cronjob trigger controller
//!
//! This crate holds everything that can be computed without talking to the API server:
//! the [`CronJobTrigger`] and [`Function`] resources, the cluster-wide [`ControllerConfig`],
//! and the synthesis of the desired [`CronJob`](k8s_openapi::api::batch::v1::CronJob)
//! for a trigger in [`job`].
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub use config::ControllerConfig;

mod error;
pub use error::Error;

pub mod job;
pub use job::desired_cron_job;

pub mod labels;

mod resource;
pub use resource::{CronJobTrigger, CronJobTriggerSpec, Function, FunctionSpec};

/// Convient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
