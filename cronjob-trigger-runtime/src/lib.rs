//! Runtime of the kubeless cronjob trigger controller
//!
//! This crate keeps a `CronJob` in sync with every `CronJobTrigger` in the cluster.
//!
//! Changes to triggers and functions are cached by [`cache::informer`]s and turned into
//! `namespace/name` keys on a deduplicating [`WorkQueue`]. A pool of workers pulls keys off
//! the queue and hands them to the [`reconciler`], which guards every trigger with a
//! [`finalizer`] and creates or updates its cron job. Deleting a function deletes the triggers
//! calling it, see [`cleanup`].
//!
//! Newcomers should get started with the [`Controller`], which wires all of this together.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![deny(clippy::all)]

pub mod cache;
pub mod cleanup;
pub mod client;
pub mod controller;
pub mod events;
pub mod finalizer;
pub mod queue;
pub mod reconciler;

#[cfg(test)]
mod test_utils;

pub use cache::{informer, ObjectKey, Store};
pub use client::{ClusterApi, KubeClusterApi};
pub use controller::Controller;
pub use queue::WorkQueue;
