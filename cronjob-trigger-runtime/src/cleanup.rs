//! Deletes triggers whose function has been deleted
//!
//! A failed cascade is retried with backoff by the [`Controller`](crate::Controller).
use crate::{
    client::{is_not_found, ClusterApi},
    events::ObjectEvent,
};
use cronjob_trigger_core::Function;
use kube::ResourceExt;
use thiserror::Error;

/// Failure of a cascading cleanup
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to list triggers in {namespace}: {source}")]
    ListTriggers {
        namespace: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to delete {} of the triggers of function {namespace}/{function}", .failed.len())]
    DeleteTriggers {
        namespace: String,
        function: String,
        /// Name and error of every trigger that could not be deleted
        failed: Vec<(String, kube::Error)>,
    },
}

/// Reacts to function changes
///
/// Additions and updates are only logged, there is nothing to reconcile for them. When a
/// function is deleted, every trigger in its namespace that calls it is deleted as well, and
/// their own finalizers take care of the cron jobs.
#[derive(Clone)]
pub struct FunctionEventHandler<C> {
    client: C,
}

impl<C: ClusterApi> FunctionEventHandler<C> {
    /// Handler deleting through `client`
    #[must_use]
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Handle a single change of the function cache
    ///
    /// # Errors
    ///
    /// Fails if the triggers cannot be listed, or if deleting any of them fails for a
    /// reason other than it being gone already. Deletion is attempted for every matching
    /// trigger before failing.
    pub async fn handle(&self, event: ObjectEvent<Function>) -> Result<(), Error> {
        match event {
            ObjectEvent::Added(function) => {
                tracing::debug!(function = %function.name_any(), "function added");
                Ok(())
            }
            ObjectEvent::Updated { new, .. } => {
                tracing::debug!(function = %new.name_any(), "function updated");
                Ok(())
            }
            ObjectEvent::Deleted(deleted) => {
                let key = deleted.key();
                self.delete_triggers_of(&key.namespace, &key.name).await
            }
        }
    }

    /// Delete every trigger in `namespace` calling `function`
    ///
    /// Safe to call again after a failure, triggers that are already gone are skipped.
    ///
    /// # Errors
    ///
    /// See [`FunctionEventHandler::handle`].
    pub async fn delete_triggers_of(&self, namespace: &str, function: &str) -> Result<(), Error> {
        let triggers = self
            .client
            .list_triggers(namespace)
            .await
            .map_err(|source| Error::ListTriggers {
                namespace: namespace.to_string(),
                source,
            })?;

        let mut failed = Vec::new();
        for trigger in triggers.iter().filter(|t| t.spec.function_name == function) {
            let name = trigger.name_any();
            match self.client.delete_trigger(namespace, &name).await {
                Ok(()) => tracing::info!(%namespace, %function, trigger = %name, "deleted trigger of deleted function"),
                Err(err) if is_not_found(&err) => {}
                Err(err) => failed.push((name, err)),
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::DeleteTriggers {
                namespace: namespace.to_string(),
                function: function.to_string(),
                failed,
            })
        }
    }
}
