use std::num::ParseIntError;
use thiserror::Error;

/// Errors raised while reading configuration or synthesizing a job
///
/// None of these can be fixed by retrying: they describe input that will keep failing
/// until someone edits the offending object.
#[derive(Error, Debug)]
pub enum Error {
    /// A required key of the cluster-wide configuration is absent or empty
    #[error("configuration key {0:?} is missing or empty")]
    MissingConfigKey(&'static str),

    /// The function timeout is not an integer number of seconds
    #[error("unable to convert {value:?} to a valid timeout: {source}")]
    InvalidTimeout {
        /// The raw timeout string of the function
        value: String,
        /// The parse failure
        #[source]
        source: ParseIntError,
    },

    /// The trigger payload could not be encoded as JSON
    #[error("failed to serialize the trigger payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// An object lacks a metadata field needed to build the job
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),
}
