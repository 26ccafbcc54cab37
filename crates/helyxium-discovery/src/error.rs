//! Fatal discovery errors
//!
//! Individual probe failures never surface here; they are recorded as
//! [`helyxium_core::ProbeOutcome`]s on the snapshot instead.

use helyxium_core::{Target, UnknownProbe};
use thiserror::Error;

use crate::context::Os;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("no {target} probes available on {os}")]
    EmptyChain { target: Target, os: Os },

    #[error("unsupported host operating system: {0}")]
    UnsupportedOs(String),

    #[error(transparent)]
    UnknownProbe(#[from] UnknownProbe),

    #[error("refresh cycle cancelled")]
    Cancelled,

    #[error("invalid monitor configuration: {0}")]
    InvalidConfig(String),
}
