//! Centralized error type for the outboard umbrella crate.
//!
//! Wraps the bridge error so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Bridge(#[from] outboard_bridge::BridgeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
