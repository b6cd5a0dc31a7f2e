//! rwgate-file: file access guarded by an rwgate coordinator
//!
//! A [`FileHandle`] wraps a client and takes the matching grant around every
//! read, write and unlink.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod error;
mod handle;

pub use error::FileError;
pub use handle::{AccessWindow, FileHandle};
pub use rwgate_core::AccessMode;
