//! The engine of `ratchet`: reading upgrade files into a graph of patch
//! segments, choosing a path through it, and interpreting and executing the
//! commands of each segment so that an interrupted run can be resumed.
pub mod assert;
pub mod connection;
pub mod context;
pub mod control;
pub mod directive;
pub mod error;
pub mod listener;
pub mod processor;
pub mod source;
pub mod upgrade;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

pub use assert::AssertListener;
pub use connection::Databases;
pub use processor::{CommandProcessor, Interrupt, SegmentOutcome, UpgradeOptions};

pub mod future {
    pub use futures_core::future::{BoxFuture, Future};
}
