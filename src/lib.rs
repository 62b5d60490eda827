//! `ratchet` upgrades a database along a graph of versions described by one
//! annotated SQL patch file, recording its progress in the database so that
//! an interrupted or failed run continues where it stopped.
//!
//! ```text
//! --* DEFINITION
//! --*   SETUP "" --> "1.0"
//! --*   UPGRADE "1.0" --> "1.1"
//! --* END DEFINITION
//!
//! --* SETUP "" --> "1.0"
//! CREATE TABLE users (id int PRIMARY KEY)
//! GO
//! --* END SETUP
//!
//! --* UPGRADE "1.0" --> "1.1"
//! ALTER TABLE users ADD name varchar(100)
//! GO
//! --* END UPGRADE
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

mod app;
pub use app::{HistoryReport, Ratchet, Report, SegmentResult};

pub use ratchet_core::{
    AssertListener, CommandProcessor, Databases, Interrupt, SegmentOutcome, UpgradeOptions,
};
pub use ratchet_core::{
    assert, connection, context, control, directive, error, listener, processor, source, upgrade,
};

pub use ratchet_core::context::Executor;
pub use ratchet_core::upgrade::{Target, UpgradeFile};

pub mod future {
    pub use futures_core::future::{BoxFuture, Future};
}

/// Database backends for the default connection and named connections.
pub mod executor {
    pub use ratchet_executor::*;
}
