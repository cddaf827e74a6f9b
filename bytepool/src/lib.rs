//! Reuse byte buffers with a self-tuning pool.
//!
//! # Overview
//!
//! [Buffer] is a growable byte buffer with separate read and write cursors. Small buffers live
//! in an inline slot and spill to the heap on demand. Consumed prefixes are reclaimed by
//! compaction before the buffer grows.
//!
//! [Pool] caches released [Buffer]s in power-of-two size classes and hands out the one that best
//! fits a time-decayed estimate of how many bytes callers write. An optional background thread
//! periodically drains the pool and moves the largest retained capacity to track the workload,
//! so memory held by the pool shrinks when traffic does.
//!
//! # Example
//!
//! ```
//! use commonware_bytepool::{Config, Pool};
//! use prometheus_client::registry::Registry;
//!
//! let mut registry = Registry::default();
//! let pool = Pool::new(Config::default(), &mut registry);
//!
//! // Write into a pooled buffer
//! let mut buffer = pool.acquire();
//! buffer.write(b"hello").unwrap();
//!
//! // Drain it into a sink
//! let mut sink = Vec::new();
//! buffer.write_to(&mut sink).unwrap();
//! assert_eq!(sink, b"hello");
//!
//! // Return it so the next caller can reuse it
//! pool.release(buffer);
//! assert_eq!(pool.entries(), 1);
//! ```
//!
//! # Status
//!
//! `commonware-bytepool` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

mod buffer;
pub use buffer::{Buffer, INLINE_CAPACITY};
mod error;
pub use error::Error;
pub mod pool;
pub use pool::{Admission, Config, Pool, Usage};
