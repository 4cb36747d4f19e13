//! Job lifecycle management with event fan-out and buffered replay.
//!
//! This module is the control plane for background generation work:
//!
//! - **JobRegistry**: creates and looks up jobs by stable key, owns their
//!   lifecycle and event logs
//! - **Job events**: typed progressive output with a terminal marker
//! - **Task runner**: drives a producer stream to completion exactly once
//!   per key
//!
//! # Architecture
//!
//! ```text
//!   request ──► JobRegistry ──► create_or_attach(key)
//!                   │
//!                   ├── new?  spawn runner ──► producer stream ──► push_event
//!                   │
//!                   └── attach: buffered replay + live subscription
//! ```
//!
//! Every subscriber first receives the buffered log, then live events as they
//! are produced, until the job reaches a terminal state. Disconnecting
//! subscribers never affect the job; reconnecting ones replay from the
//! beginning.
//!
//! # Example
//!
//! ```rust,ignore
//! use wiki_forge::jobs::{runner, JobRegistry};
//!
//! let registry = JobRegistry::new();
//! let outcome = runner::start(&registry, "wiki:acme/widgets", || producer);
//! let mut stream = registry.attach_stream("wiki:acme/widgets").unwrap();
//! while let Some(event) = stream.next_event().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod event;
pub mod job;
pub mod registry;
pub mod runner;

pub use event::{JobEvent, PageRef};
pub use job::{JobHandle, JobStatus, SubscriberFn, DEFAULT_EVENT_CAPACITY};
pub use registry::{Attach, JobRegistry, JobStream, Subscription};
pub use runner::StartOutcome;
