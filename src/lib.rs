//! Coreactor: a cooperative, timer-driven reactor for multi-process control systems.
//!
//! # Overview
//!
//! Coreactor gives a control system split across OS processes (one process
//! running the machine control logic, one or more auxiliary processes such as
//! a UI) cooperative concurrency on a single thread per process:
//! deadline-ordered timer dispatch, blocking-style control flow without a
//! preemptive scheduler, and a safe cross-thread / cross-process
//! callback-delivery mechanism built on the self-pipe trick.
//!
//! # Core guarantees
//!
//! - **One active task**: at most one logical task executes at any instant in
//!   a process; switching happens only at explicit [`Reactor::pause`] points.
//! - **Registration-order ticks**: timers due in the same dispatch cycle fire
//!   in registration order, not deadline order. Same-tick lifecycle sequences
//!   may rely on this; it is a documented, tested contract.
//! - **Thin loop**: the dispatch loop never swallows handler errors. The
//!   first error stops the loop and is returned from [`Reactor::run`]; a
//!   supervising layer decides whether to shut down or re-enter the loop.
//! - **No shared mutable state across processes**: peers exchange serialized
//!   [`Envelope`] values over pipes; wake bytes carry no payload and coalesce
//!   freely.
//!
//! # Module structure
//!
//! - [`types`]: time and identifier types ([`Time`], [`ProcessId`], handles)
//! - [`clock`]: per-process monotonic clock
//! - [`reactor`]: the dispatch loop, fd registry, pause, and lifecycle
//! - [`sync`]: cooperative primitives ([`Completion`], [`ReactorMutex`])
//! - [`ipc`]: mailbox, peer links, command dispatch, reply correlation
//! - [`config`]: configuration and builder
//! - [`error`]: error types
//!
//! Internal modules (timer store, execution contexts, event registry) hang
//! their behavior off [`Reactor`] methods.
//!
//! # Example
//!
//! ```ignore
//! use coreactor::{Reactor, ReactorBuilder, Time};
//!
//! let reactor = ReactorBuilder::new().process_name("control").build()?;
//! reactor.register_timer(Time::NOW, |r: &Reactor, _eventtime| {
//!     r.end();
//!     Ok(Time::NEVER)
//! });
//! reactor.run()?;
//! reactor.finalize();
//! # Ok::<(), coreactor::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod clock;
pub mod config;
mod context;
pub mod error;
mod events;
pub mod ipc;
pub mod reactor;
pub mod sync;
mod timer;
pub mod types;

pub use config::{MaintenanceConfig, ReactorBuilder, ReactorConfig};
pub use error::{Error, Result};
pub use ipc::wire::{Command, Envelope};
pub use ipc::PeerLink;
pub use reactor::{MaintenanceTier, Reactor};
pub use sync::completion::Completion;
pub use sync::mutex::{MutexGuard, ReactorMutex};
pub use types::{FdHandle, ProcessId, Time, TimerHandle};
