//! Cooperative synchronization primitives.
//!
//! Both primitives here are built from `pause` and resume-timer pokes; they
//! coordinate logical tasks sharing one loop, not OS threads racing on
//! memory. [`Completion`](completion::Completion) is a single-assignment,
//! multi-waiter result slot; [`ReactorMutex`](mutex::ReactorMutex) is a
//! strictly FIFO lock for serializing logical sections.

pub mod completion;
pub mod mutex;
