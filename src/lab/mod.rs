//! Deterministic test harness.
//!
//! [`LabTaskRunner`] replaces the worker pool in tests: tasks run on the
//! calling thread in an order chosen by a seeded generator, so a failing
//! interleaving can be replayed from its seed.

pub mod runner;

pub use runner::LabTaskRunner;
