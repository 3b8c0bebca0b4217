//! Kernel Unit Tests Module
//!
//! Scenario tests across the heap and the process manager.

pub(crate) mod support;

mod memory_tests;
