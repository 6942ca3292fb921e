//! Runtime system
//!
//! This module contains task scheduling and the delay timer.

pub mod scheduler;
