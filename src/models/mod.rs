//! Domain model module declarations.

pub mod job;
