//! Adapter implementations

pub mod ip;
