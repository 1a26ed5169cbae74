// src/lib.rs
// Main library module declarations

pub mod chain;
pub mod config;
pub mod domain;
pub mod protocol;
pub mod trading;
