//! Application runtime composition modules.

pub(crate) mod commands;
pub(crate) mod config;
pub(crate) mod context;
pub(crate) mod exit;
pub(crate) mod progress;
