//! Test suites for the query server.

mod behaviour;
pub(crate) mod support;
mod views;
