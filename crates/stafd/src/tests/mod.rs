//! Test suites for the automation daemon.

mod lib_api;
mod support;
mod unit;
