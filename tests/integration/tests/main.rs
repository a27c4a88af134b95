//! End-to-End Integration Tests
//!
//! These tests run the service provider on an ephemeral port and play the
//! identity provider's part with the fixture keys.

mod common;
mod endpoints;
mod login_flow;
mod logout_flow;
