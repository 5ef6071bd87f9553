//! Curator Telemetry - error rows and webhook forwarding
//!
//! The taxonomy front-end the rest of the server reports failures through:
//! every report appends an `ErrorLog` row, and rows matching the configured
//! severity/category filters are forwarded to a Slack webhook. Reporting is
//! never fatal; a failure to record or forward is itself only traced.

pub mod reporter;
pub mod webhook;

pub use reporter::ErrorReporter;
pub use webhook::SlackNotifier;
