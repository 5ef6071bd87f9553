//! Curator Transfer - byte movers
//!
//! Implements the two transfer-manager capability sets:
//! - [`LocalCopyManager`] - the synchronous reference (blocking file copy),
//!   used for client ingest and intra-server clones
//! - [`CopyTransport`] - asynchronous plain file-copy fallback, for peers
//!   sharing a filesystem view and for tests
//! - [`ShellTransport`] - asynchronous argv-template transport (e.g. rsync
//!   over SSH), one child process per path pair
//!
//! Managers are selected by tag; [`select_async_manager`] resolves the tag
//! from a store's configuration.

pub mod local_copy;
pub mod shell;
mod tracker;
pub mod transport;

pub use local_copy::LocalCopyManager;
pub use shell::ShellTransport;
pub use transport::CopyTransport;

use std::sync::Arc;

use curator_core::config::AsyncTransferManagerData;
use curator_core::ports::IAsyncTransferManager;

/// Resolves a store's async transfer manager from its configuration tag
///
/// The configuration was validated at startup, so an unknown tag here is a
/// wiring bug rather than an operator mistake.
pub fn select_async_manager(
    data: &AsyncTransferManagerData,
) -> anyhow::Result<Arc<dyn IAsyncTransferManager>> {
    match data.transfer_manager_type.as_str() {
        "copy" => Ok(Arc::new(CopyTransport::new())),
        "shell" => Ok(Arc::new(ShellTransport::new(data.shell_argv.clone())?)),
        other => anyhow::bail!("unknown asynchronous transfer manager tag: {other}"),
    }
}
