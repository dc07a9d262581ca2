pub mod classifier;
pub mod constants;
pub mod errors;
pub mod handle_registry;
pub mod helpers;
pub mod ipam;
pub mod parser;
pub mod precheck;
pub mod public_api;
pub mod record;
pub mod telemetry;
pub mod trie;
pub mod types;

pub use crate::classifier::{classify, Classification};
pub use crate::errors::{Error, ErrorCode};
pub use crate::ipam::Ipam;
pub use crate::parser::{Allocation, IpRange, Kind};
pub use crate::precheck::{Precheck, Reason, Rejection, Verdict};
pub use crate::record::PrefixRecord;
pub use crate::trie::AllocationTrie;
pub use crate::types::{Family, Flags, NetKey, Span};

use once_cell::sync::OnceCell;

/// Installs `env_logger` once (timestamps off, filter from `RUST_LOG`).
///
/// A logger installed earlier by the host wins; this call is then a no-op.
pub fn init_logging() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = env_logger::builder()
            .format_timestamp(None)
            .is_test(std::env::var("RUST_TEST_THREADS").is_ok())
            .try_init();
    });
}
