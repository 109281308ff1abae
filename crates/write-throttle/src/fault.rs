//! Deliberate process fault.
//!
//! Used to check that a host isolates or recovers from a plugin that takes
//! the whole process down. The write lands one slot past a fixed canary
//! buffer; the bounds check catches it and the process aborts. Aborting
//! skips unwinding, so neither `catch_unwind` nor the host's panic hooks can
//! swallow the fault.

use tracing::error;

const CANARY_LEN: usize = 20;

/// Corrupt the canary and abort. Never returns.
pub(crate) fn trigger() -> ! {
    let mut canary = [0i32; CANARY_LEN];
    let index = std::hint::black_box(CANARY_LEN);

    match canary.get_mut(index) {
        Some(slot) => *slot = 1,
        None => {
            error!(
                index,
                len = CANARY_LEN,
                "write_throttle fault trigger: out-of-bounds canary write, aborting"
            );
        }
    }

    std::hint::black_box(&canary);
    std::process::abort()
}
