use std::sync::atomic::{AtomicU32, Ordering};

/// Correlates a reply with the request it answers. `0` means "none".
pub type RequestId = u32;

/// Per-connection request id source.
///
/// Ids start at 1, increase by one per call, and wrap around without ever
/// yielding 0.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: AtomicU32,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator whose next id follows `last`.
    pub fn starting_after(last: RequestId) -> Self {
        Self {
            last: AtomicU32::new(last),
        }
    }

    pub fn next_id(&self) -> RequestId {
        loop {
            let id = self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    /// The most recently issued id, or 0 if none was issued yet.
    pub fn last(&self) -> RequestId {
        self.last.load(Ordering::Relaxed)
    }
}
