//! The 16-bit packet-identifier address space.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::error::{MqttError, Result};

/// Hard ceiling on concurrent inflight identifiers.
pub const REQUEST_MAX: usize = 65_536;

/// Allocates identifiers in [1, 65535] with a cyclic scan cursor, so
/// recently-freed identifiers are not immediately reused.
#[derive(Debug)]
pub struct PacketIdRegister {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    last: u16,
    in_use: HashSet<u16>,
    limit: usize,
}

impl PacketIdRegister {
    /// `limit` bounds the inflight set; 0 or anything above [`REQUEST_MAX`]
    /// clamps to [`REQUEST_MAX`].
    pub fn new(limit: usize) -> Self {
        let limit = if limit == 0 || limit > REQUEST_MAX {
            REQUEST_MAX
        } else {
            limit
        };
        Self {
            inner: Mutex::new(Inner {
                last: 0,
                in_use: HashSet::new(),
                limit,
            }),
        }
    }

    /// Locks a free identifier.
    pub fn reserve(&self) -> Result<u16> {
        let mut inner = self.inner.lock();
        // identifier 0 is illegal on the wire, so 65535 is the usable span
        if inner.in_use.len() >= inner.limit || inner.in_use.len() >= REQUEST_MAX - 1 {
            return Err(MqttError::RequestLimit);
        }

        let mut id = inner.last;
        loop {
            id = id.wrapping_add(1);
            if id == 0 {
                continue;
            }
            if !inner.in_use.contains(&id) {
                inner.in_use.insert(id);
                inner.last = id;
                return Ok(id);
            }
        }
    }

    /// Re-registers a specific identifier found in the inflight store during
    /// session resumption. Returns false when it was already reserved.
    pub fn reclaim(&self, id: u16) -> bool {
        if id == 0 {
            return false;
        }
        self.inner.lock().in_use.insert(id)
    }

    /// Releases the identifier.
    pub fn free(&self, id: u16) {
        self.inner.lock().in_use.remove(&id);
    }

    pub fn in_use(&self) -> usize {
        self.inner.lock().in_use.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_sequential_and_skips_zero() {
        let register = PacketIdRegister::new(REQUEST_MAX);
        assert_eq!(register.reserve().unwrap(), 1);
        assert_eq!(register.reserve().unwrap(), 2);
        assert_eq!(register.reserve().unwrap(), 3);
        assert_eq!(register.in_use(), 3);
    }

    #[test]
    fn test_free_allows_reuse_after_wraparound() {
        let register = PacketIdRegister::new(REQUEST_MAX);
        let a = register.reserve().unwrap();
        register.free(a);
        assert_eq!(register.in_use(), 0);

        // the cursor moves on; the freed identifier is not handed right back
        let b = register.reserve().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_limit_enforced() {
        let register = PacketIdRegister::new(2);
        register.reserve().unwrap();
        register.reserve().unwrap();
        assert_eq!(register.reserve(), Err(MqttError::RequestLimit));

        register.free(1);
        assert!(register.reserve().is_ok());
    }

    #[test]
    fn test_limit_clamped() {
        let register = PacketIdRegister::new(0);
        assert!(register.reserve().is_ok());

        let register = PacketIdRegister::new(REQUEST_MAX + 5);
        assert!(register.reserve().is_ok());
    }

    #[test]
    fn test_reclaim() {
        let register = PacketIdRegister::new(REQUEST_MAX);
        assert!(register.reclaim(7));
        assert!(!register.reclaim(7));
        assert!(!register.reclaim(0));
        assert_eq!(register.in_use(), 1);

        // the scan must step over the reclaimed identifier
        for _ in 0..7 {
            let id = register.reserve().unwrap();
            assert_ne!(id, 7);
        }
    }

    #[test]
    fn test_cursor_wraps_at_address_space_end() {
        let register = PacketIdRegister::new(REQUEST_MAX);
        register.inner.lock().last = u16::MAX;
        assert_eq!(register.reserve().unwrap(), 1);
    }
}
