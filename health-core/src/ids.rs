//! Stable integer handles into the [`crate::model::Topology`] arenas.
//!
//! The original health-check engine keeps live C pointers between servers,
//! proxies, sessions, and check tasks. Those form a cycle (server -> proxy,
//! proxy -> servers, server -> pending sessions, task -> server) that has no
//! natural owner in Rust. We break the cycle by giving every entity a small
//! `Copy` handle and storing the actual data in arenas (`slab::Slab`) owned
//! by `Topology`; handles are looked up, never dereferenced directly.

use std::fmt;

macro_rules! handle {
    ($name:ident) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub(crate) fn from_key(key: usize) -> Self {
                Self(key)
            }

            pub(crate) fn key(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle!(ServerId);
handle!(ProxyId);

/// A handle to a session owned by the (out-of-scope) session/queue layer.
/// This crate never looks inside a session; it only carries the handle
/// through `PendConn` and hands it back to `Backend::wake_session`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId#{}", self.0)
    }
}
