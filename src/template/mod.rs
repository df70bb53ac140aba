//! Per-request handler instances cloned from a shared template.
//!
//! A handler is registered once per route and then shared, read-only, by
//! every request on that route. Each request works on its own instance
//! produced by [`InstanceClone`]. The copy is driven by field category:
//!
//! | Field category | Instance receives |
//! |---|---|
//! | scalars, `String`, `Bytes` | a copy of the value |
//! | `Option`, `Box`, `Arc` | absent stays absent, present is deep-copied |
//! | `Vec`, `VecDeque`, arrays | a new sequence of deep-copied elements |
//! | `HashMap`, `BTreeMap`, sets | a new mapping with deep-copied keys and values |
//! | [`AnyValue`] | the concrete value deep-copied and re-wrapped |
//! | [`Endpoint`] | always absent |
//! | mutexes, locks, `Once`, atomics, [`WaitCounter`] | fresh initial state |
//! | [`Callable`] | the same callable, shared |
//!
//! Struct implementations are generated with [`instance_clone!`], which
//! applies the field rules above to each named field.
//!
//! ```rust
//! use std::collections::HashMap;
//! use litekit::instance_clone;
//!
//! #[derive(Default)]
//! struct Counter {
//!     hits: u64,
//!     tags: HashMap<String, Vec<String>>,
//!     lock: std::sync::Mutex<()>,
//! }
//!
//! instance_clone!(Counter { hits, tags, lock });
//! ```

mod any;
mod primitives;
mod values;

pub use any::{AnyInstance, AnyValue};
pub use primitives::{Endpoint, WaitCounter};
pub use values::Callable;

/// Structural copy of a handler template.
///
/// Implementations must only read `self`: many requests clone the same
/// template at once without any external locking.
pub trait InstanceClone: Sized {
    /// Produce an instance that shares no mutable state with `self`.
    fn clone_instance(&self) -> Self;
}

/// Clone an optional template. An absent template yields an absent instance.
#[inline]
pub fn clone_template<T: InstanceClone>(template: Option<&T>) -> Option<T> {
    template.map(InstanceClone::clone_instance)
}

/// Implement [`InstanceClone`] for a struct by cloning every listed field.
///
/// Every field of the struct must be listed. Unit structs use `Name {}`.
/// Generic structs list their type parameters in brackets:
/// `instance_clone!([T] Wrapper<T> { inner })`.
#[macro_export]
macro_rules! instance_clone {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $crate::template::InstanceClone for $ty {
            fn clone_instance(&self) -> Self {
                $ty {
                    $($field: $crate::template::InstanceClone::clone_instance(&self.$field),)*
                }
            }
        }
    };
    ([$($gen:ident),+] $ty:ident < $($arg:ident),+ > { $($field:ident),* $(,)? }) => {
        impl<$($gen: $crate::template::InstanceClone),+> $crate::template::InstanceClone
            for $ty<$($arg),+>
        {
            fn clone_instance(&self) -> Self {
                $ty {
                    $($field: $crate::template::InstanceClone::clone_instance(&self.$field),)*
                }
            }
        }
    };
}
