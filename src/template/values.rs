//! Value-category implementations: scalars, owned references, sequences,
//! mappings and shared callables.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;

use super::InstanceClone;

macro_rules! by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl InstanceClone for $ty {
                #[inline]
                fn clone_instance(&self) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

by_value!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
    Bytes,
    std::time::Duration,
    std::net::IpAddr,
    std::net::SocketAddr,
    http::Method,
    http::StatusCode,
    http::HeaderMap,
    serde_json::Value,
);

impl<T: InstanceClone> InstanceClone for Option<T> {
    #[inline]
    fn clone_instance(&self) -> Self {
        self.as_ref().map(T::clone_instance)
    }
}

impl<T: InstanceClone> InstanceClone for Box<T> {
    fn clone_instance(&self) -> Self {
        Box::new((**self).clone_instance())
    }
}

/// `Arc` fields are deep-copied like any other reference: the instance
/// gets its own allocation. Use [`Callable`] for values meant to be shared.
///
/// Method syntax on an `Arc<T>` picks this impl, not `T`'s, and returns
/// another `Arc`. To get a `T` out of a shared template write
/// `T::clone_instance(&template)`.
impl<T: InstanceClone> InstanceClone for Arc<T> {
    fn clone_instance(&self) -> Self {
        Arc::new((**self).clone_instance())
    }
}

impl<T: InstanceClone> InstanceClone for Vec<T> {
    fn clone_instance(&self) -> Self {
        self.iter().map(T::clone_instance).collect()
    }
}

impl<T: InstanceClone> InstanceClone for VecDeque<T> {
    fn clone_instance(&self) -> Self {
        self.iter().map(T::clone_instance).collect()
    }
}

impl<T: InstanceClone, const N: usize> InstanceClone for [T; N] {
    fn clone_instance(&self) -> Self {
        std::array::from_fn(|i| self[i].clone_instance())
    }
}

impl<K, V, S> InstanceClone for HashMap<K, V, S>
where
    K: InstanceClone + Eq + Hash,
    V: InstanceClone,
    S: BuildHasher + Default,
{
    fn clone_instance(&self) -> Self {
        let mut map = HashMap::with_capacity_and_hasher(self.len(), S::default());
        for (key, value) in self {
            map.insert(key.clone_instance(), value.clone_instance());
        }
        map
    }
}

impl<K: InstanceClone + Ord, V: InstanceClone> InstanceClone for BTreeMap<K, V> {
    fn clone_instance(&self) -> Self {
        self.iter()
            .map(|(k, v)| (k.clone_instance(), v.clone_instance()))
            .collect()
    }
}

impl<T, S> InstanceClone for HashSet<T, S>
where
    T: InstanceClone + Eq + Hash,
    S: BuildHasher + Default,
{
    fn clone_instance(&self) -> Self {
        let mut set = HashSet::with_capacity_and_hasher(self.len(), S::default());
        set.extend(self.iter().map(T::clone_instance));
        set
    }
}

impl<T: InstanceClone + Ord> InstanceClone for BTreeSet<T> {
    fn clone_instance(&self) -> Self {
        self.iter().map(T::clone_instance).collect()
    }
}

impl<A: InstanceClone, B: InstanceClone> InstanceClone for (A, B) {
    fn clone_instance(&self) -> Self {
        (self.0.clone_instance(), self.1.clone_instance())
    }
}

impl<A: InstanceClone, B: InstanceClone, C: InstanceClone> InstanceClone for (A, B, C) {
    fn clone_instance(&self) -> Self {
        (
            self.0.clone_instance(),
            self.1.clone_instance(),
            self.2.clone_instance(),
        )
    }
}

/// A function value shared by reference between a template and all of its
/// instances.
///
/// ```rust
/// use std::sync::Arc;
/// use litekit::template::{Callable, InstanceClone};
///
/// let double: Callable<dyn Fn(u32) -> u32 + Send + Sync> =
///     Callable::from_arc(Arc::new(|x: u32| x * 2));
/// assert_eq!((double.clone_instance())(4), 8);
/// ```
pub struct Callable<F: ?Sized>(Arc<F>);

impl<F> Callable<F> {
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl<F: ?Sized> Callable<F> {
    pub fn from_arc(f: Arc<F>) -> Self {
        Self(f)
    }

    /// True when both values point at the same callable.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<F: ?Sized> Clone for Callable<F> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<F: ?Sized> Deref for Callable<F> {
    type Target = F;

    #[inline]
    fn deref(&self) -> &F {
        &self.0
    }
}

impl<F: ?Sized> InstanceClone for Callable<F> {
    #[inline]
    fn clone_instance(&self) -> Self {
        self.clone()
    }
}

impl<F: ?Sized> std::fmt::Debug for Callable<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callable(..)")
    }
}
