//! Dynamically typed handler fields.

use std::any::Any;
use std::fmt;

use super::InstanceClone;

/// Object-safe view of an [`InstanceClone`] value.
pub trait AnyInstance: Any + Send + Sync {
    fn clone_boxed(&self) -> Box<dyn AnyInstance>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: InstanceClone + Any + Send + Sync> AnyInstance for T {
    fn clone_boxed(&self) -> Box<dyn AnyInstance> {
        Box::new(self.clone_instance())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A field holding a value of any clonable type, or nothing.
///
/// Cloning unwraps the concrete value, deep-copies it with its own
/// [`InstanceClone`] rules and wraps the copy again.
#[derive(Default)]
pub struct AnyValue(Option<Box<dyn AnyInstance>>);

impl AnyValue {
    pub fn new<T: InstanceClone + Send + Sync + 'static>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn set<T: InstanceClone + Send + Sync + 'static>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.as_any().downcast_ref())
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.0.as_deref_mut().and_then(|v| v.as_any_mut().downcast_mut())
    }
}

impl InstanceClone for AnyValue {
    fn clone_instance(&self) -> Self {
        Self(self.0.as_deref().map(|v| v.clone_boxed()))
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_deref() {
            Some(v) => write!(f, "AnyValue({})", v.type_name()),
            None => f.write_str("AnyValue(empty)"),
        }
    }
}
