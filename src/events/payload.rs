//! # Dynamically typed payloads.
//!
//! Buses are statically typed, but a bus may carry type-erased payloads
//! (`Arc<dyn Any + Send + Sync>`, `Box<dyn Any + Send + Sync>`). [`DynPayload`]
//! lets `Bus::flat_map` and `Filter::of_type` narrow such payloads by their
//! runtime type.

use std::any::{Any, TypeId};
use std::sync::Arc;

/// Payload whose concrete type is only known at runtime.
pub trait DynPayload {
    /// Type-erased view of the payload value.
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    /// [`TypeId`] of the concrete value.
    fn payload_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    /// True if the concrete value is an `R`.
    fn is<R: Any>(&self) -> bool {
        self.as_any().is::<R>()
    }

    /// Borrow the concrete value as `R`.
    fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.as_any().downcast_ref::<R>()
    }
}

impl DynPayload for Arc<dyn Any + Send + Sync> {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        &**self
    }
}

impl DynPayload for Box<dyn Any + Send + Sync> {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        &**self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrows_arc_payload() {
        let p: Arc<dyn Any + Send + Sync> = Arc::new(42_u32);
        assert!(p.is::<u32>());
        assert!(!p.is::<String>());
        assert_eq!(p.downcast_ref::<u32>(), Some(&42));
        assert_eq!(p.payload_type_id(), TypeId::of::<u32>());
    }

    #[test]
    fn narrows_boxed_payload() {
        let p: Box<dyn Any + Send + Sync> = Box::new(String::from("x"));
        assert_eq!(p.downcast_ref::<String>().map(String::as_str), Some("x"));
        assert!(p.downcast_ref::<u32>().is_none());
    }
}
