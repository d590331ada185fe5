use std::mem::size_of;

use crate::value::Value;

// Forward declare concrete object structs so we can cast in dispatcher helpers.
use super::{
    object_bound_method::ObjectBoundMethod,
    object_class::ObjectClass,
    object_closure::ObjectClosure,
    object_function::ObjectFunction,
    object_instance::ObjectInstance,
    object_native_function::ObjectNativeFunction,
    object_string::ObjectString,
    object_upvalue::ObjectUpvalue,
};

#[repr(C)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ObjectType {
    ObjString,
    ObjFunction,
    ObjNativeFunction,
    ObjClosure,
    ObjUpvalue,
    ObjClass,
    ObjInstance,
    ObjBoundMethod,
}

/// Common header embedded as the first field of every heap object.
/// `next` threads the allocator's intrusive all-objects list, which the
/// sweep phase walks; `is_marked` is the mark bit of the current cycle.
#[repr(C)]
pub struct Object {
    pub obj_type: ObjectType,
    pub is_marked: bool,
    pub next: *mut Object,
}

impl Object {
    pub fn new(obj_type: ObjectType) -> Object {
        Object {
            obj_type,
            is_marked: false,
            next: std::ptr::null_mut(),
        }
    }
}

pub trait NativeObject {
    fn run(&self, args: &[Value]) -> Result<Value, String>;
}

impl Object {
    /// Compute the deep size of the concrete object that this header belongs to.
    /// Safety: caller guarantees `self` is embedded at the start of the concrete object.
    pub unsafe fn deep_size(&self) -> usize {
        match self.obj_type {
            ObjectType::ObjString => (*(self as *const _ as *const ObjectString)).deep_size(),
            ObjectType::ObjFunction => (*(self as *const _ as *const ObjectFunction)).deep_size(),
            ObjectType::ObjNativeFunction => {
                (*(self as *const _ as *const ObjectNativeFunction)).deep_size()
            }
            ObjectType::ObjClosure => (*(self as *const _ as *const ObjectClosure)).deep_size(),
            ObjectType::ObjUpvalue => (*(self as *const _ as *const ObjectUpvalue)).deep_size(),
            ObjectType::ObjClass => (*(self as *const _ as *const ObjectClass)).deep_size(),
            ObjectType::ObjInstance => (*(self as *const _ as *const ObjectInstance)).deep_size(),
            ObjectType::ObjBoundMethod => {
                (*(self as *const _ as *const ObjectBoundMethod)).deep_size()
            }
        }
    }

    /// Cast helpers with debug assertions to reduce accidental UB during development.
    #[inline]
    #[allow(dead_code)]
    pub unsafe fn as_string(&self) -> &ObjectString {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjString));
        &*(self as *const _ as *const ObjectString)
    }

    #[inline]
    #[allow(dead_code)]
    pub unsafe fn as_function(&self) -> &ObjectFunction {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjFunction));
        &*(self as *const _ as *const ObjectFunction)
    }

    #[inline]
    #[allow(dead_code)]
    pub unsafe fn as_closure(&self) -> &ObjectClosure {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjClosure));
        &*(self as *const _ as *const ObjectClosure)
    }

    #[inline]
    #[allow(dead_code)]
    pub unsafe fn as_upvalue(&self) -> &ObjectUpvalue {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjUpvalue));
        &*(self as *const _ as *const ObjectUpvalue)
    }

    #[inline]
    #[allow(dead_code)]
    pub unsafe fn as_class(&self) -> &ObjectClass {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjClass));
        &*(self as *const _ as *const ObjectClass)
    }

    #[inline]
    #[allow(dead_code)]
    pub unsafe fn as_instance(&self) -> &ObjectInstance {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjInstance));
        &*(self as *const _ as *const ObjectInstance)
    }
}

/// Trait for computing heap usage of GC managed structures (owned data only).
pub trait GcSize {
    /// Bytes for the struct itself (includes inline fields, pointers, lengths, capacities meta).
    fn shallow_size(&self) -> usize;
    /// Bytes including owned heap allocations (recursive but NOT traversing to other GC objects).
    fn deep_size(&self) -> usize;
}

// Implementations for each object type. These treat referenced GC objects (by raw pointer)
// as non-owned, so only the pointer itself is counted via the struct layout.

impl GcSize for ObjectString {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectString>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.content.capacity()
    }
}

impl GcSize for ObjectFunction {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectFunction>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity() + self.chunk.deep_size()
    }
}

impl GcSize for ObjectClosure {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectClosure>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.upvalues.capacity() * size_of::<*mut ObjectUpvalue>()
    }
}

impl GcSize for ObjectNativeFunction {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectNativeFunction>()
    }

    fn deep_size(&self) -> usize {
        // The dynamic native object behind the box is opaque; count the name only.
        self.shallow_size() + self.name.capacity()
    }
}

impl GcSize for ObjectUpvalue {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectUpvalue>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size()
    }
}

impl GcSize for ObjectClass {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectClass>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity() + self.methods.deep_size()
    }
}

impl GcSize for ObjectInstance {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectInstance>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.fields.deep_size()
    }
}

impl GcSize for ObjectBoundMethod {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectBoundMethod>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size()
    }
}
