use crate::constants::{FIRST_GC_THRESHOLD, HEAP_GROW_FACTOR};
use crate::gc::gc_trace;
use crate::objects::object::{GcSize, NativeObject, Object, ObjectType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_native_function::ObjectNativeFunction;
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::value::Value;

/// Owns the heap: every allocation is threaded onto the intrusive `objects`
/// list, and `bytes_allocated`/`next_gc` drive the collection schedule.
pub struct ObjectManager {
    objects: *mut Object,
    bytes_allocated: usize,
    next_gc: usize,
}

impl ObjectManager {
    pub fn new() -> ObjectManager {
        ObjectManager {
            objects: std::ptr::null_mut(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
        }
    }

    /// Take ownership of a freshly boxed object, prepend it to the object
    /// list unmarked, and account for its current deep size.
    /// The concrete type must embed `Object` as its first (repr(C)) field.
    fn track<T: GcSize>(&mut self, object: Box<T>) -> (*mut T, usize) {
        let size = object.deep_size();
        let ptr = Box::into_raw(object);
        let header = ptr as *mut Object;
        unsafe {
            (*header).next = self.objects;
        }
        self.objects = header;
        self.bytes_allocated += size;
        gc_trace!("allocate {} bytes ptr={:p}", size, ptr);
        (ptr, size)
    }

    pub fn alloc_string(&mut self, content: &str, hash: u32) -> (*mut ObjectString, usize) {
        self.track(ObjectString::new(content, hash))
    }

    /// The compiler builds functions incrementally and hands them over once
    /// finished; adopting keeps the chunk's final size in the accounting.
    pub fn adopt_function(&mut self, function: Box<ObjectFunction>) -> *mut ObjectFunction {
        self.track(function).0
    }

    pub fn alloc_closure(&mut self, function: *mut ObjectFunction) -> (*mut ObjectClosure, usize) {
        self.track(Box::new(ObjectClosure::new(function)))
    }

    pub fn alloc_upvalue(&mut self, location: *mut Value) -> (*mut ObjectUpvalue, usize) {
        self.track(Box::new(ObjectUpvalue::new(location)))
    }

    pub fn alloc_native_function(
        &mut self,
        name: String,
        arity: usize,
        native_object: impl NativeObject + 'static,
    ) -> (*mut ObjectNativeFunction, usize) {
        self.track(Box::new(ObjectNativeFunction::new(name, arity, native_object)))
    }

    pub fn alloc_class(&mut self, name: String) -> (*mut ObjectClass, usize) {
        self.track(Box::new(ObjectClass::new(name)))
    }

    pub fn alloc_instance(&mut self, class: *mut ObjectClass) -> (*mut ObjectInstance, usize) {
        self.track(Box::new(ObjectInstance::new(class)))
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjectClosure,
    ) -> (*mut ObjectBoundMethod, usize) {
        self.track(Box::new(ObjectBoundMethod::new(receiver, method)))
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn should_collect(&self) -> bool {
        cfg!(feature = "gc_stress") || self.bytes_allocated > self.next_gc
    }

    pub fn update_next_gc(&mut self) {
        self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
    }

    /// Iterate over all managed objects (for GC tests and diagnostics).
    #[allow(dead_code)]
    pub fn iter(&self) -> ObjectListIter {
        ObjectListIter {
            current: self.objects,
        }
    }

    /// Walk the intrusive list: free unmarked objects, clear the mark on
    /// survivors. Returns the number of bytes released.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut prev: *mut Object = std::ptr::null_mut();
        let mut object = self.objects;
        unsafe {
            while !object.is_null() {
                if (*object).is_marked {
                    (*object).is_marked = false;
                    prev = object;
                    object = (*object).next;
                } else {
                    let unreached = object;
                    object = (*object).next;
                    if prev.is_null() {
                        self.objects = object;
                    } else {
                        (*prev).next = object;
                    }
                    freed += Self::free_object(unreached);
                }
            }
        }
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
        gc_trace!("sweep freed_bytes={}", freed);
        freed
    }

    /// Rebuild the concrete box so the right layout (and Drop) is used.
    unsafe fn free_object(object: *mut Object) -> usize {
        let size = (*object).deep_size();
        gc_trace!("free {} bytes ptr={:p}", size, object);
        match (*object).obj_type {
            ObjectType::ObjString => drop(Box::from_raw(object as *mut ObjectString)),
            ObjectType::ObjFunction => drop(Box::from_raw(object as *mut ObjectFunction)),
            ObjectType::ObjNativeFunction => {
                drop(Box::from_raw(object as *mut ObjectNativeFunction))
            }
            ObjectType::ObjClosure => drop(Box::from_raw(object as *mut ObjectClosure)),
            ObjectType::ObjUpvalue => drop(Box::from_raw(object as *mut ObjectUpvalue)),
            ObjectType::ObjClass => drop(Box::from_raw(object as *mut ObjectClass)),
            ObjectType::ObjInstance => drop(Box::from_raw(object as *mut ObjectInstance)),
            ObjectType::ObjBoundMethod => drop(Box::from_raw(object as *mut ObjectBoundMethod)),
        }
        size
    }

    /// Deallocate every remaining object (VM shutdown).
    unsafe fn free_all(&mut self) {
        let mut object = self.objects;
        while !object.is_null() {
            let next = (*object).next;
            Self::free_object(object);
            object = next;
        }
        self.objects = std::ptr::null_mut();
        self.bytes_allocated = 0;
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        unsafe {
            self.free_all();
        }
    }
}

pub struct ObjectListIter {
    current: *mut Object,
}

impl Iterator for ObjectListIter {
    type Item = *mut Object;

    fn next(&mut self) -> Option<*mut Object> {
        if self.current.is_null() {
            return None;
        }
        let object = self.current;
        self.current = unsafe { (*object).next };
        Some(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_string::hash_string;

    #[test]
    fn test_allocations_are_threaded_onto_the_list() {
        let mut manager = ObjectManager::new();
        assert_eq!(manager.iter().count(), 0);

        manager.alloc_string("one", hash_string(b"one"));
        manager.alloc_string("two", hash_string(b"two"));
        let function = manager.adopt_function(Box::new(ObjectFunction::new(0, "f".to_string())));
        manager.alloc_closure(function);

        assert_eq!(manager.iter().count(), 4);
        assert!(manager.bytes_allocated() > 0);
    }

    #[test]
    fn test_sweep_frees_everything_unmarked() {
        let mut manager = ObjectManager::new();
        manager.alloc_string("garbage", hash_string(b"garbage"));
        manager.alloc_string("also garbage", hash_string(b"also garbage"));

        let freed = manager.sweep();
        assert!(freed > 0);
        assert_eq!(manager.iter().count(), 0);
        assert_eq!(manager.bytes_allocated(), 0);
    }

    #[test]
    fn test_sweep_keeps_marked_objects_and_clears_marks() {
        let mut manager = ObjectManager::new();
        let (keep, _) = manager.alloc_string("keep", hash_string(b"keep"));
        manager.alloc_string("drop", hash_string(b"drop"));

        unsafe {
            (*keep).object.is_marked = true;
        }
        manager.sweep();

        assert_eq!(manager.iter().count(), 1);
        unsafe {
            assert!(!(*keep).object.is_marked);
            assert_eq!((*keep).content, "keep");
        }
    }
}
