use crate::objects::object::{Object, ObjectType};
use crate::objects::object_closure::ObjectClosure;
use crate::value::Value;

/// A method detached from an instance via property access. The receiver rides
/// along so a later call still places it in slot zero of the method's frame.
#[repr(C)]
pub struct ObjectBoundMethod {
    pub object: Object,
    pub receiver: Value,
    pub method: *mut ObjectClosure,
}

impl ObjectBoundMethod {
    pub fn new(receiver: Value, method: *mut ObjectClosure) -> ObjectBoundMethod {
        ObjectBoundMethod {
            object: Object::new(ObjectType::ObjBoundMethod),
            receiver,
            method,
        }
    }
}
