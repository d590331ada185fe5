use crate::chunk::Chunk;
use crate::objects::object::{Object, ObjectType};

#[repr(C)]
pub struct ObjectFunction {
    pub object: Object,
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: String,
}

impl ObjectFunction {
    pub fn new(arity: usize, name: String) -> ObjectFunction {
        ObjectFunction {
            object: Object::new(ObjectType::ObjFunction),
            arity,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

#[cfg(feature = "debug_trace_object")]
mod debug_feature {
    use super::ObjectFunction;

    impl Drop for ObjectFunction {
        fn drop(&mut self) {
            println!("drop function object: name={}", self.name);
        }
    }
}
