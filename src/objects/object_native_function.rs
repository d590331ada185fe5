use crate::objects::object::{NativeObject, Object, ObjectType};
use crate::value::Value;

#[repr(C)]
pub struct ObjectNativeFunction {
    pub object: Object,
    pub name: String,
    pub arity: usize,
    pub native_object: Box<dyn NativeObject>,
}

impl ObjectNativeFunction {
    pub fn new(
        name: String,
        arity: usize,
        native_object: impl NativeObject + 'static,
    ) -> ObjectNativeFunction {
        ObjectNativeFunction {
            object: Object::new(ObjectType::ObjNativeFunction),
            name,
            arity,
            native_object: Box::new(native_object),
        }
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, String> {
        self.native_object.run(args)
    }
}
