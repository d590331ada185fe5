use crate::objects::object::{Object, ObjectType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_native_function::ObjectNativeFunction;
use crate::objects::object_string::{hash_string, ObjectString};
use crate::table::Table;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    ValueNil,
    ValueBool,
    ValueNumber,
    ValueObject,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union ValueUnion {
    pub boolean: bool,
    pub number: f64,
    pub object: *mut Object,
}

#[derive(Clone, Copy)]
pub struct Value {
    pub value_type: ValueType,
    pub value_as: ValueUnion,
}

pub type ValueArray = Vec<Value>;

impl Value {
    pub fn new() -> Value {
        make_nil_value()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        if self.value_type != other.value_type {
            return false;
        }
        unsafe {
            match self.value_type {
                ValueType::ValueNil => true,
                ValueType::ValueBool => self.value_as.boolean == other.value_as.boolean,
                ValueType::ValueNumber => self.value_as.number == other.value_as.number,
                // Object payloads compare by identity; interning makes this
                // the right answer for strings as well.
                ValueType::ValueObject => {
                    std::ptr::eq(self.value_as.object, other.value_as.object)
                }
            }
        }
    }
}

pub fn make_nil_value() -> Value {
    Value {
        value_type: ValueType::ValueNil,
        value_as: ValueUnion { number: 0.0 },
    }
}

pub fn make_bool_value(boolean: bool) -> Value {
    Value {
        value_type: ValueType::ValueBool,
        value_as: ValueUnion { boolean },
    }
}

pub fn make_number_value(number: f64) -> Value {
    Value {
        value_type: ValueType::ValueNumber,
        value_as: ValueUnion { number },
    }
}

pub fn make_object_value(object: *mut Object) -> Value {
    Value {
        value_type: ValueType::ValueObject,
        value_as: ValueUnion { object },
    }
}

pub fn make_function_value(function: *mut ObjectFunction) -> Value {
    make_object_value(function as *mut Object)
}

/// Intern-aware string constructor: returns the existing ObjectString when
/// one with these bytes is already live, otherwise allocates and interns.
pub fn make_string_value(
    object_manager: &mut ObjectManager,
    intern_strings: &mut Table,
    content: &str,
) -> Value {
    let hash = hash_string(content.as_bytes());
    let existing = intern_strings.find_string(content, hash);
    if !existing.is_null() {
        return make_object_value(existing as *mut Object);
    }
    let (string, _) = object_manager.alloc_string(content, hash);
    intern_strings.set(string, make_nil_value());
    make_object_value(string as *mut Object)
}

pub fn is_nil(value: &Value) -> bool {
    value.value_type == ValueType::ValueNil
}

pub fn is_bool(value: &Value) -> bool {
    value.value_type == ValueType::ValueBool
}

pub fn is_number(value: &Value) -> bool {
    value.value_type == ValueType::ValueNumber
}

pub fn is_object(value: &Value) -> bool {
    value.value_type == ValueType::ValueObject
}

fn is_object_type(value: &Value, obj_type: ObjectType) -> bool {
    is_object(value) && unsafe { (*value.value_as.object).obj_type } == obj_type
}

pub fn is_string(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjString)
}

pub fn is_function(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjFunction)
}

pub fn is_closure(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjClosure)
}

pub fn is_class(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjClass)
}

pub fn is_instance(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjInstance)
}

pub fn as_bool(value: &Value) -> bool {
    debug_assert!(is_bool(value));
    unsafe { value.value_as.boolean }
}

pub fn as_number(value: &Value) -> f64 {
    debug_assert!(is_number(value));
    unsafe { value.value_as.number }
}

pub fn as_object(value: &Value) -> *mut Object {
    debug_assert!(is_object(value));
    unsafe { value.value_as.object }
}

pub fn as_string_object(value: &Value) -> *mut ObjectString {
    debug_assert!(is_string(value));
    as_object(value) as *mut ObjectString
}

pub fn as_function_object(value: &Value) -> *mut ObjectFunction {
    debug_assert!(is_function(value));
    as_object(value) as *mut ObjectFunction
}

pub fn as_closure_object(value: &Value) -> *mut ObjectClosure {
    debug_assert!(is_closure(value));
    as_object(value) as *mut ObjectClosure
}

pub fn as_native_object(value: &Value) -> *mut ObjectNativeFunction {
    debug_assert!(is_object_type(value, ObjectType::ObjNativeFunction));
    as_object(value) as *mut ObjectNativeFunction
}

pub fn as_class_object(value: &Value) -> *mut ObjectClass {
    debug_assert!(is_class(value));
    as_object(value) as *mut ObjectClass
}

pub fn as_instance_object(value: &Value) -> *mut ObjectInstance {
    debug_assert!(is_instance(value));
    as_object(value) as *mut ObjectInstance
}

pub fn as_bound_method_object(value: &Value) -> *mut ObjectBoundMethod {
    debug_assert!(is_object_type(value, ObjectType::ObjBoundMethod));
    as_object(value) as *mut ObjectBoundMethod
}

pub fn print_value(value: &Value) {
    print!("{}", format_value(value));
}

pub fn format_value(value: &Value) -> String {
    match value.value_type {
        ValueType::ValueNil => "nil".to_string(),
        ValueType::ValueBool => {
            if as_bool(value) {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        ValueType::ValueNumber => format_number(as_number(value)),
        ValueType::ValueObject => unsafe { format_object(value.value_as.object) },
    }
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

unsafe fn format_object(object: *mut Object) -> String {
    match (*object).obj_type {
        ObjectType::ObjString => (*(object as *mut ObjectString)).content.clone(),
        ObjectType::ObjFunction => format_function(object as *mut ObjectFunction),
        ObjectType::ObjNativeFunction => "<native fn>".to_string(),
        ObjectType::ObjClosure => {
            format_function((*(object as *mut ObjectClosure)).function)
        }
        ObjectType::ObjUpvalue => "upvalue".to_string(),
        ObjectType::ObjClass => (*(object as *mut ObjectClass)).name.clone(),
        ObjectType::ObjInstance => {
            let instance = &*(object as *mut ObjectInstance);
            format!("{} instance", (*instance.class).name)
        }
        ObjectType::ObjBoundMethod => {
            let bound = &*(object as *mut ObjectBoundMethod);
            format_function((*bound.method).function)
        }
    }
}

unsafe fn format_function(function: *mut ObjectFunction) -> String {
    let function = &*function;
    if function.name.is_empty() {
        "<script>".to_string()
    } else {
        format!("<fn {}>", function.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_requires_matching_variants() {
        assert!(make_nil_value() == make_nil_value());
        assert!(make_bool_value(true) == make_bool_value(true));
        assert!(make_bool_value(true) != make_bool_value(false));
        assert!(make_number_value(1.5) == make_number_value(1.5));
        assert!(make_number_value(0.0) != make_nil_value());
        assert!(make_bool_value(false) != make_nil_value());
    }

    #[test]
    fn test_object_equality_is_identity() {
        let mut manager = ObjectManager::new();
        let mut interns = Table::new();
        let a = make_string_value(&mut manager, &mut interns, "same");
        let b = make_string_value(&mut manager, &mut interns, "same");
        let c = make_string_value(&mut manager, &mut interns, "different");
        // Interning makes identity line up with content equality.
        assert!(a == b);
        assert!(a != c);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_value(&make_number_value(3.0)), "3");
        assert_eq!(format_value(&make_number_value(-7.0)), "-7");
        assert_eq!(format_value(&make_number_value(2.5)), "2.5");
        assert_eq!(format_value(&make_nil_value()), "nil");
        assert_eq!(format_value(&make_bool_value(true)), "true");
    }

    #[test]
    fn test_string_formatting() {
        let mut manager = ObjectManager::new();
        let mut interns = Table::new();
        let value = make_string_value(&mut manager, &mut interns, "hello");
        assert_eq!(format_value(&value), "hello");
    }
}
