use crate::objects::object::{Object, ObjectType};
use crate::value::{make_nil_value, Value};

/// While open, `location` points at a live VM stack slot. Closing copies the
/// slot into `closed` and retargets `location` there. `next_open` threads the
/// VM's list of open upvalues, sorted by decreasing slot address.
#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub location: *mut Value,
    pub closed: Value,
    pub next_open: *mut ObjectUpvalue,
}

impl ObjectUpvalue {
    pub fn new(location: *mut Value) -> ObjectUpvalue {
        ObjectUpvalue {
            object: Object::new(ObjectType::ObjUpvalue),
            location,
            closed: make_nil_value(),
            next_open: std::ptr::null_mut(),
        }
    }
}
