use crate::objects::object::{Object, ObjectType};
use crate::value::{make_nil_value, Value};

/// A cell giving closures access to an enclosing function's local. While
/// *open*, `location` points at the live stack slot; closing copies the slot
/// into `closed` and retargets `location` at it, so readers never care which
/// state the cell is in.
#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub location: *mut Value,
    pub closed: Value,
}

impl ObjectUpvalue {
    pub fn new(location: *mut Value) -> Self {
        ObjectUpvalue {
            object: Object {
                obj_type: ObjectType::ObjUpvalue,
            },
            location,
            closed: make_nil_value(),
        }
    }

    pub fn close(&mut self) {
        unsafe {
            self.closed = *self.location;
        }
        self.location = &mut self.closed;
    }
}
