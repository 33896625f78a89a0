use crate::objects::object::{Object, ObjectType};
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_upvalue::ObjectUpvalue;

/// A function paired with the upvalues it closed over. The upvalue slots are
/// sized up front from the function's declared count and filled in while the
/// `Closure` instruction executes; the collector skips slots still null.
#[repr(C)]
pub struct ObjectClosure {
    pub object: Object,
    pub function: *mut ObjectFunction,
    pub upvalues: Vec<*mut ObjectUpvalue>,
}

impl ObjectClosure {
    pub fn new(function: *mut ObjectFunction) -> Self {
        let upvalue_count = unsafe { (*function).upvalue_count };
        ObjectClosure {
            object: Object {
                obj_type: ObjectType::ObjClosure,
            },
            function,
            upvalues: vec![std::ptr::null_mut(); upvalue_count],
        }
    }

    pub fn upvalue_count(&self) -> usize {
        self.upvalues.len()
    }
}
