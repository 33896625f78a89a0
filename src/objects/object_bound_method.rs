use crate::objects::object::{Object, ObjectType};
use crate::objects::object_closure::ObjectClosure;
use crate::value::Value;

/// A method closure captured together with the receiver it was read from, so
/// the pair can be passed around and called later like any other function.
#[repr(C)]
pub struct ObjectBoundMethod {
    pub object: Object,
    pub receiver: Value,
    pub method: *mut ObjectClosure,
}

impl ObjectBoundMethod {
    pub fn new(receiver: Value, method: *mut ObjectClosure) -> Self {
        ObjectBoundMethod {
            object: Object {
                obj_type: ObjectType::ObjBoundMethod,
            },
            receiver,
            method,
        }
    }
}
