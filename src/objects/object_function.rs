use crate::chunk::Chunk;
use crate::objects::object::{Object, ObjectType};
use crate::objects::object_string::ObjectString;

/// A compiled function body. `name` is null for the implicit top-level script
/// function.
#[repr(C)]
pub struct ObjectFunction {
    pub object: Object,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Box<Chunk>,
    pub name: *mut ObjectString,
}

impl ObjectFunction {
    pub fn new(arity: u8) -> Self {
        ObjectFunction {
            object: Object {
                obj_type: ObjectType::ObjFunction,
            },
            arity,
            upvalue_count: 0,
            chunk: Box::new(Chunk::new()),
            name: std::ptr::null_mut(),
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}
