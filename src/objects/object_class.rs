use crate::objects::object::{Object, ObjectType};
use crate::objects::object_string::ObjectString;
use crate::table::Table;

#[repr(C)]
pub struct ObjectClass {
    pub object: Object,
    pub name: *mut ObjectString,
    pub methods: Table,
}

impl ObjectClass {
    pub fn new(name: *mut ObjectString) -> Self {
        ObjectClass {
            object: Object {
                obj_type: ObjectType::ObjClass,
            },
            name,
            methods: Table::new(),
        }
    }
}
