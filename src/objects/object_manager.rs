use crate::objects::{
    object::{Object, ObjectType},
    object_bound_method::ObjectBoundMethod,
    object_class::ObjectClass,
    object_closure::ObjectClosure,
    object_function::ObjectFunction,
    object_instance::ObjectInstance,
    object_native_function::{NativeCallable, ObjectNativeFunction},
    object_string::ObjectString,
    object_upvalue::ObjectUpvalue,
};
use crate::value::Value;

/// Owns every heap object for one VM. Allocation hands out raw pointers and
/// records the object's deep size; the collector gives unreachable pointers
/// back through `free_object`.
pub struct ObjectManager {
    objects: Vec<*mut Object>,
    bytes_allocated: usize,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            bytes_allocated: 0,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Push a newly allocated object pointer, record its deep size, and return that size.
    fn push_object(&mut self, object: *mut Object) -> usize {
        let size = unsafe { (*object).deep_size() };
        self.bytes_allocated += size;
        self.objects.push(object);
        size
    }

    pub fn alloc_string(&mut self, content: &str) -> (*mut ObjectString, usize) {
        let ptr = Box::into_raw(ObjectString::new(content));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    /// Take ownership of a function the compiler finished building.
    pub fn adopt_function(&mut self, function: Box<ObjectFunction>) -> (*mut ObjectFunction, usize) {
        let ptr = Box::into_raw(function);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_closure(&mut self, function: *mut ObjectFunction) -> (*mut ObjectClosure, usize) {
        let ptr = Box::into_raw(Box::new(ObjectClosure::new(function)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_native_function(
        &mut self,
        name: String,
        arity: u8,
        callable: impl NativeCallable + 'static,
    ) -> (*mut ObjectNativeFunction, usize) {
        let ptr = Box::into_raw(Box::new(ObjectNativeFunction::new(name, arity, callable)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_upvalue(&mut self, location: *mut Value) -> (*mut ObjectUpvalue, usize) {
        let ptr = Box::into_raw(Box::new(ObjectUpvalue::new(location)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_class(&mut self, name: *mut ObjectString) -> (*mut ObjectClass, usize) {
        let ptr = Box::into_raw(Box::new(ObjectClass::new(name)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_instance(&mut self, class: *mut ObjectClass) -> (*mut ObjectInstance, usize) {
        let ptr = Box::into_raw(Box::new(ObjectInstance::new(class)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjectClosure,
    ) -> (*mut ObjectBoundMethod, usize) {
        let ptr = Box::into_raw(Box::new(ObjectBoundMethod::new(receiver, method)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    /// Iterate over all managed objects (for GC mark/sweep).
    pub fn iter(&self) -> impl Iterator<Item = &*mut Object> {
        self.objects.iter()
    }

    /// Unlink and deallocate one object. Returns the bytes released.
    pub fn free_object(&mut self, ptr: *mut Object) -> usize {
        let size = unsafe { (*ptr).deep_size() };
        if let Some(position) = self.objects.iter().position(|&object| object == ptr) {
            self.objects.swap_remove(position);
        }
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
        unsafe {
            free_raw_object(ptr);
        }
        size
    }

    /// Deallocate all objects (for VM shutdown).
    unsafe fn free_all(&mut self) {
        for &ptr in &self.objects {
            if !ptr.is_null() {
                free_raw_object(ptr);
            }
        }
        self.objects.clear();
        self.bytes_allocated = 0;
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        unsafe {
            self.free_all();
        }
    }
}

/// Rebuild the concrete `Box` the object was allocated as so its fields drop.
/// Safety: `ptr` must come from this module's allocation paths and must not
/// be dereferenced again afterwards.
unsafe fn free_raw_object(ptr: *mut Object) {
    match (*ptr).obj_type {
        ObjectType::ObjString => drop(Box::from_raw(ptr as *mut ObjectString)),
        ObjectType::ObjFunction => drop(Box::from_raw(ptr as *mut ObjectFunction)),
        ObjectType::ObjNativeFunction => drop(Box::from_raw(ptr as *mut ObjectNativeFunction)),
        ObjectType::ObjClosure => drop(Box::from_raw(ptr as *mut ObjectClosure)),
        ObjectType::ObjUpvalue => drop(Box::from_raw(ptr as *mut ObjectUpvalue)),
        ObjectType::ObjClass => drop(Box::from_raw(ptr as *mut ObjectClass)),
        ObjectType::ObjInstance => drop(Box::from_raw(ptr as *mut ObjectInstance)),
        ObjectType::ObjBoundMethod => drop(Box::from_raw(ptr as *mut ObjectBoundMethod)),
    }
}
