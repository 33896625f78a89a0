use crate::objects::object::{Object, ObjectType};
use crate::value::Value;

/// Host-provided callable. Implementations must be synchronous and
/// non-blocking; a returned `Err` surfaces as a runtime error at the call
/// site.
pub trait NativeCallable {
    fn call(&self, args: &[Value]) -> Result<Value, String>;
}

#[repr(C)]
pub struct ObjectNativeFunction {
    pub object: Object,
    pub name: String,
    pub arity: u8,
    callable: Box<dyn NativeCallable>,
}

impl ObjectNativeFunction {
    pub fn new(name: String, arity: u8, callable: impl NativeCallable + 'static) -> Self {
        ObjectNativeFunction {
            object: Object {
                obj_type: ObjectType::ObjNativeFunction,
            },
            name,
            arity,
            callable: Box::new(callable),
        }
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, String> {
        if args.len() != self.arity as usize {
            return Err(format!(
                "Expected {} arguments but got {}.",
                self.arity,
                args.len()
            ));
        }
        self.callable.call(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_number, make_number_value};

    struct Doubler;

    impl NativeCallable for Doubler {
        fn call(&self, args: &[Value]) -> Result<Value, String> {
            Ok(make_number_value(as_number(&args[0]) * 2.0))
        }
    }

    #[test]
    fn test_invoke_checks_arity() {
        let native = ObjectNativeFunction::new("double".to_string(), 1, Doubler);
        let result = native.invoke(&[make_number_value(21.0)]).unwrap();
        assert_eq!(as_number(&result), 42.0);

        let err = native.invoke(&[]).unwrap_err();
        assert_eq!(err, "Expected 1 arguments but got 0.");
    }
}
