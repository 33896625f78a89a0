use crate::objects::object_native_function::NativeCallable;
use crate::value::{as_string_object, is_string, make_number_value, Value};

/// `len(s)` — UTF-8 codepoint count. Continuation bytes carry `10` in their
/// top two bits, so skipping them counts the codepoints.
pub struct Len;

impl NativeCallable for Len {
    fn call(&self, args: &[Value]) -> Result<Value, String> {
        if !is_string(&args[0]) {
            return Err("Argument must be a string.".to_string());
        }

        let string = as_string_object(&args[0]);
        let count = unsafe { &(*string).content }
            .bytes()
            .filter(|byte| byte & 0xc0 != 0x80)
            .count();
        Ok(make_number_value(count as f64))
    }
}

/// `blen(s)` — byte length of the string's UTF-8 encoding.
pub struct ByteLen;

impl NativeCallable for ByteLen {
    fn call(&self, args: &[Value]) -> Result<Value, String> {
        if !is_string(&args[0]) {
            return Err("Argument must be a string.".to_string());
        }

        let string = as_string_object(&args[0]);
        let length = unsafe { &(*string).content }.len();
        Ok(make_number_value(length as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_manager::ObjectManager;
    use crate::table::Table;
    use crate::value::{as_number, make_nil_value, make_string_value};

    fn string_value(content: &str) -> (ObjectManager, Table, Value) {
        let mut manager = ObjectManager::new();
        let mut strings = Table::new();
        let value = make_string_value(&mut manager, &mut strings, content);
        (manager, strings, value)
    }

    #[test]
    fn test_len_counts_codepoints() {
        let (_manager, _strings, value) = string_value("héllo");
        let result = Len.call(&[value]).unwrap();
        assert_eq!(as_number(&result), 5.0);
    }

    #[test]
    fn test_blen_counts_bytes() {
        let (_manager, _strings, value) = string_value("héllo");
        let result = ByteLen.call(&[value]).unwrap();
        assert_eq!(as_number(&result), 6.0);
    }

    #[test]
    fn test_non_string_argument_is_rejected() {
        let error = Len.call(&[make_nil_value()]).unwrap_err();
        assert_eq!(error, "Argument must be a string.");
    }
}
