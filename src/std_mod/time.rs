use std::time::Instant;

use once_cell::sync::Lazy;

use crate::objects::object_native_function::NativeCallable;
use crate::value::{make_number_value, Value};

static PROCESS_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// `clock()` — seconds elapsed since the process epoch, as a double.
pub struct Clock;

impl Clock {
    pub fn new() -> Self {
        Clock
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

impl NativeCallable for Clock {
    fn call(&self, _args: &[Value]) -> Result<Value, String> {
        Ok(make_number_value(PROCESS_EPOCH.elapsed().as_secs_f64()))
    }
}
