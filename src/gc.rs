use std::collections::HashSet;

use crate::{
    call_frame::CallFrame,
    objects::{
        object::{Object, ObjectType},
        object_manager::ObjectManager,
        object_string::ObjectString,
        object_upvalue::ObjectUpvalue,
    },
    table::Table,
    value::{as_object, is_object, Value},
};

/// Tri-color mark-sweep over the object manager's heap. White holds the
/// candidates, gray the marked-but-unscanned worklist, black the scanned
/// survivors; whatever is still white after tracing is garbage.
pub struct GarbageCollector {
    white_set: HashSet<*mut Object>,
    gray_set: HashSet<*mut Object>,
    black_set: HashSet<*mut Object>,
    stats: GCStats,
}

/// Aggregated GC statistics (does not include currently-live total bytes; VM tracks that).
#[derive(Default, Debug, Clone)]
pub struct GCStats {
    pub cycles: u64,
    pub total_freed_bytes: usize,
    pub last_freed_bytes: usize,
    pub last_before_bytes: usize,
    pub last_after_bytes: usize,
    pub last_next_trigger_bytes: usize,
}

impl GCStats {
    fn record(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.cycles += 1;
        self.total_freed_bytes += freed;
        self.last_freed_bytes = freed;
        self.last_before_bytes = before;
        self.last_after_bytes = after;
        self.last_next_trigger_bytes = next_trigger;
    }
}

// Lightweight tracing macro (only active with gc_debug feature)
#[cfg(feature = "gc_debug")]
macro_rules! gc_trace { ($($arg:tt)*) => { eprintln!("[gc-trace] {}", format_args!($($arg)*)); } }
#[cfg(not(feature = "gc_debug"))]
macro_rules! gc_trace {
    ($($arg:tt)*) => {};
}

impl GarbageCollector {
    pub fn new() -> Self {
        Self {
            white_set: HashSet::new(),
            gray_set: HashSet::new(),
            black_set: HashSet::new(),
            stats: GCStats::default(),
        }
    }

    // Initialize the collector with all objects in white set
    pub fn prepare_collection(&mut self, object_manager: &ObjectManager) {
        self.reset();
        for &obj_ptr in object_manager.iter() {
            self.white_set.insert(obj_ptr);
        }
    }

    // Mark a single object as gray (moves from white to gray set)
    pub fn mark_object(&mut self, obj: *mut Object) {
        if obj.is_null() || self.black_set.contains(&obj) {
            return;
        }

        if self.white_set.remove(&obj) {
            self.gray_set.insert(obj);
            gc_trace!("mark_object enqueue gray ptr={:p}", obj);
        }
    }

    // Mark a value (if it's an object)
    pub fn mark_value(&mut self, value: &Value) {
        if !is_object(value) {
            return;
        }
        self.mark_object(as_object(value));
    }

    fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key as *mut Object);
            self.mark_value(&value);
        }
    }

    /// Paint the roots gray: every live stack slot, every frame's closure,
    /// every open upvalue, the globals table (keys and values), and the
    /// interned `"init"` name. The strings intern table is deliberately NOT a
    /// root; it holds its keys weakly.
    pub fn mark_roots(
        &mut self,
        stack: &[Value],
        globals: &Table,
        frames: &[CallFrame],
        open_upvalues: &[*mut ObjectUpvalue],
        init_string: *mut ObjectString,
    ) {
        for value in stack {
            self.mark_value(value);
        }

        self.mark_table(globals);

        for frame in frames {
            self.mark_object(frame.closure as *mut Object);
        }

        for upvalue in open_upvalues {
            self.mark_object(*upvalue as *mut Object);
        }

        self.mark_object(init_string as *mut Object);
    }

    // Process gray objects until none remain
    pub fn trace_references(&mut self) {
        while !self.gray_set.is_empty() {
            let obj = *self.gray_set.iter().next().unwrap();
            self.gray_set.remove(&obj);
            self.black_set.insert(obj);

            unsafe {
                gc_trace!("trace gray -> black ptr={:p}", obj);
                self.blacken_object(obj);
            }
        }
    }

    // Mark all references in an object
    unsafe fn blacken_object(&mut self, object: *mut Object) {
        match (*object).obj_type {
            ObjectType::ObjClosure => {
                let closure = (*object).as_closure();
                self.mark_object(closure.function as *mut Object);
                for upvalue in &closure.upvalues {
                    self.mark_object(*upvalue as *mut Object);
                }
            }
            ObjectType::ObjFunction => {
                let function = (*object).as_function();
                self.mark_object(function.name as *mut Object);
                for constant in function.chunk.iter_constants() {
                    self.mark_value(constant);
                }
            }
            ObjectType::ObjUpvalue => {
                let upvalue = (*object).as_upvalue();
                self.mark_value(&*upvalue.location);
            }
            ObjectType::ObjClass => {
                let class = (*object).as_class();
                self.mark_object(class.name as *mut Object);
                self.mark_table(&class.methods);
            }
            ObjectType::ObjInstance => {
                let instance = (*object).as_instance();
                self.mark_object(instance.class as *mut Object);
                self.mark_table(&instance.fields);
            }
            ObjectType::ObjBoundMethod => {
                let bound = (*object).as_bound_method();
                self.mark_value(&bound.receiver);
                self.mark_object(bound.method as *mut Object);
            }
            // Strings and natives have no outgoing references.
            ObjectType::ObjString | ObjectType::ObjNativeFunction => {}
        }
    }

    /// The intern table holds its keys weakly: entries whose string is about
    /// to be swept must be removed first so no dangling key survives.
    pub fn remove_white_strings(&self, strings: &mut Table) {
        let dead: Vec<*mut ObjectString> = strings
            .iter()
            .filter(|(key, _)| self.white_set.contains(&(*key as *mut Object)))
            .map(|(key, _)| key)
            .collect();
        for key in dead {
            gc_trace!("intern table drops ptr={:p}", key);
            strings.delete(key);
        }
    }

    // Sweep phase - frees everything still white and returns the bytes released
    pub fn sweep(&mut self, object_manager: &mut ObjectManager) -> usize {
        let mut freed_bytes = 0;
        for &obj_ptr in self.white_set.iter() {
            freed_bytes += object_manager.free_object(obj_ptr);
        }
        self.white_set.clear();
        gc_trace!("sweep freed_bytes={}", freed_bytes);
        freed_bytes
    }

    // Reset collector state
    pub fn reset(&mut self) {
        self.white_set.clear();
        self.gray_set.clear();
        self.black_set.clear();
    }

    /// Record a completed GC cycle (invoked by VM which knows bytes before/after & threshold)
    pub fn record_cycle(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.stats.record(before, freed, after, next_trigger);
        gc_trace!(
            "cycle summary cycles={} freed={} before={} after={} next_trigger={}",
            self.stats.cycles,
            freed,
            before,
            after,
            next_trigger
        );
    }

    pub fn stats(&self) -> &GCStats {
        &self.stats
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        GarbageCollector::new()
    }
}
