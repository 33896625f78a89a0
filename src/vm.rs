use std::io::{self, Write};

use crate::{
    call_frame::CallFrame,
    chunk::OpCode,
    compiler::Parser,
    constants::{FRAMES_MAX, GC_GROWTH_FACTOR, GC_NEXT_GC_INITIAL, MAX_STACK_SIZE},
    gc::{GCStats, GarbageCollector},
    objects::{
        object::{Object, ObjectType},
        object_bound_method::ObjectBoundMethod,
        object_class::ObjectClass,
        object_closure::ObjectClosure,
        object_manager::ObjectManager,
        object_native_function::{NativeCallable, ObjectNativeFunction},
        object_string::ObjectString,
        object_upvalue::ObjectUpvalue,
    },
    std_mod::{
        string::{ByteLen, Len},
        time::Clock,
    },
    table::Table,
    value::{
        as_bool, as_class_object, as_closure_object, as_function_object, as_instance_object,
        as_number, format_value, intern_string, is_bool, is_instance, is_nil, is_number, is_string,
        make_bool_value, make_function_value, make_nil_value, make_number_value, make_object_value,
        make_string_value, Value,
    },
};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InterpretResult {
    InterpretOk,
    InterpretCompileError,
    InterpretRuntimeError,
}

pub struct VM {
    stack: Box<[Value]>,
    stack_top_pos: usize,
    frames: Vec<CallFrame>,
    globals: Table,
    strings: Table,
    init_string: *mut ObjectString,
    // Sorted by descending stack slot address.
    open_upvalues: Vec<*mut ObjectUpvalue>,
    object_manager: ObjectManager,
    gc: GarbageCollector,
    next_gc: usize,
    gc_stress: bool,
    output: Box<dyn Write>,
    last_error: Option<String>,
}

impl VM {
    pub fn new() -> Box<VM> {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Build a VM that writes program output to `output` instead of stdout.
    pub fn with_output(output: Box<dyn Write>) -> Box<VM> {
        let mut vm = Box::new(VM {
            stack: vec![make_nil_value(); MAX_STACK_SIZE].into_boxed_slice(),
            stack_top_pos: 0,
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            strings: Table::new(),
            init_string: std::ptr::null_mut(),
            open_upvalues: vec![],
            object_manager: ObjectManager::new(),
            gc: GarbageCollector::new(),
            next_gc: GC_NEXT_GC_INITIAL,
            gc_stress: cfg!(feature = "gc_stress"),
            output,
            last_error: None,
        });

        vm.init_string = intern_string(&mut vm.object_manager, &mut vm.strings, "init");
        vm.define_native("clock", 0, Clock::new());
        vm.define_native("len", 1, Len);
        vm.define_native("blen", 1, ByteLen);
        vm
    }

    /// Force a collection on every runtime allocation; used by the stress
    /// tests to shake out missing roots.
    pub fn set_gc_stress(&mut self, enabled: bool) {
        self.gc_stress = enabled;
    }

    pub fn stack_depth(&self) -> usize {
        self.stack_top_pos
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn gc_stats(&self) -> &GCStats {
        self.gc.stats()
    }

    fn define_native(&mut self, name: &str, arity: u8, callable: impl NativeCallable + 'static) {
        let name_ptr = intern_string(&mut self.object_manager, &mut self.strings, name);
        let (native, _) =
            self.object_manager
                .alloc_native_function(name.to_string(), arity, callable);
        self.globals
            .set(name_ptr, make_object_value(native as *mut Object));
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        self.last_error = None;

        let function = {
            let mut parser = Parser::new(&mut self.object_manager, &mut self.strings);
            parser.compile(source)
        };
        let function = match function {
            Some(function) => function,
            None => return InterpretResult::InterpretCompileError,
        };

        let (function_ptr, _) = self.object_manager.adopt_function(function);
        self.push(make_function_value(function_ptr));
        let (closure_ptr, _) = self.object_manager.alloc_closure(function_ptr);
        self.pop();
        self.push(make_object_value(closure_ptr as *mut Object));

        if let Err(message) = self.call_value(self.peek_steps(0), 0) {
            self.report_runtime_error(&message);
            return InterpretResult::InterpretRuntimeError;
        }

        match self.execute() {
            Ok(()) => InterpretResult::InterpretOk,
            Err(message) => {
                self.report_runtime_error(&message);
                InterpretResult::InterpretRuntimeError
            }
        }
    }

    fn push(&mut self, value: Value) {
        if self.stack_top_pos < MAX_STACK_SIZE {
            self.stack[self.stack_top_pos] = value;
            self.stack_top_pos += 1;
        } else {
            panic!("Stack overflow");
        }
    }

    fn pop(&mut self) -> Value {
        if self.stack_top_pos > 0 {
            self.stack_top_pos -= 1;
            self.stack[self.stack_top_pos]
        } else {
            panic!("Stack underflow");
        }
    }

    fn peek_steps(&self, distance: usize) -> Value {
        self.stack[self.stack_top_pos - distance - 1]
    }

    fn is_falsey(value: &Value) -> bool {
        is_nil(value) || (is_bool(value) && !as_bool(value))
    }

    fn execute(&mut self) -> Result<(), String> {
        loop {
            debug_feature::trace_instruction(self);

            let byte = self.read_byte();
            let instruction = match OpCode::from_byte(byte) {
                Some(instruction) => instruction,
                None => return Err(format!("Unknown opcode {}.", byte)),
            };

            match instruction {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::ConstantLong => {
                    let constant = self.read_long_constant();
                    self.push(constant);
                }
                OpCode::Nil => {
                    self.push(make_nil_value());
                }
                OpCode::True => {
                    self.push(make_bool_value(true));
                }
                OpCode::False => {
                    self.push(make_bool_value(false));
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame_slots();
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame_slots();
                    let value = self.peek_steps(0);
                    self.stack[base + slot] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            return Err(format!("Undefined variable '{}'.", unsafe {
                                &(*name).content
                            }))
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.peek_steps(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek_steps(0);
                    if self.globals.set(name, value) {
                        // Assignment must not create globals; undo the insert.
                        self.globals.delete(name);
                        return Err(format!("Undefined variable '{}'.", unsafe {
                            &(*name).content
                        }));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.current_frame_closure();
                    let value = unsafe { *(*(&(*closure).upvalues)[slot]).location };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek_steps(0);
                    let closure = self.current_frame_closure();
                    unsafe {
                        *(*(&mut (*closure).upvalues)[slot]).location = value;
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek_steps(0);
                    if !is_instance(&receiver) {
                        return Err("Only instances have properties.".to_string());
                    }

                    let instance = as_instance_object(&receiver);
                    if let Some(value) = unsafe { (*instance).fields.get(name) } {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = unsafe { (*instance).class };
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek_steps(1);
                    if !is_instance(&receiver) {
                        return Err("Only instances have fields.".to_string());
                    }

                    let instance = as_instance_object(&receiver);
                    let value = self.peek_steps(0);
                    unsafe {
                        (*instance).fields.set(name, value);
                    }
                    // Leave the assigned value as the expression result.
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(make_bool_value(a == b));
                }
                OpCode::Greater
                | OpCode::Less
                | OpCode::Subtract
                | OpCode::Multiply
                | OpCode::Divide => {
                    self.binary_op(instruction)?;
                }
                OpCode::Add => {
                    self.add()?;
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(make_bool_value(Self::is_falsey(&value)));
                }
                OpCode::Negate => {
                    if !is_number(&self.peek_steps(0)) {
                        return Err("Operand must be a number.".to_string());
                    }
                    let value = self.pop();
                    self.push(make_number_value(-as_number(&value)));
                }
                OpCode::Print => {
                    let value = self.pop();
                    writeln!(self.output, "{}", format_value(&value))
                        .expect("Failed to write output");
                }
                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.current_frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if Self::is_falsey(&self.peek_steps(0)) {
                        self.current_frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.current_frame_mut().ip -= offset;
                }
                OpCode::Call => {
                    let argument_count = self.read_byte();
                    let callee = self.peek_steps(argument_count as usize);
                    self.call_value(callee, argument_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let argument_count = self.read_byte();
                    self.invoke(name, argument_count)?;
                }
                OpCode::Closure => {
                    let function_value = self.read_constant();
                    let function = as_function_object(&function_value);
                    self.collect_if_needed();
                    let (closure, _) = self.object_manager.alloc_closure(function);
                    self.push(make_object_value(closure as *mut Object));

                    let upvalue_count = unsafe { (*function).upvalue_count };
                    for index in 0..upvalue_count {
                        let is_local = self.read_byte();
                        let slot = self.read_byte() as usize;
                        if is_local == 1 {
                            let base = self.current_frame_slots();
                            let upvalue = self.capture_upvalue(base + slot);
                            unsafe {
                                (&mut (*closure).upvalues)[index] = upvalue;
                            }
                        } else {
                            let enclosing = self.current_frame_closure();
                            unsafe {
                                (&mut (*closure).upvalues)[index] = (&(*enclosing).upvalues)[slot];
                            }
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues_from(self.stack_top_pos - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("Frame stack underflow.");
                    self.close_upvalues_from(frame.slots);

                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }

                    self.stack_top_pos = frame.slots;
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    self.collect_if_needed();
                    let (class, _) = self.object_manager.alloc_class(name);
                    self.push(make_object_value(class as *mut Object));
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek_steps(0);
                    let class = as_class_object(&self.peek_steps(1));
                    unsafe {
                        (*class).methods.set(name, method);
                    }
                    self.pop();
                }
            }
        }
    }

    fn binary_op(&mut self, op_code: OpCode) -> Result<(), String> {
        let b = self.peek_steps(0);
        let a = self.peek_steps(1);
        if !is_number(&a) || !is_number(&b) {
            return Err("Operands must be numbers.".to_string());
        }

        let value_b = as_number(&self.pop());
        let value_a = as_number(&self.pop());
        match op_code {
            OpCode::Greater => self.push(make_bool_value(value_a > value_b)),
            OpCode::Less => self.push(make_bool_value(value_a < value_b)),
            OpCode::Subtract => self.push(make_number_value(value_a - value_b)),
            OpCode::Multiply => self.push(make_number_value(value_a * value_b)),
            OpCode::Divide => self.push(make_number_value(value_a / value_b)),
            _ => unreachable!("Unknown binary operator {}", op_code),
        };

        Ok(())
    }

    // Either operand being a string coerces the whole expression into
    // concatenation; numbers use their canonical printed form.
    fn add(&mut self) -> Result<(), String> {
        let b = self.peek_steps(0);
        let a = self.peek_steps(1);

        if is_string(&a) || is_string(&b) {
            let combination = format!("{}{}", format_value(&a), format_value(&b));
            // Both operands stay pushed until the result string exists.
            self.collect_if_needed();
            let value =
                make_string_value(&mut self.object_manager, &mut self.strings, &combination);
            self.pop();
            self.pop();
            self.push(value);
            Ok(())
        } else if is_number(&a) && is_number(&b) {
            self.pop();
            self.pop();
            self.push(make_number_value(as_number(&a) + as_number(&b)));
            Ok(())
        } else {
            Err("Operands must be numbers or strings.".to_string())
        }
    }

    fn call_value(&mut self, callee: Value, argument_count: u8) -> Result<(), String> {
        if let Value::Object(object) = callee {
            match unsafe { (*object).obj_type } {
                ObjectType::ObjClosure => {
                    return self.call_closure(object as *mut ObjectClosure, argument_count);
                }
                ObjectType::ObjNativeFunction => {
                    let native = object as *mut ObjectNativeFunction;
                    let argument_start = self.stack_top_pos - argument_count as usize;
                    let args: Vec<Value> =
                        self.stack[argument_start..self.stack_top_pos].to_vec();
                    let result = unsafe { (*native).invoke(&args) }?;
                    self.stack_top_pos -= argument_count as usize + 1;
                    self.push(result);
                    return Ok(());
                }
                ObjectType::ObjClass => {
                    let class = object as *mut ObjectClass;
                    self.collect_if_needed();
                    let (instance, _) = self.object_manager.alloc_instance(class);
                    let receiver_slot = self.stack_top_pos - argument_count as usize - 1;
                    self.stack[receiver_slot] = make_object_value(instance as *mut Object);

                    let initializer = unsafe { (*class).methods.get(self.init_string) };
                    return match initializer {
                        Some(initializer) => {
                            self.call_closure(as_closure_object(&initializer), argument_count)
                        }
                        None if argument_count != 0 => {
                            Err(format!("Expected 0 arguments but got {}.", argument_count))
                        }
                        None => Ok(()),
                    };
                }
                ObjectType::ObjBoundMethod => {
                    let bound = object as *mut ObjectBoundMethod;
                    let receiver_slot = self.stack_top_pos - argument_count as usize - 1;
                    self.stack[receiver_slot] = unsafe { (*bound).receiver };
                    return self.call_closure(unsafe { (*bound).method }, argument_count);
                }
                _ => {}
            }
        }

        Err("Can only call functions and classes.".to_string())
    }

    fn call_closure(
        &mut self,
        closure: *mut ObjectClosure,
        argument_count: u8,
    ) -> Result<(), String> {
        let arity = unsafe { (*(*closure).function).arity };
        if argument_count != arity {
            return Err(format!(
                "Expected {} arguments but got {}.",
                arity, argument_count
            ));
        }

        if self.frames.len() == FRAMES_MAX {
            return Err("Stack overflow.".to_string());
        }

        let slots = self.stack_top_pos - argument_count as usize - 1;
        self.frames.push(CallFrame::new(closure, slots));
        Ok(())
    }

    fn invoke(&mut self, name: *mut ObjectString, argument_count: u8) -> Result<(), String> {
        let receiver = self.peek_steps(argument_count as usize);
        if !is_instance(&receiver) {
            return Err("Only instances have methods.".to_string());
        }

        let instance = as_instance_object(&receiver);

        // A field holding a callable shadows any method of the same name.
        if let Some(field) = unsafe { (*instance).fields.get(name) } {
            let receiver_slot = self.stack_top_pos - argument_count as usize - 1;
            self.stack[receiver_slot] = field;
            return self.call_value(field, argument_count);
        }

        let class = unsafe { (*instance).class };
        self.invoke_from_class(class, name, argument_count)
    }

    fn invoke_from_class(
        &mut self,
        class: *mut ObjectClass,
        name: *mut ObjectString,
        argument_count: u8,
    ) -> Result<(), String> {
        let method = unsafe { (*class).methods.get(name) }
            .ok_or_else(|| format!("Undefined property '{}'.", unsafe { &(*name).content }))?;
        self.call_closure(as_closure_object(&method), argument_count)
    }

    fn bind_method(
        &mut self,
        class: *mut ObjectClass,
        name: *mut ObjectString,
    ) -> Result<(), String> {
        let method = unsafe { (*class).methods.get(name) }
            .ok_or_else(|| format!("Undefined property '{}'.", unsafe { &(*name).content }))?;

        self.collect_if_needed();
        let receiver = self.peek_steps(0);
        let (bound, _) = self
            .object_manager
            .alloc_bound_method(receiver, as_closure_object(&method));
        self.pop();
        self.push(make_object_value(bound as *mut Object));
        Ok(())
    }

    /// Reuse the open upvalue for this slot if one exists; otherwise splice a
    /// new one in, keeping the list sorted by descending slot address.
    fn capture_upvalue(&mut self, slot_index: usize) -> *mut ObjectUpvalue {
        let local = unsafe { self.stack.as_mut_ptr().add(slot_index) };

        let mut insert_at = self.open_upvalues.len();
        for (index, &upvalue) in self.open_upvalues.iter().enumerate() {
            let location = unsafe { (*upvalue).location };
            if location == local {
                return upvalue;
            }
            if location < local {
                insert_at = index;
                break;
            }
        }

        self.collect_if_needed();
        let (created, _) = self.object_manager.alloc_upvalue(local);
        self.open_upvalues.insert(insert_at, created);
        created
    }

    /// Close every open upvalue at or above the slot: copy the live value
    /// into the upvalue and retarget it at its own storage.
    fn close_upvalues_from(&mut self, slot_index: usize) {
        let threshold = unsafe { self.stack.as_mut_ptr().add(slot_index) };
        while let Some(&upvalue) = self.open_upvalues.first() {
            if unsafe { (*upvalue).location } < threshold {
                break;
            }
            unsafe {
                (*upvalue).close();
            }
            self.open_upvalues.remove(0);
        }
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("No call frame.")
    }

    fn current_frame_slots(&self) -> usize {
        self.frames.last().expect("No call frame.").slots
    }

    fn current_frame_closure(&self) -> *mut ObjectClosure {
        self.frames.last().expect("No call frame.").closure
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("No call frame.");
        let byte = unsafe { (*(*frame.closure).function).chunk.read(frame.ip) };
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let high = self.read_byte() as u16;
        let low = self.read_byte() as u16;
        (high << 8) | low
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.constant_at(index)
    }

    fn read_long_constant(&mut self) -> Value {
        let index = ((self.read_byte() as usize) << 16)
            | ((self.read_byte() as usize) << 8)
            | self.read_byte() as usize;
        self.constant_at(index)
    }

    fn constant_at(&self, index: usize) -> Value {
        let frame = self.frames.last().expect("No call frame.");
        unsafe { *(*(*frame.closure).function).chunk.get_constant(index) }
    }

    fn read_string(&mut self) -> *mut ObjectString {
        let value = self.read_constant();
        debug_assert!(is_string(&value));
        crate::value::as_string_object(&value)
    }

    fn collect_if_needed(&mut self) {
        if self.gc_stress || self.object_manager.bytes_allocated() > self.next_gc {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        let before = self.object_manager.bytes_allocated();

        self.gc.prepare_collection(&self.object_manager);
        self.gc.mark_roots(
            &self.stack[..self.stack_top_pos],
            &self.globals,
            &self.frames,
            &self.open_upvalues,
            self.init_string,
        );
        self.gc.trace_references();
        self.gc.remove_white_strings(&mut self.strings);
        let freed = self.gc.sweep(&mut self.object_manager);

        let after = self.object_manager.bytes_allocated();
        self.next_gc = after * GC_GROWTH_FACTOR;
        self.gc.record_cycle(before, freed, after, self.next_gc);
    }

    fn report_runtime_error(&mut self, message: &str) {
        let line = self
            .frames
            .last()
            .and_then(|frame| unsafe {
                (*frame.function()).chunk.line_of(frame.ip.saturating_sub(1))
            })
            .unwrap_or(0);
        eprintln!("\x1b[38;5;1m[RuntimeError at line {}] {}\x1b[0m", line, message);

        for frame in self.frames.iter().rev() {
            let function = frame.function();
            let line = unsafe { (*function).chunk.line_of(frame.ip.saturating_sub(1)) }.unwrap_or(0);
            let name = unsafe { (*function).name };
            if name.is_null() {
                eprintln!("[line {}] in script", line);
            } else {
                eprintln!("[line {}] in {}()", line, unsafe { &(*name).content });
            }
        }

        self.last_error = Some(message.to_string());
        self.reset_stack();
    }

    fn reset_stack(&mut self) {
        self.stack_top_pos = 0;
        self.frames.clear();
        self.open_upvalues.clear();
    }
}

#[cfg(feature = "debug_trace_execution")]
mod debug_feature {
    use super::*;
    use crate::debug;
    use crate::value::print_value;

    pub fn trace_instruction(vm: &VM) {
        print!("{: >17}", "");
        for slot in &vm.stack[0..vm.stack_top_pos] {
            print!(" [ ");
            print_value(slot);
            print!(" ]");
        }
        println!();

        if let Some(frame) = vm.frames.last() {
            let chunk = unsafe { &(*frame.function()).chunk };
            debug::disassemble_instruction(chunk, frame.ip);
        }
    }
}

#[cfg(not(feature = "debug_trace_execution"))]
mod debug_feature {
    use super::*;

    pub fn trace_instruction(_vm: &VM) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_expression() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("print !(5 - 4 > 3 * 2 == !nil);"),
            InterpretResult::InterpretOk
        );
    }

    #[test]
    fn test_string_concatenate() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var s = \"st\" + \"ri\" + \"ng\"; print s == \"string\";"),
            InterpretResult::InterpretOk
        );
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn test_undefined_global_reports_name() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("print missing;"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(vm.last_error(), Some("Undefined variable 'missing'."));
    }

    #[test]
    fn test_assignment_to_undefined_global_fails() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("missing = 1;"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(vm.last_error(), Some("Undefined variable 'missing'."));
        // The failed assignment must not have defined the global.
        assert_eq!(
            vm.interpret("print missing;"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_vm_is_reusable_after_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("-\"x\";"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(vm.stack_depth(), 0);
        assert_eq!(vm.interpret("print 1 + 2;"), InterpretResult::InterpretOk);
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn test_compile_error_status() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var = 1;"),
            InterpretResult::InterpretCompileError
        );
    }

    #[test]
    fn test_open_upvalues_stay_sorted_and_deduplicated() {
        let mut vm = VM::new();
        // Give the captured slots live values.
        for index in 0..8 {
            vm.push(make_number_value(index as f64));
        }

        let first = vm.capture_upvalue(2);
        let second = vm.capture_upvalue(5);
        let third = vm.capture_upvalue(0);
        let fourth = vm.capture_upvalue(7);
        assert_eq!(vm.capture_upvalue(5), second, "same slot shares one cell");

        assert_eq!(vm.open_upvalues, vec![fourth, second, first, third]);
        let locations: Vec<_> = vm
            .open_upvalues
            .iter()
            .map(|upvalue| unsafe { (**upvalue).location })
            .collect();
        for window in locations.windows(2) {
            assert!(window[0] > window[1], "list must descend by slot address");
        }

        // Closing at slot 5 removes exactly the prefix at or above it.
        vm.close_upvalues_from(5);
        assert_eq!(vm.open_upvalues, vec![first, third]);

        // The closed cells now own their values.
        unsafe {
            assert_eq!(*(*fourth).location, make_number_value(7.0));
            assert_eq!(*(*second).location, make_number_value(5.0));
        }

        vm.close_upvalues_from(0);
        assert!(vm.open_upvalues.is_empty());
        vm.reset_stack();
    }

    #[test]
    fn test_closed_upvalue_preserves_value_after_slot_reuse() {
        let mut vm = VM::new();
        vm.push(make_number_value(41.0));
        let upvalue = vm.capture_upvalue(0);
        vm.close_upvalues_from(0);

        // Reuse the stack slot for something else entirely.
        vm.pop();
        vm.push(make_bool_value(false));

        unsafe {
            assert_eq!(*(*upvalue).location, make_number_value(41.0));
        }
        vm.reset_stack();
    }

    #[test]
    fn test_gc_collects_between_runs() {
        let mut vm = VM::new();
        vm.set_gc_stress(true);
        assert_eq!(
            vm.interpret(
                "var kept = \"kept\";
                {
                    var temporary = \"temp-\" + \"orary\";
                    print temporary;
                }
                print kept;"
            ),
            InterpretResult::InterpretOk
        );
        assert!(vm.gc_stats().cycles > 0);
    }
}
