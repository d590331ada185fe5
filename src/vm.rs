use crate::call_frame::CallFrame;
use crate::chunk::{Chunk, OpCode};
use crate::compiler::Parser;
use crate::constants::{FRAMES_MAX, MAX_STACK_SIZE};
use crate::gc::{gc_trace, GarbageCollector};
use crate::objects::object::{NativeObject, Object, ObjectType};
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::std_mod::time::ClockTime;
use crate::table::Table;
use crate::value::{
    as_bool, as_bound_method_object, as_class_object, as_closure_object, as_function_object,
    as_instance_object, as_native_object, as_number, as_object, as_string_object, is_bool,
    is_instance, is_nil, is_number, is_object, is_string, make_bool_value, make_nil_value,
    make_number_value, make_object_value, make_string_value, print_value, Value,
};

pub struct VM {
    stack: Vec<Value>,
    stack_top_pos: usize,
    frames: Vec<CallFrame>,
    globals: Table,
    intern_strings: Table,
    // Head of the open-upvalue list, sorted by decreasing slot address.
    open_upvalues: *mut ObjectUpvalue,
    object_manager: ObjectManager,
    gc: GarbageCollector,
    init_string: *mut ObjectString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    InterpretOk,
    InterpretCompileError,
    InterpretRuntimeError,
}

impl VM {
    pub fn new() -> Box<VM> {
        let mut vm = Box::new(VM {
            stack: vec![make_nil_value(); MAX_STACK_SIZE],
            stack_top_pos: 0,
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            intern_strings: Table::new(),
            open_upvalues: std::ptr::null_mut(),
            object_manager: ObjectManager::new(),
            gc: GarbageCollector::new(),
            init_string: std::ptr::null_mut(),
        });

        // Cached so class calls can look up initializers by identity.
        let init = make_string_value(&mut vm.object_manager, &mut vm.intern_strings, "init");
        vm.init_string = as_string_object(&init);

        vm.define_native("clock", 0, ClockTime::new());
        vm
    }

    fn define_native(
        &mut self,
        name: &str,
        arity: usize,
        native_object: impl NativeObject + 'static,
    ) {
        let name_value = make_string_value(&mut self.object_manager, &mut self.intern_strings, name);
        let (native, _) =
            self.object_manager
                .alloc_native_function(name.to_string(), arity, native_object);
        self.globals
            .set(as_string_object(&name_value), make_object_value(native as *mut Object));
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = {
            let mut parser = Parser::new(&mut self.object_manager, &mut self.intern_strings);
            match parser.compile(source) {
                Some(function) => function,
                None => return InterpretResult::InterpretCompileError,
            }
        };

        // Root the function across the closure allocation.
        self.push(make_object_value(function as *mut Object));
        self.collect_if_needed();
        let (closure, _) = self.object_manager.alloc_closure(function);
        self.pop();
        self.push(make_object_value(closure as *mut Object));

        if !self.call(closure, 0) {
            return InterpretResult::InterpretRuntimeError;
        }
        self.run()
    }

    fn push(&mut self, value: Value) {
        if self.stack_top_pos >= MAX_STACK_SIZE {
            panic!("value stack overflow");
        }
        self.stack[self.stack_top_pos] = value;
        self.stack_top_pos += 1;
    }

    fn pop(&mut self) -> Value {
        debug_assert!(self.stack_top_pos > 0, "value stack underflow");
        self.stack_top_pos -= 1;
        self.stack[self.stack_top_pos]
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack_top_pos - distance - 1]
    }

    fn is_falsey(value: &Value) -> bool {
        is_nil(value) || (is_bool(value) && !as_bool(value))
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    fn current_chunk(&self) -> &Chunk {
        unsafe { &(*self.current_frame().function()).chunk }
    }

    fn read_byte(&mut self) -> u8 {
        let ip = self.current_frame().ip;
        let byte = self.current_chunk().code()[ip];
        self.current_frame_mut().ip = ip + 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let high = self.read_byte() as u16;
        let low = self.read_byte() as u16;
        (high << 8) | low
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        *self.current_chunk().get_constant(index)
    }

    fn read_string_constant(&mut self) -> *mut ObjectString {
        as_string_object(&self.read_constant())
    }

    fn run(&mut self) -> InterpretResult {
        loop {
            debug_feature::trace_execution(self);

            let instruction = OpCode::from_byte(self.read_byte());

            match instruction {
                Some(OpCode::Constant) => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                Some(OpCode::Nil) => self.push(make_nil_value()),
                Some(OpCode::True) => self.push(make_bool_value(true)),
                Some(OpCode::False) => self.push(make_bool_value(false)),
                Some(OpCode::Pop) => {
                    self.pop();
                }
                Some(OpCode::GetLocal) => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().stack_base;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                Some(OpCode::SetLocal) => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().stack_base;
                    // Assignment is an expression; the value stays put.
                    self.stack[base + slot] = self.peek(0);
                }
                Some(OpCode::GetGlobal) => {
                    let name = self.read_string_constant();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            let message =
                                format!("Undefined variable '{}'.", unsafe { &(*name).content });
                            return self.runtime_error(&message);
                        }
                    }
                }
                Some(OpCode::DefineGlobal) => {
                    let name = self.read_string_constant();
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                Some(OpCode::SetGlobal) => {
                    let name = self.read_string_constant();
                    let value = self.peek(0);
                    // Assignment never creates a global; undo the insert.
                    if self.globals.set(name, value) {
                        self.globals.delete(name);
                        let message =
                            format!("Undefined variable '{}'.", unsafe { &(*name).content });
                        return self.runtime_error(&message);
                    }
                }
                Some(OpCode::GetUpvalue) => {
                    let slot = self.read_byte() as usize;
                    let closure = self.current_frame().closure;
                    let value = unsafe { *(*(&(*closure).upvalues)[slot]).location };
                    self.push(value);
                }
                Some(OpCode::SetUpvalue) => {
                    let slot = self.read_byte() as usize;
                    let closure = self.current_frame().closure;
                    let value = self.peek(0);
                    unsafe {
                        *(*(&mut (*closure).upvalues)[slot]).location = value;
                    }
                }
                Some(OpCode::GetProperty) => {
                    let name = self.read_string_constant();
                    let receiver = self.peek(0);
                    if !is_instance(&receiver) {
                        return self.runtime_error("Only instances have properties.");
                    }
                    let instance = as_instance_object(&receiver);
                    if let Some(value) = unsafe { (*instance).fields.get(name) } {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = unsafe { (*instance).class };
                        if !self.bind_method(class, name) {
                            return InterpretResult::InterpretRuntimeError;
                        }
                    }
                }
                Some(OpCode::SetProperty) => {
                    let name = self.read_string_constant();
                    let receiver = self.peek(1);
                    if !is_instance(&receiver) {
                        return self.runtime_error("Only instances have fields.");
                    }
                    let instance = as_instance_object(&receiver);
                    unsafe {
                        (*instance).fields.set(name, self.peek(0));
                    }
                    // Leave the assigned value, drop the instance under it.
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                Some(OpCode::Equal) => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(make_bool_value(a == b));
                }
                Some(OpCode::Greater) => {
                    if !self.binary_op(OpCode::Greater) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                Some(OpCode::Less) => {
                    if !self.binary_op(OpCode::Less) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                Some(OpCode::Add) => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if is_string(&a) && is_string(&b) {
                        self.concatenate();
                    } else if is_number(&a) && is_number(&b) {
                        let b = as_number(&self.pop());
                        let a = as_number(&self.pop());
                        self.push(make_number_value(a + b));
                    } else {
                        return self.runtime_error("Operands must be two numbers or two strings.");
                    }
                }
                Some(OpCode::Subtract) => {
                    if !self.binary_op(OpCode::Subtract) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                Some(OpCode::Multiply) => {
                    if !self.binary_op(OpCode::Multiply) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                Some(OpCode::Divide) => {
                    if !self.binary_op(OpCode::Divide) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                Some(OpCode::Not) => {
                    let value = self.pop();
                    self.push(make_bool_value(Self::is_falsey(&value)));
                }
                Some(OpCode::Negate) => {
                    if !is_number(&self.peek(0)) {
                        return self.runtime_error("Operand must be a number.");
                    }
                    let value = as_number(&self.pop());
                    self.push(make_number_value(-value));
                }
                Some(OpCode::Print) => {
                    let value = self.pop();
                    print_value(&value);
                    println!();
                }
                Some(OpCode::Jump) => {
                    let offset = self.read_u16() as usize;
                    self.current_frame_mut().ip += offset;
                }
                Some(OpCode::JumpIfFalse) => {
                    let offset = self.read_u16() as usize;
                    // Peek, not pop: the emitting side pops explicitly.
                    if Self::is_falsey(&self.peek(0)) {
                        self.current_frame_mut().ip += offset;
                    }
                }
                Some(OpCode::Loop) => {
                    let offset = self.read_u16() as usize;
                    self.current_frame_mut().ip -= offset;
                }
                Some(OpCode::Call) => {
                    let argument_count = self.read_byte() as usize;
                    let callee = self.peek(argument_count);
                    if !self.call_value(callee, argument_count) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                Some(OpCode::Invoke) => {
                    let name = self.read_string_constant();
                    let argument_count = self.read_byte() as usize;
                    if !self.invoke(name, argument_count) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                Some(OpCode::Closure) => {
                    let function = as_function_object(&self.read_constant());
                    self.collect_if_needed();
                    let (closure, _) = self.object_manager.alloc_closure(function);
                    // Root the closure before capture can allocate upvalues.
                    self.push(make_object_value(closure as *mut Object));
                    let upvalue_count = unsafe { (*function).upvalue_count };
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte();
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local == 1 {
                            let base = self.current_frame().stack_base;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing = self.current_frame().closure;
                            unsafe { (&(*enclosing).upvalues)[index] }
                        };
                        unsafe {
                            (*closure).upvalues.push(upvalue);
                        }
                    }
                }
                Some(OpCode::CloseUpvalue) => {
                    let top = self.stack_top_pos - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                Some(OpCode::Return) => {
                    let result = self.pop();
                    let base = self.current_frame().stack_base;
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        // The slot holding the script closure itself.
                        self.pop();
                        return InterpretResult::InterpretOk;
                    }
                    self.stack_top_pos = base;
                    self.push(result);
                }
                Some(OpCode::Class) => {
                    let name = self.read_string_constant();
                    let class_name = unsafe { (*name).content.clone() };
                    self.collect_if_needed();
                    let (class, _) = self.object_manager.alloc_class(class_name);
                    self.push(make_object_value(class as *mut Object));
                }
                Some(OpCode::Method) => {
                    let name = self.read_string_constant();
                    let method = self.peek(0);
                    let class = as_class_object(&self.peek(1));
                    unsafe {
                        (*class).methods.set(name, method);
                    }
                    self.pop();
                }
                None => return self.runtime_error("Unknown opcode."),
            }
        }
    }

    fn binary_op(&mut self, op_code: OpCode) -> bool {
        if !is_number(&self.peek(0)) || !is_number(&self.peek(1)) {
            self.runtime_error("Operands must be numbers.");
            return false;
        }

        let b = as_number(&self.pop());
        let a = as_number(&self.pop());
        let result = match op_code {
            OpCode::Greater => make_bool_value(a > b),
            OpCode::Less => make_bool_value(a < b),
            OpCode::Subtract => make_number_value(a - b),
            OpCode::Multiply => make_number_value(a * b),
            OpCode::Divide => make_number_value(a / b),
            _ => unreachable!("not a binary operator: {}", op_code),
        };
        self.push(result);
        true
    }

    fn concatenate(&mut self) {
        let b = as_string_object(&self.peek(0));
        let a = as_string_object(&self.peek(1));
        let combined = unsafe {
            let mut combined =
                String::with_capacity((&(*a).content).len() + (&(*b).content).len());
            combined.push_str((*a).content.as_str());
            combined.push_str((*b).content.as_str());
            combined
        };
        // Operands stay on the stack across a potential collection.
        self.collect_if_needed();
        let value = make_string_value(&mut self.object_manager, &mut self.intern_strings, &combined);
        self.pop();
        self.pop();
        self.push(value);
    }

    fn call_value(&mut self, callee: Value, argument_count: usize) -> bool {
        if is_object(&callee) {
            match unsafe { (*as_object(&callee)).obj_type } {
                ObjectType::ObjBoundMethod => {
                    let bound = as_bound_method_object(&callee);
                    let slot = self.stack_top_pos - argument_count - 1;
                    self.stack[slot] = unsafe { (*bound).receiver };
                    return self.call(unsafe { (*bound).method }, argument_count);
                }
                ObjectType::ObjClass => {
                    let class = as_class_object(&callee);
                    self.collect_if_needed();
                    let (instance, _) = self.object_manager.alloc_instance(class);
                    let slot = self.stack_top_pos - argument_count - 1;
                    self.stack[slot] = make_object_value(instance as *mut Object);
                    if let Some(initializer) = unsafe { (*class).methods.get(self.init_string) } {
                        return self.call(as_closure_object(&initializer), argument_count);
                    }
                    if argument_count != 0 {
                        let message = format!("Expected 0 arguments but got {}.", argument_count);
                        self.runtime_error(&message);
                        return false;
                    }
                    return true;
                }
                ObjectType::ObjClosure => {
                    return self.call(as_closure_object(&callee), argument_count)
                }
                ObjectType::ObjNativeFunction => {
                    let native = as_native_object(&callee);
                    let arity = unsafe { (*native).arity };
                    if argument_count != arity {
                        let message =
                            format!("Expected {} arguments but got {}.", arity, argument_count);
                        self.runtime_error(&message);
                        return false;
                    }
                    let result = {
                        let args = &self.stack
                            [self.stack_top_pos - argument_count..self.stack_top_pos];
                        unsafe { (*native).invoke(args) }
                    };
                    return match result {
                        Ok(value) => {
                            self.stack_top_pos -= argument_count + 1;
                            self.push(value);
                            true
                        }
                        Err(message) => {
                            self.runtime_error(&message);
                            false
                        }
                    };
                }
                _ => {}
            }
        }

        self.runtime_error("Can only call functions and classes.");
        false
    }

    fn call(&mut self, closure: *mut ObjectClosure, argument_count: usize) -> bool {
        let arity = unsafe { (*(*closure).function).arity };
        if argument_count != arity {
            let message = format!("Expected {} arguments but got {}.", arity, argument_count);
            self.runtime_error(&message);
            return false;
        }

        if self.frames.len() == FRAMES_MAX {
            self.runtime_error("Stack overflow.");
            return false;
        }

        self.frames
            .push(CallFrame::new(closure, self.stack_top_pos - argument_count - 1));
        true
    }

    fn invoke(&mut self, name: *mut ObjectString, argument_count: usize) -> bool {
        let receiver = self.peek(argument_count);
        if !is_instance(&receiver) {
            self.runtime_error("Only instances have methods.");
            return false;
        }
        let instance = as_instance_object(&receiver);

        // A field shadowing the method name wins, exactly as with a plain
        // property read followed by a call.
        if let Some(field) = unsafe { (*instance).fields.get(name) } {
            let slot = self.stack_top_pos - argument_count - 1;
            self.stack[slot] = field;
            return self.call_value(field, argument_count);
        }

        let class = unsafe { (*instance).class };
        self.invoke_from_class(class, name, argument_count)
    }

    fn invoke_from_class(
        &mut self,
        class: *mut ObjectClass,
        name: *mut ObjectString,
        argument_count: usize,
    ) -> bool {
        match unsafe { (*class).methods.get(name) } {
            Some(method) => self.call(as_closure_object(&method), argument_count),
            None => {
                let message = format!("Undefined property '{}'.", unsafe { &(*name).content });
                self.runtime_error(&message);
                false
            }
        }
    }

    fn bind_method(&mut self, class: *mut ObjectClass, name: *mut ObjectString) -> bool {
        let method = match unsafe { (*class).methods.get(name) } {
            Some(method) => method,
            None => {
                let message = format!("Undefined property '{}'.", unsafe { &(*name).content });
                self.runtime_error(&message);
                return false;
            }
        };

        self.collect_if_needed();
        let receiver = self.peek(0);
        let (bound, _) = self
            .object_manager
            .alloc_bound_method(receiver, as_closure_object(&method));
        self.pop();
        self.push(make_object_value(bound as *mut Object));
        true
    }

    fn capture_upvalue(&mut self, slot: usize) -> *mut ObjectUpvalue {
        self.collect_if_needed();
        let location = &mut self.stack[slot] as *mut Value;
        unsafe {
            let mut prev: *mut ObjectUpvalue = std::ptr::null_mut();
            let mut current = self.open_upvalues;
            while !current.is_null() && (*current).location > location {
                prev = current;
                current = (*current).next_open;
            }

            // Two closures over the same variable share one cell.
            if !current.is_null() && (*current).location == location {
                return current;
            }

            let (upvalue, _) = self.object_manager.alloc_upvalue(location);
            (*upvalue).next_open = current;
            if prev.is_null() {
                self.open_upvalues = upvalue;
            } else {
                (*prev).next_open = upvalue;
            }
            upvalue
        }
    }

    fn close_upvalues(&mut self, last: usize) {
        let last_location = &mut self.stack[last] as *mut Value;
        unsafe {
            while !self.open_upvalues.is_null()
                && (*self.open_upvalues).location >= last_location
            {
                let upvalue = self.open_upvalues;
                (*upvalue).closed = *(*upvalue).location;
                (*upvalue).location = &mut (*upvalue).closed as *mut Value;
                self.open_upvalues = (*upvalue).next_open;
                (*upvalue).next_open = std::ptr::null_mut();
            }
        }
    }

    fn runtime_error(&mut self, message: &str) -> InterpretResult {
        eprintln!("{}", message);

        for frame in self.frames.iter().rev() {
            let function = unsafe { &*frame.function() };
            let line = function
                .chunk
                .read_line_from_offset(frame.ip.saturating_sub(1))
                .unwrap_or(0);
            if function.name.is_empty() {
                eprintln!("[line {}] in script", line);
            } else {
                eprintln!("[line {}] in {}()", line, function.name);
            }
        }

        self.reset_stack();
        InterpretResult::InterpretRuntimeError
    }

    fn reset_stack(&mut self) {
        self.stack_top_pos = 0;
        self.frames.clear();
        self.open_upvalues = std::ptr::null_mut();
    }

    fn collect_if_needed(&mut self) {
        if self.object_manager.should_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        let before = self.object_manager.bytes_allocated();
        gc_trace!("gc begin, {} bytes live", before);

        self.gc.mark_roots(
            &self.stack[..self.stack_top_pos],
            &self.globals,
            &self.frames,
            self.open_upvalues,
        );
        self.gc.mark_object(self.init_string as *mut Object);
        self.gc.trace_references();

        // Weak keys: unmarked strings leave the intern table before sweep
        // frees them.
        self.intern_strings.remove_white();

        let freed = self.gc.sweep(&mut self.object_manager);
        self.object_manager.update_next_gc();
        let after = self.object_manager.bytes_allocated();
        self.gc
            .record_cycle(before, freed, after, self.object_manager.next_gc());
        gc_trace!("gc end, {} bytes live", after);
    }
}

#[cfg(feature = "debug_trace_execution")]
mod debug_feature {
    use super::VM;
    use crate::debug;
    use crate::value::print_value;

    pub fn trace_execution(vm: &VM) {
        print!("          ");
        for slot in &vm.stack[0..vm.stack_top_pos] {
            print!("[ ");
            print_value(slot);
            print!(" ]");
        }
        println!();
        debug::disassemble_instruction(vm.current_chunk(), vm.current_frame().ip);
    }
}

#[cfg(not(feature = "debug_trace_execution"))]
mod debug_feature {
    use super::VM;

    pub fn trace_execution(_vm: &VM) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_string::hash_string;
    use crate::value::{format_value, is_closure, is_string};

    fn global_value(vm: &VM, name: &str) -> Option<Value> {
        let key = vm
            .intern_strings
            .find_string(name, hash_string(name.as_bytes()));
        if key.is_null() {
            return None;
        }
        vm.globals.get(key)
    }

    fn global_number(vm: &VM, name: &str) -> f64 {
        let value = global_value(vm, name).expect("global should be defined");
        assert!(is_number(&value), "expected a number");
        as_number(&value)
    }

    fn run_ok(vm: &mut VM, source: &str) {
        assert_eq!(vm.interpret(source), InterpretResult::InterpretOk);
        assert_eq!(vm.stack_top_pos, 0, "stack should be empty after a run");
        assert!(vm.frames.is_empty(), "no frames should survive a run");
    }

    #[test]
    fn test_print_arithmetic() {
        let mut vm = VM::new();
        run_ok(&mut vm, "print 1 + 2;");
    }

    #[test]
    fn test_arithmetic_follows_ieee_doubles() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "var a = 3 * 4 + 0.5; var b = 1 / 3; var c = 2 - 5; var d = 10 / 4;",
        );
        assert_eq!(global_number(&vm, "a"), 12.5);
        assert_eq!(global_number(&vm, "b"), 1.0 / 3.0);
        assert_eq!(global_number(&vm, "c"), -3.0);
        assert_eq!(global_number(&vm, "d"), 2.5);
    }

    #[test]
    fn test_comparison_expression() {
        let mut vm = VM::new();
        run_ok(&mut vm, "var r = !(5 - 4 > 3 * 2 == !nil);");
        let r = global_value(&vm, "r").unwrap();
        assert!(is_bool(&r));
        assert!(as_bool(&r));
    }

    #[test]
    fn test_string_concatenation_interns_result() {
        let mut vm = VM::new();
        run_ok(&mut vm, "var a = \"he\"; var b = \"llo\"; var c = a + b; var d = \"hello\";");
        let c = global_value(&vm, "c").unwrap();
        let d = global_value(&vm, "d").unwrap();
        assert!(is_string(&c));
        assert_eq!(format_value(&c), "hello");
        // Interning makes the concatenation and the literal one object.
        assert!(c == d);
    }

    #[test]
    fn test_concatenation_with_empty_string_is_identity() {
        let mut vm = VM::new();
        run_ok(&mut vm, "var s = \"some text\"; var t = s + \"\";");
        let s = global_value(&vm, "s").unwrap();
        let t = global_value(&vm, "t").unwrap();
        assert!(s == t);
    }

    #[test]
    fn test_adding_number_and_string_fails() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("print 1 + \"a\";"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_globals_survive_runtime_errors() {
        let mut vm = VM::new();
        run_ok(&mut vm, "var kept = 7;");
        assert_eq!(
            vm.interpret("kept + nil;"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(global_number(&vm, "kept"), 7.0);
    }

    #[test]
    fn test_undefined_variable() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("print missing;"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(
            vm.interpret("missing = 1;"),
            InterpretResult::InterpretRuntimeError
        );
        assert!(global_value(&vm, "missing").is_none());
    }

    #[test]
    fn test_truthiness_round_trip() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "var a = !!nil; var b = !!0; var c = !!\"\"; var d = !!false;",
        );
        assert!(!as_bool(&global_value(&vm, "a").unwrap()));
        assert!(as_bool(&global_value(&vm, "b").unwrap()));
        assert!(as_bool(&global_value(&vm, "c").unwrap()));
        assert!(!as_bool(&global_value(&vm, "d").unwrap()));
    }

    #[test]
    fn test_while_loop() {
        let mut vm = VM::new();
        run_ok(&mut vm, "var sum = 0; var i = 0; while (i < 3) { sum = sum + i; i = i + 1; }");
        assert_eq!(global_number(&vm, "sum"), 3.0);
        assert_eq!(global_number(&vm, "i"), 3.0);
    }

    #[test]
    fn test_for_loop_desugars_like_while() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "var sum = 0; for (var i = 0; i < 5; i = i + 1) { sum = sum + i; }",
        );
        assert_eq!(global_number(&vm, "sum"), 10.0);
    }

    #[test]
    fn test_for_loop_with_empty_clauses_runs_until_return() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "fun count() {
                var i = 0;
                for (;;) {
                    i = i + 1;
                    if (i == 3) return i;
                }
            }
            var r = count();",
        );
        assert_eq!(global_number(&vm, "r"), 3.0);
    }

    #[test]
    fn test_if_else_and_logical_operators() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "var r1 = nil; if (1 < 2) { r1 = \"then\"; } else { r1 = \"else\"; }
             var r2 = false and 1;
             var r3 = false or \"fallback\";
             var r4 = 1 and 2;",
        );
        assert_eq!(format_value(&global_value(&vm, "r1").unwrap()), "then");
        assert!(!as_bool(&global_value(&vm, "r2").unwrap()));
        assert_eq!(format_value(&global_value(&vm, "r3").unwrap()), "fallback");
        assert_eq!(global_number(&vm, "r4"), 2.0);
    }

    #[test]
    fn test_function_call_and_return() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "fun sum(a, b, c) { return a + b + c; } var r = 4 + sum(5, 6, 7);",
        );
        assert_eq!(global_number(&vm, "r"), 22.0);
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        let mut vm = VM::new();
        run_ok(&mut vm, "fun noop() {} var r = noop();");
        assert!(is_nil(&global_value(&vm, "r").unwrap()));
    }

    #[test]
    fn test_wrong_arity_reports_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("fun f(a, b) { return a; } f(1);"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_calling_a_non_callable_fails() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("\"not a function\"();"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(
            vm.interpret("var x = 3; x();"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_closure_counter_preserves_captured_local() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "fun mk() {
                var x = 0;
                fun inc() { x = x + 1; return x; }
                return inc;
            }
            var c = mk();
            var r1 = c();
            var r2 = c();
            var r3 = c();",
        );
        assert_eq!(global_number(&vm, "r1"), 1.0);
        assert_eq!(global_number(&vm, "r2"), 2.0);
        assert_eq!(global_number(&vm, "r3"), 3.0);
    }

    #[test]
    fn test_two_closures_share_one_upvalue_cell() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "var set; var get;
            fun pair() {
                var x = 0;
                fun s(v) { x = v; }
                fun g() { return x; }
                set = s;
                get = g;
            }
            pair();
            set(42);
            var r = get();",
        );
        assert_eq!(global_number(&vm, "r"), 42.0);
    }

    #[test]
    fn test_sibling_closures_in_loop_get_distinct_cells() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "var first; var second;
            {
                var i = 0;
                while (i < 2) {
                    var captured = i;
                    fun show() { return captured; }
                    if (i == 0) { first = show; } else { second = show; }
                    i = i + 1;
                }
            }
            var r1 = first();
            var r2 = second();",
        );
        assert_eq!(global_number(&vm, "r1"), 0.0);
        assert_eq!(global_number(&vm, "r2"), 1.0);
    }

    #[test]
    fn test_class_method_invocation() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "class A { greet() { return \"hi\"; } } var r = A().greet();",
        );
        assert_eq!(format_value(&global_value(&vm, "r").unwrap()), "hi");
    }

    #[test]
    fn test_initializer_and_fields() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "class Counter {
                init(start) { this.count = start; }
                add(n) { this.count = this.count + n; return this.count; }
            }
            var c = Counter(3);
            var r1 = c.add(4);
            c.count = 10;
            var r2 = c.add(1);
            var r3 = c.count;",
        );
        assert_eq!(global_number(&vm, "r1"), 7.0);
        assert_eq!(global_number(&vm, "r2"), 11.0);
        assert_eq!(global_number(&vm, "r3"), 11.0);
    }

    #[test]
    fn test_class_call_arity_without_initializer() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("class A {} A(1);"),
            InterpretResult::InterpretRuntimeError
        );
        let mut vm = VM::new();
        run_ok(&mut vm, "class A {} var a = A();");
        assert!(is_instance(&global_value(&vm, "a").unwrap()));
    }

    #[test]
    fn test_bound_method_detached_from_instance() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "class A { m() { return this.v; } }
            var a = A();
            a.v = 5;
            var f = a.m;
            var r = f();",
        );
        assert_eq!(global_number(&vm, "r"), 5.0);
    }

    #[test]
    fn test_fields_shadow_methods_on_invoke() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "fun replacement() { return \"field\"; }
            class A { m() { return \"method\"; } }
            var a = A();
            var before = a.m();
            a.m = replacement;
            var after = a.m();",
        );
        assert_eq!(format_value(&global_value(&vm, "before").unwrap()), "method");
        assert_eq!(format_value(&global_value(&vm, "after").unwrap()), "field");
    }

    #[test]
    fn test_property_errors() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var i = 3; i.field;"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(
            vm.interpret("class A {} A().missing;"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(
            vm.interpret("class A {} A().missing();"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_native_clock_returns_number() {
        let mut vm = VM::new();
        run_ok(&mut vm, "var t = clock();");
        assert!(global_number(&vm, "t") > 0.0);
        assert_eq!(
            vm.interpret("clock(1);"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_deep_recursion_overflows_frames() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("fun f() { f(); } f();"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_functions_are_printable_values() {
        let mut vm = VM::new();
        run_ok(&mut vm, "fun f() {} var g = f;");
        let g = global_value(&vm, "g").unwrap();
        assert!(is_closure(&g));
        assert_eq!(format_value(&g), "<fn f>");
    }

    #[test]
    fn test_collection_frees_garbage_and_keeps_live_state() {
        let mut vm = VM::new();
        run_ok(
            &mut vm,
            "var kept = \"kee\" + \"p\";
            var waste = \"\";
            for (var i = 0; i < 40; i = i + 1) {
                waste = waste + \"x\";
            }",
        );

        let objects_before = vm.object_manager.iter().count();
        vm.collect_garbage();
        let objects_after = vm.object_manager.iter().count();
        assert!(
            objects_after < objects_before,
            "intermediate concatenations should be collected"
        );

        // The survivors are intact and still interned.
        let kept = global_value(&vm, "kept").unwrap();
        assert_eq!(format_value(&kept), "keep");
        let interned = vm
            .intern_strings
            .find_string("keep", hash_string(b"keep"));
        assert_eq!(interned, as_string_object(&kept));

        // A second cycle with no new garbage frees nothing.
        vm.collect_garbage();
        assert_eq!(vm.object_manager.iter().count(), objects_after);
        assert!(vm.gc.stats().cycles >= 2);
    }

    #[test]
    fn test_collection_prunes_interned_garbage_strings() {
        let mut vm = VM::new();
        run_ok(&mut vm, "var tmp = \"abc\" + \"def\"; tmp = nil;");
        let hash = hash_string(b"abcdef");
        assert!(!vm.intern_strings.find_string("abcdef", hash).is_null());

        vm.collect_garbage();
        assert!(
            vm.intern_strings.find_string("abcdef", hash).is_null(),
            "unreachable string should leave the intern table"
        );
    }
}
