use crate::call_frame::CallFrame;
use crate::objects::object::{Object, ObjectType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::table::Table;
use crate::value::{as_object, is_object, Value};

/// Stop-the-world mark-sweep. Marking sets the header bit and feeds a gray
/// worklist; the sweep itself lives with the object list in ObjectManager.
pub struct GarbageCollector {
    gray_stack: Vec<*mut Object>,
    stats: GCStats,
}

/// Aggregated GC statistics (does not include currently-live total bytes; the
/// allocator tracks that).
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
macro_rules! gc_trace { ($($arg:tt)*) => {}; }
pub(crate) use gc_trace;

impl GarbageCollector {
    pub fn new() -> GarbageCollector {
        GarbageCollector {
            gray_stack: Vec::new(),
            stats: GCStats::default(),
        }
    }

    // Mark a single object gray: set the bit, enqueue for tracing.
    pub fn mark_object(&mut self, object: *mut Object) {
        if object.is_null() {
            return;
        }
        unsafe {
            if (*object).is_marked {
                return;
            }
            (*object).is_marked = true;
        }
        self.gray_stack.push(object);
        gc_trace!("mark_object enqueue gray ptr={:p}", object);
    }

    pub fn mark_value(&mut self, value: &Value) {
        if !is_object(value) {
            return;
        }
        self.mark_object(as_object(value));
    }

    // Keys are interned strings; they must survive as long as the table does.
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key as *mut Object);
            self.mark_value(value);
        }
    }

    /// Seed the gray set with everything the VM can reach directly. The
    /// intern table is deliberately absent: it holds weak references.
    pub fn mark_roots(
        &mut self,
        stack: &[Value],
        globals: &Table,
        frames: &[CallFrame],
        open_upvalues: *mut ObjectUpvalue,
    ) {
        for value in stack {
            self.mark_value(value);
        }

        for frame in frames {
            self.mark_object(frame.closure as *mut Object);
        }

        let mut upvalue = open_upvalues;
        while !upvalue.is_null() {
            self.mark_object(upvalue as *mut Object);
            upvalue = unsafe { (*upvalue).next_open };
        }

        self.mark_table(globals);
    }

    // Process gray objects until none remain. Cycles terminate because each
    // object is blackened at most once per collection.
    pub fn trace_references(&mut self) {
        while let Some(object) = self.gray_stack.pop() {
            unsafe {
                gc_trace!("trace gray -> black ptr={:p}", object);
                self.blacken_object(object);
            }
        }
    }

    // Mark all references going out of an object.
    unsafe fn blacken_object(&mut self, object: *mut Object) {
        match (*object).obj_type {
            ObjectType::ObjClosure => {
                let closure = &*(object as *mut ObjectClosure);
                self.mark_object(closure.function as *mut Object);
                for upvalue in &closure.upvalues {
                    self.mark_object(*upvalue as *mut Object);
                }
            }
            ObjectType::ObjFunction => {
                let function = &*(object as *mut ObjectFunction);
                for constant in function.chunk.iter_constants() {
                    self.mark_value(constant);
                }
            }
            ObjectType::ObjUpvalue => {
                // While open, the pointee is a stack slot and already a root.
                let upvalue = &*(object as *mut ObjectUpvalue);
                self.mark_value(&upvalue.closed);
            }
            ObjectType::ObjClass => {
                let class = &*(object as *mut ObjectClass);
                self.mark_table(&class.methods);
            }
            ObjectType::ObjInstance => {
                let instance = &*(object as *mut ObjectInstance);
                self.mark_object(instance.class as *mut Object);
                self.mark_table(&instance.fields);
            }
            ObjectType::ObjBoundMethod => {
                let bound = &*(object as *mut ObjectBoundMethod);
                self.mark_value(&bound.receiver);
                self.mark_object(bound.method as *mut Object);
            }
            ObjectType::ObjString | ObjectType::ObjNativeFunction => {}
        }
    }

    pub fn sweep(&mut self, object_manager: &mut ObjectManager) -> usize {
        object_manager.sweep()
    }

    /// Record a completed cycle (invoked by the VM, which knows bytes
    /// before/after and the new trigger).
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

    #[allow(dead_code)]
    pub fn stats(&self) -> &GCStats {
        &self.stats
    }
}
