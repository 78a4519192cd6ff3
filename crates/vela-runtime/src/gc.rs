//! Tri-color mark-sweep collector. Non-moving, non-generational: it walks the
//! VM's roots, traces every reachable object through a gray worklist, then
//! sweeps anything left white. Collection only ever runs between bytecode
//! instructions (triggered by [`crate::vm::Vm::alloc`]), never mid-compile —
//! the compiler's own constant pool is bounded by the size of the source
//! text, so deferring collection until execution begins avoids having to
//! walk a chain of in-progress compiler frames as extra roots.

use crate::heap::{Heap, Obj, ObjId, UpvalueState};
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

pub fn collect(vm: &mut Vm) {
    let mut gray: Vec<ObjId> = Vec::new();
    mark_roots(vm, &mut gray);
    trace_references(&mut vm.heap, &mut gray);

    vm.globals.retain_keys(|id| vm.heap.is_marked(id));
    vm.heap.sweep();
    vm.interns.retain(|id| vm.heap.is_marked(id));
    vm.heap.unmark_all();
}

fn mark_roots(vm: &mut Vm, gray: &mut Vec<ObjId>) {
    for i in 0..vm.stack.len() {
        mark_value(&mut vm.heap, gray, vm.stack[i]);
    }
    for i in 0..vm.frames.len() {
        mark_object(&mut vm.heap, gray, vm.frames[i].closure);
    }
    for i in 0..vm.open_upvalues.len() {
        mark_object(&mut vm.heap, gray, vm.open_upvalues[i]);
    }
    mark_table(&mut vm.heap, gray, &vm.globals);
    mark_object(&mut vm.heap, gray, vm.init_string);
}

fn mark_value(heap: &mut Heap, gray: &mut Vec<ObjId>, value: Value) {
    if let Value::Obj(id) = value {
        mark_object(heap, gray, id);
    }
}

fn mark_object(heap: &mut Heap, gray: &mut Vec<ObjId>, id: ObjId) {
    if heap.mark(id) {
        gray.push(id);
    }
}

fn mark_table(heap: &mut Heap, gray: &mut Vec<ObjId>, table: &Table) {
    for (key, value) in table.iter() {
        mark_object(heap, gray, key);
        mark_value(heap, gray, *value);
    }
}

fn trace_references(heap: &mut Heap, gray: &mut Vec<ObjId>) {
    while let Some(id) = gray.pop() {
        blacken_object(heap, gray, id);
    }
}

/// What a gray object points at, collected up front so we can drop the
/// borrow on `heap` before recursively marking (`heap.get` is `&self`,
/// `heap.mark` is `&mut self`).
enum Child {
    Obj(ObjId),
    Val(Value),
}

fn blacken_object(heap: &mut Heap, gray: &mut Vec<ObjId>, id: ObjId) {
    let mut children: Vec<Child> = Vec::new();
    match heap.get(id) {
        Obj::String { .. } | Obj::Native(_) => {}
        Obj::Function(f) => {
            if let Some(name) = f.name {
                children.push(Child::Obj(name));
            }
            children.extend(f.chunk.constants.iter().map(|&v| Child::Val(v)));
        }
        Obj::Closure(c) => {
            children.push(Child::Obj(c.function));
            children.extend(c.upvalues.iter().map(|&id| Child::Obj(id)));
        }
        Obj::Upvalue(UpvalueState::Closed(value)) => children.push(Child::Val(*value)),
        Obj::Upvalue(UpvalueState::Open(_)) => {}
        Obj::Class(class) => {
            children.push(Child::Obj(class.name));
            for (key, value) in class.methods.iter() {
                children.push(Child::Obj(key));
                children.push(Child::Val(*value));
            }
        }
        Obj::Instance(instance) => {
            children.push(Child::Obj(instance.class));
            for (key, value) in instance.fields.iter() {
                children.push(Child::Obj(key));
                children.push(Child::Val(*value));
            }
        }
        Obj::BoundMethod(bound) => {
            children.push(Child::Val(bound.receiver));
            children.push(Child::Obj(bound.method));
        }
        Obj::List(list) => {
            children.extend(list.values.iter().map(|&v| Child::Val(v)));
        }
    }

    for child in children {
        match child {
            Child::Obj(id) => mark_object(heap, gray, id),
            Child::Val(value) => mark_value(heap, gray, value),
        }
    }
}
