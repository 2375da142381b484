//! The Runtime Emitter collaborator: installs a fixed set of intrinsic
//! type/method handles into a `MetadataBuilder` before any user code is
//! defined (phase 1 of the driver's pipeline). Full runtime-library
//! emission is out of core scope — this crate is the small, load-bearing
//! sliver that makes the pipeline executable without one: a boxed
//! function wrapper, an awaiter/task-builder pair standing in for the
//! Promise combinator surface, `console`, and a handful of number/
//! string/reference-equality helpers the IL emitter calls into.
//!
//! Every method installed here gets a real (if minimal) body, not just a
//! stub — unlike user code, runtime methods are never subject to the
//! phase 6.3 stub-then-body discipline, since nothing the driver emits
//! needs to call a runtime method before its behavior is known.

use tsil_image::{BinOp, FieldToken, FieldType, Instr, MetadataBuilder, MethodToken, TypeKind, TypeToken};

/// Handles into every runtime intrinsic, threaded through the driver and
/// the IL/MoveNext emitters so they never hardcode a token.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeHandles {
    /// `$TSFunction` — the boxed wrapper a top-level function or a
    /// non-capturing arrow's static method is wrapped in whenever it is
    /// used as a value rather than called directly.
    pub ts_function_type: TypeToken,
    pub ts_function_target_field: FieldToken,
    pub ts_function_wrap: MethodToken,
    pub ts_function_invoke: MethodToken,

    /// `$Awaiter` — every awaited value is treated, by this backend's
    /// simplified model, as already presenting this shape (see
    /// `DESIGN.md`'s note on `GetAwaiter`): a completion flag and a
    /// result slot. `awaiter_resolved` builds one that is already
    /// complete; `awaiter_pending` builds one a test driver (or, at
    /// runtime, the host scheduler) completes later by calling
    /// `awaiter_complete`.
    pub awaiter_type: TypeToken,
    pub awaiter_completed_field: FieldToken,
    pub awaiter_result_field: FieldToken,
    pub awaiter_get_is_completed: MethodToken,
    pub awaiter_get_result: MethodToken,
    pub awaiter_resolved: MethodToken,
    pub awaiter_pending: MethodToken,
    pub awaiter_complete: MethodToken,

    /// `$TaskBuilder` — the opaque task/promise builder field every
    /// async state machine carries (`builder` in §3's descriptor).
    /// `await_unsafe_on_completed` is a deliberate no-op at this layer:
    /// the host scheduler that would actually reinvoke `MoveNext` on
    /// completion is a collaborator out of scope (§6); tests drive
    /// resumption directly.
    pub task_builder_type: TypeToken,
    pub task_builder_task_field: FieldToken,
    pub task_builder_create: MethodToken,
    pub task_builder_set_result: MethodToken,
    pub task_builder_set_exception: MethodToken,
    pub task_builder_await_unsafe_on_completed: MethodToken,
    pub task_builder_get_task: MethodToken,

    /// `$Iterator` — the builder type a bare (non-async) generator's
    /// state machine uses in place of `$TaskBuilder` (see `SPEC_FULL.md`
    /// §4's generator supplement): no completion callback, just a
    /// current-value slot the caller reads after each `MoveNext`.
    pub iterator_builder_type: TypeToken,
    pub iterator_current_field: FieldToken,
    pub iterator_done_field: FieldToken,

    pub console_log: MethodToken,
    pub reference_equals: MethodToken,
    pub number_to_string: MethodToken,
    pub string_concat: MethodToken,
    pub json_stringify: MethodToken,

    /// The backing type for an ad-hoc object literal (`{ a: 1 }`) or any
    /// value whose static class is unknown to the type map: carries no
    /// declared fields of its own, every property lives in the property
    /// bag (§4.5 "indexed get/set via the instance property bag").
    pub any_object_type: TypeToken,

    /// `$Cell` — a one-field box used to promote any local or parameter
    /// captured by an arrow (anywhere in the compilation unit) into
    /// shared, by-reference storage. Both the declaring scope and every
    /// capturing arrow hold a reference to the *same* cell, so a
    /// mutation made on either side is visible on the other (see
    /// `DESIGN.md`'s closure-capture note).
    pub cell_type: TypeToken,
    pub cell_value_field: FieldToken,
    pub cell_create: MethodToken,
}

/// Installs every runtime intrinsic into `metadata` and returns the
/// resulting handle record. Always the first call of phase 1 — every
/// subsequent phase depends on these tokens existing.
pub fn install(metadata: &mut MetadataBuilder) -> RuntimeHandles {
    let _span = tracing::debug_span!("runtime::install").entered();

    let (ts_function_type, ts_function_target_field, ts_function_wrap, ts_function_invoke) =
        install_ts_function(metadata);

    let (
        awaiter_type,
        awaiter_completed_field,
        awaiter_result_field,
        awaiter_get_is_completed,
        awaiter_get_result,
        awaiter_resolved,
        awaiter_pending,
        awaiter_complete,
    ) = install_awaiter(metadata);

    let (
        task_builder_type,
        task_builder_task_field,
        task_builder_create,
        task_builder_set_result,
        task_builder_set_exception,
        task_builder_await_unsafe_on_completed,
        task_builder_get_task,
    ) = install_task_builder(metadata, awaiter_type, awaiter_pending, awaiter_complete);

    let (iterator_builder_type, iterator_current_field, iterator_done_field) =
        install_iterator_builder(metadata);

    let console_log = install_console(metadata);
    let reference_equals = install_reference_equals(metadata);
    let (number_to_string, string_concat, json_stringify) = install_helpers(metadata);
    let any_object_type = metadata.define_type("$AnyObject", None, TypeKind::Class, true);
    metadata.finalize_type(any_object_type);

    let (cell_type, cell_value_field, cell_create) = install_cell(metadata);

    tracing::debug!("runtime intrinsics installed");

    RuntimeHandles {
        ts_function_type,
        ts_function_target_field,
        ts_function_wrap,
        ts_function_invoke,
        awaiter_type,
        awaiter_completed_field,
        awaiter_result_field,
        awaiter_get_is_completed,
        awaiter_get_result,
        awaiter_resolved,
        awaiter_pending,
        awaiter_complete,
        task_builder_type,
        task_builder_task_field,
        task_builder_create,
        task_builder_set_result,
        task_builder_set_exception,
        task_builder_await_unsafe_on_completed,
        task_builder_get_task,
        iterator_builder_type,
        iterator_current_field,
        iterator_done_field,
        console_log,
        reference_equals,
        number_to_string,
        string_concat,
        json_stringify,
        any_object_type,
        cell_type,
        cell_value_field,
        cell_create,
    }
}

fn install_cell(metadata: &mut MetadataBuilder) -> (TypeToken, FieldToken, MethodToken) {
    let ty = metadata.define_type("$Cell", None, TypeKind::Class, true);
    let value = metadata.define_field(ty, "value", false, FieldType::Object);

    let create = metadata.define_method(ty, "Create", true, false, 1);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::NewObj(ty, 0));
    b.emit(Instr::Dup);
    b.emit(Instr::LoadArg(0));
    b.emit(Instr::StoreField(value));
    b.emit(Instr::Ret);
    metadata.set_method_body(create, 0, b.finish());

    metadata.finalize_type(ty);
    (ty, value, create)
}

fn install_ts_function(metadata: &mut MetadataBuilder) -> (TypeToken, FieldToken, MethodToken, MethodToken) {
    let ty = metadata.define_type("$TSFunction", None, TypeKind::Class, true);
    let target = metadata.define_field(ty, "target", false, FieldType::Object);

    // static $TSFunction.Wrap(target) -> new $TSFunction { target }
    let wrap = metadata.define_method(ty, "Wrap", true, false, 1);
    let mut body = tsil_image::OpcodeBuilder::new();
    body.emit(Instr::NewObj(ty, 0));
    body.emit(Instr::Dup);
    body.emit(Instr::LoadArg(0));
    body.emit(Instr::StoreField(target));
    body.emit(Instr::Ret);
    metadata.set_method_body(wrap, 0, body.finish());

    // instance $TSFunction.Invoke(...) -> CallDynamic against `target`.
    // The image's `CallDynamic` opcode already models "call whatever's
    // on the stack", so Invoke is a thin forwarder.
    let invoke = metadata.define_method(ty, "Invoke", false, true, 0);
    let mut body = tsil_image::OpcodeBuilder::new();
    body.emit(Instr::LoadThis);
    body.emit(Instr::LoadField(target));
    body.emit(Instr::CallDynamic(0));
    body.emit(Instr::Ret);
    metadata.set_method_body(invoke, 1, body.finish());

    metadata.finalize_type(ty);
    (ty, target, wrap, invoke)
}

#[allow(clippy::type_complexity)]
fn install_awaiter(
    metadata: &mut MetadataBuilder,
) -> (
    TypeToken,
    FieldToken,
    FieldToken,
    MethodToken,
    MethodToken,
    MethodToken,
    MethodToken,
    MethodToken,
) {
    let ty = metadata.define_type("$Awaiter", None, TypeKind::Class, true);
    let completed = metadata.define_field(ty, "completed", false, FieldType::Object);
    let result = metadata.define_field(ty, "result", false, FieldType::Object);

    let get_is_completed = metadata.define_method(ty, "get_IsCompleted", false, true, 0);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadThis);
    b.emit(Instr::LoadField(completed));
    b.emit(Instr::Ret);
    metadata.set_method_body(get_is_completed, 1, b.finish());

    let get_result = metadata.define_method(ty, "GetResult", false, true, 0);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadThis);
    b.emit(Instr::LoadField(result));
    b.emit(Instr::Ret);
    metadata.set_method_body(get_result, 1, b.finish());

    // static $Awaiter.Resolved(value) -> already-completed awaiter.
    let resolved = metadata.define_method(ty, "Resolved", true, false, 1);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::NewObj(ty, 0));
    b.emit(Instr::Dup);
    b.emit(Instr::LoadBool(true));
    b.emit(Instr::StoreField(completed));
    b.emit(Instr::Dup);
    b.emit(Instr::LoadArg(0));
    b.emit(Instr::StoreField(result));
    b.emit(Instr::Ret);
    metadata.set_method_body(resolved, 0, b.finish());

    // static $Awaiter.Pending() -> not yet completed; a caller (test
    // harness or, at runtime, the host scheduler) later calls Complete.
    let pending = metadata.define_method(ty, "Pending", true, false, 0);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::NewObj(ty, 0));
    b.emit(Instr::Dup);
    b.emit(Instr::LoadBool(false));
    b.emit(Instr::StoreField(completed));
    b.emit(Instr::Ret);
    metadata.set_method_body(pending, 0, b.finish());

    let complete = metadata.define_method(ty, "Complete", false, true, 1);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadThis);
    b.emit(Instr::LoadBool(true));
    b.emit(Instr::StoreField(completed));
    b.emit(Instr::LoadThis);
    b.emit(Instr::LoadArg(1));
    b.emit(Instr::StoreField(result));
    b.emit(Instr::RetVoid);
    metadata.set_method_body(complete, 2, b.finish());

    metadata.finalize_type(ty);
    (
        ty,
        completed,
        result,
        get_is_completed,
        get_result,
        resolved,
        pending,
        complete,
    )
}

#[allow(clippy::type_complexity)]
fn install_task_builder(
    metadata: &mut MetadataBuilder,
    awaiter_type: TypeToken,
    awaiter_pending: MethodToken,
    awaiter_complete: MethodToken,
) -> (TypeToken, FieldToken, MethodToken, MethodToken, MethodToken, MethodToken, MethodToken) {
    let _ = awaiter_type;
    let ty = metadata.define_type("$TaskBuilder", None, TypeKind::Class, true);
    let task = metadata.define_field(ty, "task", false, FieldType::Typed(awaiter_type));

    // The builder's own task starts out *not* completed: the entry stub
    // runs the machine's first `MoveNext` before handing this task back
    // to the caller, and if that first step suspends on a pending await,
    // the task must still read as incomplete until `SetResult`/
    // `SetException` runs (§8 property 3).
    let create = metadata.define_method(ty, "Create", true, false, 0);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::NewObj(ty, 0));
    b.emit(Instr::Dup);
    b.emit(Instr::CallStatic(awaiter_pending, 0));
    b.emit(Instr::StoreField(task));
    b.emit(Instr::Ret);
    metadata.set_method_body(create, 0, b.finish());

    // `SetResult`/`SetException` mutate the already-allocated `task`
    // awaiter in place (via `$Awaiter::Complete`) rather than replacing
    // the field, so a `Task` handed out earlier by `get_Task` still
    // observes the update.
    let set_result = metadata.define_method(ty, "SetResult", false, true, 1);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadThis);
    b.emit(Instr::LoadField(task));
    b.emit(Instr::LoadArg(1));
    b.emit(Instr::CallVirtual(awaiter_complete, 2));
    b.emit(Instr::RetVoid);
    metadata.set_method_body(set_result, 1, b.finish());

    let set_exception = metadata.define_method(ty, "SetException", false, true, 1);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadThis);
    b.emit(Instr::LoadField(task));
    b.emit(Instr::LoadArg(1));
    b.emit(Instr::CallVirtual(awaiter_complete, 2));
    b.emit(Instr::RetVoid);
    metadata.set_method_body(set_exception, 1, b.finish());

    // No-op: the host scheduler that would reinvoke `MoveNext` when the
    // awaiter completes is a collaborator out of scope (§6 "Runtime
    // Emitter"/"host runtime"). Production bodies that call this are
    // still well-formed IL; they simply never get an automatic resume.
    let await_unsafe_on_completed = metadata.define_method(ty, "AwaitUnsafeOnCompleted", false, true, 2);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::RetVoid);
    metadata.set_method_body(await_unsafe_on_completed, 3, b.finish());

    let get_task = metadata.define_method(ty, "get_Task", false, true, 0);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadThis);
    b.emit(Instr::LoadField(task));
    b.emit(Instr::Ret);
    metadata.set_method_body(get_task, 1, b.finish());

    metadata.finalize_type(ty);
    (ty, task, create, set_result, set_exception, await_unsafe_on_completed, get_task)
}

fn install_iterator_builder(metadata: &mut MetadataBuilder) -> (TypeToken, FieldToken, FieldToken) {
    let ty = metadata.define_type("$IteratorBuilder", None, TypeKind::Class, true);
    let current = metadata.define_field(ty, "current", false, FieldType::Object);
    let done = metadata.define_field(ty, "done", false, FieldType::Object);
    metadata.finalize_type(ty);
    (ty, current, done)
}

fn install_console(metadata: &mut MetadataBuilder) -> MethodToken {
    let ty = metadata.define_type("$Console", None, TypeKind::Class, true);
    let log = metadata.define_method(ty, "Log", true, false, 1);
    // A real host runtime writes `arg0` to stdout; this backend's own
    // responsibility ends at a well-formed call site (§1 Non-goals:
    // runtime library emission is a separate emitter's job). The stub
    // body just returns its argument so the reference interpreter can
    // still observe values threaded through a `console.log(...)` call
    // in a test without needing real I/O.
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadArg(0));
    b.emit(Instr::Ret);
    metadata.set_method_body(log, 0, b.finish());
    metadata.finalize_type(ty);
    log
}

fn install_reference_equals(metadata: &mut MetadataBuilder) -> MethodToken {
    let ty = metadata.define_type("$ReferenceEquality", None, TypeKind::Class, true);
    let eq = metadata.define_method(ty, "Equals", true, false, 2);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadArg(0));
    b.emit(Instr::LoadArg(1));
    b.emit(Instr::BinOp(BinOp::StrictEq));
    b.emit(Instr::Ret);
    metadata.set_method_body(eq, 0, b.finish());
    metadata.finalize_type(ty);
    eq
}

fn install_helpers(metadata: &mut MetadataBuilder) -> (MethodToken, MethodToken, MethodToken) {
    let ty = metadata.define_type("$Helpers", None, TypeKind::Class, true);

    let number_to_string = metadata.define_method(ty, "NumberToString", true, false, 1);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadConstStr(metadata.intern_string("")));
    b.emit(Instr::LoadArg(0));
    b.emit(Instr::BinOp(BinOp::Add));
    b.emit(Instr::Ret);
    metadata.set_method_body(number_to_string, 0, b.finish());

    let string_concat = metadata.define_method(ty, "StringConcat", true, false, 2);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadArg(0));
    b.emit(Instr::LoadArg(1));
    b.emit(Instr::BinOp(BinOp::Add));
    b.emit(Instr::Ret);
    metadata.set_method_body(string_concat, 0, b.finish());

    // Deep-equality/JSON serialization proper is deliberately out of
    // scope; the stub exists so a `JSON.stringify` call site resolves
    // to a real token rather than a dynamic dispatch.
    let json_stringify = metadata.define_method(ty, "JsonStringify", true, false, 1);
    let mut b = tsil_image::OpcodeBuilder::new();
    b.emit(Instr::LoadArg(0));
    b.emit(Instr::Ret);
    metadata.set_method_body(json_stringify, 0, b.finish());

    metadata.finalize_type(ty);
    (number_to_string, string_concat, json_stringify)
}

#[cfg(test)]
#[path = "tests/install.rs"]
mod tests;
