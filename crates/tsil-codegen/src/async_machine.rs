//! Async State Machine Builder (component D, §4.4): given one function's,
//! method's, or arrow's `AsyncFunctionAnalysis`, defines the value-type
//! state machine it runs on and returns the field/method handles the
//! MoveNext Emitter and the entry stub need.
//!
//! Every field this module defines is reserved, never initialized —
//! that happens in the entry stub (built alongside this machine by the
//! caller) and in `MoveNext`'s rehydration prologue (built by
//! `crate::movenext`). This module only shapes the type.

use rustc_hash::FxHashMap;
use tsil_analysis::async_analysis::AsyncFunctionAnalysis;
use tsil_analysis::closure::CaptureSet;
use tsil_common::{Atom, Interner};
use tsil_ast::{BindingName, Param};
use tsil_image::{FieldType, MetadataBuilder, TypeKind, TypeToken};
use tsil_runtime::RuntimeHandles;

use crate::registries::AsyncMachine;

/// What is being boxed into a state machine: a top-level function or
/// method has no enclosing machine to link back to, while an async
/// arrow always does (its immediately enclosing function's machine, or
/// its parent arrow's machine — §4.4 "a back-pointer to the parent
/// arrow's machine for nested arrows").
pub enum AsyncMachineKind<'a> {
    TopLevel,
    Arrow {
        outer: TypeToken,
        captures: &'a CaptureSet,
    },
}

/// Builds the value-type machine and returns the populated descriptor.
/// `type_name` must already be unique within the compilation unit (the
/// driver is responsible for disambiguating nested/overloaded names).
#[allow(clippy::too_many_arguments)]
pub fn build_async_machine(
    metadata: &mut MetadataBuilder,
    runtime: &RuntimeHandles,
    interner: &Interner,
    type_name: &str,
    params: &[Param],
    analysis: &AsyncFunctionAnalysis,
    kind: AsyncMachineKind<'_>,
    is_generator: bool,
    has_nested_async_arrows: bool,
) -> AsyncMachine {
    let type_token = metadata.define_type(type_name, None, TypeKind::ValueType, true);

    let state_field = metadata.define_field(type_token, "state", false, FieldType::Int32);

    let builder_type = if is_generator {
        runtime.iterator_builder_type
    } else {
        runtime.task_builder_type
    };
    let builder_field = metadata.define_field(type_token, "builder", false, FieldType::Typed(builder_type));

    // Every declared parameter gets a field, not just the subset
    // `analysis.hoisted_parameters` says must survive a suspension:
    // `MoveNext` takes no arguments of its own, so a parameter used only
    // before the function's first await still has nowhere else to live
    // once the entry stub seeds it in (§4.6).
    let mut hoisted_params = FxHashMap::default();
    for p in params {
        if let BindingName::Identifier(name) = p.name {
            let field_name = format!("p_{}", interner.resolve(name));
            hoisted_params.insert(name, metadata.define_field(type_token, field_name, false, FieldType::Object));
        }
    }

    let mut hoisted_locals = FxHashMap::default();
    for &name in &analysis.hoisted_locals {
        let field_name = format!("l_{}", interner.resolve(name));
        hoisted_locals.insert(name, metadata.define_field(type_token, field_name, false, FieldType::Object));
    }

    let awaiter_fields = (0..analysis.await_count)
        .map(|k| {
            metadata.define_field(
                type_token,
                format!("awaiter_{k}"),
                false,
                FieldType::Typed(runtime.awaiter_type),
            )
        })
        .collect();

    let this_field = analysis
        .uses_this
        .then(|| metadata.define_field(type_token, "this", false, FieldType::Object));

    let (outer_field, captured_fields) = match kind {
        AsyncMachineKind::TopLevel => (None, FxHashMap::default()),
        AsyncMachineKind::Arrow { outer, captures } => {
            let outer_field = metadata.define_field(type_token, "outer", false, FieldType::Typed(outer));
            let mut captured_fields = FxHashMap::default();
            for &name in &captures.names {
                let field_name = format!("captured_{}", interner.resolve(name));
                captured_fields.insert(name, metadata.define_field(type_token, field_name, false, FieldType::Object));
            }
            (Some(outer_field), captured_fields)
        }
    };

    // §4.6 "self-boxed trick": only a machine that itself has nested
    // async-arrow children needs a field pointing at its own boxed
    // copy; a leaf machine (no async-arrow children) never suspends on
    // behalf of anyone but itself and can stay a plain value type from
    // its own perspective.
    let self_boxed_field =
        has_nested_async_arrows.then(|| metadata.define_field(type_token, "self_boxed", false, FieldType::Object));

    // `MoveNext` and `SetStateMachine` stub tokens: reserved here so the
    // entry stub (built by the caller right after this call returns) can
    // reference them before `crate::movenext::emit_move_next` attaches a
    // body, mirroring the phase-6.3 "define every handle before any
    // body" discipline (§4.1, §9).
    let move_next = metadata.define_method(type_token, "MoveNext", false, true, 0);
    let set_state_machine = metadata.define_method(type_token, "SetStateMachine", false, true, 1);
    let mut stub = tsil_image::OpcodeBuilder::new();
    stub.emit(tsil_image::Instr::RetVoid);
    metadata.set_method_body(set_state_machine, 1, stub.finish());

    AsyncMachine {
        type_token: Some(type_token),
        state_field: Some(state_field),
        builder_field: Some(builder_field),
        hoisted_params,
        hoisted_locals,
        awaiter_fields,
        this_field,
        outer_field,
        self_boxed_field,
        captured_fields,
        move_next: Some(move_next),
        set_state_machine: Some(set_state_machine),
        entry_stub: None,
        is_generator,
    }
}

#[cfg(test)]
#[path = "tests/async_machine.rs"]
mod tests;
