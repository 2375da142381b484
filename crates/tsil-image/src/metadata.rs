//! `MetadataBuilder` — the host managed-bytecode toolkit's metadata
//! builder (§1, §9): accepts type/method/field definitions and opcode
//! streams, ready for `ImageWriter` to serialize.
//!
//! Every definition call returns a token immediately; a method's body is
//! attached later via `set_method_body`. This is what lets the
//! Compiler Driver define every type/method/field stub in phases 3–6.3
//! before any body is emitted in phases 6.5–8 (§4.1 invariant 1–3):
//! a `MethodToken` is a stable reference the IL Emitter can lower a call
//! against whether or not `set_method_body` has run yet for that token.

use crate::opcode::Instr;
use crate::token::{FieldToken, MethodToken, StringToken, TypeToken};
use rustc_hash::FxHashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    /// A reference type (class instances, display classes, module types).
    Class,
    /// A value type (an async state machine).
    ValueType,
}

#[derive(Clone, Debug)]
pub struct TypeDef {
    pub name: String,
    pub base: Option<TypeToken>,
    pub kind: TypeKind,
    pub sealed: bool,
    pub fields: Vec<FieldToken>,
    pub methods: Vec<MethodToken>,
    /// Set by the driver's phase-9/10 finalize step; read by the image
    /// writer as a sanity check that nothing is finalized twice.
    pub finalized: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    /// The universal boxed-object slot (every field that can hold a
    /// dynamically-typed value, including boxed primitives).
    Object,
    /// An unboxed `i32`, used only for the state-machine `state` field.
    Int32,
    /// A strongly-typed reference to another defined type (an `outer`
    /// back-pointer, a display-class field typed to its capture's
    /// static class type, etc).
    Typed(TypeToken),
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub owner: TypeToken,
    pub is_static: bool,
    pub field_type: FieldType,
}

#[derive(Clone, Debug)]
pub struct MethodDef {
    pub name: String,
    pub owner: TypeToken,
    pub is_static: bool,
    pub is_virtual: bool,
    pub param_count: u16,
    pub locals_count: u16,
    pub body: Option<Vec<Instr>>,
}

/// The metadata builder. Owned exclusively by the Compiler Driver for
/// the duration of one `compile`/`compile_modules` run (§3 ownership).
#[derive(Default)]
pub struct MetadataBuilder {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    strings: Vec<String>,
    string_lookup: FxHashMap<String, StringToken>,
    entry_point: Option<MethodToken>,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_string(&mut self, s: &str) -> StringToken {
        if let Some(&tok) = self.string_lookup.get(s) {
            return tok;
        }
        let tok = StringToken(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.string_lookup.insert(s.to_string(), tok);
        tok
    }

    pub fn resolve_string(&self, tok: StringToken) -> &str {
        &self.strings[tok.0 as usize]
    }

    pub fn define_type(
        &mut self,
        name: impl Into<String>,
        base: Option<TypeToken>,
        kind: TypeKind,
        sealed: bool,
    ) -> TypeToken {
        let tok = TypeToken(self.types.len() as u32);
        self.types.push(TypeDef {
            name: name.into(),
            base,
            kind,
            sealed,
            fields: Vec::new(),
            methods: Vec::new(),
            finalized: false,
        });
        tok
    }

    pub fn define_field(
        &mut self,
        owner: TypeToken,
        name: impl Into<String>,
        is_static: bool,
        field_type: FieldType,
    ) -> FieldToken {
        let tok = FieldToken(self.fields.len() as u32);
        self.fields.push(FieldDef {
            name: name.into(),
            owner,
            is_static,
            field_type,
        });
        self.types[owner.0 as usize].fields.push(tok);
        tok
    }

    /// Define a method *stub*: reserves a token and signature but leaves
    /// the body unset. Per §4.1 phase 6.3, this is what happens for
    /// every class method/getter/setter/constructor before any async
    /// body (phase 6.5) is emitted, so direct virtual dispatch against
    /// the handle is well-defined regardless of emission order.
    pub fn define_method(
        &mut self,
        owner: TypeToken,
        name: impl Into<String>,
        is_static: bool,
        is_virtual: bool,
        param_count: u16,
    ) -> MethodToken {
        let tok = MethodToken(self.methods.len() as u32);
        self.methods.push(MethodDef {
            name: name.into(),
            owner,
            is_static,
            is_virtual,
            param_count,
            locals_count: 0,
            body: None,
        });
        self.types[owner.0 as usize].methods.push(tok);
        tok
    }

    pub fn set_method_body(&mut self, method: MethodToken, locals_count: u16, body: Vec<Instr>) {
        let def = &mut self.methods[method.0 as usize];
        def.locals_count = locals_count;
        def.body = Some(body);
    }

    pub fn set_entry_point(&mut self, method: MethodToken) {
        self.entry_point = Some(method);
    }

    pub fn entry_point(&self) -> Option<MethodToken> {
        self.entry_point
    }

    pub fn finalize_type(&mut self, token: TypeToken) {
        self.types[token.0 as usize].finalized = true;
    }

    pub fn type_def(&self, token: TypeToken) -> &TypeDef {
        &self.types[token.0 as usize]
    }

    pub fn method_def(&self, token: MethodToken) -> &MethodDef {
        &self.methods[token.0 as usize]
    }

    pub fn field_def(&self, token: FieldToken) -> &FieldDef {
        &self.fields[token.0 as usize]
    }

    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    pub fn methods(&self) -> &[MethodDef] {
        &self.methods
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Every type has been through `finalize_type` and every defined
    /// method has a body. Checked by the Image Writer before
    /// serializing (an IR-verification-failure diagnostic otherwise).
    pub fn verify(&self) -> Result<(), String> {
        for t in &self.types {
            if !t.finalized {
                return Err(format!("type {} was never finalized", t.name));
            }
        }
        for m in &self.methods {
            if m.body.is_none() {
                return Err(format!("method {} has no body", m.name));
            }
        }
        if self.entry_point.is_none() {
            return Err("no entry point set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/metadata.rs"]
mod tests;
