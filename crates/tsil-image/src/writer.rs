//! Image Writer (§4.1 phase final, component H): serializes the
//! finalized `MetadataBuilder` into a conforming executable image file,
//! entry-pointed at `$Program.Main` (or a module's `Main` in the
//! multi-module case), with guaranteed close on all exit paths (§5).
//!
//! No external bytecode-assembly library is available to this pack
//! (§1/§9: "if the target platform lacks an in-process bytecode
//! assembly library, the Image Writer must itself serialize the
//! image"), so this module defines its own minimal binary format:
//! a small header, then length-prefixed string/type/field/method
//! tables, then method bodies as a flat encoded opcode stream. The
//! format carries no timestamp or other non-deterministic field, so
//! compiling the same metadata twice is required to produce
//! byte-identical output (§8 property 12) rather than merely
//! "identical except timestamps".

use crate::error::ImageError;
use crate::metadata::{FieldType, MetadataBuilder, TypeKind};
use crate::opcode::{BinOp, Instr, Primitive, UnOp};
use std::io::Write;

const MAGIC: &[u8; 4] = b"TSIL";
const FORMAT_VERSION: u32 = 1;

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_usize_as_u32(buf: &mut Vec<u8>, v: usize) {
    write_u32(buf, v as u32);
}

/// Serialize a finalized `MetadataBuilder` into the in-memory image
/// format. Returns `ImageError::Verification` if the builder has not
/// completed phase 9/10 finalization (every type finalized, every
/// method has a body, an entry point is set).
pub fn serialize(metadata: &MetadataBuilder) -> Result<Vec<u8>, ImageError> {
    metadata.verify().map_err(ImageError::Verification)?;

    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    write_u32(&mut buf, FORMAT_VERSION);

    // String table.
    write_usize_as_u32(&mut buf, metadata.strings().len());
    for s in metadata.strings() {
        write_str(&mut buf, s);
    }

    // Type table.
    write_usize_as_u32(&mut buf, metadata.types().len());
    for t in metadata.types() {
        write_str(&mut buf, &t.name);
        write_i32(&mut buf, t.base.map_or(-1, |b| b.0 as i32));
        buf.push(match t.kind {
            TypeKind::Class => 0,
            TypeKind::ValueType => 1,
        });
        buf.push(u8::from(t.sealed));
        write_usize_as_u32(&mut buf, t.fields.len());
        for f in &t.fields {
            write_u32(&mut buf, f.0);
        }
        write_usize_as_u32(&mut buf, t.methods.len());
        for m in &t.methods {
            write_u32(&mut buf, m.0);
        }
    }

    // Field table.
    write_usize_as_u32(&mut buf, metadata.fields().len());
    for f in metadata.fields() {
        write_str(&mut buf, &f.name);
        write_u32(&mut buf, f.owner.0);
        buf.push(u8::from(f.is_static));
        match f.field_type {
            FieldType::Object => {
                buf.push(0);
                write_i32(&mut buf, -1);
            }
            FieldType::Int32 => {
                buf.push(1);
                write_i32(&mut buf, -1);
            }
            FieldType::Typed(t) => {
                buf.push(2);
                write_i32(&mut buf, t.0 as i32);
            }
        }
    }

    // Method table, bodies inline.
    write_usize_as_u32(&mut buf, metadata.methods().len());
    for m in metadata.methods() {
        write_str(&mut buf, &m.name);
        write_u32(&mut buf, m.owner.0);
        buf.push(u8::from(m.is_static));
        buf.push(u8::from(m.is_virtual));
        buf.extend_from_slice(&m.param_count.to_le_bytes());
        buf.extend_from_slice(&m.locals_count.to_le_bytes());
        let body = m.body.as_ref().expect("verify() already checked bodies");
        write_usize_as_u32(&mut buf, body.len());
        for instr in body {
            encode_instr(&mut buf, instr);
        }
    }

    // Entry point.
    let entry = metadata.entry_point().expect("verify() already checked entry point");
    write_u32(&mut buf, entry.0);

    Ok(buf)
}

fn encode_instr(buf: &mut Vec<u8>, instr: &Instr) {
    match instr {
        Instr::LoadConstNum(v) => {
            buf.push(0);
            write_f64(buf, *v);
        }
        Instr::LoadConstStr(t) => {
            buf.push(1);
            write_u32(buf, t.0);
        }
        Instr::LoadNull => buf.push(2),
        Instr::LoadUndefined => buf.push(3),
        Instr::LoadBool(b) => {
            buf.push(4);
            buf.push(u8::from(*b));
        }
        Instr::LoadArg(i) => {
            buf.push(5);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Instr::StoreArg(i) => {
            buf.push(6);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Instr::LoadLocal(i) => {
            buf.push(7);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Instr::StoreLocal(i) => {
            buf.push(8);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Instr::LoadThis => buf.push(9),
        Instr::LoadField(t) => {
            buf.push(10);
            write_u32(buf, t.0);
        }
        Instr::StoreField(t) => {
            buf.push(11);
            write_u32(buf, t.0);
        }
        Instr::LoadStaticField(t) => {
            buf.push(12);
            write_u32(buf, t.0);
        }
        Instr::StoreStaticField(t) => {
            buf.push(13);
            write_u32(buf, t.0);
        }
        Instr::LoadBagProp(t) => {
            buf.push(14);
            write_u32(buf, t.0);
        }
        Instr::StoreBagProp(t) => {
            buf.push(15);
            write_u32(buf, t.0);
        }
        Instr::LoadIndex => buf.push(16),
        Instr::StoreIndex => buf.push(17),
        Instr::LoadArgCount => buf.push(44),
        Instr::ArrayLen => buf.push(45),
        Instr::LoadArgIndexed => buf.push(46),
        Instr::Box(p) => {
            buf.push(18);
            buf.push(encode_primitive(*p));
        }
        Instr::Unbox(p) => {
            buf.push(19);
            buf.push(encode_primitive(*p));
        }
        Instr::NewObj(t, argc) => {
            buf.push(20);
            write_u32(buf, t.0);
            buf.extend_from_slice(&argc.to_le_bytes());
        }
        Instr::NewArray(n) => {
            buf.push(21);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Instr::CallDirect(t, argc) => {
            buf.push(22);
            write_u32(buf, t.0);
            buf.extend_from_slice(&argc.to_le_bytes());
        }
        Instr::CallVirtual(t, argc) => {
            buf.push(23);
            write_u32(buf, t.0);
            buf.extend_from_slice(&argc.to_le_bytes());
        }
        Instr::CallStatic(t, argc) => {
            buf.push(24);
            write_u32(buf, t.0);
            buf.extend_from_slice(&argc.to_le_bytes());
        }
        Instr::CallDynamic(argc) => {
            buf.push(25);
            buf.extend_from_slice(&argc.to_le_bytes());
        }
        Instr::ArrayConcat => buf.push(47),
        Instr::CallSpread(t, fixed_argc) => {
            buf.push(48);
            write_u32(buf, t.0);
            buf.extend_from_slice(&fixed_argc.to_le_bytes());
        }
        Instr::CallDynamicSpread(fixed_argc) => {
            buf.push(49);
            buf.extend_from_slice(&fixed_argc.to_le_bytes());
        }
        Instr::Dup => buf.push(26),
        Instr::Pop => buf.push(27),
        Instr::BinOp(op) => {
            buf.push(28);
            buf.push(encode_binop(*op));
        }
        Instr::UnOp(op) => {
            buf.push(29);
            buf.push(encode_unop(*op));
        }
        Instr::Br(target) => {
            buf.push(30);
            write_usize_as_u32(buf, *target);
        }
        Instr::BrTrue(target) => {
            buf.push(31);
            write_usize_as_u32(buf, *target);
        }
        Instr::BrFalse(target) => {
            buf.push(32);
            write_usize_as_u32(buf, *target);
        }
        Instr::Switch { cases, default } => {
            buf.push(33);
            write_usize_as_u32(buf, cases.len());
            for c in cases {
                write_usize_as_u32(buf, *c);
            }
            write_usize_as_u32(buf, *default);
        }
        Instr::Ret => buf.push(34),
        Instr::RetVoid => buf.push(35),
        Instr::Throw => buf.push(36),
        Instr::BeginTry => buf.push(37),
        Instr::EndTry => buf.push(38),
        Instr::BeginCatch => buf.push(39),
        Instr::EndCatch => buf.push(40),
        Instr::BeginFinally => buf.push(41),
        Instr::EndFinally => buf.push(42),
        Instr::Leave(target) => {
            buf.push(43);
            write_usize_as_u32(buf, *target);
        }
    }
}

fn encode_primitive(p: Primitive) -> u8 {
    match p {
        Primitive::Number => 0,
        Primitive::Boolean => 1,
    }
}

fn encode_binop(op: BinOp) -> u8 {
    match op {
        BinOp::Add => 0,
        BinOp::Sub => 1,
        BinOp::Mul => 2,
        BinOp::Div => 3,
        BinOp::Mod => 4,
        BinOp::Exponent => 5,
        BinOp::Eq => 6,
        BinOp::NotEq => 7,
        BinOp::StrictEq => 8,
        BinOp::StrictNotEq => 9,
        BinOp::Lt => 10,
        BinOp::LtEq => 11,
        BinOp::Gt => 12,
        BinOp::GtEq => 13,
        BinOp::BitAnd => 14,
        BinOp::BitOr => 15,
        BinOp::BitXor => 16,
        BinOp::ShiftLeft => 17,
        BinOp::ShiftRight => 18,
        BinOp::UnsignedShiftRight => 19,
        BinOp::In => 20,
        BinOp::InstanceOf => 21,
    }
}

fn encode_unop(op: UnOp) -> u8 {
    match op {
        UnOp::Neg => 0,
        UnOp::Pos => 1,
        UnOp::BitNot => 2,
        UnOp::LogicalNot => 3,
        UnOp::TypeOf => 4,
        UnOp::Void => 5,
    }
}

/// Write the serialized image to `path`, with guaranteed close on every
/// exit path — the file is flushed and synced before the handle is
/// dropped, and any I/O failure is wrapped with the destination path
/// for the caller's diagnostic.
pub fn write_to_path(metadata: &MetadataBuilder, path: &std::path::Path) -> Result<(), ImageError> {
    let bytes = serialize(metadata)?;
    let write_result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    })();
    write_result.map_err(|source| ImageError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
#[path = "tests/writer.rs"]
mod tests;
