//! Compile-time constant folding for enum member initializers (§4 enum
//! lowering, diagnostic code 101): the handful of expression shapes that
//! are evaluable without a runtime — literals, a reference to an
//! earlier sibling member of the same enum, unary `+`/`-`/`~` over an
//! already-evaluable numeric value, and binary numeric operators over
//! two already-evaluable numbers. String enums support literal members
//! and sibling references; string concatenation is not foldable here
//! since it would need to mint a new interned atom and this pass only
//! holds a shared `&Interner` (see `DESIGN.md`'s note on this
//! simplification).

use rustc_hash::FxHashMap;
use tsil_ast::ops::{BinaryOp, UnaryOp};
use tsil_ast::{NodeArena, NodeIndex, NodeKind};
use tsil_common::Atom;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstValue {
    Number(f64),
    Str(Atom),
}

/// Evaluates one enum member initializer, consulting `siblings` (the
/// same enum's already-evaluated earlier members) for identifier
/// references. Returns `None` for any shape outside the evaluable set,
/// which the caller turns into an `invalid_enum_initializer` diagnostic.
pub fn eval_const_expr(arena: &NodeArena, siblings: &FxHashMap<Atom, ConstValue>, idx: NodeIndex) -> Option<ConstValue> {
    match &arena.get(idx).kind {
        NodeKind::NumericLiteral(n) => Some(ConstValue::Number(*n)),
        NodeKind::StringLiteral(s) => Some(ConstValue::Str(*s)),
        NodeKind::Identifier(name) => siblings.get(name).copied(),
        NodeKind::Grouping(inner) => eval_const_expr(arena, siblings, *inner),
        NodeKind::Unary { op, operand } => {
            let v = eval_const_expr(arena, siblings, *operand)?;
            match (op, v) {
                (UnaryOp::Plus, ConstValue::Number(n)) => Some(ConstValue::Number(n)),
                (UnaryOp::Minus, ConstValue::Number(n)) => Some(ConstValue::Number(-n)),
                (UnaryOp::BitNot, ConstValue::Number(n)) => Some(ConstValue::Number(!(n as i32) as f64)),
                _ => None,
            }
        }
        NodeKind::Binary { op, left, right } => {
            let l = eval_const_expr(arena, siblings, *left)?;
            let r = eval_const_expr(arena, siblings, *right)?;
            match (l, r) {
                (ConstValue::Number(a), ConstValue::Number(b)) => eval_numeric_binop(*op, a, b),
                _ => None,
            }
        }
        _ => None,
    }
}

fn eval_numeric_binop(op: BinaryOp, a: f64, b: f64) -> Option<ConstValue> {
    let n = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        BinaryOp::Exponent => a.powf(b),
        BinaryOp::BitAnd => ((a as i32) & (b as i32)) as f64,
        BinaryOp::BitOr => ((a as i32) | (b as i32)) as f64,
        BinaryOp::BitXor => ((a as i32) ^ (b as i32)) as f64,
        BinaryOp::ShiftLeft => ((a as i32) << ((b as i32) & 31)) as f64,
        BinaryOp::ShiftRight => ((a as i32) >> ((b as i32) & 31)) as f64,
        BinaryOp::UnsignedShiftRight => ((a as u32) >> ((b as i32) & 31)) as f64,
        _ => return None,
    };
    Some(ConstValue::Number(n))
}
