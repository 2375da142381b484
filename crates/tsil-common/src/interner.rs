//! String interning for identifier deduplication.
//!
//! Every registry in `tsil-driver` is keyed by interned `Atom`s rather
//! than owned `String`s, so repeated lookups of a class or function name
//! during phase 7 body emission are a cheap integer compare instead of a
//! string compare.

use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

/// An interned string. Cheap to copy and compare; `Eq`/`Hash` are by id,
/// not by content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// A single-threaded string interner.
#[derive(Default)]
pub struct Interner {
    strings: Vec<Arc<str>>,
    lookup: FxHashMap<Arc<str>, Atom>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Atom {
        if let Some(&atom) = self.lookup.get(s) {
            return atom;
        }
        let arc: Arc<str> = Arc::from(s);
        let atom = Atom(self.strings.len() as u32);
        self.strings.push(arc.clone());
        self.lookup.insert(arc, atom);
        atom
    }

    pub fn resolve(&self, atom: Atom) -> &str {
        &self.strings[atom.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// A thread-safe interner, for the rare case (not exercised by the
/// single-threaded driver) where an interner must be shared across a
/// `Send` boundary, e.g. when a future multi-threaded front end hands
/// module ASTs to the driver concurrently before the sequential
/// compile phases begin.
#[derive(Default, Clone)]
pub struct ShardedInterner {
    inner: Arc<Mutex<Interner>>,
}

impl ShardedInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Atom {
        self.inner.lock().expect("interner mutex poisoned").intern(s)
    }

    pub fn resolve(&self, atom: Atom) -> Arc<str> {
        let guard = self.inner.lock().expect("interner mutex poisoned");
        guard.strings[atom.0 as usize].clone()
    }
}

#[cfg(test)]
#[path = "../tests/interner.rs"]
mod tests;
