//! Per-function (and module-global) name scopes.
//!
//! Every named binding takes two consecutive slots: the payload at `idx` in
//! the module valtype and the type tag at `idx + 1` as i32.  The map holds
//! both under `name` and `name#type` so the pairing is visible to lookups
//! and to the output stage.  Named temporaries (`#last_type`,
//! `#typeswitch_tmp`, …) take a single slot and are memoized per scope.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::{TypeTag, Valtype};

/// One slot binding.
#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub idx: u32,
    pub valtype: Valtype,
    /// Statically-known type tag, from an annotation or a known initializer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TypeTag>,
}

/// A function scope (or the module-global scope).
#[derive(Debug, Clone)]
pub struct Scope {
    pub name: String,
    pub locals: HashMap<String, Binding>,
    pub local_ind: u32,
    pub params: Vec<Valtype>,
    pub returns: Vec<Valtype>,
    /// Statically-known return type when every `return` site agrees.
    pub return_type: Option<TypeTag>,
    /// Set once a `return` with an unknowable or conflicting type is seen.
    pub return_type_poisoned: bool,
    pub throws: bool,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Scope {
        Scope {
            name: name.into(),
            locals: HashMap::new(),
            local_ind: 0,
            params: Vec::new(),
            returns: Vec::new(),
            return_type: None,
            return_type_poisoned: false,
            throws: false,
        }
    }

    /// Reserve a payload/type-tag slot pair for `name`.  Returns the payload
    /// slot index.  Re-allocating an existing name returns its slot.
    pub fn alloc_var(&mut self, name: &str, valtype: Valtype) -> u32 {
        if let Some(b) = self.locals.get(name) {
            return b.idx;
        }
        let idx = self.local_ind;
        self.local_ind += 2;
        self.locals.insert(
            name.to_string(),
            Binding {
                idx,
                valtype,
                metadata: None,
            },
        );
        self.locals.insert(
            format!("{name}#type"),
            Binding {
                idx: idx + 1,
                valtype: Valtype::I32,
                metadata: None,
            },
        );
        idx
    }

    /// Reserve (or find) a single unpaired slot for a named temporary.
    pub fn alloc_tmp(&mut self, name: &str, valtype: Valtype) -> u32 {
        if let Some(b) = self.locals.get(name) {
            return b.idx;
        }
        let idx = self.local_ind;
        self.local_ind += 1;
        self.locals.insert(
            name.to_string(),
            Binding {
                idx,
                valtype,
                metadata: None,
            },
        );
        idx
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.locals.get(name)
    }

    /// Attach a statically-known type tag to a binding.
    pub fn set_metadata(&mut self, name: &str, tag: Option<TypeTag>) {
        if let Some(b) = self.locals.get_mut(name) {
            b.metadata = tag;
        }
    }

    /// Merge one `return` site's statically-known type into the scope.
    pub fn note_return_type(&mut self, tag: Option<TypeTag>) {
        if self.return_type_poisoned {
            return;
        }
        match (self.return_type, tag) {
            (_, None) => {
                self.return_type = None;
                self.return_type_poisoned = true;
            }
            (None, Some(t)) => self.return_type = Some(t),
            (Some(prev), Some(t)) if prev != t => {
                self.return_type = None;
                self.return_type_poisoned = true;
            }
            _ => {}
        }
    }
}

/// Resolve a name against the current scope, falling back to globals.
/// Returns the binding and whether it lives at module scope.
pub fn lookup_name<'a>(
    scope: &'a Scope,
    globals: &'a Scope,
    name: &str,
) -> Option<(&'a Binding, bool)> {
    if let Some(b) = scope.lookup(name) {
        return Some((b, false));
    }
    globals.lookup(name).map(|b| (b, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_pairing() {
        let mut s = Scope::new("f");
        let x = s.alloc_var("x", Valtype::F64);
        let y = s.alloc_var("y", Valtype::F64);
        assert_eq!(x, 0);
        assert_eq!(y, 2);
        assert_eq!(s.lookup("x#type").map(|b| b.idx), Some(x + 1));
        assert_eq!(s.lookup("y#type").map(|b| b.idx), Some(y + 1));
        assert_eq!(s.lookup("x#type").map(|b| b.valtype), Some(Valtype::I32));
    }

    #[test]
    fn realloc_returns_existing_slot() {
        let mut s = Scope::new("f");
        let a = s.alloc_var("x", Valtype::F64);
        let b = s.alloc_var("x", Valtype::F64);
        assert_eq!(a, b);
        assert_eq!(s.local_ind, 2);
    }

    #[test]
    fn tmp_is_memoized_and_unpaired() {
        let mut s = Scope::new("f");
        let t1 = s.alloc_tmp("#last_type", Valtype::I32);
        let t2 = s.alloc_tmp("#last_type", Valtype::I32);
        assert_eq!(t1, t2);
        assert_eq!(s.local_ind, 1);
        assert!(s.lookup("#last_type#type").is_none());
    }

    #[test]
    fn lookup_prefers_locals() {
        let mut globals = Scope::new("#global");
        globals.alloc_var("x", Valtype::F64);
        let mut f = Scope::new("f");
        f.alloc_var("x", Valtype::F64);

        let (b, is_global) = lookup_name(&f, &globals, "x").unwrap();
        assert!(!is_global);
        assert_eq!(b.idx, 0);

        let (_, is_global) = lookup_name(&Scope::new("g"), &globals, "x").unwrap();
        assert!(is_global);
    }

    #[test]
    fn return_type_merging() {
        let mut s = Scope::new("f");
        s.note_return_type(Some(0));
        assert_eq!(s.return_type, Some(0));
        s.note_return_type(Some(0));
        assert_eq!(s.return_type, Some(0));
        s.note_return_type(Some(2));
        assert_eq!(s.return_type, None);
        s.note_return_type(Some(0));
        assert_eq!(s.return_type, None);
    }
}
