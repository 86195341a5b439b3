use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LoomError;
use crate::payload::PayloadKind;

/// Wire index of an interned name. Only meaningful for the connection that
/// announced it.
pub type SymbolId = i32;

/// Bidirectional name/id mapping received from the coordinator's dictionary.
///
/// The position of a name in the dictionary is its id. Payload marker symbols
/// are resolved once here, so the receive loop dispatches on [`PayloadKind`]
/// instead of comparing names.
#[derive(Clone, Debug, Default)]
pub struct Symbols {
    names: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, SymbolId>,
    raw: Option<SymbolId>,
    array: Option<SymbolId>,
    opaque: Option<SymbolId>,
}

impl Symbols {
    /// Builds the table from a dictionary, in wire order.
    pub fn from_dictionary<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut symbols = Symbols::default();

        for name in names {
            let name = name.into();
            let id = symbols.names.len() as SymbolId;
            // A repeated name keeps its first id.
            symbols.ids.entry(name.clone()).or_insert(id);
            symbols.names.push(name);
        }

        for kind in PayloadKind::ALL {
            let id = symbols.ids.get(kind.symbol()).copied();
            match kind {
                PayloadKind::Raw => symbols.raw = id,
                PayloadKind::Array => symbols.array = id,
                PayloadKind::Opaque => symbols.opaque = id,
            }
        }

        symbols
    }

    /// Builds a deterministic table for offline use: names are sorted
    /// lexicographically and numbered in that order.
    pub fn from_unordered<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names.into_iter().map(|s| s.as_ref().to_owned()).collect();
        names.sort();
        names.dedup();
        Self::from_dictionary(names)
    }

    pub fn id(&self, name: &str) -> Option<SymbolId> {
        self.ids.get(name).copied()
    }

    pub(crate) fn resolve(&self, name: &str) -> Result<SymbolId, LoomError> {
        self.id(name)
            .ok_or_else(|| LoomError::UnknownSymbol(name.to_owned()))
    }

    pub fn name(&self, id: SymbolId) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.names.get(index))
            .map(AsRef::as_ref)
    }

    /// Id of a builtin payload marker, if the coordinator announced it.
    pub fn well_known(&self, kind: PayloadKind) -> Option<SymbolId> {
        match kind {
            PayloadKind::Raw => self.raw,
            PayloadKind::Array => self.array,
            PayloadKind::Opaque => self.opaque,
        }
    }

    pub fn payload_kind(&self, id: SymbolId) -> Option<PayloadKind> {
        let id = Some(id);
        if id == self.raw {
            Some(PayloadKind::Raw)
        } else if id == self.array {
            Some(PayloadKind::Array)
        } else if id == self.opaque {
            Some(PayloadKind::Opaque)
        } else {
            None
        }
    }

    /// Every name, indexed by its id.
    pub fn names(&self) -> impl ExactSizeIterator<Item = &str> {
        self.names.iter().map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary() -> Symbols {
        Symbols::from_dictionary([
            "loom/data/const",
            "loom/data",
            "loom/resource/cpus",
            "loom/array",
            "loom/data/merge",
        ])
    }

    #[test]
    fn test_wire_index_is_id() {
        let symbols = dictionary();
        assert_eq!(symbols.id("loom/data/const"), Some(0));
        assert_eq!(symbols.id("loom/data/merge"), Some(4));
        assert_eq!(symbols.id("loom/nope"), None);
        assert_eq!(symbols.name(2), Some("loom/resource/cpus"));
        assert_eq!(symbols.name(-1), None);
        assert_eq!(symbols.name(5), None);
        assert_eq!(symbols.names().len(), 5);
    }

    #[test]
    fn test_payload_markers() {
        let symbols = dictionary();
        assert_eq!(symbols.well_known(PayloadKind::Raw), Some(1));
        assert_eq!(symbols.well_known(PayloadKind::Array), Some(3));
        assert_eq!(symbols.well_known(PayloadKind::Opaque), None);

        assert_eq!(symbols.payload_kind(1), Some(PayloadKind::Raw));
        assert_eq!(symbols.payload_kind(3), Some(PayloadKind::Array));
        assert_eq!(symbols.payload_kind(0), None);
    }

    #[test]
    fn test_unordered_is_sorted() {
        let a = Symbols::from_unordered(["b", "a", "c", "a"]);
        let b = Symbols::from_unordered(["c", "b", "a"]);
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(
            a.names().collect::<Vec<_>>(),
            b.names().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_resolve_unknown() {
        let symbols = dictionary();
        assert!(matches!(
            symbols.resolve("loom/run/run"),
            Err(LoomError::UnknownSymbol(name)) if name == "loom/run/run"
        ));
    }
}
