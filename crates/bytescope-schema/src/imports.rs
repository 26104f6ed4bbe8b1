//! Import resolution and merge logic

use serde_yaml::{Mapping, Value};
use tracing::trace;

/// Supplies raw schema text for imported ids
pub trait ImportResolver {
    /// Raw text of the schema registered under `id`
    fn resolve(&self, id: &str) -> Option<String>;
}

/// Resolver for documents without imports
pub struct NoImports;

impl ImportResolver for NoImports {
    fn resolve(&self, _id: &str) -> Option<String> {
        None
    }
}

impl<F> ImportResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, id: &str) -> Option<String> {
        self(id)
    }
}

/// Schemas currently being imported, outermost first
#[derive(Debug, Default)]
pub struct ImportChain {
    ids: Vec<String>,
}

impl ImportChain {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            ids: vec![root.into()],
        }
    }

    /// Whether importing `id` from the innermost schema would loop
    pub fn closes_loop(&self, id: &str) -> bool {
        self.ids.iter().any(|open| open == id)
    }

    pub fn push(&mut self, id: impl Into<String>) {
        self.ids.push(id.into());
    }

    pub fn pop(&mut self) {
        self.ids.pop();
    }

    /// Innermost schema id
    pub fn current(&self) -> &str {
        self.ids.last().map_or("", String::as_str)
    }

    /// `a -> b -> id`
    pub fn describe(&self, id: &str) -> String {
        let mut parts: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        parts.push(id);
        parts.join(" -> ")
    }
}

/// Schema id named by an import path (`../image/png.ksy` -> `png`)
pub fn import_id(path: &str) -> &str {
    let last = path.rsplit('/').next().unwrap_or(path);
    last.strip_suffix(".ksy").unwrap_or(last)
}

/// Merge an imported document into the importer's `types` mapping
///
/// The imported root becomes a type named `id`; the imported top-level
/// types are added when the importer does not define a type of that name.
pub fn merge_import(importer: &mut Mapping, id: &str, imported: &Mapping) {
    trace!("Merging import '{}'", id);

    let mut as_type = imported.clone();
    let mut type_meta = Mapping::new();
    if let Some(Value::Mapping(meta)) = imported.get("meta") {
        for key in ["endian", "encoding"] {
            if let Some(value) = meta.get(key) {
                type_meta.insert(Value::from(key), value.clone());
            }
        }
    }
    as_type.insert(Value::from("meta"), Value::Mapping(type_meta));

    let types = importer
        .entry(Value::from("types"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !types.is_mapping() {
        *types = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(types) = types else {
        return;
    };

    if let Some(Value::Mapping(imported_types)) = imported.get("types") {
        for (name, spec) in imported_types {
            if !types.contains_key(name) {
                types.insert(name.clone(), spec.clone());
            }
        }
    }

    let key = Value::from(id);
    if !types.contains_key(&key) {
        types.insert(key, Value::Mapping(as_type));
    }
}

/// Import paths listed under `meta.imports`
pub fn declared_imports(document: &Mapping) -> Vec<String> {
    document
        .get("meta")
        .and_then(|meta| meta.get("imports"))
        .and_then(Value::as_sequence)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_chain_loops() {
        let mut chain = ImportChain::new("a");
        assert!(chain.closes_loop("a"));

        chain.push("b");
        chain.push("c");
        assert_eq!(chain.current(), "c");
        assert!(chain.closes_loop("a"));
        assert!(!chain.closes_loop("d"));
        assert_eq!(chain.describe("a"), "a -> b -> c -> a");

        chain.pop();
        chain.pop();
        assert!(!chain.closes_loop("c"));
    }

    #[test]
    fn test_import_id() {
        assert_eq!(import_id("../image/png.ksy"), "png");
        assert_eq!(import_id("common/dos_datetime"), "dos_datetime");
        assert_eq!(import_id("vlq"), "vlq");
    }

    #[test]
    fn test_merge_import_adds_root_and_types() {
        let mut importer: Mapping = serde_yaml::from_str(
            "meta: {id: outer}\ntypes:\n  header:\n    seq: [{id: a, type: u1}]\n",
        )
        .unwrap();
        let imported: Mapping = serde_yaml::from_str(
            "meta: {id: inner, endian: be}\nseq: [{id: x, type: u2}]\ntypes:\n  header:\n    seq: []\n  body:\n    seq: []\n",
        )
        .unwrap();

        merge_import(&mut importer, "inner", &imported);

        let types = importer.get("types").and_then(Value::as_mapping).unwrap();
        assert!(types.contains_key("inner"));
        assert!(types.contains_key("body"));
        let header_seq = types.get("header").unwrap()["seq"].as_sequence().unwrap();
        assert_eq!(header_seq.len(), 1);
        let inner_meta = &types.get("inner").unwrap()["meta"];
        assert_eq!(inner_meta["endian"], Value::from("be"));
        assert!(inner_meta.get("id").is_none());
    }

    #[test]
    fn test_declared_imports() {
        let doc: Mapping = serde_yaml::from_str("meta: {id: a, imports: [x/y, z]}").unwrap();
        assert_eq!(declared_imports(&doc), vec!["x/y", "z"]);
    }
}
