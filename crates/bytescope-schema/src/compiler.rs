//! Schema compiler: declarative text to [`Schema`]
//!
//! Compilation collects every error and warning it can find in one pass.
//! Any error rejects the whole document; warnings travel with the compiled
//! schema.

use crate::expr::Expr;
use crate::imports::{
    ImportChain, ImportResolver, NoImports, declared_imports, import_id, merge_import,
};
use crate::model::{
    EndianSpec, EnumId, EnumSpec, FieldSpec, FieldType, InstanceSpec, Meta, ProcessSpec, Repeat,
    Schema, Signature, SwitchSpec, TypeId, TypeSpec, Valid,
};
use crate::{Error, Result};
use bytescope_stream::{Endian, Process, encoding};
use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, trace};

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new("^[a-z][a-z0-9_]*$").ok());

/// Whether `name` is a valid schema identifier
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(name))
}

/// One compile error or warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Location in the document (`seq[2].repeat`, `types.chunk.seq[0]`, ...)
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// All diagnostics produced for one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl CompileReport {
    /// True when there are no errors
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(Diagnostic {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warning(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(Diagnostic {
            path: path.into(),
            message: message.into(),
        });
    }
}

impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s), {} warning(s)", self.errors.len(), self.warnings.len())?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

/// A successfully compiled schema and its warnings
#[derive(Debug, Clone)]
pub struct Compiled {
    pub schema: Schema,
    pub warnings: Vec<Diagnostic>,
}

/// Compiler settings
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Literal `repeat-expr` counts above this produce a warning
    pub large_repeat_warning: i128,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            large_repeat_warning: 100_000,
        }
    }
}

impl CompilerOptions {
    /// Set the large repeat warning threshold
    #[must_use]
    pub fn with_large_repeat_warning(mut self, threshold: i128) -> Self {
        self.large_repeat_warning = threshold;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MetaFile {
    id: Option<String>,
    title: Option<String>,
    endian: Option<Value>,
    file_extension: Option<Value>,
    imports: Option<Value>,
    encoding: Option<String>,
    signature: Option<SignatureFile>,
}

#[derive(Debug, Deserialize)]
struct SignatureFile {
    #[serde(default)]
    offset: usize,
    bytes: Value,
    mask: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TypeFile {
    meta: Option<Value>,
    #[serde(default)]
    seq: Vec<Value>,
    #[serde(default)]
    types: Mapping,
    #[serde(default)]
    instances: Mapping,
    #[serde(default)]
    enums: Mapping,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FieldFile {
    id: Option<String>,
    #[serde(rename = "type")]
    ty: Option<Value>,
    contents: Option<Value>,
    size: Option<Value>,
    #[serde(default)]
    size_eos: bool,
    terminator: Option<u8>,
    include: Option<bool>,
    consume: Option<bool>,
    encoding: Option<String>,
    #[serde(rename = "enum")]
    enum_name: Option<String>,
    #[serde(rename = "if")]
    condition: Option<Value>,
    repeat: Option<String>,
    repeat_expr: Option<Value>,
    repeat_until: Option<Value>,
    valid: Option<Value>,
    process: Option<String>,
    pos: Option<Value>,
    value: Option<Value>,
    doc: Option<String>,
}

struct PendingType {
    id: TypeId,
    path: String,
    seq: Vec<Value>,
    instances: Mapping,
}

/// Compiles schema documents
pub struct Compiler<'r> {
    options: CompilerOptions,
    resolver: &'r dyn ImportResolver,
}

impl Default for Compiler<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler<'static> {
    /// A compiler that rejects imports
    pub fn new() -> Self {
        Self {
            options: CompilerOptions::default(),
            resolver: &NoImports,
        }
    }
}

impl<'r> Compiler<'r> {
    /// A compiler that resolves `meta.imports` through `resolver`
    pub fn with_resolver(resolver: &'r dyn ImportResolver) -> Self {
        Self {
            options: CompilerOptions::default(),
            resolver,
        }
    }

    /// Replace the compiler options
    #[must_use]
    pub fn options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Compile YAML schema text
    pub fn compile(&self, source: &str) -> Result<Compiled> {
        match serde_yaml::from_str::<Value>(source) {
            Ok(document) => self.compile_value(document),
            Err(e) => Err(rejected("", format!("invalid YAML: {e}"))),
        }
    }

    /// Compile JSON schema text
    pub fn compile_json(&self, source: &str) -> Result<Compiled> {
        let json: serde_json::Value = serde_json::from_str(source)
            .map_err(|e| rejected("", format!("invalid JSON: {e}")))?;
        let document = serde_yaml::to_value(json)
            .map_err(|e| rejected("", format!("unsupported JSON document: {e}")))?;
        self.compile_value(document)
    }

    /// Compile and return every diagnostic, whether or not compilation succeeds
    pub fn check(&self, source: &str) -> CompileReport {
        match self.compile(source) {
            Ok(compiled) => CompileReport {
                errors: Vec::new(),
                warnings: compiled.warnings,
            },
            Err(Error::Compile { report, .. }) => report,
            Err(other) => {
                let mut report = CompileReport::default();
                report.error("", other.to_string());
                report
            }
        }
    }

    /// Read only the `meta` section and the derived signature
    ///
    /// Used to index documents that are compiled on first use.
    pub fn scan(&self, source: &str) -> Result<Meta> {
        let root = match serde_yaml::from_str::<Value>(source) {
            Ok(Value::Mapping(root)) => root,
            Ok(_) => return Err(rejected("", "document must be a mapping")),
            Err(e) => return Err(rejected("", format!("invalid YAML: {e}"))),
        };

        let mut report = CompileReport::default();
        let mut meta = self.meta(&root, &mut report);
        if !report.is_ok() {
            return Err(Error::Compile { id: meta.id, report });
        }

        if meta.signature.is_none() {
            let first = root
                .get("seq")
                .and_then(Value::as_sequence)
                .and_then(|seq| seq.first())
                .and_then(Value::as_mapping);
            let unconditional =
                first.is_some_and(|f| !f.contains_key("if") && !f.contains_key("repeat"));
            let contents = first
                .and_then(|f| f.get("contents"))
                .and_then(|c| parse_contents(c).ok())
                .filter(|b| !b.is_empty());
            if let (true, Some(bytes)) = (unconditional, contents) {
                meta.signature = Some(Signature {
                    offset: 0,
                    bytes,
                    mask: None,
                });
            }
        }
        Ok(meta)
    }

    /// Compile an already parsed document
    pub fn compile_value(&self, document: Value) -> Result<Compiled> {
        let mut report = CompileReport::default();
        let Value::Mapping(mut root) = document else {
            return Err(rejected("", "document must be a mapping"));
        };

        let meta = self.meta(&root, &mut report);
        let id = meta.id.clone();
        debug!("Compiling schema '{}'", id);

        if !meta.imports.is_empty() {
            let mut chain = ImportChain::new(id.as_str());
            self.merge_imports(&mut root, &mut chain, &mut report, "meta.imports");
        }

        let root_file: TypeFile = match serde_yaml::from_value(Value::Mapping(root)) {
            Ok(file) => file,
            Err(e) => {
                report.error("", e.to_string());
                return Err(Error::Compile { id, report });
            }
        };

        let no_structure =
            root_file.seq.is_empty() && root_file.instances.is_empty() && root_file.types.is_empty();

        let mut builder = Builder {
            options: &self.options,
            schema: Schema {
                meta,
                root: TypeId(0),
                types: Vec::new(),
                enums: Vec::new(),
            },
            own_endian: Vec::new(),
            own_encoding: Vec::new(),
            pending: Vec::new(),
            report,
        };

        let root_name = builder.schema.meta.id.clone();
        builder.declare(root_name, root_file, None, String::new(), true);
        builder.inherit_type_settings();
        builder.compile_pending();
        builder.finish_warnings(no_structure);
        builder.derive_signature();

        let Builder { schema, report, .. } = builder;
        if report.is_ok() {
            trace!(
                "Compiled '{}': {} types, {} enums, {} warnings",
                schema.meta.id,
                schema.types.len(),
                schema.enums.len(),
                report.warnings.len()
            );
            Ok(Compiled {
                schema,
                warnings: report.warnings,
            })
        } else {
            debug!("Schema '{}' rejected: {}", schema.meta.id, report);
            Err(Error::Compile {
                id: schema.meta.id,
                report,
            })
        }
    }

    fn meta(&self, root: &Mapping, report: &mut CompileReport) -> Meta {
        let Some(raw) = root.get("meta") else {
            report.error("", "missing required \"meta\" section");
            return Meta::default();
        };
        let file: MetaFile = match serde_yaml::from_value(raw.clone()) {
            Ok(file) => file,
            Err(e) => {
                report.error("meta", e.to_string());
                return Meta::default();
            }
        };

        let id = match file.id {
            Some(id) if is_identifier(&id) => id,
            Some(id) => {
                report.error(
                    "meta.id",
                    format!("invalid id '{id}': must start with a lowercase letter and contain only lowercase letters, digits and underscores"),
                );
                id
            }
            None => {
                report.error("meta", "missing required meta field: id");
                String::new()
            }
        };

        let file_extensions = match &file.file_extension {
            None => Vec::new(),
            Some(Value::String(ext)) => vec![ext.to_ascii_lowercase()],
            Some(Value::Sequence(items)) if items.iter().all(Value::is_string) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_ascii_lowercase)
                .collect(),
            Some(_) => {
                report.error("meta.file-extension", "must be a string or a list of strings");
                Vec::new()
            }
        };

        let imports = match &file.imports {
            None => Vec::new(),
            Some(Value::Sequence(items)) if items.iter().all(Value::is_string) => items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
            Some(_) => {
                report.error("meta.imports", "must be a list of strings");
                Vec::new()
            }
        };

        if let Some(label) = &file.encoding {
            if !encoding::is_known(label) {
                report.warning("meta.encoding", format!("uncommon encoding \"{label}\" may not be supported"));
            }
        }

        let signature = file.signature.as_ref().and_then(|sig| {
            let bytes = parse_signature_bytes(&sig.bytes)
                .map_err(|m| report.error("meta.signature.bytes", m))
                .ok()?;
            let mask = match &sig.mask {
                Some(mask) => Some(
                    parse_signature_bytes(mask)
                        .map_err(|m| report.error("meta.signature.mask", m))
                        .ok()?,
                ),
                None => None,
            };
            if bytes.is_empty() {
                report.error("meta.signature.bytes", "must not be empty");
                return None;
            }
            Some(Signature {
                offset: sig.offset,
                bytes,
                mask,
            })
        });

        Meta {
            id,
            title: file.title,
            endian: None,
            file_extensions,
            imports,
            encoding: file.encoding,
            signature,
        }
    }

    fn merge_imports(
        &self,
        document: &mut Mapping,
        chain: &mut ImportChain,
        report: &mut CompileReport,
        path: &str,
    ) {
        for import in declared_imports(document) {
            let id = import_id(&import).to_string();
            if chain.closes_loop(&id) {
                report.error(path, format!("import cycle: {}", chain.describe(&id)));
                continue;
            }

            let Some(source) = self.resolver.resolve(&id) else {
                report.error(path, format!("missing import '{import}'"));
                continue;
            };
            let mut imported = match serde_yaml::from_str::<Value>(&source) {
                Ok(Value::Mapping(mapping)) => mapping,
                Ok(_) => {
                    report.error(path, format!("import '{id}' is not a mapping"));
                    continue;
                }
                Err(e) => {
                    report.error(path, format!("import '{id}': invalid YAML: {e}"));
                    continue;
                }
            };

            chain.push(id.as_str());
            self.merge_imports(&mut imported, chain, report, &format!("imports.{id}"));
            chain.pop();
            merge_import(document, &id, &imported);
        }
    }
}

fn rejected(path: &str, message: impl Into<String>) -> Error {
    let mut report = CompileReport::default();
    report.error(path, message);
    Error::Compile {
        id: String::new(),
        report,
    }
}

struct Builder<'o> {
    options: &'o CompilerOptions,
    schema: Schema,
    own_endian: Vec<Option<EndianSpec>>,
    own_encoding: Vec<Option<String>>,
    pending: Vec<PendingType>,
    report: CompileReport,
}

impl Builder<'_> {
    /// Register a type, its enums and nested types; fields are compiled later
    fn declare(
        &mut self,
        name: String,
        file: TypeFile,
        parent: Option<TypeId>,
        path: String,
        is_root: bool,
    ) -> TypeId {
        let id = TypeId(self.schema.types.len());
        self.schema.types.push(TypeSpec::new(name, parent));

        let (endian, encoding) = self.type_meta(file.meta.as_ref(), &path, is_root);
        self.own_endian.push(endian);
        self.own_encoding.push(encoding);

        for (key, value) in &file.enums {
            let enum_path = format!("{path}enums");
            let Some(name) = key.as_str() else {
                self.report.error(enum_path, "enum names must be strings");
                continue;
            };
            if !is_identifier(name) {
                self.report.error(&enum_path, format!("invalid enum name \"{name}\""));
            }
            let spec = self.enum_spec(name, value, &format!("{enum_path}.{name}"));
            let enum_id = EnumId(self.schema.enums.len());
            self.schema.enums.push(spec);
            self.schema.types[id.0]
                .nested_enums
                .insert(name.to_string(), enum_id);
        }

        for (key, value) in file.types {
            let Some(type_name) = key.as_str().map(ToString::to_string) else {
                self.report.error(format!("{path}types"), "type names must be strings");
                continue;
            };
            if !is_identifier(&type_name) {
                self.report
                    .error(format!("{path}types"), format!("invalid type name \"{type_name}\""));
            }
            let type_path = format!("{path}types.{type_name}.");
            match serde_yaml::from_value::<TypeFile>(value) {
                Ok(nested) => {
                    let child = self.declare(type_name.clone(), nested, Some(id), type_path, false);
                    self.schema.types[id.0].nested_types.insert(type_name, child);
                }
                Err(e) => self.report.error(type_path.trim_end_matches('.'), e.to_string()),
            }
        }

        self.pending.push(PendingType {
            id,
            path,
            seq: file.seq,
            instances: file.instances,
        });
        id
    }

    fn type_meta(
        &mut self,
        meta: Option<&Value>,
        path: &str,
        is_root: bool,
    ) -> (Option<EndianSpec>, Option<String>) {
        let Some(meta) = meta else {
            return (None, None);
        };
        let endian_path = format!("{path}meta.endian");
        let endian = meta.get("endian").and_then(|raw| match raw {
            Value::String(s) => match Endian::from_suffix(s) {
                Some(e) => Some(EndianSpec::Fixed(e)),
                None => {
                    self.report.error(&endian_path, "must be one of le, be");
                    None
                }
            },
            Value::Mapping(switch) => self.endian_switch(switch, &endian_path),
            _ => {
                self.report.error(&endian_path, "must be one of le, be");
                None
            }
        });
        let encoding = meta.get("encoding").and_then(Value::as_str).map(ToString::to_string);
        if !is_root {
            if let Some(label) = &encoding {
                if !encoding::is_known(label) {
                    self.report.warning(
                        format!("{path}meta.encoding"),
                        format!("uncommon encoding \"{label}\" may not be supported"),
                    );
                }
            }
        }
        (endian, encoding)
    }

    fn endian_switch(&mut self, switch: &Mapping, path: &str) -> Option<EndianSpec> {
        let on = switch.get("switch-on").and_then(|v| self.raw_expr(v, &format!("{path}.switch-on")));
        let Some(Value::Mapping(raw_cases)) = switch.get("cases") else {
            self.report.error(path, "endian switch requires \"cases\"");
            return None;
        };
        let mut cases = Vec::new();
        for (key, value) in raw_cases {
            let endian = value.as_str().and_then(Endian::from_suffix);
            let key_expr = self.case_key(key, path);
            match (key_expr, endian) {
                (Some(k), Some(e)) => cases.push((k, e)),
                (_, None) => self.report.error(path, "endian cases must map to le or be"),
                _ => {}
            }
        }
        match on {
            Some(on) => Some(EndianSpec::Switch { on, cases }),
            None => {
                self.report.error(path, "endian switch requires \"switch-on\"");
                None
            }
        }
    }

    fn enum_spec(&mut self, name: &str, value: &Value, path: &str) -> EnumSpec {
        let mut values = Vec::new();
        let Value::Mapping(entries) = value else {
            self.report.error(path, "must be a mapping of integers to labels");
            return EnumSpec {
                name: name.to_string(),
                values,
            };
        };
        for (key, label) in entries {
            let number = match key {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => match Expr::parse(s) {
                    Ok(Expr::Int(v)) => i64::try_from(v).ok(),
                    _ => None,
                },
                _ => None,
            };
            let label = match label {
                Value::String(s) => Some(s.clone()),
                Value::Mapping(m) => m.get("id").and_then(Value::as_str).map(ToString::to_string),
                _ => None,
            };
            match (number, label) {
                (Some(n), Some(l)) => {
                    if !is_identifier(&l) {
                        self.report.error(path, format!("invalid enum label \"{l}\""));
                    }
                    values.push((n, l));
                }
                (None, _) => self.report.error(path, "enum keys must be integers"),
                (_, None) => self.report.error(path, "enum values must be labels"),
            }
        }
        EnumSpec {
            name: name.to_string(),
            values,
        }
    }

    /// Effective endianness and encoding flow from enclosing types
    fn inherit_type_settings(&mut self) {
        self.schema.meta.endian = self.own_endian.first().cloned().flatten();
        for index in 0..self.schema.types.len() {
            let parent = self.schema.types[index].parent;
            let endian = self.own_endian[index]
                .clone()
                .or_else(|| parent.and_then(|p| self.schema.types[p.0].endian.clone()));
            let encoding = self.own_encoding[index]
                .clone()
                .or_else(|| parent.and_then(|p| self.schema.types[p.0].encoding.clone()));
            self.schema.types[index].endian = endian;
            self.schema.types[index].encoding = encoding;
        }
    }

    fn compile_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for ty in pending {
            let mut seq = Vec::with_capacity(ty.seq.len());
            for (index, raw) in ty.seq.into_iter().enumerate() {
                let path = format!("{}seq[{index}]", ty.path);
                if let Some(field) = self.field(raw, index, ty.id, &path, None) {
                    seq.push(field);
                }
            }

            let mut instances = Vec::with_capacity(ty.instances.len());
            for (key, raw) in ty.instances {
                let Some(name) = key.as_str().map(ToString::to_string) else {
                    self.report.error(format!("{}instances", ty.path), "instance names must be strings");
                    continue;
                };
                let path = format!("{}instances.{name}", ty.path);
                if !is_identifier(&name) {
                    self.report.error(&path, format!("invalid instance name \"{name}\""));
                }
                if let Some(instance) = self.instance(name, raw, ty.id, &path) {
                    instances.push(instance);
                }
            }

            let spec = &mut self.schema.types[ty.id.0];
            spec.seq = seq;
            spec.instances = instances;
        }
    }

    fn instance(&mut self, name: String, raw: Value, scope: TypeId, path: &str) -> Option<InstanceSpec> {
        if raw.get("value").is_none() {
            return self
                .field(raw, 0, scope, path, Some(name))
                .map(InstanceSpec::Parse);
        }

        let file: FieldFile = match serde_yaml::from_value(raw) {
            Ok(file) => file,
            Err(e) => {
                self.report.error(path, e.to_string());
                return None;
            }
        };
        let expr = file
            .value
            .as_ref()
            .and_then(|v| self.expr(v, scope, &format!("{path}.value")))?;
        let condition = file
            .condition
            .as_ref()
            .and_then(|v| self.expr(v, scope, &format!("{path}.if")));
        let enum_id = file
            .enum_name
            .as_deref()
            .and_then(|e| self.enum_ref(e, scope, path));
        Some(InstanceSpec::Value {
            id: name,
            expr,
            condition,
            enum_id,
        })
    }

    #[allow(clippy::too_many_lines)]
    fn field(
        &mut self,
        raw: Value,
        index: usize,
        scope: TypeId,
        path: &str,
        instance_id: Option<String>,
    ) -> Option<FieldSpec> {
        let mut file: FieldFile = match serde_yaml::from_value(raw) {
            Ok(file) => file,
            Err(e) => {
                self.report.error(path, e.to_string());
                return None;
            }
        };
        let is_instance = instance_id.is_some();

        let contents = file.contents.as_ref().and_then(|v| {
            parse_contents(v)
                .map_err(|m| self.report.error(format!("{path}.contents"), m))
                .ok()
        });

        let id = match (instance_id, file.id.take()) {
            (Some(name), _) => name,
            (None, Some(id)) => {
                if !is_identifier(&id) {
                    self.report.error(format!("{path}.id"), format!("invalid identifier \"{id}\""));
                }
                id
            }
            (None, None) if contents.is_some() => format!("_unnamed{index}"),
            (None, None) => {
                self.report.error(path, "missing required field \"id\"");
                format!("_unnamed{index}")
            }
        };

        let mut field = FieldSpec::new(id);
        field.doc = file.doc.take();

        field.ty = match (&contents, &file.ty) {
            (Some(_), _) | (None, None) => FieldType::Bytes,
            (None, Some(Value::String(name))) => self.type_ref(name, scope, &format!("{path}.type")),
            (None, Some(Value::Mapping(switch))) => self.switch(switch, scope, &format!("{path}.type")),
            (None, Some(_)) => {
                self.report.error(format!("{path}.type"), "must be a type name or a switch");
                FieldType::Bytes
            }
        };
        field.contents = contents;

        field.size = file.size.as_ref().and_then(|v| self.expr(v, scope, &format!("{path}.size")));
        field.size_eos = file.size_eos;
        field.terminator = file.terminator;
        field.include = file.include.unwrap_or(false);
        field.consume = file.consume.unwrap_or(true);
        if field.ty == FieldType::Strz && field.terminator.is_none() {
            field.terminator = Some(0);
        }

        let sized = field.size.is_some() || field.size_eos || field.terminator.is_some();
        match &field.ty {
            FieldType::Str if !sized => self.report.error(
                path,
                "str requires \"size\", \"size-eos\" or \"terminator\"",
            ),
            FieldType::Bytes if !sized && field.contents.is_none() && file.size.is_none() => {
                self.report.error(
                    path,
                    "raw byte field requires \"size\", \"size-eos\", \"terminator\" or \"contents\"",
                );
            }
            _ => {}
        }

        if let Some(label) = &file.encoding {
            if !encoding::is_known(label) {
                self.report.warning(
                    format!("{path}.encoding"),
                    format!("uncommon encoding \"{label}\" may not be supported"),
                );
            }
        }
        field.encoding = file.encoding.take();

        field.enum_id = file
            .enum_name
            .as_deref()
            .and_then(|e| self.enum_ref(e, scope, &format!("{path}.enum")));
        field.condition = file
            .condition
            .as_ref()
            .and_then(|v| self.expr(v, scope, &format!("{path}.if")));
        field.repeat = self.repeat(&file, scope, path, &field.id);
        field.valid = file
            .valid
            .as_ref()
            .and_then(|v| self.valid(v, scope, &format!("{path}.valid")));
        field.process = file.process.as_deref().map(|p| self.process(p, &format!("{path}.process")));

        if let Some(pos) = &file.pos {
            if is_instance {
                field.pos = self.expr(pos, scope, &format!("{path}.pos"));
            } else {
                self.report.error(format!("{path}.pos"), "pos is only allowed in instances");
            }
        }

        Some(field)
    }

    fn repeat(&mut self, file: &FieldFile, scope: TypeId, path: &str, id: &str) -> Option<Repeat> {
        let repeat_path = format!("{path}.repeat");
        match file.repeat.as_deref()? {
            "expr" => {
                let Some(raw) = &file.repeat_expr else {
                    self.report.error(path, "repeat \"expr\" requires \"repeat-expr\"");
                    return None;
                };
                let expr = self.expr(raw, scope, &format!("{path}.repeat-expr"))?;
                if let Expr::Int(count) = expr {
                    if count > self.options.large_repeat_warning {
                        self.report.warning(
                            &repeat_path,
                            format!("very large repeat count ({count}) in field \"{id}\" may impact performance"),
                        );
                    }
                }
                Some(Repeat::Expr(expr))
            }
            "eos" => Some(Repeat::Eos),
            "until" => {
                let Some(raw) = &file.repeat_until else {
                    self.report.error(path, "repeat \"until\" requires \"repeat-until\"");
                    return None;
                };
                self.expr(raw, scope, &format!("{path}.repeat-until")).map(Repeat::Until)
            }
            other => {
                self.report.error(
                    repeat_path,
                    format!("unknown repeat mode \"{other}\": must be one of expr, eos, until"),
                );
                None
            }
        }
    }

    fn valid(&mut self, raw: &Value, scope: TypeId, path: &str) -> Option<Valid> {
        let Value::Mapping(map) = raw else {
            return self.expr(raw, scope, path).map(Valid::Eq);
        };

        if let Some(eq) = map.get("eq") {
            return self.expr(eq, scope, &format!("{path}.eq")).map(Valid::Eq);
        }
        if let Some(any_of) = map.get("any-of") {
            let Some(items) = any_of.as_sequence() else {
                self.report.error(format!("{path}.any-of"), "must be a list");
                return None;
            };
            let exprs = items
                .iter()
                .filter_map(|item| self.expr(item, scope, &format!("{path}.any-of")))
                .collect();
            return Some(Valid::AnyOf(exprs));
        }
        if let Some(expr) = map.get("expr") {
            return self.expr(expr, scope, &format!("{path}.expr")).map(Valid::Expr);
        }

        let min = map.get("min").and_then(|v| self.expr(v, scope, &format!("{path}.min")));
        let max = map.get("max").and_then(|v| self.expr(v, scope, &format!("{path}.max")));
        if min.is_none() && max.is_none() {
            self.report.error(path, "valid must contain eq, min, max, any-of or expr");
            return None;
        }
        Some(Valid::Range { min, max })
    }

    fn process(&mut self, raw: &str, path: &str) -> ProcessSpec {
        let (name, args) = match raw.split_once('(') {
            Some((name, rest)) => (name.trim(), rest.trim_end().trim_end_matches(')')),
            None => (raw.trim(), ""),
        };

        let mut bytes = Vec::new();
        for arg in args.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            match Expr::parse(arg) {
                Ok(Expr::Int(v)) => match u8::try_from(v) {
                    Ok(b) => bytes.push(b),
                    Err(_) => {
                        self.report.error(path, format!("process argument {v} is not a byte"));
                    }
                },
                _ => {
                    self.report.warning(path, format!("process argument \"{arg}\" must be a literal"));
                    return ProcessSpec::Unsupported(name.to_string());
                }
            }
        }

        match Process::from_parts(name, &bytes) {
            Ok(process) => ProcessSpec::Apply(process),
            Err(_) => {
                self.report.warning(path, format!("unsupported process \"{raw}\": bytes stay raw"));
                ProcessSpec::Unsupported(name.to_string())
            }
        }
    }

    fn type_ref(&mut self, name: &str, scope: TypeId, path: &str) -> FieldType {
        if let Some(primitive) = FieldType::primitive(name) {
            return primitive;
        }
        match self.schema.resolve_type(scope, name) {
            Some(id) => FieldType::User(id),
            None => {
                self.report.warning(path, format!("unknown type \"{name}\""));
                FieldType::Unknown(name.to_string())
            }
        }
    }

    fn switch(&mut self, switch: &Mapping, scope: TypeId, path: &str) -> FieldType {
        let on = match switch.get("switch-on") {
            Some(raw) => self.expr(raw, scope, &format!("{path}.switch-on")),
            None => {
                self.report.error(path, "switch type requires \"switch-on\"");
                None
            }
        };
        let raw_cases = match switch.get("cases") {
            Some(Value::Mapping(cases)) => cases.clone(),
            Some(_) => {
                self.report.error(format!("{path}.cases"), "must be a mapping");
                Mapping::new()
            }
            None => {
                self.report.error(path, "switch type requires \"cases\"");
                Mapping::new()
            }
        };

        let mut cases = Vec::new();
        let mut default = None;
        for (key, value) in &raw_cases {
            let case_path = format!("{path}.cases");
            let Some(type_name) = value.as_str() else {
                self.report.error(&case_path, "case types must be type names");
                continue;
            };
            let ty = self.type_ref(type_name, scope, &case_path);
            if key.as_str() == Some("_") {
                default = Some(Box::new(ty));
            } else if let Some(key_expr) = self.case_key(key, &case_path) {
                let key_expr = self.resolve_enums(key_expr, scope, &case_path);
                cases.push((key_expr, ty));
            }
        }

        FieldType::Switch(SwitchSpec {
            on: on.unwrap_or(Expr::Int(0)),
            cases,
            default,
        })
    }

    fn case_key(&mut self, key: &Value, path: &str) -> Option<Expr> {
        match raw_expr(key) {
            Ok(expr) => Some(expr),
            Err(message) => {
                self.report.error(path, message);
                None
            }
        }
    }

    fn enum_ref(&mut self, name: &str, scope: TypeId, path: &str) -> Option<EnumId> {
        let found = self.schema.resolve_enum(scope, name);
        if found.is_none() {
            self.report.error(path, format!("unknown enum \"{name}\""));
        }
        found
    }

    fn raw_expr(&mut self, value: &Value, path: &str) -> Option<Expr> {
        match raw_expr(value) {
            Ok(expr) => Some(expr),
            Err(message) => {
                self.report.error(path, message);
                None
            }
        }
    }

    /// Parse an expression and resolve its enum literals
    fn expr(&mut self, value: &Value, scope: TypeId, path: &str) -> Option<Expr> {
        let expr = self.raw_expr(value, path)?;
        Some(self.resolve_enums(expr, scope, path))
    }

    fn resolve_enums(&mut self, mut expr: Expr, scope: TypeId, path: &str) -> Expr {
        let schema = &self.schema;
        let report = &mut self.report;
        expr.visit_mut(&mut |node: &mut Expr| {
            let Expr::EnumCase { enum_name, case } = node else {
                return;
            };
            let resolved = schema
                .resolve_enum(scope, enum_name)
                .map(|id| schema.enum_spec(id))
                .ok_or_else(|| format!("unknown enum \"{enum_name}\""))
                .and_then(|spec| {
                    spec.value_of(case)
                        .ok_or_else(|| format!("unknown case \"{case}\" in enum \"{enum_name}\""))
                });
            match resolved {
                Ok(value) => {
                    *node = Expr::EnumValue {
                        value,
                        label: case.clone(),
                    };
                }
                Err(message) => report.error(path, message),
            }
        });
        expr
    }

    fn finish_warnings(&mut self, no_structure: bool) {
        if no_structure {
            self.report
                .warning("", "no structure defined: data will be shown as raw bytes");
        }

        let missing_endian = self.schema.types.iter().any(|t| {
            t.endian.is_none()
                && (t.seq.iter().any(|f| f.ty.needs_endian())
                    || t.instances.iter().any(|i| match i {
                        InstanceSpec::Parse(f) => f.ty.needs_endian(),
                        InstanceSpec::Value { .. } => false,
                    }))
        });
        if missing_endian {
            self.report
                .warning("meta.endian", "no endian specified: defaulting to little-endian");
        }
    }

    /// A root first field with unconditional `contents` doubles as signature
    fn derive_signature(&mut self) {
        if self.schema.meta.signature.is_some() {
            return;
        }
        let Some(first) = self.schema.types.first().and_then(|t| t.seq.first()) else {
            return;
        };
        if first.condition.is_some() || first.repeat.is_some() {
            return;
        }
        if let Some(bytes) = first.contents.clone().filter(|b| !b.is_empty()) {
            self.schema.meta.signature = Some(Signature {
                offset: 0,
                bytes,
                mask: None,
            });
        }
    }
}

fn raw_expr(value: &Value) -> std::result::Result<Expr, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Expr::int)
            .or_else(|| n.as_u64().map(Expr::int))
            .ok_or_else(|| format!("unsupported number {n}")),
        Value::Bool(b) => Ok(Expr::Bool(*b)),
        Value::String(s) => Expr::parse(s).map_err(|e| e.to_string()),
        _ => Err("must be a number or an expression".to_string()),
    }
}

fn parse_contents(value: &Value) -> std::result::Result<Vec<u8>, String> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Number(_) => byte_value(value).map(|b| vec![b]),
        Value::Sequence(items) => {
            let mut bytes = Vec::new();
            for item in items {
                match item {
                    Value::String(s) => bytes.extend_from_slice(s.as_bytes()),
                    other => bytes.push(byte_value(other)?),
                }
            }
            Ok(bytes)
        }
        _ => Err("must be a string or a list of bytes".to_string()),
    }
}

fn byte_value(value: &Value) -> std::result::Result<u8, String> {
    value
        .as_u64()
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| format!("{value:?} is not a byte value"))
}

/// Signature bytes as a list of integers or a hex string (`"89 50 4E 47"`)
fn parse_signature_bytes(value: &Value) -> std::result::Result<Vec<u8>, String> {
    match value {
        Value::String(hex) => {
            let digits: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
            if digits.len() % 2 != 0 || !digits.is_ascii() {
                return Err(format!("invalid hex string \"{hex}\""));
            }
            (0..digits.len())
                .step_by(2)
                .map(|i| {
                    u8::from_str_radix(&digits[i..i + 2], 16)
                        .map_err(|_| format!("invalid hex string \"{hex}\""))
                })
                .collect()
        }
        Value::Sequence(items) => items.iter().map(byte_value).collect(),
        _ => Err("must be a list of bytes or a hex string".to_string()),
    }
}

/// Compile YAML schema text without import support
pub fn compile(source: &str) -> Result<Compiled> {
    Compiler::new().compile(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(source: &str) -> Schema {
        match compile(source) {
            Ok(c) => c.schema,
            Err(e) => panic!("unexpected compile failure: {e}"),
        }
    }

    fn errors(source: &str) -> Vec<String> {
        Compiler::new()
            .check(source)
            .errors
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_minimal_schema() {
        let schema = compiled(
            r"
meta:
  id: png
  endian: be
  file-extension: [PNG, apng]
seq:
  - id: magic
    contents: [0x89, 0x50, 0x4E, 0x47]
  - id: width
    type: u4
",
        );

        assert_eq!(schema.id(), "png");
        assert_eq!(schema.meta.file_extensions, vec!["png", "apng"]);
        assert_eq!(schema.meta.endian, Some(EndianSpec::Fixed(Endian::Big)));
        assert_eq!(
            schema.meta.signature,
            Some(Signature {
                offset: 0,
                bytes: vec![0x89, 0x50, 0x4E, 0x47],
                mask: None
            })
        );
        let root = schema.root_type();
        assert_eq!(root.seq.len(), 2);
        assert_eq!(root.seq[0].ty, FieldType::Bytes);
        assert_eq!(
            root.seq[1].ty,
            FieldType::Uint {
                width: 4,
                endian: None
            }
        );
    }

    #[test]
    fn test_field_keeps_doc_encoding_and_repeat() {
        let schema = compiled(
            r"
meta:
  id: names
seq:
  - id: count
    type: u1
  - id: names
    doc: Fixed-width labels
    type: str
    size: 4
    encoding: ASCII
    repeat: expr
    repeat-expr: count
",
        );

        let names = &schema.root_type().seq[1];
        assert_eq!(names.id, "names");
        assert_eq!(names.doc.as_deref(), Some("Fixed-width labels"));
        assert_eq!(names.encoding.as_deref(), Some("ASCII"));
        assert_eq!(names.repeat, Some(Repeat::Expr(Expr::Name("count".to_string()))));
    }

    #[test]
    fn test_types_enums_and_switch() {
        let schema = compiled(
            r#"
meta:
  id: tlv
  endian: le
seq:
  - id: records
    type: record
    repeat: eos
types:
  record:
    seq:
      - id: kind
        type: u1
        enum: kind
      - id: body
        size: 4
        type:
          switch-on: kind
          cases:
            kind::text: text_body
            2: u4
            _: record
    types:
      text_body:
        seq:
          - id: value
            type: str
            size-eos: true
            encoding: ASCII
enums:
  kind:
    1: text
    0x02: number
"#,
        );

        let record = schema.resolve_type(schema.root, "record").unwrap();
        let body = &schema.type_spec(record).seq[1];
        let FieldType::Switch(switch) = &body.ty else {
            panic!("expected switch, got {:?}", body.ty);
        };
        assert_eq!(
            switch.cases[0].0,
            Expr::EnumValue {
                value: 1,
                label: "text".to_string()
            }
        );
        assert!(matches!(switch.cases[0].1, FieldType::User(_)));
        assert_eq!(switch.default.as_deref(), Some(&FieldType::User(record)));
        assert_eq!(schema.enums[0].values, vec![(1, "text".to_string()), (2, "number".to_string())]);
        assert_eq!(
            schema.type_spec(record).endian,
            Some(EndianSpec::Fixed(Endian::Little))
        );
    }

    #[test]
    fn test_instances() {
        let schema = compiled(
            r"
meta:
  id: inst
  endian: be
seq:
  - id: ofs
    type: u2
instances:
  doubled:
    value: ofs * 2
  trailer:
    pos: ofs
    type: u1
",
        );
        let root = schema.root_type();
        assert!(matches!(root.instance("doubled"), Some(InstanceSpec::Value { .. })));
        match root.instance("trailer") {
            Some(InstanceSpec::Parse(field)) => {
                assert_eq!(field.pos, Some(Expr::Name("ofs".to_string())));
            }
            other => panic!("unexpected instance {other:?}"),
        }
    }

    #[test]
    fn test_collects_all_errors() {
        let errs = errors(
            r"
meta:
  id: Bad-Id
seq:
  - type: u1
  - id: items
    type: u1
    repeat: forever
  - id: counted
    type: u1
    repeat: expr
  - id: text
    type: str
  - id: broken
    size: (len
",
        );

        assert!(errs.iter().any(|e| e.starts_with("meta.id: invalid id")), "{errs:?}");
        assert!(errs.iter().any(|e| e.contains("missing required field \"id\"")));
        assert!(errs.iter().any(|e| e.contains("unknown repeat mode \"forever\"")));
        assert!(errs.iter().any(|e| e.contains("requires \"repeat-expr\"")));
        assert!(errs.iter().any(|e| e.contains("str requires")));
        assert!(errs.iter().any(|e| e.starts_with("seq[4].size")));
    }

    #[test]
    fn test_rejects_missing_meta_and_bad_yaml() {
        assert!(errors("seq: []").iter().any(|e| e.contains("\"meta\"")));
        assert!(!errors("meta: [unclosed").is_empty());
        assert!(matches!(compile("- just\n- a list"), Err(Error::Compile { .. })));
    }

    #[test]
    fn test_malformed_switch() {
        let errs = errors(
            r"
meta: {id: sw, endian: le}
seq:
  - id: body
    type:
      cases: {1: u1}
",
        );
        assert!(errs.iter().any(|e| e.contains("requires \"switch-on\"")));
    }

    #[test]
    fn test_warnings() {
        let compiled = compile(
            r"
meta: {id: warn}
seq:
  - id: big
    type: u2
    repeat: expr
    repeat-expr: 200000
  - id: name
    type: strz
    encoding: klingon
  - id: other
    type: mystery
",
        )
        .unwrap();
        let warnings: Vec<String> = compiled.warnings.iter().map(ToString::to_string).collect();

        assert!(warnings.iter().any(|w| w.contains("no endian")), "{warnings:?}");
        assert!(warnings.iter().any(|w| w.contains("very large repeat count")));
        assert!(warnings.iter().any(|w| w.contains("klingon")));
        assert!(warnings.iter().any(|w| w.contains("unknown type \"mystery\"")));
        let root = compiled.schema.root_type();
        assert_eq!(root.seq[1].terminator, Some(0));
        assert_eq!(root.seq[2].ty, FieldType::Unknown("mystery".to_string()));
    }

    #[test]
    fn test_no_structure_warning() {
        let report = Compiler::new().check("meta: {id: empty}");
        assert!(report.is_ok());
        assert!(report.warnings.iter().any(|w| w.message.contains("no structure")));
    }

    #[test]
    fn test_explicit_signature_with_mask() {
        let schema = compiled(
            r#"
meta:
  id: masked
  signature:
    offset: 2
    bytes: "4D 5A"
    mask: [0xFF, 0xDF]
seq:
  - id: data
    size-eos: true
"#,
        );
        assert_eq!(
            schema.meta.signature,
            Some(Signature {
                offset: 2,
                bytes: vec![0x4D, 0x5A],
                mask: Some(vec![0xFF, 0xDF])
            })
        );
    }

    #[test]
    fn test_process_and_valid() {
        let schema = compiled(
            r"
meta: {id: proc, endian: le}
seq:
  - id: secret
    size: 4
    process: xor(0x55)
  - id: packed
    size: 2
    process: zlib
  - id: version
    type: u1
    valid: {min: 1, max: 3}
  - id: flavor
    type: u1
    valid:
      any-of: [1, 2]
",
        );
        let root = schema.root_type();
        assert_eq!(root.seq[0].process, Some(ProcessSpec::Apply(Process::Xor(vec![0x55]))));
        assert_eq!(root.seq[1].process, Some(ProcessSpec::Unsupported("zlib".to_string())));
        assert!(matches!(root.seq[2].valid, Some(Valid::Range { .. })));
        assert!(matches!(&root.seq[3].valid, Some(Valid::AnyOf(items)) if items.len() == 2));
    }

    #[test]
    fn test_imports_and_cycles() {
        let resolver = |id: &str| match id {
            "header" => Some("meta: {id: header, endian: be}\nseq: [{id: len, type: u2}]".to_string()),
            "loop_a" => Some("meta: {id: loop_a, imports: [loop_b]}".to_string()),
            "loop_b" => Some("meta: {id: loop_b, imports: [loop_a]}".to_string()),
            _ => None,
        };

        let ok = Compiler::with_resolver(&resolver)
            .compile("meta: {id: outer, imports: [common/header]}\nseq: [{id: h, type: header}]")
            .unwrap();
        let header = ok.schema.resolve_type(ok.schema.root, "header").unwrap();
        assert_eq!(
            ok.schema.type_spec(header).endian,
            Some(EndianSpec::Fixed(Endian::Big))
        );

        let cycle = Compiler::with_resolver(&resolver).check("meta: {id: loop_a, imports: [loop_b]}");
        assert!(cycle.errors.iter().any(|e| e.message.contains("import cycle")), "{cycle:?}");

        let missing = Compiler::with_resolver(&resolver).check("meta: {id: x, imports: [nope]}");
        assert!(missing.errors.iter().any(|e| e.message.contains("missing import")));
    }

    #[test]
    fn test_json_documents() {
        let schema = Compiler::new()
            .compile_json(r#"{"meta": {"id": "j", "endian": "le"}, "seq": [{"id": "a", "type": "u2"}]}"#)
            .unwrap()
            .schema;
        assert_eq!(schema.root_type().seq[0].id, "a");
    }

    #[test]
    fn test_scan_reads_header_only() {
        let meta = Compiler::new()
            .scan("meta: {id: gifish, file-extension: [GIF]}\nseq:\n  - id: magic\n    contents: GIF\n  - id: broken\n    type: nope\n")
            .unwrap();
        assert_eq!(meta.id, "gifish");
        assert_eq!(meta.file_extensions, vec!["gif"]);
        assert_eq!(meta.signature.map(|s| s.bytes), Some(b"GIF".to_vec()));

        assert!(Compiler::new().scan("seq: []").is_err());
    }
}
