//! Schema interpretation engine
//!
//! Walks a compiled [`Schema`] against a byte buffer and builds the parsed
//! node tree. Per field, in order: condition, magic check, type resolution
//! (primitive, user type or switch), repetition, enum mapping and `valid`
//! checks. Problems are recorded as findings on the affected node; the
//! caller always gets a tree back.

use crate::options::{CancelToken, EngineOptions};
use crate::{Error, Result};
use bytescope_ir::{Document, DocumentMetadata, Finding, FindingKind, Node, NodeType, Value};
use bytescope_schema::{
    EndianSpec, EnumId, FieldSpec, FieldType, InstanceSpec, ProcessSpec, Repeat, Schema,
    SwitchSpec, TypeId, Valid,
};
use bytescope_stream::{Endian, Stream, encoding};
use std::borrow::Cow;
use tracing::{debug, trace};

/// Parses buffers with one schema
pub struct Interpreter<'s> {
    schema: &'s Schema,
    options: EngineOptions,
    cancel: Option<CancelToken>,
}

impl<'s> Interpreter<'s> {
    /// Interpreter with default limits
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            options: EngineOptions::default(),
            cancel: None,
        }
    }

    /// Replace the engine limits
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The schema this interpreter walks
    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    /// Parse a whole buffer
    ///
    /// Offsets in the returned tree are relative to `data[0]`. Type nesting
    /// recurses, so the walk runs on its own thread with a stack sized for
    /// `max_depth` levels; the caller's stack size does not matter.
    pub fn parse(&self, data: &[u8]) -> Document {
        let stack = stack_size_for(self.options.max_depth);
        let walked = std::thread::scope(|scope| {
            std::thread::Builder::new()
                .name("bytescope-parse".to_string())
                .stack_size(stack)
                .spawn_scoped(scope, || self.walk(data))
                .map(|handle| handle.join())
        });
        match walked {
            Ok(Ok(document)) => document,
            Ok(Err(panic)) => std::panic::resume_unwind(panic),
            Err(e) => {
                debug!("Could not spawn a {} byte parse stack ({}); parsing inline", stack, e);
                self.walk(data)
            }
        }
    }

    fn walk(&self, data: &[u8]) -> Document {
        debug!(
            "Parsing {} bytes as '{}'",
            data.len(),
            self.schema.id()
        );

        let mut context = Context::new(self.schema, &self.options, self.cancel.as_ref(), data);
        let mut io = Stream::new(data);
        let mut root = Node::new("root", NodeType::Root, 0);
        root.set_type_name(self.schema.id());
        let mut root = context.parse_type_body(self.schema.root, root, &mut io, false);

        if context.cancelled {
            debug!("Parse of '{}' cancelled", self.schema.id());
            root.add_finding(Finding::new(
                FindingKind::Cancelled,
                "parse cancelled",
                "root",
                io.abs_pos(),
            ));
        }

        let metadata = DocumentMetadata {
            format_id: Some(self.schema.id().to_string()),
            source_len: data.len(),
            window_start: 0,
            consumed: root.length,
            parsed_at: None,
        };
        trace!(
            "Parsed '{}': {} nodes, {} bytes consumed",
            self.schema.id(),
            root.count(),
            root.length
        );
        Document::with_metadata(root, metadata)
    }
}

/// Stack reserved for the walk itself
const BASE_STACK: usize = 1024 * 1024;

/// Stack reserved per level of type nesting
const STACK_PER_LEVEL: usize = 64 * 1024;

/// Parse-thread stack for a nesting ceiling
fn stack_size_for(max_depth: usize) -> usize {
    BASE_STACK.saturating_add(max_depth.saturating_mul(STACK_PER_LEVEL))
}

/// Parse `data` with default limits
pub fn parse(schema: &Schema, data: &[u8]) -> Document {
    Interpreter::new(schema).parse(data)
}

/// Stream state of a frame as seen from its descendants
#[derive(Debug, Clone, Copy)]
pub(crate) struct IoInfo {
    /// Absolute offset of the stream's first byte
    pub(crate) start: usize,
    pub(crate) size: usize,
    /// Position relative to `start` when the frame last handed off
    pub(crate) pos: usize,
    pub(crate) eof: bool,
    /// Backed by processed bytes rather than the source buffer
    pub(crate) detached: bool,
}

impl IoInfo {
    pub(crate) fn of(io: &Stream<'_>, detached: bool) -> Self {
        Self {
            start: io.abs_start(),
            size: io.size(),
            pos: io.pos(),
            eof: io.is_eof(),
            detached,
        }
    }
}

/// A user type under construction
pub(crate) struct Frame {
    pub(crate) ty: TypeId,
    pub(crate) node: Node,
    pub(crate) endian: Endian,
    pub(crate) io: IoInfo,
}

/// Per-call parse state
pub(crate) struct Context<'s> {
    pub(crate) schema: &'s Schema,
    pub(crate) options: &'s EngineOptions,
    cancel: Option<&'s CancelToken>,
    /// The buffer being parsed, used to rebuild ancestor streams
    pub(crate) data: &'s [u8],
    pub(crate) frames: Vec<Frame>,
    pub(crate) path: Vec<String>,
    /// Findings not yet attached to a node
    pub(crate) pending: Vec<Finding>,
    /// Value of `_`
    pub(crate) item: Option<Node>,
    /// Value of `_index`
    pub(crate) index: Option<usize>,
    /// Instances being computed, as (frame depth, name)
    pub(crate) resolving: Vec<(usize, String)>,
    pub(crate) cancelled: bool,
}

impl<'s> Context<'s> {
    fn new(
        schema: &'s Schema,
        options: &'s EngineOptions,
        cancel: Option<&'s CancelToken>,
        data: &'s [u8],
    ) -> Self {
        Self {
            schema,
            options,
            cancel,
            data,
            frames: Vec::new(),
            path: vec!["root".to_string()],
            pending: Vec::new(),
            item: None,
            index: None,
            resolving: Vec::new(),
            cancelled: false,
        }
    }

    fn check_cancelled(&mut self) -> bool {
        if !self.cancelled && self.cancel.is_some_and(CancelToken::is_cancelled) {
            self.cancelled = true;
        }
        self.cancelled
    }

    pub(crate) fn path_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            if !out.is_empty() && !segment.starts_with('[') {
                out.push('/');
            }
            out.push_str(segment);
        }
        out
    }

    pub(crate) fn finding(&mut self, kind: FindingKind, message: impl Into<String>, offset: usize) {
        let finding = Finding::new(kind, message, self.path_string(), offset);
        self.pending.push(finding);
    }

    fn endian(&self) -> Endian {
        self.frames.last().map_or(Endian::Little, |f| f.endian)
    }

    /// Walk a type's sequence and instances into `node`
    pub(crate) fn parse_type_body(
        &mut self,
        ty: TypeId,
        node: Node,
        io: &mut Stream<'_>,
        detached: bool,
    ) -> Node {
        let schema = self.schema;
        let spec = schema.type_spec(ty);
        let start = io.abs_pos();
        let inherited = self.endian();

        self.frames.push(Frame {
            ty,
            node,
            endian: inherited,
            io: IoInfo::of(io, detached),
        });
        let endian = self.type_endian(ty, inherited, io);
        if let Some(frame) = self.frames.last_mut() {
            frame.endian = endian;
        }

        for field in &spec.seq {
            if self.check_cancelled() {
                break;
            }
            self.path.push(field.id.clone());
            let outcome = self.parse_field(field, io);
            self.path.pop();

            let Some((child, aborted)) = outcome else {
                continue;
            };
            if let Some(frame) = self.frames.last_mut() {
                frame.node.add_child(child);
            }
            if aborted {
                debug!(
                    "Sequence of '{}' aborted after field '{}'",
                    spec.name, field.id
                );
                break;
            }
        }

        if !self.cancelled {
            self.resolve_instances(io);
        }

        let mut node = match self.frames.pop() {
            Some(frame) => frame.node,
            None => Node::new(spec.name.clone(), NodeType::Struct, start),
        };
        node.length = io.abs_pos().saturating_sub(start);
        node
    }

    fn type_endian(&mut self, ty: TypeId, inherited: Endian, io: &Stream<'_>) -> Endian {
        let schema = self.schema;
        let spec = schema.type_spec(ty);
        match &spec.endian {
            None => Endian::Little,
            Some(EndianSpec::Fixed(endian)) => *endian,
            Some(switch @ EndianSpec::Switch { on, cases }) => {
                // Nested types inherit the endianness decided at runtime
                let lexical_parent = spec.parent.map(|p| schema.type_spec(p));
                if lexical_parent.is_some_and(|p| p.endian.as_ref() == Some(switch))
                    && self.frames.len() > 1
                {
                    return inherited;
                }
                let value = self.eval(on, io);
                for (key, endian) in cases {
                    let key = self.eval(key, io);
                    if value.loose_eq(&key) == Some(true) {
                        return *endian;
                    }
                }
                let finding = Finding::new(
                    FindingKind::UnresolvedExpression,
                    format!("endianness undecided for switch value {value}; using le"),
                    self.path_string(),
                    io.abs_pos(),
                );
                if let Some(frame) = self.frames.last_mut() {
                    frame.node.add_finding(finding);
                }
                Endian::Little
            }
        }
    }

    /// Run the per-field state machine; `None` when the condition is false
    fn parse_field(&mut self, field: &'s FieldSpec, io: &mut Stream<'_>) -> Option<(Node, bool)> {
        let mark = self.pending.len();
        let start = io.abs_pos();

        if let Some(condition) = &field.condition {
            if !self.eval_bool(condition, io) {
                trace!("Skipping '{}': condition false", field.id);
                let unresolved: Vec<Finding> = self.pending.drain(mark..).collect();
                if let Some(frame) = self.frames.last_mut() {
                    frame.node.findings.extend(unresolved);
                }
                return None;
            }
        }

        let (mut node, aborted) = match self.parse_value(field, io) {
            Ok(node) => (node, false),
            Err(e) => (self.failed_node(&field.id, start, &e), true),
        };
        node.findings.extend(self.pending.drain(mark..));
        Some((node, aborted))
    }

    /// A field's value: a single read or a repetition
    pub(crate) fn parse_value(&mut self, field: &'s FieldSpec, io: &mut Stream<'_>) -> Result<Node> {
        match &field.repeat {
            Some(repeat) => Ok(self.parse_repeat(field, repeat, io)),
            None => self.parse_single(field, &field.id, io),
        }
    }

    fn parse_repeat(&mut self, field: &'s FieldSpec, repeat: &'s Repeat, io: &mut Stream<'_>) -> Node {
        let start = io.abs_pos();
        let mut array = Node::new(field.id.clone(), NodeType::Array, start);
        if let Some(label) = type_label(self.schema, &field.ty) {
            array.set_type_name(label);
        }

        let count = match repeat {
            Repeat::Expr(expr) => Some(self.eval_usize(expr, io)),
            Repeat::Eos | Repeat::Until(_) => None,
        };
        let limit = self.options.max_repeat;
        let saved_index = self.index;
        let mut index = 0;

        loop {
            if count.is_some_and(|c| index >= c) {
                break;
            }
            if matches!(repeat, Repeat::Eos) && io.is_eof() {
                break;
            }
            if index >= limit {
                debug!("Repeat '{}' stopped at the {} iteration ceiling", field.id, limit);
                array.add_finding(Finding::new(
                    FindingKind::IterationLimit,
                    format!("repeat stopped after {limit} iterations"),
                    self.path_string(),
                    io.abs_pos(),
                ));
                break;
            }
            if self.check_cancelled() {
                break;
            }

            let before = io.checkpoint();
            let item_start = io.abs_pos();
            let item_name = format!("{}[{index}]", field.id);
            self.index = Some(index);
            self.path.push(format!("[{index}]"));
            let item = self.parse_single(field, &item_name, io);
            self.path.pop();

            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    let failed = self.failed_node(&item_name, item_start, &e);
                    array.add_child(failed);
                    break;
                }
            };

            let mut done = false;
            if let Repeat::Until(condition) = repeat {
                let previous = self.item.replace(item);
                done = self.eval_bool(condition, io);
                let item = std::mem::replace(&mut self.item, previous);
                if let Some(item) = item {
                    array.add_child(item);
                }
            } else {
                array.add_child(item);
            }

            index += 1;
            if done {
                break;
            }
            if io.checkpoint() == before {
                debug!("Repeat '{}' made no progress at {}", field.id, item_start);
                array.add_finding(Finding::new(
                    FindingKind::ZeroProgress,
                    format!("iteration {} consumed no bytes", index - 1),
                    self.path_string(),
                    item_start,
                ));
                break;
            }
        }

        self.index = saved_index;
        array.length = io.abs_pos().saturating_sub(start);
        array
    }

    /// One occurrence of a field
    fn parse_single(&mut self, field: &'s FieldSpec, name: &str, io: &mut Stream<'_>) -> Result<Node> {
        let start = io.abs_pos();

        if let Some(expected) = &field.contents {
            let actual = io.read_bytes(expected.len())?;
            let mut node = Node::field(name, Value::Bytes(actual.to_vec()), start, expected.len());
            if actual != expected.as_slice() {
                node.add_finding(
                    Finding::new(
                        FindingKind::ValidationMismatch,
                        "magic bytes do not match",
                        self.path_string(),
                        start,
                    )
                    .with_values(hex(expected), hex(actual)),
                );
            }
            return Ok(node);
        }

        let resolved = match &field.ty {
            FieldType::Switch(switch) => self.switch_case(switch, io),
            other => Some(other),
        };

        let node = match resolved {
            Some(FieldType::User(ty)) => return self.parse_user(field, *ty, name, io),
            Some(FieldType::Unknown(type_name)) => {
                self.finding(
                    FindingKind::UnknownType,
                    format!("unknown type '{type_name}'"),
                    start,
                );
                self.parse_fallback(field, name, io)?
            }
            Some(FieldType::Switch(_)) | None => self.parse_fallback(field, name, io)?,
            Some(primitive) => self.parse_primitive(field, primitive, name, io)?,
        };

        let node = match field.enum_id {
            Some(enum_id) => self.map_enum(node, enum_id),
            None => node,
        };
        Ok(match &field.valid {
            Some(valid) => self.check_valid(valid, node, io),
            None => node,
        })
    }

    fn switch_case(&mut self, switch: &'s SwitchSpec, io: &Stream<'_>) -> Option<&'s FieldType> {
        let on = self.eval(&switch.on, io);
        if on.is_unknown() {
            self.unresolved(&switch.on, io.abs_pos());
        } else {
            for (key, ty) in &switch.cases {
                let key = self.eval(key, io);
                if on.loose_eq(&key) == Some(true) {
                    return Some(ty);
                }
            }
        }

        if switch.default.is_none() {
            self.finding(
                FindingKind::UnknownSwitch,
                format!("no case matches switch value {on}"),
                io.abs_pos(),
            );
        }
        switch.default.as_deref()
    }

    /// Raw bytes when a size is known, otherwise an empty node
    fn parse_fallback(&mut self, field: &'s FieldSpec, name: &str, io: &mut Stream<'_>) -> Result<Node> {
        let start = io.abs_pos();
        let value = match self.read_region(field, io)? {
            Some(bytes) => Value::Bytes(bytes.into_owned()),
            None => Value::Null,
        };
        Ok(Node::field(name, value, start, io.abs_pos().saturating_sub(start)))
    }

    fn parse_primitive(
        &mut self,
        field: &'s FieldSpec,
        ty: &'s FieldType,
        name: &str,
        io: &mut Stream<'_>,
    ) -> Result<Node> {
        let start = io.abs_pos();
        let default_endian = self.endian();

        let value = match ty {
            FieldType::Uint { width, endian } => {
                Value::Unsigned(io.read_uint(*width, endian.unwrap_or(default_endian))?)
            }
            FieldType::Sint { width, endian } => {
                Value::Signed(io.read_sint(*width, endian.unwrap_or(default_endian))?)
            }
            FieldType::Float { width: 4, endian } => {
                Value::Float(f64::from(io.read_f4(endian.unwrap_or(default_endian))?))
            }
            FieldType::Float { endian, .. } => {
                Value::Float(io.read_f8(endian.unwrap_or(default_endian))?)
            }
            FieldType::Bits(bits) => Value::Unsigned(io.read_bits(*bits)?),
            FieldType::Str | FieldType::Strz => {
                let label = self.encoding_for(field);
                match self.read_region(field, io)? {
                    Some(bytes) => Value::String(encoding::decode(&bytes, &label)),
                    None => Value::String(io.read_strz(&label, 0, false, true)),
                }
            }
            FieldType::Bytes => match self.read_region(field, io)? {
                Some(bytes) => Value::Bytes(bytes.into_owned()),
                None => Value::Bytes(Vec::new()),
            },
            FieldType::User(_) | FieldType::Switch(_) | FieldType::Unknown(_) => Value::Null,
        };

        let mut node = Node::field(name, value, start, io.abs_pos().saturating_sub(start));
        if let Some(label) = type_label(self.schema, ty) {
            node.set_type_name(label);
        }
        Ok(node)
    }

    fn parse_user(
        &mut self,
        field: &'s FieldSpec,
        ty: TypeId,
        name: &str,
        io: &mut Stream<'_>,
    ) -> Result<Node> {
        let schema = self.schema;
        let type_name = &schema.type_spec(ty).name;
        let start = io.abs_pos();

        if self.frames.len() >= self.options.max_depth {
            return Err(Error::recursion(type_name.clone(), start));
        }
        // Same type again at the same offset can never make progress
        if self.frames.iter().any(|f| f.ty == ty && f.node.offset == start) {
            return Err(Error::recursion(type_name.clone(), start));
        }

        let parent_detached = self.frames.last().is_some_and(|f| f.io.detached);
        if let Some(parent) = self.frames.last_mut() {
            parent.io = IoInfo {
                pos: io.pos(),
                eof: io.is_eof(),
                ..parent.io
            };
        }

        let mut node = Node::new(name, NodeType::Struct, start);
        node.set_type_name(type_name.clone());

        match self.read_region(field, io)? {
            Some(region) => {
                let detached = parent_detached || matches!(region, Cow::Owned(_));
                let mut sub = Stream::with_origin(&region, start);
                let mut node = self.parse_type_body(ty, node, &mut sub, detached);
                node.length = region.len();
                Ok(node)
            }
            None => Ok(self.parse_type_body(ty, node, io, parent_detached)),
        }
    }

    /// Bytes delimited by `size`, `size-eos` or `terminator`, after `process`
    fn read_region<'b>(&mut self, field: &'s FieldSpec, io: &mut Stream<'b>) -> Result<Option<Cow<'b, [u8]>>> {
        let raw: &'b [u8] = if let Some(size) = &field.size {
            let n = self.eval_usize(size, io);
            let bytes = io.read_bytes(n)?;
            match field.terminator {
                Some(term) => match bytes.iter().position(|b| *b == term) {
                    Some(i) if field.include => &bytes[..=i],
                    Some(i) => &bytes[..i],
                    None => bytes,
                },
                None => bytes,
            }
        } else if field.size_eos {
            io.read_bytes_full()
        } else if let Some(term) = field.terminator {
            io.read_bytes_term(term, field.include, field.consume)
        } else {
            return Ok(None);
        };

        Ok(Some(match &field.process {
            Some(ProcessSpec::Apply(process)) => Cow::Owned(process.apply(raw)),
            Some(ProcessSpec::Unsupported(name)) => {
                self.finding(
                    FindingKind::UnknownType,
                    format!("unsupported process '{name}': bytes left raw"),
                    io.abs_pos(),
                );
                Cow::Borrowed(raw)
            }
            None => Cow::Borrowed(raw),
        }))
    }

    fn encoding_for(&self, field: &FieldSpec) -> String {
        field
            .encoding
            .clone()
            .or_else(|| {
                self.frames
                    .last()
                    .and_then(|f| self.schema.type_spec(f.ty).encoding.clone())
            })
            .or_else(|| self.schema.meta.encoding.clone())
            .unwrap_or_else(|| self.options.default_encoding.clone())
    }

    fn map_enum(&self, mut node: Node, enum_id: EnumId) -> Node {
        let Some(value) = node.value.as_i128().and_then(|v| i64::try_from(v).ok()) else {
            return node;
        };
        // Unknown codes stay unmapped
        if let Some(label) = self.schema.enum_spec(enum_id).label(value) {
            node.value = Value::Enum {
                value,
                label: label.to_string(),
            };
        }
        node
    }

    fn check_valid(&mut self, valid: &'s Valid, node: Node, io: &Stream<'_>) -> Node {
        let actual = crate::EvalValue::from(&node.value);
        let previous = self.item.replace(node);

        let (ok, expected) = match valid {
            Valid::Eq(expr) => {
                let expected = self.eval(expr, io);
                (actual.loose_eq(&expected), expected.to_string())
            }
            Valid::Range { min, max } => {
                let mut ok = Some(true);
                let mut bounds = Vec::new();
                if let Some(min) = min {
                    let min = self.eval(min, io);
                    ok = ok.zip(actual.compare(&min)).map(|(a, o)| a && o.is_ge());
                    bounds.push(format!(">= {min}"));
                }
                if let Some(max) = max {
                    let max = self.eval(max, io);
                    ok = ok.zip(actual.compare(&max)).map(|(a, o)| a && o.is_le());
                    bounds.push(format!("<= {max}"));
                }
                (ok, bounds.join(" and "))
            }
            Valid::AnyOf(options) => {
                let mut ok = Some(false);
                let mut listed = Vec::new();
                for option in options {
                    let option = self.eval(option, io);
                    if actual.loose_eq(&option) == Some(true) {
                        ok = Some(true);
                    }
                    listed.push(option.to_string());
                }
                (ok, format!("one of {}", listed.join(", ")))
            }
            Valid::Expr(expr) => {
                let result = self.eval(expr, io);
                (result.as_bool(), expr.to_string())
            }
        };

        let mut node = match std::mem::replace(&mut self.item, previous) {
            Some(node) => node,
            None => Node::field("", Value::Null, io.abs_pos(), 0),
        };
        match ok {
            Some(true) => {}
            Some(false) => {
                node.add_finding(
                    Finding::new(
                        FindingKind::ValidationMismatch,
                        "value violates its constraint",
                        self.path_string(),
                        node.offset,
                    )
                    .with_values(expected, actual.to_string()),
                );
            }
            None => self.finding(
                FindingKind::UnresolvedExpression,
                format!("could not check constraint '{expected}'"),
                node.offset,
            ),
        }
        node
    }

    /// Resolve every instance of the current frame not yet computed
    fn resolve_instances(&mut self, io: &Stream<'_>) {
        let schema = self.schema;
        let Some(frame) = self.frames.last() else {
            return;
        };
        let spec = schema.type_spec(frame.ty);
        for instance in &spec.instances {
            if self.check_cancelled() {
                break;
            }
            let done = self.frames.last().is_some_and(|f| {
                f.node
                    .children
                    .iter()
                    .any(|c| c.instance && c.name == instance.id())
            });
            if !done {
                self.resolve_instance(instance, io);
            }
        }
    }

    /// Compute one instance of the current frame and attach it
    pub(crate) fn resolve_instance(&mut self, instance: &'s InstanceSpec, io: &Stream<'_>) {
        let depth = self.frames.len().saturating_sub(1);
        let name = instance.id();
        self.resolving.push((depth, name.to_string()));
        self.path.push(name.to_string());
        let mark = self.pending.len();
        let offset = self.frames.last().map_or(0, |f| f.node.offset);

        let node = match instance {
            InstanceSpec::Value {
                expr,
                condition,
                enum_id,
                ..
            } => {
                if condition.as_ref().is_some_and(|c| !self.eval_bool(c, io)) {
                    None
                } else {
                    let value = self.eval(expr, io);
                    if value.is_unknown() {
                        self.unresolved(expr, offset);
                    }
                    let node = Node::field(name, value.to_value(), offset, 0);
                    Some(match enum_id {
                        Some(enum_id) => self.map_enum(node, *enum_id),
                        None => node,
                    })
                }
            }
            InstanceSpec::Parse(field) => {
                if field.condition.as_ref().is_some_and(|c| !self.eval_bool(c, io)) {
                    None
                } else {
                    let mut sub = io.clone();
                    let positioned = match &field.pos {
                        Some(pos) => {
                            let pos = self.eval_usize(pos, io);
                            sub.seek(pos).map_err(Error::from)
                        }
                        None => Ok(()),
                    };
                    let start = sub.abs_pos();
                    Some(
                        match positioned.and_then(|()| self.parse_value(field, &mut sub)) {
                            Ok(node) => node,
                            Err(e) => self.failed_node(name, start, &e),
                        },
                    )
                }
            }
        };

        let unresolved: Vec<Finding> = self.pending.drain(mark..).collect();
        self.path.pop();
        self.resolving.pop();

        match (node, self.frames.last_mut()) {
            (Some(mut node), Some(frame)) => {
                node.instance = true;
                node.findings.extend(unresolved);
                frame.node.add_child(node);
            }
            (None, Some(frame)) => frame.node.findings.extend(unresolved),
            (_, None) => {}
        }
    }

    fn failed_node(&self, name: &str, offset: usize, error: &Error) -> Node {
        let path = self.path_string();
        debug!("Field '{}' failed at {}: {}", path, offset, error);
        let mut node = Node::field(name, Value::Null, offset, 0);
        node.add_finding(Finding::new(error.finding_kind(), error.to_string(), path, offset));
        node
    }
}

/// Display name of a field type (`u4be`, `b3`, `strz`, user type name)
fn type_label(schema: &Schema, ty: &FieldType) -> Option<String> {
    let numeric = |kind: char, width: &usize, endian: &Option<Endian>| {
        format!("{kind}{width}{}", endian.map_or("", Endian::suffix))
    };
    match ty {
        FieldType::Uint { width, endian } => Some(numeric('u', width, endian)),
        FieldType::Sint { width, endian } => Some(numeric('s', width, endian)),
        FieldType::Float { width, endian } => Some(numeric('f', width, endian)),
        FieldType::Bits(bits) => Some(format!("b{bits}")),
        FieldType::Str => Some("str".to_string()),
        FieldType::Strz => Some("strz".to_string()),
        FieldType::User(id) => Some(schema.type_spec(*id).name.clone()),
        FieldType::Bytes | FieldType::Switch(_) | FieldType::Unknown(_) => None,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
