//! Expression evaluation against the parse in progress
//!
//! Names resolve against the current type's already parsed fields, then
//! its instances (computed on first reference), then the special names
//! `_`, `_index`, `_io`, `_parent` and `_root`. Anything that cannot be
//! resolved evaluates to [`EvalValue::Unknown`].

use crate::interpreter::Context;
use crate::value::EvalValue;
use bytescope_ir::{FindingKind, Node, NodeType};
use bytescope_schema::{BinOp, Expr, UnaryOp};
use bytescope_stream::Stream;
use tracing::trace;

/// Where a name or member chain points
#[derive(Debug, Clone)]
enum Place {
    /// A type under construction, by stack depth
    Frame(usize),
    /// A finished node below a frame or below `_`
    Node { base: Base, path: Vec<usize> },
    /// The stream of a frame
    Io(usize),
    Value(EvalValue),
}

#[derive(Debug, Clone, Copy)]
enum Base {
    Frame(usize),
    Item,
}

impl<'s> Context<'s> {
    /// Evaluate in the scope of the innermost type; `io` is that type's stream
    pub(crate) fn eval(&mut self, expr: &Expr, io: &Stream<'_>) -> EvalValue {
        match expr {
            Expr::Int(v) => EvalValue::Int(*v),
            Expr::Bool(b) => EvalValue::Bool(*b),
            Expr::Str(s) => EvalValue::Str(s.clone()),
            Expr::EnumValue { value, .. } => EvalValue::Int(i128::from(*value)),
            Expr::EnumCase { .. } => EvalValue::Unknown,
            Expr::Name(_) | Expr::Member(..) => {
                let place = self.place(expr, io);
                self.place_value(&place)
            }
            Expr::Unary(UnaryOp::Neg, inner) => match self.eval(inner, io) {
                EvalValue::Int(v) => v.checked_neg().map_or(EvalValue::Unknown, EvalValue::Int),
                EvalValue::Float(f) => EvalValue::Float(-f),
                _ => EvalValue::Unknown,
            },
            Expr::Unary(UnaryOp::Not, inner) => self
                .eval(inner, io)
                .as_bool()
                .map_or(EvalValue::Unknown, |b| EvalValue::Bool(!b)),
            Expr::Binary(op @ (BinOp::And | BinOp::Or), lhs, rhs) => {
                let short = *op == BinOp::Or;
                let left = self.eval(lhs, io).as_bool();
                if left == Some(short) {
                    return EvalValue::Bool(short);
                }
                let right = self.eval(rhs, io).as_bool();
                match (left, right) {
                    (_, Some(r)) if r == short => EvalValue::Bool(short),
                    (Some(_), Some(r)) => EvalValue::Bool(r),
                    _ => EvalValue::Unknown,
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = self.eval(lhs, io);
                let right = self.eval(rhs, io);
                EvalValue::binary(*op, &left, &right)
            }
        }
    }

    /// Integer result; unresolved values read as 0 and leave a finding
    pub(crate) fn eval_int(&mut self, expr: &Expr, io: &Stream<'_>) -> i128 {
        if let Some(v) = self.eval(expr, io).as_int() {
            v
        } else {
            self.unresolved(expr, io.abs_pos());
            0
        }
    }

    /// Non-negative size or count
    pub(crate) fn eval_usize(&mut self, expr: &Expr, io: &Stream<'_>) -> usize {
        let value = self.eval_int(expr, io);
        if value < 0 {
            0
        } else {
            usize::try_from(value).unwrap_or(usize::MAX)
        }
    }

    /// Boolean result; unresolved values read as false and leave a finding
    pub(crate) fn eval_bool(&mut self, expr: &Expr, io: &Stream<'_>) -> bool {
        if let Some(b) = self.eval(expr, io).as_bool() {
            b
        } else {
            self.unresolved(expr, io.abs_pos());
            false
        }
    }

    pub(crate) fn unresolved(&mut self, expr: &Expr, offset: usize) {
        trace!("Unresolved expression '{}' at {}", expr, offset);
        self.finding(
            FindingKind::UnresolvedExpression,
            format!("could not resolve '{expr}'"),
            offset,
        );
    }

    fn place(&mut self, expr: &Expr, io: &Stream<'_>) -> Place {
        match expr {
            Expr::Name(name) => self.name_place(name, io),
            Expr::Member(target, name) => {
                let base = self.place(target, io);
                self.member_place(base, name, io)
            }
            other => Place::Value(self.eval(other, io)),
        }
    }

    fn name_place(&mut self, name: &str, io: &Stream<'_>) -> Place {
        let Some(top) = self.frames.len().checked_sub(1) else {
            return Place::Value(EvalValue::Unknown);
        };
        match name {
            "_" if self.item.is_some() => Place::Node {
                base: Base::Item,
                path: Vec::new(),
            },
            "_index" => Place::Value(
                self.index
                    .and_then(|i| i128::try_from(i).ok())
                    .map_or(EvalValue::Unknown, EvalValue::Int),
            ),
            "_io" => Place::Io(top),
            "_root" => Place::Frame(0),
            "_parent" => parent_of(top),
            _ => match self.field_place(top, name, io) {
                Some(place) => place,
                None if name == "parent" => parent_of(top),
                None if name == "root" => Place::Frame(0),
                None => Place::Value(EvalValue::Unknown),
            },
        }
    }

    fn member_place(&mut self, base: Place, name: &str, io: &Stream<'_>) -> Place {
        match base {
            Place::Frame(depth) => match name {
                "_io" => Place::Io(depth),
                "_parent" => parent_of(depth),
                "_root" => Place::Frame(0),
                _ => self
                    .field_place(depth, name, io)
                    .unwrap_or(Place::Value(EvalValue::Unknown)),
            },
            Place::Io(depth) => {
                let top = self.frames.len().saturating_sub(1);
                let (pos, size, eof) = if depth == top {
                    (io.pos(), io.size(), io.is_eof())
                } else {
                    let info = self.frames[depth].io;
                    (info.pos, info.size, info.eof)
                };
                Place::Value(match name {
                    "pos" => int(pos),
                    "size" => int(size),
                    "eof" => EvalValue::Bool(eof),
                    _ => EvalValue::Unknown,
                })
            }
            Place::Node { base, mut path } => {
                let Some(node) = self.node_at(base, &path) else {
                    return Place::Value(EvalValue::Unknown);
                };
                if let Some(index) = node.children.iter().rposition(|c| c.name == name) {
                    path.push(index);
                    return Place::Node { base, path };
                }
                Place::Value(match name {
                    "size" | "length" => match node.node_type {
                        NodeType::Array => int(node.children.len()),
                        _ => EvalValue::from(&node.value)
                            .length()
                            .map_or(EvalValue::Unknown, int),
                    },
                    _ => EvalValue::Unknown,
                })
            }
            Place::Value(value) => Place::Value(match name {
                "size" | "length" => value.length().map_or(EvalValue::Unknown, int),
                _ => EvalValue::Unknown,
            }),
        }
    }

    /// A field or instance of the frame at `depth`
    fn field_place(&mut self, depth: usize, name: &str, io: &Stream<'_>) -> Option<Place> {
        self.lookup_name(depth, name, io).map(|index| Place::Node {
            base: Base::Frame(depth),
            path: vec![index],
        })
    }

    fn lookup_name(&mut self, depth: usize, name: &str, io: &Stream<'_>) -> Option<usize> {
        let frame = self.frames.get(depth)?;
        if let Some(index) = frame.node.children.iter().rposition(|c| c.name == name) {
            return Some(index);
        }

        let schema = self.schema;
        let instance = schema.type_spec(frame.ty).instance(name)?;
        if self
            .resolving
            .iter()
            .any(|(d, n)| *d == depth && n == name)
        {
            trace!("Instance '{}' refers to itself", name);
            return None;
        }

        let top = self.frames.len() - 1;
        if depth == top {
            self.resolve_instance(instance, io);
        } else {
            // Resolve in the owner's scope, with the deeper frames set aside
            let owner_io = self.frame_stream(depth);
            let deeper = self.frames.split_off(depth + 1);
            let item = self.item.take();
            let index = self.index.take();
            match owner_io {
                Some(owner_io) => self.resolve_instance(instance, &owner_io),
                None => self.resolve_instance(instance, &Stream::new(&[])),
            }
            self.frames.extend(deeper);
            self.item = item;
            self.index = index;
        }

        self.frames[depth]
            .node
            .children
            .iter()
            .rposition(|c| c.name == name)
    }

    /// Rebuild the stream of an ancestor frame at its hand-off position
    fn frame_stream(&self, depth: usize) -> Option<Stream<'s>> {
        let info = self.frames.get(depth)?.io;
        if info.detached {
            return None;
        }
        let data = self.data.get(info.start..info.start + info.size)?;
        let mut stream = Stream::with_origin(data, info.start);
        stream.seek(info.pos).ok()?;
        Some(stream)
    }

    fn node_at(&self, base: Base, path: &[usize]) -> Option<&Node> {
        let mut node = match base {
            Base::Frame(depth) => &self.frames.get(depth)?.node,
            Base::Item => self.item.as_ref()?,
        };
        for index in path {
            node = node.children.get(*index)?;
        }
        Some(node)
    }

    fn place_value(&self, place: &Place) -> EvalValue {
        match place {
            Place::Value(value) => value.clone(),
            Place::Node { base, path } => match self.node_at(*base, path) {
                Some(node) if matches!(node.node_type, NodeType::Field) => {
                    EvalValue::from(&node.value)
                }
                _ => EvalValue::Unknown,
            },
            Place::Frame(_) | Place::Io(_) => EvalValue::Unknown,
        }
    }
}

fn parent_of(depth: usize) -> Place {
    match depth.checked_sub(1) {
        Some(parent) => Place::Frame(parent),
        None => Place::Value(EvalValue::Unknown),
    }
}

fn int(value: usize) -> EvalValue {
    i128::try_from(value).map_or(EvalValue::Unknown, EvalValue::Int)
}
