//! Type checker: resolves names and overloads and produces the executable
//! node tree.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{Expr, ExprKind, Literal, MacroKind};
use crate::decls::Overload;
use crate::env::EnvState;
use crate::types::{substitute, unify, Type};
use crate::value::Value;
use crate::variables::{VariablesProvider, VARIABLES_TYPE};

/// A checked expression node.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub ty: Type,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Const(Value),
    Ident(Arc<str>),
    /// `variables.<name>`, resolved to its registration index.
    Variable {
        index: usize,
        name: Arc<str>,
    },
    Select {
        operand: Box<Node>,
        field: Arc<str>,
    },
    Has {
        operand: Box<Node>,
        field: Arc<str>,
    },
    Index {
        operand: Box<Node>,
        index: Box<Node>,
    },
    /// Candidate overloads in declaration order; member receivers are the
    /// first argument.
    Call {
        function: Arc<str>,
        overloads: Vec<Arc<Overload>>,
        args: Vec<Node>,
    },
    List(Vec<Node>),
    Map(Vec<(Node, Node)>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    Comprehension(Box<ComprehensionNode>),
}

#[derive(Debug, Clone)]
pub(crate) struct ComprehensionNode {
    pub kind: MacroKind,
    pub var: Arc<str>,
    pub range: Node,
    pub predicate: Option<Node>,
    pub transform: Option<Node>,
}

pub(crate) struct Checker<'a> {
    env: &'a EnvState,
    provider: Option<&'a VariablesProvider>,
    scopes: Vec<(String, Type)>,
    errors: Vec<(usize, String)>,
}

impl<'a> Checker<'a> {
    pub fn new(env: &'a EnvState, provider: Option<&'a VariablesProvider>) -> Self {
        Self {
            env,
            provider,
            scopes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Checks an expression, returning every diagnostic on failure.
    pub fn check(mut self, expr: &Expr) -> Result<Node, Vec<(usize, String)>> {
        let node = self.visit(expr);
        if self.errors.is_empty() {
            Ok(node)
        } else {
            Err(self.errors)
        }
    }

    fn error(&mut self, offset: usize, message: String) -> Type {
        self.errors.push((offset, message));
        Type::Dyn
    }

    fn visit(&mut self, expr: &Expr) -> Node {
        let offset = expr.offset;
        let (kind, ty) = match &expr.kind {
            ExprKind::Literal(literal) => literal_node(literal),
            ExprKind::Ident(name) => {
                let ty = self.lookup(name).unwrap_or_else(|| {
                    self.error(offset, format!("undeclared reference to '{name}'"))
                });
                (NodeKind::Ident(Arc::from(name.as_str())), ty)
            }
            ExprKind::Select {
                operand,
                field,
                test_only,
            } => return self.visit_select(offset, operand, field, *test_only),
            ExprKind::Index { operand, index } => {
                let operand = self.visit(operand);
                let index = self.visit(index);
                let ty = self.index_type(offset, &operand.ty, &index.ty);
                (
                    NodeKind::Index {
                        operand: Box::new(operand),
                        index: Box::new(index),
                    },
                    ty,
                )
            }
            ExprKind::Call {
                target,
                function,
                args,
            } => return self.visit_call(offset, target.as_deref(), function, args),
            ExprKind::List(items) => {
                let items: Vec<Node> = items.iter().map(|item| self.visit(item)).collect();
                let elem = self.aggregate_type(items.iter().map(|n| (n.offset, &n.ty)));
                (NodeKind::List(items), Type::list(elem))
            }
            ExprKind::Map(entries) => {
                let entries: Vec<(Node, Node)> = entries
                    .iter()
                    .map(|(k, v)| (self.visit(k), self.visit(v)))
                    .collect();
                for (key, _) in &entries {
                    if !matches!(
                        key.ty,
                        Type::Bool | Type::Int | Type::Uint | Type::String | Type::Dyn
                    ) {
                        self.error(key.offset, format!("unsupported map key type: {}", key.ty));
                    }
                }
                let key = self.aggregate_type(entries.iter().map(|(k, _)| (k.offset, &k.ty)));
                let value = self.aggregate_type(entries.iter().map(|(_, v)| (v.offset, &v.ty)));
                (NodeKind::Map(entries), Type::map(key, value))
            }
            ExprKind::And(lhs, rhs) => {
                let (lhs, rhs) = self.logical(offset, "_&&_", lhs, rhs);
                (NodeKind::And(lhs, rhs), Type::Bool)
            }
            ExprKind::Or(lhs, rhs) => {
                let (lhs, rhs) = self.logical(offset, "_||_", lhs, rhs);
                (NodeKind::Or(lhs, rhs), Type::Bool)
            }
            ExprKind::Conditional(cond, then, otherwise) => {
                let cond = self.visit(cond);
                let then = self.visit(then);
                let otherwise = self.visit(otherwise);
                let ty = self.conditional_type(offset, &cond.ty, &then.ty, &otherwise.ty);
                (
                    NodeKind::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)),
                    ty,
                )
            }
            ExprKind::Comprehension(comprehension) => {
                let range = self.visit(&comprehension.range);
                let var_type = match &range.ty {
                    Type::List(elem) => (**elem).clone(),
                    Type::Map(key, _) => (**key).clone(),
                    Type::Dyn => Type::Dyn,
                    other => self.error(
                        range.offset,
                        format!(
                            "expression of type '{other}' cannot be range of a comprehension (must be list, map, or dynamic)"
                        ),
                    ),
                };
                self.scopes.push((comprehension.var.clone(), var_type));
                let predicate = comprehension.predicate.as_ref().map(|p| {
                    let node = self.visit(p);
                    if !matches!(node.ty, Type::Bool | Type::Dyn) {
                        self.error(
                            node.offset,
                            format!("expected type 'bool' but found '{}'", node.ty),
                        );
                    }
                    node
                });
                let transform = comprehension.transform.as_ref().map(|t| self.visit(t));
                self.scopes.pop();

                let ty = match comprehension.kind {
                    MacroKind::All | MacroKind::Exists | MacroKind::ExistsOne => Type::Bool,
                    MacroKind::Map => {
                        Type::list(transform.as_ref().map_or(Type::Dyn, |t| t.ty.clone()))
                    }
                    MacroKind::Filter => match &range.ty {
                        Type::List(_) => range.ty.clone(),
                        Type::Map(key, _) => Type::list((**key).clone()),
                        _ => Type::list(Type::Dyn),
                    },
                };
                (
                    NodeKind::Comprehension(Box::new(ComprehensionNode {
                        kind: comprehension.kind,
                        var: Arc::from(comprehension.var.as_str()),
                        range,
                        predicate,
                        transform,
                    })),
                    ty,
                )
            }
        };
        Node { kind, ty, offset }
    }

    fn lookup(&self, name: &str) -> Option<Type> {
        self.scopes
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, ty)| ty.clone())
            .or_else(|| self.env.variables.get(name).cloned())
    }

    fn visit_select(&mut self, offset: usize, operand: &Expr, field: &str, test_only: bool) -> Node {
        let env = self.env;
        let operand = self.visit(operand);
        let field_name: Arc<str> = Arc::from(field);

        if matches!(&operand.ty, Type::Object(name) if name.as_ref() == VARIABLES_TYPE) {
            let Some((index, ty)) = self.provider.and_then(|p| p.field(field)) else {
                let ty = self.error(offset, format!("undefined field '{field}'"));
                return Node {
                    kind: NodeKind::Const(Value::Null),
                    ty,
                    offset,
                };
            };
            if test_only {
                return Node {
                    kind: NodeKind::Const(Value::Bool(true)),
                    ty: Type::Bool,
                    offset,
                };
            }
            return Node {
                kind: NodeKind::Variable {
                    index,
                    name: field_name,
                },
                ty: ty.clone(),
                offset,
            };
        }

        let field_type = match &operand.ty {
            Type::Dyn => Type::Dyn,
            Type::Map(key, value) if matches!(**key, Type::String | Type::Dyn) => (**value).clone(),
            Type::Object(name) => match env.types.get(name.as_ref()) {
                Some(object) if object.is_struct() => match object.field(field) {
                    Some(ty) => ty.clone(),
                    None => self.error(offset, format!("undefined field '{field}'")),
                },
                _ => self.error(
                    offset,
                    format!("type '{name}' does not support field selection"),
                ),
            },
            other => self.error(
                offset,
                format!("type '{other}' does not support field selection"),
            ),
        };

        if test_only {
            Node {
                kind: NodeKind::Has {
                    operand: Box::new(operand),
                    field: field_name,
                },
                ty: Type::Bool,
                offset,
            }
        } else {
            Node {
                kind: NodeKind::Select {
                    operand: Box::new(operand),
                    field: field_name,
                },
                ty: field_type,
                offset,
            }
        }
    }

    fn visit_call(
        &mut self,
        offset: usize,
        target: Option<&Expr>,
        function: &str,
        args: &[Expr],
    ) -> Node {
        let mut nodes = Vec::with_capacity(args.len() + 1);
        if let Some(target) = target {
            nodes.push(self.visit(target));
        }
        nodes.extend(args.iter().map(|arg| self.visit(arg)));

        let member = target.is_some();
        let env = self.env;
        let Some(declared) = env.functions.get(function) else {
            let ty = self.error(offset, format!("undeclared reference to '{function}'"));
            return call_node(offset, function, Vec::new(), nodes, ty);
        };

        let arg_types: Vec<&Type> = nodes.iter().map(|n| &n.ty).collect();
        let mut candidates = Vec::new();
        let mut results: Vec<Type> = Vec::new();
        for overload in declared {
            if overload.member != member || overload.params.len() != arg_types.len() {
                continue;
            }
            let mut bindings = HashMap::new();
            if overload
                .params
                .iter()
                .zip(&arg_types)
                .all(|(param, arg)| unify(param, arg, &mut bindings))
            {
                candidates.push(overload.clone());
                results.push(substitute(&overload.result, &bindings));
            }
        }

        if candidates.is_empty() {
            let rendered = arg_types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let ty = self.error(
                offset,
                format!("found no matching overload for '{function}' applied to '({rendered})'"),
            );
            return call_node(offset, function, Vec::new(), nodes, ty);
        }

        let ty = if results.iter().all(|r| *r == results[0]) {
            results.swap_remove(0)
        } else {
            Type::Dyn
        };
        call_node(offset, function, candidates, nodes, ty)
    }

    fn index_type(&mut self, offset: usize, operand: &Type, index: &Type) -> Type {
        match (operand, index) {
            (Type::Dyn, _) => Type::Dyn,
            (Type::List(elem), Type::Int | Type::Uint | Type::Dyn) => (**elem).clone(),
            (Type::Map(key, value), index) if key.is_assignable_from(index) => (**value).clone(),
            _ => self.error(
                offset,
                format!("found no matching overload for '_[_]' applied to '({operand}, {index})'"),
            ),
        }
    }

    fn aggregate_type<'t>(&mut self, items: impl Iterator<Item = (usize, &'t Type)>) -> Type {
        let mut joined: Option<Type> = None;
        for (offset, ty) in items {
            joined = Some(match joined {
                None => ty.clone(),
                Some(current) => match join(&current, ty) {
                    Some(t) => t,
                    None if self.env.options.homogeneous_aggregate_literals => {
                        self.error(offset, format!("expected type '{current}' but found '{ty}'"));
                        current
                    }
                    None => Type::Dyn,
                },
            });
        }
        joined.unwrap_or(Type::Dyn)
    }

    fn logical(
        &mut self,
        offset: usize,
        function: &str,
        lhs: &Expr,
        rhs: &Expr,
    ) -> (Box<Node>, Box<Node>) {
        let lhs = self.visit(lhs);
        let rhs = self.visit(rhs);
        let ok = |t: &Type| matches!(t, Type::Bool | Type::Dyn);
        if !ok(&lhs.ty) || !ok(&rhs.ty) {
            self.error(
                offset,
                format!(
                    "found no matching overload for '{function}' applied to '({}, {})'",
                    lhs.ty, rhs.ty
                ),
            );
        }
        (Box::new(lhs), Box::new(rhs))
    }

    fn conditional_type(&mut self, offset: usize, cond: &Type, then: &Type, otherwise: &Type) -> Type {
        if !matches!(cond, Type::Bool | Type::Dyn) {
            return self.error(
                offset,
                format!(
                    "found no matching overload for '_?_:_' applied to '({cond}, {then}, {otherwise})'"
                ),
            );
        }
        join(then, otherwise).unwrap_or_else(|| {
            self.error(
                offset,
                format!(
                    "found no matching overload for '_?_:_' applied to '({cond}, {then}, {otherwise})'"
                ),
            )
        })
    }
}

/// Least common type of two branch or element types.
fn join(a: &Type, b: &Type) -> Option<Type> {
    match (a, b) {
        _ if a == b => Some(a.clone()),
        (Type::Dyn, _) | (_, Type::Dyn) => Some(Type::Dyn),
        (Type::Null, other) | (other, Type::Null) if matches!(other, Type::Object(_)) => {
            Some(other.clone())
        }
        (Type::List(x), Type::List(y)) => join(x, y).map(Type::list),
        (Type::Map(xk, xv), Type::Map(yk, yv)) => Some(Type::map(join(xk, yk)?, join(xv, yv)?)),
        _ => None,
    }
}

fn literal_node(literal: &Literal) -> (NodeKind, Type) {
    let (value, ty) = match literal {
        Literal::Null => (Value::Null, Type::Null),
        Literal::Bool(b) => (Value::Bool(*b), Type::Bool),
        Literal::Int(i) => (Value::Int(*i), Type::Int),
        Literal::Uint(u) => (Value::Uint(*u), Type::Uint),
        Literal::Double(d) => (Value::Double(*d), Type::Double),
        Literal::String(s) => (Value::string(s), Type::String),
        Literal::Bytes(b) => (Value::Bytes(Arc::from(b.as_slice())), Type::Bytes),
    };
    (NodeKind::Const(value), ty)
}

fn call_node(offset: usize, function: &str, overloads: Vec<Arc<Overload>>, args: Vec<Node>, ty: Type) -> Node {
    Node {
        kind: NodeKind::Call {
            function: Arc::from(function),
            overloads,
            args,
        },
        ty,
        offset,
    }
}
