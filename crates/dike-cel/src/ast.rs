//! Parsed, unchecked expression tree.

/// A parsed expression with its source offset.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expr {
    pub offset: usize,
    pub kind: ExprKind,
    /// Levels in the tree rooted here; a leaf has height 1.
    pub height: usize,
}

impl Expr {
    pub fn new(offset: usize, kind: ExprKind) -> Self {
        let height = 1 + kind.children().iter().map(|child| child.height).max().unwrap_or(0);
        Self { offset, kind, height }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExprKind {
    Literal(Literal),
    Ident(String),
    /// Field selection; `test_only` marks the `has()` macro.
    Select {
        operand: Box<Expr>,
        field: String,
        test_only: bool,
    },
    Index {
        operand: Box<Expr>,
        index: Box<Expr>,
    },
    /// Free or member call. Operators are calls to `_+_`, `!_`, `@in`, ...
    Call {
        target: Option<Box<Expr>>,
        function: String,
        args: Vec<Expr>,
    },
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Comprehension(Box<Comprehension>),
}

impl ExprKind {
    /// Direct subexpressions.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Literal(_) | Self::Ident(_) => Vec::new(),
            Self::Select { operand, .. } => vec![&**operand],
            Self::Index { operand, index } => vec![&**operand, &**index],
            Self::Call { target, args, .. } => target.as_deref().into_iter().chain(args).collect(),
            Self::List(items) => items.iter().collect(),
            Self::Map(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
            Self::And(lhs, rhs) | Self::Or(lhs, rhs) => vec![&**lhs, &**rhs],
            Self::Conditional(cond, then, otherwise) => vec![&**cond, &**then, &**otherwise],
            Self::Comprehension(c) => std::iter::once(&c.range)
                .chain(c.predicate.as_ref())
                .chain(c.transform.as_ref())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MacroKind {
    All,
    Exists,
    ExistsOne,
    Map,
    Filter,
}

impl MacroKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "all" => Some(Self::All),
            "exists" => Some(Self::Exists),
            "exists_one" | "existsOne" => Some(Self::ExistsOne),
            "map" => Some(Self::Map),
            "filter" => Some(Self::Filter),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Exists => "exists",
            Self::ExistsOne => "exists_one",
            Self::Map => "map",
            Self::Filter => "filter",
        }
    }
}

/// An expanded comprehension macro such as `list.all(x, p)`.
///
/// `predicate` is the condition of `all`/`exists`/`exists_one`/`filter` and
/// the optional filter of the three-argument `map`; `transform` is the
/// projection of `map`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Comprehension {
    pub kind: MacroKind,
    pub var: String,
    pub range: Expr,
    pub predicate: Option<Expr>,
    pub transform: Option<Expr>,
}
