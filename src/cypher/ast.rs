//! Cypher abstract syntax tree — an enum-per-category AST (`Statement`,
//! `Clause`, `Expr`, pattern types) with exhaustive handling throughout
//! planning, rather than a single deeply nested node type with runtime
//! type checks.

use crate::model::{PropertyMap, Value};

/// Top-level parsed query: either a single multi-part query or a chain of
/// queries joined by `UNION`/`UNION ALL`.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Query),
    Union { parts: Vec<Query>, all: Vec<bool> },
}

/// A sequence of read/write clauses ending in an optional `RETURN`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub clauses: Vec<Clause>,
    pub return_clause: Option<ReturnClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(MatchClause),
    With(WithClause),
    Unwind { expr: Expr, var: String },
    Call(CallSubquery),
    Create(Vec<PatternPart>),
    Merge(MergeClause),
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete { exprs: Vec<Expr>, detach: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<PatternPart>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithClause {
    pub distinct: bool,
    pub items: Vec<ProjectionItem>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ProjectionItem>,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: Expr,
    /// Explicit `AS name`, if present. Column naming otherwise follows
    /// spec.md §4.3: a bare variable keeps its own name, anything else
    /// gets a positional `col_<n>` name assigned by the planner.
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeClause {
    pub pattern: PatternPart,
    pub on_create: Vec<SetItem>,
    pub on_match: Vec<SetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// `n.prop = expr`
    Property { target: Expr, key: String, value: Expr },
    /// `n += {...}` — merge a map of properties into the target's existing ones.
    AddProperties { target: Expr, value: Expr },
    /// `n = {...}` — replace the target's properties wholesale.
    ReplaceProperties { target: Expr, value: Expr },
    /// `n:Label` — add a label.
    SetLabel { target: Expr, labels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    Property { target: Expr, key: String },
    Label { target: Expr, labels: Vec<String> },
}

/// `CALL { <query> }`, optionally importing a fixed set of variables from
/// the surrounding scope.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSubquery {
    pub imported_vars: Vec<String>,
    pub query: Box<Statement>,
}

// ============================================================================
// Patterns
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PatternPart {
    pub name: Option<String>,
    pub start: NodePattern,
    /// Each element is (relationship pattern, node reached).
    pub elements: Vec<(RelPattern, NodePattern)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub name: Option<String>,
    pub label_expr: Option<LabelExpr>,
    pub properties: Option<PropMapLiteral>,
    pub where_clause: Option<Expr>,
}

/// Label expression: `:A&B`, `:A|B`, `:!A`, `:%`, with parenthesised
/// grouping.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelExpr {
    Label(String),
    Wildcard,
    And(Box<LabelExpr>, Box<LabelExpr>),
    Or(Box<LabelExpr>, Box<LabelExpr>),
    Not(Box<LabelExpr>),
}

impl LabelExpr {
    /// Evaluate against a node's label set.
    pub fn matches(&self, labels: &[String]) -> bool {
        match self {
            LabelExpr::Label(l) => labels.iter().any(|x| x == l),
            LabelExpr::Wildcard => true,
            LabelExpr::And(a, b) => a.matches(labels) && b.matches(labels),
            LabelExpr::Or(a, b) => a.matches(labels) || b.matches(labels),
            LabelExpr::Not(a) => !a.matches(labels),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowDirection {
    Outgoing, // -->
    Incoming, // <--
    Either,   // --
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub name: Option<String>,
    pub types: Vec<String>,
    pub direction: ArrowDirection,
    pub quantifier: Option<Quantifier>,
    pub properties: Option<PropMapLiteral>,
    pub where_clause: Option<Expr>,
}

/// `*min..max` or `{min, max}`; bounds inclusive. Omitted lower defaults to
/// 1 at planning time, omitted upper to a configurable safety cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantifier {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

pub type PropMapLiteral = Vec<(String, Expr)>;

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Parameter(String),
    Variable(String),
    Property { target: Box<Expr>, key: String },
    Subscript { target: Box<Expr>, index: Box<Expr> },
    Slice { target: Box<Expr>, from: Option<Box<Expr>>, to: Option<Box<Expr>> },

    BinaryOp { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    UnaryOp { op: UnaryOp, operand: Box<Expr> },

    List(Vec<Expr>),
    MapLiteral(Vec<(String, Expr)>),

    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },

    IsNull { operand: Box<Expr>, negated: bool },
    In { probe: Box<Expr>, list: Box<Expr> },
    HasLabel { operand: Box<Expr>, label_expr: LabelExpr },

    /// `STARTS WITH` / `ENDS WITH` / `CONTAINS` / `=~`.
    StringOp { op: StringOp, lhs: Box<Expr>, rhs: Box<Expr> },

    Case {
        /// Simple-form `CASE expr WHEN ...`; absent means the generic form.
        subject: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
    },

    Exists(Box<Statement>),
    Count(Box<Statement>),

    /// A standalone pattern used as an expression (e.g. bound in
    /// `MATCH p = (a)-->(b) RETURN p`) — constructed by the planner/lowering
    /// step, not produced directly by the expression parser.
    PatternPath(Box<PatternPart>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add, Sub, Mul, Div, Mod, Pow,
    Eq, Neq, Lt, Lte, Gt, Gte,
    And, Or, Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    EndsWith,
    Contains,
    RegexMatch,
}

pub type Parameters = PropertyMap;
