//! Logical query planner (C4).
//!
//! Lowers a parsed [`crate::cypher::ast::Statement`] into a [`LogicalPlan`]
//! tree: a chain of operators the executor pulls rows through. Planning is
//! a single top-to-bottom walk over the clause list that threads a
//! [`PlanContext`] carrying the set of variable names currently in scope,
//! so later clauses know which pattern variables to treat as fresh
//! bindings versus joins against already-bound values.

use std::collections::HashSet;

use crate::cypher::ast::*;
use crate::model::PropertyMap;
use crate::{Error, Result};

mod build;
mod lower;

pub use build::plan;
pub(crate) use build::plan_correlated;

/// A single aggregate function call appearing in a projection, e.g.
/// `count(n)` or `collect(DISTINCT n.name)`. `arg` is `None` only for
/// `count(*)`. `extra_args` holds anything past the first argument, e.g.
/// the fraction in `percentileCont(n.age, 0.5)`.
#[derive(Debug, Clone)]
pub struct AggregateCall {
    pub name: String,
    pub arg: Option<Expr>,
    pub extra_args: Vec<Expr>,
    pub distinct: bool,
}

/// One step of a `CREATE`/`MERGE` pattern, in left-to-right pattern order.
#[derive(Debug, Clone)]
pub enum CreateStep {
    Node(CreateNodeSpec),
    Rel(CreateRelSpec),
}

#[derive(Debug, Clone)]
pub struct CreateNodeSpec {
    pub var: String,
    /// `true` when `var` already names a bound node (MERGE's
    /// both-endpoints-bound relationship form, or a CREATE pattern that
    /// reuses a variable from an earlier clause) — no new node is created,
    /// the step just confirms the existing binding.
    pub already_bound: bool,
    pub labels: Vec<String>,
    pub properties: PropMapLiteral,
}

#[derive(Debug, Clone)]
pub struct CreateRelSpec {
    pub var: String,
    pub from: String,
    pub to: String,
    pub rel_type: String,
    pub properties: PropMapLiteral,
}

/// The operator set the executor (C6) understands. Built directly from
/// spec §4.4's operator list; `ScanAllRels`/`ScanRelsByType` are folded
/// into `Expand`/`VarExpand` at plan time since the pattern grammar always
/// anchors a path on a node, never a bare relationship.
#[derive(Debug, Clone)]
pub enum LogicalPlan {
    /// Produces exactly one empty row. The base of every pattern chain.
    Argument,

    ScanAllNodes {
        var: String,
    },
    ScanNodesByLabel {
        var: String,
        label: String,
    },

    /// Single-hop traversal from an already-bound node.
    Expand {
        input: Box<LogicalPlan>,
        from: String,
        rel_var: String,
        to_var: String,
        to_is_bound: bool,
        direction: ArrowDirection,
        types: Vec<String>,
        predicate: Option<Expr>,
    },

    /// Variable-length traversal, `min..max` hops inclusive.
    VarExpand {
        input: Box<LogicalPlan>,
        from: String,
        to_var: String,
        to_is_bound: bool,
        direction: ArrowDirection,
        types: Vec<String>,
        min: u32,
        max: u32,
        /// `true` when the quantifier omitted an explicit upper bound and
        /// `max` is therefore the configurable safety cap, not a bound the
        /// query actually asked for — exceeding it is a
        /// `RuntimeError:UnboundedTraversal`, not a normal "no more
        /// matches" stop (spec §4.6).
        uncapped: bool,
        predicate: Option<Expr>,
        path_var: Option<String>,
        rels_var: Option<String>,
        /// The relationship variable name `predicate` was built against —
        /// always present, even when the pattern left the relationship
        /// unnamed (in which case it's a planner-generated anonymous name
        /// and `rels_var` stays `None`). The executor binds each candidate
        /// relationship under this name before evaluating `predicate`.
        rel_binding: String,
    },

    /// Cheap special case of `OPTIONAL MATCH`: a single optional hop from
    /// an already-bound node, with no chained elements.
    OptionalExpand {
        input: Box<LogicalPlan>,
        from: String,
        rel_var: String,
        to_var: String,
        direction: ArrowDirection,
        types: Vec<String>,
        predicate: Option<Expr>,
    },

    /// General `OPTIONAL MATCH`: run `subplan` per outer row (seeded with
    /// that row's bindings); zero results become one row with `new_vars`
    /// set to `Null`.
    OptionalMatch {
        input: Box<LogicalPlan>,
        subplan: Box<LogicalPlan>,
        new_vars: Vec<String>,
    },

    /// Materializes a named pattern path (`p = (a)-->(b)`) into a
    /// `Value::Path` binding from the node/relationship variables already
    /// bound by the preceding `Expand`/`VarExpand` chain.
    BuildPath {
        input: Box<LogicalPlan>,
        path_var: String,
        node_vars: Vec<String>,
        rel_vars: Vec<(String, ArrowDirection)>,
    },

    CartesianProduct {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },

    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },

    Project {
        input: Box<LogicalPlan>,
        items: Vec<(String, Expr)>,
        distinct: bool,
    },

    Aggregate {
        input: Box<LogicalPlan>,
        keys: Vec<(String, Expr)>,
        aggregates: Vec<(String, AggregateCall)>,
    },

    Sort {
        input: Box<LogicalPlan>,
        items: Vec<(Expr, bool)>,
    },

    Skip {
        input: Box<LogicalPlan>,
        expr: Expr,
    },

    Limit {
        input: Box<LogicalPlan>,
        expr: Expr,
    },

    Unwind {
        input: Box<LogicalPlan>,
        expr: Expr,
        var: String,
    },

    Create {
        input: Box<LogicalPlan>,
        steps: Vec<CreateStep>,
    },

    Merge {
        input: Box<LogicalPlan>,
        match_plan: Box<LogicalPlan>,
        steps: Vec<CreateStep>,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    },

    Set {
        input: Box<LogicalPlan>,
        items: Vec<SetItem>,
    },

    Remove {
        input: Box<LogicalPlan>,
        items: Vec<RemoveItem>,
    },

    Delete {
        input: Box<LogicalPlan>,
        exprs: Vec<Expr>,
        detach: bool,
    },

    Union {
        inputs: Vec<LogicalPlan>,
        distinct: bool,
        columns: Vec<String>,
    },

    CallSubquery {
        input: Box<LogicalPlan>,
        imported_vars: Vec<String>,
        subplan: Box<LogicalPlan>,
        returns: bool,
    },

    /// Terminal marker for a statement with no `RETURN`: run `input` for
    /// its side effects and report zero columns.
    Eof {
        input: Box<LogicalPlan>,
    },
}

/// Threaded through planning: which variable names are currently bound,
/// so a node/relationship pattern can tell "introduce a new binding" from
/// "join against what's already there".
#[derive(Debug, Default, Clone)]
pub(crate) struct PlanContext {
    pub bound_vars: HashSet<String>,
    /// Safety cap for a variable-length relationship with no explicit
    /// upper bound (spec §4.6/§5).
    pub var_length_cap: u32,
    anon_counter: u32,
}

impl PlanContext {
    fn new() -> Self {
        Self { bound_vars: HashSet::new(), var_length_cap: 50, anon_counter: 0 }
    }

    fn fresh_anon(&mut self, prefix: &str) -> String {
        self.anon_counter += 1;
        format!("__{prefix}{}", self.anon_counter)
    }
}

/// Does this statement contain a write clause anywhere (top level or
/// inside a `CALL {}` subquery)? Used by [`crate::Graph::execute`] to pick
/// a read-only versus read-write transaction (spec §5).
pub fn is_write_statement(stmt: &Statement) -> bool {
    match stmt {
        Statement::Query(q) => query_is_write(q),
        Statement::Union { parts, .. } => parts.iter().any(query_is_write),
    }
}

fn query_is_write(q: &Query) -> bool {
    q.clauses.iter().any(|c| match c {
        Clause::Create(_) | Clause::Merge(_) | Clause::Set(_) | Clause::Remove(_) | Clause::Delete { .. } => true,
        Clause::Call(sub) => is_write_statement(&sub.query),
        _ => false,
    })
}

/// Run the lightweight best-effort optimizer (spec §4.4): pushes a
/// constant `Limit` down through an adjacent chain toward the nearest
/// scan, where doing so cannot change which rows are produced. Not
/// required for correctness, only for avoiding unnecessary work; never
/// changes the result of a query.
pub fn optimize(plan: LogicalPlan) -> LogicalPlan {
    lower::push_down_limit(plan)
}

pub(crate) fn collect_vars(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Variable(v) if v != "*" => {
            out.insert(v.clone());
        }
        Expr::Variable(_) | Expr::Literal(_) | Expr::Parameter(_) => {}
        Expr::Property { target, .. } => collect_vars(target, out),
        Expr::Subscript { target, index } => {
            collect_vars(target, out);
            collect_vars(index, out);
        }
        Expr::Slice { target, from, to } => {
            collect_vars(target, out);
            if let Some(f) = from {
                collect_vars(f, out);
            }
            if let Some(t) = to {
                collect_vars(t, out);
            }
        }
        Expr::BinaryOp { lhs, rhs, .. } => {
            collect_vars(lhs, out);
            collect_vars(rhs, out);
        }
        Expr::UnaryOp { operand, .. } => collect_vars(operand, out),
        Expr::List(items) => items.iter().for_each(|e| collect_vars(e, out)),
        Expr::MapLiteral(entries) => entries.iter().for_each(|(_, e)| collect_vars(e, out)),
        Expr::FunctionCall { args, .. } => args.iter().for_each(|e| collect_vars(e, out)),
        Expr::IsNull { operand, .. } => collect_vars(operand, out),
        Expr::In { probe, list } => {
            collect_vars(probe, out);
            collect_vars(list, out);
        }
        Expr::HasLabel { operand, .. } => collect_vars(operand, out),
        Expr::StringOp { lhs, rhs, .. } => {
            collect_vars(lhs, out);
            collect_vars(rhs, out);
        }
        Expr::Case { subject, whens, default } => {
            if let Some(s) = subject {
                collect_vars(s, out);
            }
            for (w, t) in whens {
                collect_vars(w, out);
                collect_vars(t, out);
            }
            if let Some(d) = default {
                collect_vars(d, out);
            }
        }
        // Exists/Count subqueries are validated independently when planned;
        // their free (correlated) variable references aren't walked here.
        Expr::Exists(_) | Expr::Count(_) => {}
        Expr::PatternPath(_) => {}
    }
}

pub(crate) fn check_vars_defined(expr: &Expr, scope: &HashSet<String>) -> Result<()> {
    let mut used = HashSet::new();
    collect_vars(expr, &mut used);
    for name in used {
        if !scope.contains(&name) {
            return Err(Error::SemanticError(format!("UndefinedVariable: '{name}' is not in scope")));
        }
    }
    Ok(())
}

/// Function names treated as aggregators (spec §4.5's restated function
/// list). Matched case-insensitively.
pub(crate) const AGGREGATE_FUNCTIONS: &[&str] =
    &["count", "sum", "avg", "min", "max", "collect", "percentilecont", "percentiledisc", "stdev", "stdevp"];

pub(crate) fn is_aggregate_call(expr: &Expr) -> bool {
    matches!(expr, Expr::FunctionCall { name, .. } if AGGREGATE_FUNCTIONS.contains(&name.to_lowercase().as_str()))
}

#[allow(dead_code)]
pub(crate) type Params = PropertyMap;
