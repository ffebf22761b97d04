//! Best-effort logical-plan rewrites (spec §4.4). Never changes a query's
//! result, only collapses redundant structure the builder can produce
//! directly (e.g. a `WITH ... LIMIT` immediately followed by another
//! `LIMIT` from a trailing `RETURN`).

use crate::cypher::ast::Expr;
use crate::model::Value;

use super::LogicalPlan;

/// Collapse adjacent `Limit` nodes with literal integer bounds into one,
/// keeping the smaller of the two — the only rewrite that's always safe
/// without knowing anything about what's underneath.
pub(crate) fn push_down_limit(plan: LogicalPlan) -> LogicalPlan {
    match plan {
        LogicalPlan::Limit { input, expr } => {
            let input = push_down_limit(*input);
            if let LogicalPlan::Limit { input: inner, expr: inner_expr } = input {
                if let (Expr::Literal(Value::Int(a)), Expr::Literal(Value::Int(b))) = (&expr, &inner_expr) {
                    let bound = (*a).min(*b);
                    return LogicalPlan::Limit { input: inner, expr: Expr::Literal(Value::Int(bound)) };
                }
                return LogicalPlan::Limit { input: Box::new(LogicalPlan::Limit { input: inner, expr: inner_expr }), expr };
            }
            LogicalPlan::Limit { input: Box::new(input), expr }
        }
        other => map_children(other, push_down_limit),
    }
}

fn map_children(plan: LogicalPlan, f: fn(LogicalPlan) -> LogicalPlan) -> LogicalPlan {
    match plan {
        LogicalPlan::Argument | LogicalPlan::ScanAllNodes { .. } | LogicalPlan::ScanNodesByLabel { .. } => plan,

        LogicalPlan::Expand { input, from, rel_var, to_var, to_is_bound, direction, types, predicate } => {
            LogicalPlan::Expand { input: Box::new(f(*input)), from, rel_var, to_var, to_is_bound, direction, types, predicate }
        }
        LogicalPlan::VarExpand {
            input, from, to_var, to_is_bound, direction, types, min, max, uncapped, predicate, path_var, rels_var, rel_binding,
        } => LogicalPlan::VarExpand {
            input: Box::new(f(*input)),
            from,
            to_var,
            to_is_bound,
            direction,
            types,
            min,
            max,
            uncapped,
            predicate,
            path_var,
            rels_var,
            rel_binding,
        },
        LogicalPlan::OptionalExpand { input, from, rel_var, to_var, direction, types, predicate } => {
            LogicalPlan::OptionalExpand { input: Box::new(f(*input)), from, rel_var, to_var, direction, types, predicate }
        }
        LogicalPlan::OptionalMatch { input, subplan, new_vars } => {
            LogicalPlan::OptionalMatch { input: Box::new(f(*input)), subplan: Box::new(f(*subplan)), new_vars }
        }
        LogicalPlan::BuildPath { input, path_var, node_vars, rel_vars } => {
            LogicalPlan::BuildPath { input: Box::new(f(*input)), path_var, node_vars, rel_vars }
        }
        LogicalPlan::CartesianProduct { left, right } => {
            LogicalPlan::CartesianProduct { left: Box::new(f(*left)), right: Box::new(f(*right)) }
        }
        LogicalPlan::Filter { input, predicate } => LogicalPlan::Filter { input: Box::new(f(*input)), predicate },
        LogicalPlan::Project { input, items, distinct } => {
            LogicalPlan::Project { input: Box::new(f(*input)), items, distinct }
        }
        LogicalPlan::Aggregate { input, keys, aggregates } => {
            LogicalPlan::Aggregate { input: Box::new(f(*input)), keys, aggregates }
        }
        LogicalPlan::Sort { input, items } => LogicalPlan::Sort { input: Box::new(f(*input)), items },
        LogicalPlan::Skip { input, expr } => LogicalPlan::Skip { input: Box::new(f(*input)), expr },
        LogicalPlan::Limit { input, expr } => LogicalPlan::Limit { input: Box::new(f(*input)), expr },
        LogicalPlan::Unwind { input, expr, var } => LogicalPlan::Unwind { input: Box::new(f(*input)), expr, var },
        LogicalPlan::Create { input, steps } => LogicalPlan::Create { input: Box::new(f(*input)), steps },
        LogicalPlan::Merge { input, match_plan, steps, on_create, on_match } => LogicalPlan::Merge {
            input: Box::new(f(*input)),
            match_plan: Box::new(f(*match_plan)),
            steps,
            on_create,
            on_match,
        },
        LogicalPlan::Set { input, items } => LogicalPlan::Set { input: Box::new(f(*input)), items },
        LogicalPlan::Remove { input, items } => LogicalPlan::Remove { input: Box::new(f(*input)), items },
        LogicalPlan::Delete { input, exprs, detach } => LogicalPlan::Delete { input: Box::new(f(*input)), exprs, detach },
        LogicalPlan::Union { inputs, distinct, columns } => {
            LogicalPlan::Union { inputs: inputs.into_iter().map(f).collect(), distinct, columns }
        }
        LogicalPlan::CallSubquery { input, imported_vars, subplan, returns } => LogicalPlan::CallSubquery {
            input: Box::new(f(*input)),
            imported_vars,
            subplan: Box::new(f(*subplan)),
            returns,
        },
        LogicalPlan::Eof { input } => LogicalPlan::Eof { input: Box::new(f(*input)) },
    }
}
