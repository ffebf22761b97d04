//! Clause-by-clause lowering: walks an AST [`Query`]/[`Statement`] and
//! threads a [`PlanContext`] to build a [`LogicalPlan`].

use std::collections::HashSet;

use super::*;
use crate::model::PropertyMap;

/// Lower a parsed statement into an executable plan.
pub fn plan(ast: &Statement, params: &PropertyMap) -> Result<LogicalPlan> {
    let _ = params; // parameters are resolved by the evaluator at run time, not at plan time
    let mut ctx = PlanContext::new();
    plan_statement(ast, &mut ctx)
}

/// Lower a correlated subquery (`EXISTS{}`/`COUNT{}`) with a pre-seeded
/// variable scope, so references to already-bound outer variables resolve
/// as joins against the executor's seeded row rather than fresh scans.
pub(crate) fn plan_correlated(stmt: &Statement, outer_scope: &HashSet<String>) -> Result<LogicalPlan> {
    let mut ctx = PlanContext::new();
    ctx.bound_vars = outer_scope.clone();
    plan_statement(stmt, &mut ctx)
}

fn plan_statement(stmt: &Statement, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    match stmt {
        Statement::Query(q) => plan_query(q, ctx),
        Statement::Union { parts, all } => plan_union(parts, all, ctx),
    }
}

fn plan_union(parts: &[Query], all: &[bool], ctx: &mut PlanContext) -> Result<LogicalPlan> {
    if parts.is_empty() {
        return Err(Error::SemanticError("UNION requires at least one part".into()));
    }
    let mut plans = Vec::with_capacity(parts.len());
    let mut columns: Option<Vec<String>> = None;
    for part in parts {
        let mut part_ctx = PlanContext::new();
        part_ctx.var_length_cap = ctx.var_length_cap;
        let cols = query_columns(part)?;
        match &columns {
            None => columns = Some(cols),
            Some(existing) if existing.len() != cols.len() => {
                return Err(Error::SemanticError(
                    "SemanticError:UndefinedVariable UNION parts must return the same number of columns".into(),
                ));
            }
            Some(_) => {}
        }
        plans.push(plan_query(part, &mut part_ctx)?);
    }
    let distinct = !all.iter().all(|a| *a);
    let columns = columns.unwrap_or_default();
    ctx.bound_vars = columns.iter().cloned().collect();
    Ok(LogicalPlan::Union { inputs: plans, distinct, columns })
}

fn query_columns(q: &Query) -> Result<Vec<String>> {
    let rc = q
        .return_clause
        .as_ref()
        .ok_or_else(|| Error::SemanticError("every UNION part must end in a RETURN".into()))?;
    Ok(rc.items.iter().enumerate().map(|(i, item)| projection_output_name(item, i)).collect())
}

fn plan_query(query: &Query, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    let mut plan = LogicalPlan::Argument;
    for clause in &query.clauses {
        plan = match clause {
            Clause::Match(mc) => plan_match_clause(mc, plan, ctx)?,
            Clause::With(wc) => plan_with_clause(wc, plan, ctx)?,
            Clause::Unwind { expr, var } => plan_unwind(expr, var, plan, ctx)?,
            Clause::Call(call) => plan_call_subquery(call, plan, ctx)?,
            Clause::Create(parts) => plan_create_clause(parts, plan, ctx)?,
            Clause::Merge(mc) => plan_merge_clause(mc, plan, ctx)?,
            Clause::Set(items) => plan_set_clause(items, plan, ctx)?,
            Clause::Remove(items) => plan_remove_clause(items, plan, ctx)?,
            Clause::Delete { exprs, detach } => plan_delete_clause(exprs, *detach, plan, ctx)?,
        };
    }
    match &query.return_clause {
        Some(rc) => plan_projection(
            &rc.items,
            rc.distinct,
            None,
            &rc.order_by,
            rc.skip.as_ref(),
            rc.limit.as_ref(),
            plan,
            ctx,
            false,
        ),
        None => Ok(LogicalPlan::Eof { input: Box::new(plan) }),
    }
}

fn plan_with_clause(wc: &WithClause, plan: LogicalPlan, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    plan_projection(
        &wc.items,
        wc.distinct,
        wc.where_clause.as_ref(),
        &wc.order_by,
        wc.skip.as_ref(),
        wc.limit.as_ref(),
        plan,
        ctx,
        true,
    )
}

/// Shared lowering for `WITH`/`RETURN`: projection (with implicit
/// aggregation when an item is an aggregator), clause-level `WHERE`,
/// `ORDER BY`, `SKIP`, `LIMIT`. `reset_scope` is set for `WITH`, which per
/// spec §4.4 replaces the visible variable set with exactly its output
/// columns.
#[allow(clippy::too_many_arguments)]
fn plan_projection(
    items: &[ProjectionItem],
    distinct: bool,
    where_clause: Option<&Expr>,
    order_by: &[OrderItem],
    skip: Option<&Expr>,
    limit: Option<&Expr>,
    plan: LogicalPlan,
    ctx: &mut PlanContext,
    reset_scope: bool,
) -> Result<LogicalPlan> {
    let items: Vec<ProjectionItem> = if items.len() == 1 && matches!(&items[0].expr, Expr::Variable(v) if v == "*")
    {
        let mut names: Vec<String> = ctx.bound_vars.iter().cloned().collect();
        names.sort();
        names.into_iter().map(|n| ProjectionItem { expr: Expr::Variable(n), alias: None }).collect()
    } else {
        items.to_vec()
    };

    for item in &items {
        check_vars_defined(&item.expr, &ctx.bound_vars)?;
    }

    if reset_scope {
        for item in &items {
            if item.alias.is_none() && !matches!(&item.expr, Expr::Variable(_)) {
                return Err(Error::SemanticError(
                    "NoExpressionAlias: WITH requires an alias for any item that is not a bare variable".into(),
                ));
            }
        }
    }

    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = projection_output_name(item, i);
        if !seen.insert(name.clone()) {
            return Err(Error::SemanticError(format!("ColumnNameConflict: duplicate projection name '{name}'")));
        }
        names.push(name);
    }

    let has_agg = items.iter().any(|i| is_aggregate_call(&i.expr));
    let mut plan = plan;
    if has_agg {
        let mut keys = Vec::new();
        let mut aggregates = Vec::new();
        for (item, name) in items.iter().zip(names.iter()) {
            if let Expr::FunctionCall { name: fname, args, distinct: call_distinct } = &item.expr {
                if is_aggregate_call(&item.expr) {
                    let arg = if fname.eq_ignore_ascii_case("count")
                        && args.len() == 1
                        && matches!(&args[0], Expr::Variable(v) if v == "*")
                    {
                        None
                    } else {
                        args.first().cloned()
                    };
                    let extra_args = args.get(1..).map(|s| s.to_vec()).unwrap_or_default();
                    aggregates.push((
                        name.clone(),
                        AggregateCall { name: fname.clone(), arg, extra_args, distinct: *call_distinct },
                    ));
                    continue;
                }
            }
            keys.push((name.clone(), item.expr.clone()));
        }
        plan = LogicalPlan::Aggregate { input: Box::new(plan), keys, aggregates };
        let reproject: Vec<(String, Expr)> = names.iter().map(|n| (n.clone(), Expr::Variable(n.clone()))).collect();
        plan = LogicalPlan::Project { input: Box::new(plan), items: reproject, distinct };
    } else {
        let proj_items: Vec<(String, Expr)> =
            items.iter().zip(names.iter()).map(|(it, n)| (n.clone(), it.expr.clone())).collect();
        plan = LogicalPlan::Project { input: Box::new(plan), items: proj_items, distinct };
    }

    let new_scope: HashSet<String> = names.iter().cloned().collect();

    if let Some(w) = where_clause {
        check_vars_defined(w, &new_scope)?;
        plan = LogicalPlan::Filter { input: Box::new(plan), predicate: w.clone() };
    }

    if !order_by.is_empty() {
        for o in order_by {
            check_vars_defined(&o.expr, &new_scope)?;
        }
        let sort_items: Vec<(Expr, bool)> = order_by.iter().map(|o| (o.expr.clone(), o.descending)).collect();
        plan = LogicalPlan::Sort { input: Box::new(plan), items: sort_items };
    }
    if let Some(s) = skip {
        plan = LogicalPlan::Skip { input: Box::new(plan), expr: s.clone() };
    }
    if let Some(l) = limit {
        plan = LogicalPlan::Limit { input: Box::new(plan), expr: l.clone() };
    }

    if reset_scope {
        ctx.bound_vars = new_scope;
    }
    Ok(plan)
}

fn projection_output_name(item: &ProjectionItem, idx: usize) -> String {
    if let Some(a) = &item.alias {
        return a.clone();
    }
    if let Expr::Variable(v) = &item.expr {
        if v != "*" {
            return v.clone();
        }
    }
    format!("col_{idx}")
}

// ============================================================================
// MATCH
// ============================================================================

fn plan_match_clause(mc: &MatchClause, plan: LogicalPlan, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    if mc.optional {
        return plan_optional_match(mc, plan, ctx);
    }
    let mut current = plan;
    for part in &mc.patterns {
        current = plan_pattern_part(part, current, ctx)?;
    }
    if let Some(w) = &mc.where_clause {
        check_vars_defined(w, &ctx.bound_vars)?;
        current = LogicalPlan::Filter { input: Box::new(current), predicate: w.clone() };
    }
    Ok(current)
}

fn plan_optional_match(mc: &MatchClause, plan: LogicalPlan, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    // Cheap special case: a single optional hop from an already-bound node.
    if mc.where_clause.is_none() && mc.patterns.len() == 1 {
        let part = &mc.patterns[0];
        if part.name.is_none() && part.elements.len() == 1 {
            if let Some(sv) = &part.start.name {
                if ctx.bound_vars.contains(sv)
                    && part.start.label_expr.is_none()
                    && part.start.properties.is_none()
                    && part.start.where_clause.is_none()
                {
                    let (relpat, nodepat) = &part.elements[0];
                    let to_already_bound = nodepat.name.as_ref().is_some_and(|n| ctx.bound_vars.contains(n));
                    if relpat.quantifier.is_none() && !to_already_bound {
                        let rel_var = relpat.name.clone().unwrap_or_else(|| ctx.fresh_anon("r"));
                        let to_var = nodepat.name.clone().unwrap_or_else(|| ctx.fresh_anon("n"));
                        let predicate = and_opt(build_rel_predicate(&rel_var, relpat), build_node_predicate(&to_var, nodepat));
                        if let Some(n) = &relpat.name {
                            ctx.bound_vars.insert(n.clone());
                        }
                        if let Some(n) = &nodepat.name {
                            ctx.bound_vars.insert(n.clone());
                        }
                        return Ok(LogicalPlan::OptionalExpand {
                            input: Box::new(plan),
                            from: sv.clone(),
                            rel_var,
                            to_var,
                            direction: relpat.direction,
                            types: relpat.types.clone(),
                            predicate,
                        });
                    }
                }
            }
        }
    }

    let before = ctx.bound_vars.clone();
    let mut sub_ctx = ctx.clone();
    let mut subplan = LogicalPlan::Argument;
    for part in &mc.patterns {
        subplan = plan_pattern_part(part, subplan, &mut sub_ctx)?;
    }
    if let Some(w) = &mc.where_clause {
        check_vars_defined(w, &sub_ctx.bound_vars)?;
        subplan = LogicalPlan::Filter { input: Box::new(subplan), predicate: w.clone() };
    }
    let new_vars: Vec<String> = sub_ctx.bound_vars.difference(&before).cloned().collect();
    ctx.bound_vars.extend(new_vars.iter().cloned());
    ctx.anon_counter = sub_ctx.anon_counter;
    Ok(LogicalPlan::OptionalMatch { input: Box::new(plan), subplan: Box::new(subplan), new_vars })
}

/// Plans one comma-separated pattern part. The anchor (the node that gets
/// an actual scan operator) is the most selective node across the *whole*
/// pattern — labelled > fixed-property > all-nodes, left-to-right
/// tie-break (spec §4.4) — not necessarily the textually-first node.
/// Expansion then proceeds outward from the anchor in both directions,
/// flipping each traversed relationship's direction when walking back
/// toward the pattern's start, while `node_vars`/`rel_vars` stay in
/// textual left-to-right order for `BuildPath` (direction there is
/// recomputed per-hop from the bound relationship's actual endpoints, so
/// physical expansion order doesn't matter — see `build_path_value`).
fn plan_pattern_part(part: &PatternPart, plan: LogicalPlan, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    let node_pats: Vec<&NodePattern> =
        std::iter::once(&part.start).chain(part.elements.iter().map(|(_, np)| np)).collect();
    let names: Vec<String> =
        node_pats.iter().map(|np| np.name.clone().unwrap_or_else(|| ctx.fresh_anon("n"))).collect();

    let varlen_count = part.elements.iter().filter(|(rp, _)| rp.quantifier.is_some()).count();
    // A named path over a variable-length edge is reconstructed by walking
    // forward from `from` (see the `VarExpand` path_var case in the
    // executor); anchoring anywhere but the pattern's first node would
    // record that path in reverse. Only this combination needs the anchor
    // pinned to the start; every other shape is free to pick the most
    // selective node.
    let anchor_idx =
        if varlen_count > 0 && part.name.is_some() { 0 } else { choose_anchor_index(&node_pats, ctx) };

    let anchor_name = names[anchor_idx].clone();
    let anchor_already_bound = node_pats[anchor_idx].name.as_ref().is_some_and(|n| ctx.bound_vars.contains(n));
    let mut current = if anchor_already_bound {
        plan
    } else {
        let anchor = anchor_scan(&anchor_name, node_pats[anchor_idx]);
        match plan {
            LogicalPlan::Argument => anchor,
            other => LogicalPlan::CartesianProduct { left: Box::new(other), right: Box::new(anchor) },
        }
    };
    if let Some(n) = &node_pats[anchor_idx].name {
        ctx.bound_vars.insert(n.clone());
    }
    if let Some(pred) = build_node_predicate(&anchor_name, node_pats[anchor_idx]) {
        check_vars_defined(&pred, &ctx.bound_vars)?;
        current = LogicalPlan::Filter { input: Box::new(current), predicate: pred };
    }

    let mut rel_vars: Vec<Option<(String, ArrowDirection)>> = vec![None; part.elements.len()];

    // Walk backward from the anchor to the pattern's start, flipping each
    // edge's direction since we now traverse it the opposite way.
    let mut prev_var = anchor_name.clone();
    for i in (0..anchor_idx).rev() {
        let (relpat, _) = &part.elements[i];
        let to_var = names[i].clone();
        let to_is_bound = node_pats[i].name.as_ref().is_some_and(|n| ctx.bound_vars.contains(n));
        let node_pred = build_node_predicate(&to_var, node_pats[i]);
        let rel_var = relpat.name.clone().unwrap_or_else(|| ctx.fresh_anon("r"));
        current = plan_edge_step(current, relpat, &prev_var, &rel_var, &to_var, to_is_bound, flip_direction(relpat.direction), ctx);
        if let Some(n) = &relpat.name {
            ctx.bound_vars.insert(n.clone());
        }
        if let Some(n) = &node_pats[i].name {
            ctx.bound_vars.insert(n.clone());
        }
        if let Some(pred) = node_pred {
            check_vars_defined(&pred, &ctx.bound_vars)?;
            current = LogicalPlan::Filter { input: Box::new(current), predicate: pred };
        }
        rel_vars[i] = Some((rel_var, relpat.direction));
        prev_var = to_var;
    }

    // Walk forward from the anchor to the pattern's end, unmodified direction.
    let mut prev_var = anchor_name;
    for i in anchor_idx..part.elements.len() {
        let (relpat, _) = &part.elements[i];
        let to_var = names[i + 1].clone();
        let to_is_bound = node_pats[i + 1].name.as_ref().is_some_and(|n| ctx.bound_vars.contains(n));
        let node_pred = build_node_predicate(&to_var, node_pats[i + 1]);
        let rel_var = relpat.name.clone().unwrap_or_else(|| ctx.fresh_anon("r"));
        current = plan_edge_step(current, relpat, &prev_var, &rel_var, &to_var, to_is_bound, relpat.direction, ctx);
        if let Some(n) = &relpat.name {
            ctx.bound_vars.insert(n.clone());
        }
        if let Some(n) = &node_pats[i + 1].name {
            ctx.bound_vars.insert(n.clone());
        }
        if let Some(pred) = node_pred {
            check_vars_defined(&pred, &ctx.bound_vars)?;
            current = LogicalPlan::Filter { input: Box::new(current), predicate: pred };
        }
        rel_vars[i] = Some((rel_var, relpat.direction));
        prev_var = to_var;
    }

    let rel_vars: Vec<(String, ArrowDirection)> = rel_vars.into_iter().map(|rv| rv.expect("every edge planned")).collect();

    if let Some(path_var) = &part.name {
        ctx.bound_vars.insert(path_var.clone());
        if varlen_count == 0 {
            current = LogicalPlan::BuildPath { input: Box::new(current), path_var: path_var.clone(), node_vars: names, rel_vars };
        } else if varlen_count == 1 && part.elements.len() == 1 {
            current = attach_path_var(current, path_var.clone())?;
        } else {
            return Err(Error::SemanticError(
                "named path binding over a pattern mixing variable-length and fixed-length relationships, or \
                 multiple variable-length relationships, is not supported"
                    .into(),
            ));
        }
    }

    Ok(current)
}

/// Builds the `Expand`/`VarExpand` operator for one pattern edge, already
/// resolved to a concrete `from`/`to`/direction (direction may be the
/// pattern's own or flipped, depending on which way this edge is walked).
fn plan_edge_step(
    current: LogicalPlan,
    relpat: &RelPattern,
    from_var: &str,
    rel_var: &str,
    to_var: &str,
    to_is_bound: bool,
    direction: ArrowDirection,
    ctx: &PlanContext,
) -> LogicalPlan {
    let predicate = build_rel_predicate(rel_var, relpat);
    if let Some(q) = relpat.quantifier {
        LogicalPlan::VarExpand {
            input: Box::new(current),
            from: from_var.to_string(),
            to_var: to_var.to_string(),
            to_is_bound,
            direction,
            types: relpat.types.clone(),
            min: q.min.unwrap_or(1),
            max: q.max.unwrap_or(ctx.var_length_cap),
            uncapped: q.max.is_none(),
            predicate,
            path_var: None,
            rels_var: relpat.name.clone(),
            rel_binding: rel_var.to_string(),
        }
    } else {
        LogicalPlan::Expand {
            input: Box::new(current),
            from: from_var.to_string(),
            rel_var: rel_var.to_string(),
            to_var: to_var.to_string(),
            to_is_bound,
            direction,
            types: relpat.types.clone(),
            predicate,
        }
    }
}

fn flip_direction(d: ArrowDirection) -> ArrowDirection {
    match d {
        ArrowDirection::Outgoing => ArrowDirection::Incoming,
        ArrowDirection::Incoming => ArrowDirection::Outgoing,
        ArrowDirection::Either => ArrowDirection::Either,
    }
}

/// Selectivity tier for anchor choice: labelled (0) > fixed-property (1) >
/// all-nodes (2), per spec §4.4. An already-bound variable needs no scan at
/// all and always wins outright.
fn choose_anchor_index(node_pats: &[&NodePattern], ctx: &PlanContext) -> usize {
    if let Some(i) = node_pats.iter().position(|np| np.name.as_ref().is_some_and(|n| ctx.bound_vars.contains(n))) {
        return i;
    }
    let mut best = 0usize;
    let mut best_tier = node_selectivity_tier(node_pats[0]);
    for (i, np) in node_pats.iter().enumerate().skip(1) {
        let tier = node_selectivity_tier(np);
        if tier < best_tier {
            best_tier = tier;
            best = i;
        }
    }
    best
}

fn node_selectivity_tier(np: &NodePattern) -> u8 {
    if np.label_expr.as_ref().and_then(narrow_label).is_some() {
        0
    } else if np.properties.as_ref().is_some_and(|p| !p.is_empty()) {
        1
    } else {
        2
    }
}

fn attach_path_var(plan: LogicalPlan, path_var: String) -> Result<LogicalPlan> {
    match plan {
        LogicalPlan::VarExpand {
            input, from, to_var, to_is_bound, direction, types, min, max, uncapped, predicate, rels_var, rel_binding, ..
        } => Ok(LogicalPlan::VarExpand {
            input,
            from,
            to_var,
            to_is_bound,
            direction,
            types,
            min,
            max,
            uncapped,
            predicate,
            path_var: Some(path_var),
            rels_var,
            rel_binding,
        }),
        LogicalPlan::Filter { input, predicate } => {
            Ok(LogicalPlan::Filter { input: Box::new(attach_path_var(*input, path_var)?), predicate })
        }
        _ => Err(Error::SemanticError("internal planning error: path variable attachment".into())),
    }
}

fn anchor_scan(var: &str, node: &NodePattern) -> LogicalPlan {
    if let Some(le) = &node.label_expr {
        if let Some(label) = narrow_label(le) {
            return LogicalPlan::ScanNodesByLabel { var: var.to_string(), label };
        }
    }
    LogicalPlan::ScanAllNodes { var: var.to_string() }
}

fn narrow_label(expr: &LabelExpr) -> Option<String> {
    match expr {
        LabelExpr::Label(l) => Some(l.clone()),
        LabelExpr::And(a, b) => narrow_label(a).or_else(|| narrow_label(b)),
        _ => None,
    }
}

fn build_node_predicate(var: &str, node: &NodePattern) -> Option<Expr> {
    let mut pred = node
        .label_expr
        .as_ref()
        .map(|le| Expr::HasLabel { operand: Box::new(Expr::Variable(var.into())), label_expr: le.clone() });
    if let Some(props) = &node.properties {
        for (k, v) in props {
            pred = and_opt(pred, Some(prop_eq(var, k, v)));
        }
    }
    and_opt(pred, node.where_clause.clone())
}

fn build_rel_predicate(var: &str, rel: &RelPattern) -> Option<Expr> {
    let mut pred = None;
    if let Some(props) = &rel.properties {
        for (k, v) in props {
            pred = and_opt(pred, Some(prop_eq(var, k, v)));
        }
    }
    and_opt(pred, rel.where_clause.clone())
}

fn prop_eq(var: &str, key: &str, value: &Expr) -> Expr {
    Expr::BinaryOp {
        op: BinaryOp::Eq,
        lhs: Box::new(Expr::Property { target: Box::new(Expr::Variable(var.into())), key: key.to_string() }),
        rhs: Box::new(value.clone()),
    }
}

fn and_opt(a: Option<Expr>, b: Option<Expr>) -> Option<Expr> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(Expr::BinaryOp { op: BinaryOp::And, lhs: Box::new(x), rhs: Box::new(y) }),
    }
}

// ============================================================================
// CREATE / MERGE
// ============================================================================

fn plan_create_clause(parts: &[PatternPart], plan: LogicalPlan, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    let mut steps = Vec::new();
    for part in parts {
        if part.name.is_some() {
            return Err(Error::SemanticError("path binding is not supported in CREATE patterns".into()));
        }
        let start_name = part.start.name.clone().unwrap_or_else(|| ctx.fresh_anon("n"));
        let start_bound = part.start.name.as_ref().is_some_and(|n| ctx.bound_vars.contains(n));
        if !start_bound {
            steps.push(CreateStep::Node(CreateNodeSpec {
                var: start_name.clone(),
                already_bound: false,
                labels: label_expr_to_labels(part.start.label_expr.as_ref())?,
                properties: part.start.properties.clone().unwrap_or_default(),
            }));
            if let Some(n) = &part.start.name {
                ctx.bound_vars.insert(n.clone());
            }
        }

        let mut prev = start_name;
        for (relpat, nodepat) in &part.elements {
            if relpat.direction == ArrowDirection::Either {
                return Err(Error::SemanticError("CREATE requires an explicit relationship direction".into()));
            }
            if relpat.quantifier.is_some() {
                return Err(Error::SemanticError("CREATE does not support variable-length relationships".into()));
            }
            let to_name = nodepat.name.clone().unwrap_or_else(|| ctx.fresh_anon("n"));
            let to_bound = nodepat.name.as_ref().is_some_and(|n| ctx.bound_vars.contains(n));
            if !to_bound {
                steps.push(CreateStep::Node(CreateNodeSpec {
                    var: to_name.clone(),
                    already_bound: false,
                    labels: label_expr_to_labels(nodepat.label_expr.as_ref())?,
                    properties: nodepat.properties.clone().unwrap_or_default(),
                }));
                if let Some(n) = &nodepat.name {
                    ctx.bound_vars.insert(n.clone());
                }
            }
            let rel_var = relpat.name.clone().unwrap_or_else(|| ctx.fresh_anon("r"));
            let rel_type = relpat
                .types
                .first()
                .cloned()
                .ok_or_else(|| Error::SemanticError("CREATE relationship requires exactly one type".into()))?;
            let (from, to) = if relpat.direction == ArrowDirection::Outgoing {
                (prev.clone(), to_name.clone())
            } else {
                (to_name.clone(), prev.clone())
            };
            steps.push(CreateStep::Rel(CreateRelSpec {
                var: rel_var.clone(),
                from,
                to,
                rel_type,
                properties: relpat.properties.clone().unwrap_or_default(),
            }));
            if let Some(n) = &relpat.name {
                ctx.bound_vars.insert(n.clone());
            }
            prev = to_name;
        }
    }
    for step in &steps {
        let props = match step {
            CreateStep::Node(n) => &n.properties,
            CreateStep::Rel(r) => &r.properties,
        };
        for (_, v) in props {
            check_vars_defined(v, &ctx.bound_vars)?;
        }
    }
    Ok(LogicalPlan::Create { input: Box::new(plan), steps })
}

fn label_expr_to_labels(expr: Option<&LabelExpr>) -> Result<Vec<String>> {
    match expr {
        None => Ok(Vec::new()),
        Some(e) => flatten_and_labels(e),
    }
}

fn flatten_and_labels(expr: &LabelExpr) -> Result<Vec<String>> {
    match expr {
        LabelExpr::Label(l) => Ok(vec![l.clone()]),
        LabelExpr::And(a, b) => {
            let mut v = flatten_and_labels(a)?;
            v.extend(flatten_and_labels(b)?);
            Ok(v)
        }
        _ => Err(Error::SemanticError("CREATE/MERGE node labels must be a plain conjunction of label names".into())),
    }
}

fn plan_merge_clause(mc: &MergeClause, plan: LogicalPlan, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    let part = &mc.pattern;
    if part.name.is_some() {
        return Err(Error::SemanticError("path binding is not supported in MERGE patterns".into()));
    }

    if part.elements.is_empty() {
        let name = part
            .start
            .name
            .clone()
            .ok_or_else(|| Error::SemanticError("MERGE node pattern requires a variable".into()))?;
        let mut match_ctx = ctx.clone();
        let match_plan = plan_pattern_part(part, LogicalPlan::Argument, &mut match_ctx)?;
        let steps = vec![CreateStep::Node(CreateNodeSpec {
            var: name.clone(),
            already_bound: false,
            labels: label_expr_to_labels(part.start.label_expr.as_ref())?,
            properties: part.start.properties.clone().unwrap_or_default(),
        })];
        ctx.bound_vars.insert(name);
        ctx.anon_counter = match_ctx.anon_counter;
        return Ok(LogicalPlan::Merge {
            input: Box::new(plan),
            match_plan: Box::new(match_plan),
            steps,
            on_create: mc.on_create.clone(),
            on_match: mc.on_match.clone(),
        });
    }

    let start_name = part
        .start
        .name
        .clone()
        .ok_or_else(|| Error::SemanticError("MERGE relationship pattern requires named nodes".into()))?;
    if !ctx.bound_vars.contains(&start_name) {
        return Err(Error::SemanticError(format!(
            "MERGE relationship pattern requires '{start_name}' to already be bound"
        )));
    }
    let mut steps = vec![CreateStep::Node(CreateNodeSpec {
        var: start_name.clone(),
        already_bound: true,
        labels: Vec::new(),
        properties: Vec::new(),
    })];
    let mut prev = start_name;
    let mut match_plan = LogicalPlan::Argument;
    for (relpat, nodepat) in &part.elements {
        if relpat.direction == ArrowDirection::Either {
            return Err(Error::SemanticError("MERGE requires an explicit relationship direction".into()));
        }
        if relpat.quantifier.is_some() {
            return Err(Error::SemanticError("MERGE does not support variable-length relationships".into()));
        }
        let to_name = nodepat
            .name
            .clone()
            .ok_or_else(|| Error::SemanticError("MERGE relationship pattern requires named nodes".into()))?;
        if !ctx.bound_vars.contains(&to_name) {
            return Err(Error::SemanticError(format!(
                "MERGE relationship pattern requires '{to_name}' to already be bound"
            )));
        }
        let rel_var = relpat
            .name
            .clone()
            .ok_or_else(|| Error::SemanticError("MERGE relationship pattern requires a named relationship".into()))?;
        let predicate = build_rel_predicate(&rel_var, relpat);
        match_plan = LogicalPlan::Expand {
            input: Box::new(match_plan),
            from: prev.clone(),
            rel_var: rel_var.clone(),
            to_var: to_name.clone(),
            to_is_bound: true,
            direction: relpat.direction,
            types: relpat.types.clone(),
            predicate,
        };
        let rel_type = relpat
            .types
            .first()
            .cloned()
            .ok_or_else(|| Error::SemanticError("MERGE relationship requires exactly one type".into()))?;
        let (from, to) = if relpat.direction == ArrowDirection::Outgoing {
            (prev.clone(), to_name.clone())
        } else {
            (to_name.clone(), prev.clone())
        };
        steps.push(CreateStep::Node(CreateNodeSpec {
            var: to_name.clone(),
            already_bound: true,
            labels: Vec::new(),
            properties: Vec::new(),
        }));
        steps.push(CreateStep::Rel(CreateRelSpec {
            var: rel_var,
            from,
            to,
            rel_type,
            properties: relpat.properties.clone().unwrap_or_default(),
        }));
        prev = to_name;
    }
    Ok(LogicalPlan::Merge {
        input: Box::new(plan),
        match_plan: Box::new(match_plan),
        steps,
        on_create: mc.on_create.clone(),
        on_match: mc.on_match.clone(),
    })
}

// ============================================================================
// SET / REMOVE / DELETE / UNWIND / CALL
// ============================================================================

fn plan_set_clause(items: &[SetItem], plan: LogicalPlan, ctx: &PlanContext) -> Result<LogicalPlan> {
    for item in items {
        match item {
            SetItem::Property { target, value, .. } => {
                check_vars_defined(target, &ctx.bound_vars)?;
                check_vars_defined(value, &ctx.bound_vars)?;
            }
            SetItem::AddProperties { target, value } | SetItem::ReplaceProperties { target, value } => {
                check_vars_defined(target, &ctx.bound_vars)?;
                check_vars_defined(value, &ctx.bound_vars)?;
            }
            SetItem::SetLabel { target, .. } => check_vars_defined(target, &ctx.bound_vars)?,
        }
    }
    Ok(LogicalPlan::Set { input: Box::new(plan), items: items.to_vec() })
}

fn plan_remove_clause(items: &[RemoveItem], plan: LogicalPlan, ctx: &PlanContext) -> Result<LogicalPlan> {
    for item in items {
        let target = match item {
            RemoveItem::Property { target, .. } => target,
            RemoveItem::Label { target, .. } => target,
        };
        check_vars_defined(target, &ctx.bound_vars)?;
    }
    Ok(LogicalPlan::Remove { input: Box::new(plan), items: items.to_vec() })
}

fn plan_delete_clause(exprs: &[Expr], detach: bool, plan: LogicalPlan, ctx: &PlanContext) -> Result<LogicalPlan> {
    for e in exprs {
        check_vars_defined(e, &ctx.bound_vars)?;
    }
    Ok(LogicalPlan::Delete { input: Box::new(plan), exprs: exprs.to_vec(), detach })
}

fn plan_unwind(expr: &Expr, var: &str, plan: LogicalPlan, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    check_vars_defined(expr, &ctx.bound_vars)?;
    ctx.bound_vars.insert(var.to_string());
    Ok(LogicalPlan::Unwind { input: Box::new(plan), expr: expr.clone(), var: var.to_string() })
}

fn plan_call_subquery(call: &CallSubquery, plan: LogicalPlan, ctx: &mut PlanContext) -> Result<LogicalPlan> {
    for v in &call.imported_vars {
        if !ctx.bound_vars.contains(v) {
            return Err(Error::SemanticError(format!("UndefinedVariable: CALL {{}} imports '{v}' which is not in scope")));
        }
    }
    let mut sub_ctx = PlanContext::new();
    sub_ctx.bound_vars = call.imported_vars.iter().cloned().collect();
    sub_ctx.var_length_cap = ctx.var_length_cap;
    let subplan = plan_statement(&call.query, &mut sub_ctx)?;

    let returns_cols = statement_return_columns(&call.query);
    let returns = returns_cols.is_some();

    if let Some(cols) = &returns_cols {
        for v in cols {
            if ctx.bound_vars.contains(v) && !call.imported_vars.contains(v) {
                return Err(Error::SemanticError(format!(
                    "ColumnNameConflict: CALL {{}} returns '{v}' which is already bound in the outer scope"
                )));
            }
        }
        ctx.bound_vars.extend(cols.iter().cloned());
    }

    Ok(LogicalPlan::CallSubquery {
        input: Box::new(plan),
        imported_vars: call.imported_vars.clone(),
        subplan: Box::new(subplan),
        returns,
    })
}

fn statement_return_columns(stmt: &Statement) -> Option<Vec<String>> {
    match stmt {
        Statement::Query(q) => q.return_clause.as_ref().map(|rc| {
            rc.items.iter().enumerate().map(|(i, item)| projection_output_name(item, i)).collect()
        }),
        Statement::Union { parts, .. } => parts.first().and_then(|p| {
            p.return_clause
                .as_ref()
                .map(|rc| rc.items.iter().enumerate().map(|(i, item)| projection_output_name(item, i)).collect())
        }),
    }
}

