//! Query execution engine (C6).
//!
//! A Volcano-style tree of pull-based operators mirroring
//! [`crate::planner::LogicalPlan`] one-for-one: `execute_plan` recurses down
//! the plan, each arm pulling its input's full row set and producing its
//! own. Rows materialize eagerly rather than streaming — simpler to reason
//! about correctly, and nothing in this crate's scope needs partial
//! results. Expression evaluation itself lives in [`eval`], which this
//! module drives but never duplicates.

mod eval;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::cypher::ast::{ArrowDirection, Expr, RemoveItem, SetItem};
use crate::model::*;
use crate::planner::{AggregateCall, CreateStep, LogicalPlan};
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// Query execution result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub stats: ExecutionStats,
}

/// A single row in the result set. Preserves column order.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub values: Vec<(String, Value)>,
}

impl ResultRow {
    /// Get a typed value from the row by column name.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let val = self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v).ok_or_else(|| Error::NotFound(format!("Column '{key}'")))?;
        T::from_value(val)
    }

    /// Get a raw Value reference by column name.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Execution statistics, returned alongside every [`QueryResult`] (spec §8.1).
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub execution_time_ms: u64,
}

/// Convert a [`Value`] into a concrete Rust type, for [`ResultRow::get`].
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

impl FromValue for Node {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Node(n) => Ok((**n).clone()),
            _ => Err(Error::TypeError { expected: "NODE".into(), got: val.type_name().into() }),
        }
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(Error::TypeError { expected: "STRING".into(), got: val.type_name().into() }),
        }
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| Error::TypeError { expected: "INTEGER".into(), got: val.type_name().into() })
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_float().ok_or_else(|| Error::TypeError { expected: "FLOAT".into(), got: val.type_name().into() })
    }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Bool(b) => Ok(*b),
            _ => Err(Error::TypeError { expected: "BOOLEAN".into(), got: val.type_name().into() }),
        }
    }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

impl FromValue for Relationship {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Rel(r) => Ok((**r).clone()),
            _ => Err(Error::TypeError { expected: "RELATIONSHIP".into(), got: val.type_name().into() }),
        }
    }
}

impl FromValue for Path {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Path(p) => Ok((**p).clone()),
            _ => Err(Error::TypeError { expected: "PATH".into(), got: val.type_name().into() }),
        }
    }
}

impl FromValue for Vec<Value> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::List(l) => Ok(l.clone()),
            _ => Err(Error::TypeError { expected: "LIST".into(), got: val.type_name().into() }),
        }
    }
}

impl FromValue for HashMap<String, Value> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Map(m) => Ok(m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            _ => Err(Error::TypeError { expected: "MAP".into(), got: val.type_name().into() }),
        }
    }
}

/// A shared flag an embedder can use to ask a running query to abort (spec
/// §5). Cheap to clone; `cancel()` is typically called from another thread
/// or task than the one driving the query.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation. Takes effect the next time the executor
    /// checks (between operator pulls, or every 4096th row of a scan).
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

/// How often (in scanned rows) a long-running scan re-checks the
/// cancellation flag, per spec §5's "recommended N=4096".
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Execute a logical plan against a storage backend, starting from an
/// empty seed row.
///
/// Takes `&mut B::Tx` because write operators (`Create`/`Set`/`Delete`/...)
/// need mutable transaction access; read-only plans simply never call
/// through to a mutating backend method.
pub async fn execute<B: StorageBackend>(backend: &B, tx: &mut B::Tx, plan: &LogicalPlan, params: &PropertyMap) -> Result<QueryResult> {
    execute_cancellable(backend, tx, plan, params, &CancellationToken::new()).await
}

/// Same as [`execute`], but checks `token` between operator pulls and every
/// `CANCEL_CHECK_INTERVAL`-th row of a scan, aborting with
/// `Error::RuntimeError` the moment it observes cancellation (spec §5).
pub async fn execute_cancellable<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    plan: &LogicalPlan,
    params: &PropertyMap,
    token: &CancellationToken,
) -> Result<QueryResult> {
    let mut ctx = ExecContext::new(params.clone(), token.clone());
    let rows = execute_plan(backend, tx, plan, &mut ctx).await?;
    let columns = ctx.columns.clone();
    let result_rows: Vec<ResultRow> = rows
        .into_iter()
        .map(|row| {
            let values: Vec<(String, Value)> = columns.iter().map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null))).collect();
            ResultRow { values }
        })
        .collect();
    Ok(QueryResult { columns, rows: result_rows, stats: ctx.stats })
}

// ============================================================================
// Execution context
// ============================================================================

/// A single row of bindings flowing through the operator tree: variable
/// name -> value, insertion-ordered (spec §3.3) via `IndexMap` — the same
/// container `Value::Map`/`PropertyMap` use, for the same reason.
pub(crate) type Row = indexmap::IndexMap<String, Value>;

/// Threaded through every `execute_plan` call.
pub(crate) struct ExecContext {
    pub(crate) params: PropertyMap,
    /// The current output column order, set by the last `Project`/
    /// `Aggregate`/`Union`/`Eof` operator to run.
    columns: Vec<String>,
    stats: ExecutionStats,
    /// The row a correlated subquery (`EXISTS{}`/`COUNT{}`, `CALL{}`,
    /// `MERGE`'s match branch, general `OPTIONAL MATCH`) is seeded from.
    /// Swapped in and restored around the nested `execute_plan` call;
    /// `Argument` reads it instead of always starting from an empty row.
    pub(crate) seed: Row,
    cancel: CancellationToken,
    rows_seen: u64,
}

impl ExecContext {
    fn new(params: PropertyMap, cancel: CancellationToken) -> Self {
        Self { params, columns: Vec::new(), stats: ExecutionStats::default(), seed: Row::new(), cancel, rows_seen: 0 }
    }

    /// Checked once per operator pull (spec §5: "between operator pulls").
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::RuntimeError("query cancelled".into()))
        } else {
            Ok(())
        }
    }

    /// Checked once per row inside a long-running scan; only re-reads the
    /// flag every `CANCEL_CHECK_INTERVAL`th call so cancellation checking
    /// itself stays cheap (spec §5: "every N-th row, recommended N=4096").
    fn tick_row(&mut self) -> Result<()> {
        self.rows_seen += 1;
        if self.rows_seen % CANCEL_CHECK_INTERVAL == 0 {
            self.check_cancelled()?;
        }
        Ok(())
    }
}

// ============================================================================
// The operator tree
// ============================================================================

pub(crate) fn execute_plan<'a, B: StorageBackend>(
    backend: &'a B,
    tx: &'a mut B::Tx,
    plan: &'a LogicalPlan,
    ctx: &'a mut ExecContext,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Row>>> + Send + 'a>> {
    Box::pin(async move {
        ctx.check_cancelled()?;
        match plan {
            LogicalPlan::Argument => Ok(vec![ctx.seed.clone()]),

            LogicalPlan::ScanAllNodes { var } => {
                let nodes = backend.scan_all_nodes(tx).await?;
                let mut out = Vec::with_capacity(nodes.len());
                for n in nodes {
                    ctx.tick_row()?;
                    out.push(single_binding(var, Value::Node(Box::new(n))));
                }
                Ok(out)
            }

            LogicalPlan::ScanNodesByLabel { var, label } => {
                let nodes = backend.scan_nodes_with_label(tx, label).await?;
                let mut out = Vec::with_capacity(nodes.len());
                for n in nodes {
                    ctx.tick_row()?;
                    out.push(single_binding(var, Value::Node(Box::new(n))));
                }
                Ok(out)
            }

            LogicalPlan::Expand { input, from, rel_var, to_var, to_is_bound, direction, types, predicate } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::new();
                for row in &rows_in {
                    let Some(Value::Node(from_node)) = row.get(from) else { continue };
                    let from_id = from_node.id;
                    let used = row_used_rel_ids(row);
                    for (rel_id, neighbour_id, _dir) in fetch_edges(backend, tx, from_id, *direction, types).await? {
                        if used.contains(&rel_id) {
                            continue;
                        }
                        if *to_is_bound {
                            match row.get(to_var) {
                                Some(Value::Node(n)) if n.id == neighbour_id => {}
                                _ => continue,
                            }
                        }
                        let Some(rel) = backend.get_rel(tx, rel_id).await? else { continue };
                        let mut new_row = row.clone();
                        new_row.insert(rel_var.clone(), Value::Rel(Box::new(rel)));
                        if !*to_is_bound {
                            let Some(neighbour) = backend.get_node(tx, neighbour_id).await? else { continue };
                            new_row.insert(to_var.clone(), Value::Node(Box::new(neighbour)));
                        }
                        if !passes_predicate(predicate, &new_row, backend, tx, ctx).await? {
                            continue;
                        }
                        out.push(new_row);
                    }
                }
                Ok(out)
            }

            LogicalPlan::VarExpand { input, from, to_var, to_is_bound, direction, types, min, max, uncapped, predicate, path_var, rels_var, rel_binding } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::new();
                for row in &rows_in {
                    let Some(Value::Node(from_node_box)) = row.get(from) else { continue };
                    let from_node = (**from_node_box).clone();
                    let base_used = row_used_rel_ids(row);

                    let mut frontier = vec![VarExpandState { node_id: from_node.id, hops: Vec::new(), used: base_used.clone() }];
                    let mut results: Vec<VarExpandState> = Vec::new();
                    if *min == 0 {
                        results.push(VarExpandState { node_id: from_node.id, hops: Vec::new(), used: base_used });
                    }

                    for depth in 1..=*max {
                        let mut next_frontier = Vec::new();
                        for state in &frontier {
                            ctx.tick_row()?;
                            for (rel_id, neighbour_id, dir) in fetch_edges(backend, tx, state.node_id, *direction, types).await? {
                                if state.used.contains(&rel_id) {
                                    continue;
                                }
                                let Some(rel) = backend.get_rel(tx, rel_id).await? else { continue };
                                let Some(neighbour) = backend.get_node(tx, neighbour_id).await? else { continue };

                                if let Some(pred) = predicate {
                                    let mut temp_row = (*row).clone();
                                    temp_row.insert(rel_binding.clone(), Value::Rel(Box::new(rel.clone())));
                                    let keep = eval::eval_expr(pred, &temp_row, backend, tx, ctx).await?;
                                    if !keep.is_truthy() {
                                        continue;
                                    }
                                }

                                let mut used = state.used.clone();
                                used.insert(rel_id);
                                let mut hops = state.hops.clone();
                                hops.push(Hop { rel, node: neighbour.clone(), dir });
                                next_frontier.push(VarExpandState { node_id: neighbour.id, hops, used });
                            }
                        }
                        if *uncapped && depth == *max && !next_frontier.is_empty() {
                            return Err(Error::RuntimeError(
                                "UnboundedTraversal: variable-length relationship pattern exceeded the configured safety cap".into(),
                            ));
                        }
                        if depth >= *min {
                            results.extend(next_frontier.iter().cloned());
                        }
                        if next_frontier.is_empty() {
                            break;
                        }
                        frontier = next_frontier;
                    }

                    for state in results {
                        if *to_is_bound {
                            match row.get(to_var) {
                                Some(Value::Node(n)) if n.id == state.node_id => {}
                                _ => continue,
                            }
                        }
                        let mut new_row = (*row).clone();
                        if !*to_is_bound {
                            let end_node = state.hops.last().map(|h| h.node.clone()).unwrap_or_else(|| from_node.clone());
                            new_row.insert(to_var.clone(), Value::Node(Box::new(end_node)));
                        }
                        if let Some(rv) = rels_var {
                            let list = state.hops.iter().map(|h| Value::Rel(Box::new(h.rel.clone()))).collect();
                            new_row.insert(rv.clone(), Value::List(list));
                        }
                        if let Some(pv) = path_var {
                            let mut path = Path::single(from_node.clone());
                            for h in &state.hops {
                                path.append(h.rel.clone(), h.dir, h.node.clone());
                            }
                            new_row.insert(pv.clone(), Value::Path(Box::new(path)));
                        }
                        out.push(new_row);
                    }
                }
                Ok(out)
            }

            LogicalPlan::OptionalExpand { input, from, rel_var, to_var, direction, types, predicate } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::new();
                for row in &rows_in {
                    let mut matched = false;
                    if let Some(Value::Node(from_node)) = row.get(from) {
                        let from_id = from_node.id;
                        let used = row_used_rel_ids(row);
                        for (rel_id, neighbour_id, _dir) in fetch_edges(backend, tx, from_id, *direction, types).await? {
                            if used.contains(&rel_id) {
                                continue;
                            }
                            let Some(rel) = backend.get_rel(tx, rel_id).await? else { continue };
                            let Some(neighbour) = backend.get_node(tx, neighbour_id).await? else { continue };
                            let mut new_row = row.clone();
                            new_row.insert(rel_var.clone(), Value::Rel(Box::new(rel)));
                            new_row.insert(to_var.clone(), Value::Node(Box::new(neighbour)));
                            if !passes_predicate(predicate, &new_row, backend, tx, ctx).await? {
                                continue;
                            }
                            matched = true;
                            out.push(new_row);
                        }
                    }
                    if !matched {
                        let mut new_row = row.clone();
                        new_row.insert(rel_var.clone(), Value::Null);
                        new_row.insert(to_var.clone(), Value::Null);
                        out.push(new_row);
                    }
                }
                Ok(out)
            }

            LogicalPlan::OptionalMatch { input, subplan, new_vars } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::new();
                for row in rows_in {
                    let prev_seed = std::mem::replace(&mut ctx.seed, row.clone());
                    let sub_rows = execute_plan(backend, tx, subplan, ctx).await;
                    ctx.seed = prev_seed;
                    let sub_rows = sub_rows?;
                    if sub_rows.is_empty() {
                        let mut new_row = row;
                        for v in new_vars {
                            new_row.insert(v.clone(), Value::Null);
                        }
                        out.push(new_row);
                    } else {
                        out.extend(sub_rows);
                    }
                }
                Ok(out)
            }

            LogicalPlan::BuildPath { input, path_var, node_vars, rel_vars } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::with_capacity(rows_in.len());
                for mut row in rows_in {
                    let path = build_path_value(&row, node_vars, rel_vars)?;
                    row.insert(path_var.clone(), path);
                    out.push(row);
                }
                Ok(out)
            }

            LogicalPlan::CartesianProduct { left, right } => {
                let left_rows = execute_plan(backend, tx, left, ctx).await?;
                let right_rows = execute_plan(backend, tx, right, ctx).await?;
                let mut out = Vec::with_capacity(left_rows.len() * right_rows.len());
                for l in &left_rows {
                    for r in &right_rows {
                        let mut row = l.clone();
                        for (k, v) in r {
                            row.insert(k.clone(), v.clone());
                        }
                        out.push(row);
                    }
                }
                Ok(out)
            }

            LogicalPlan::Filter { input, predicate } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::with_capacity(rows_in.len());
                for row in rows_in {
                    let keep = eval::eval_expr(predicate, &row, backend, tx, ctx).await?;
                    if keep.is_truthy() {
                        out.push(row);
                    }
                }
                Ok(out)
            }

            LogicalPlan::Project { input, items, distinct } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                ctx.columns = items.iter().map(|(n, _)| n.clone()).collect();
                let mut out = Vec::with_capacity(rows_in.len());
                for row in &rows_in {
                    let mut new_row = Row::new();
                    for (name, expr) in items {
                        let v = eval::eval_expr(expr, row, backend, tx, ctx).await?;
                        new_row.insert(name.clone(), v);
                    }
                    out.push(new_row);
                }
                if *distinct {
                    out = dedup_rows(out, &ctx.columns);
                }
                Ok(out)
            }

            LogicalPlan::Aggregate { input, keys, aggregates } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                ctx.columns = keys.iter().map(|(n, _)| n.clone()).chain(aggregates.iter().map(|(n, _)| n.clone())).collect();
                exec_aggregate(backend, tx, rows_in, keys, aggregates, ctx).await
            }

            LogicalPlan::Sort { input, items } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut keyed = Vec::with_capacity(rows_in.len());
                for row in rows_in {
                    let mut keys = Vec::with_capacity(items.len());
                    for (expr, _) in items {
                        keys.push(eval::eval_expr(expr, &row, backend, tx, ctx).await?);
                    }
                    keyed.push((keys, row));
                }
                let descending: Vec<bool> = items.iter().map(|(_, d)| *d).collect();
                keyed.sort_by(|a, b| eval::sort_key_cmp(&a.0, &b.0, &descending));
                Ok(keyed.into_iter().map(|(_, row)| row).collect())
            }

            LogicalPlan::Skip { input, expr } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let n = eval_count_expr(expr, backend, tx, ctx).await?;
                Ok(rows_in.into_iter().skip(n).collect())
            }

            LogicalPlan::Limit { input, expr } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let n = eval_count_expr(expr, backend, tx, ctx).await?;
                Ok(rows_in.into_iter().take(n).collect())
            }

            LogicalPlan::Unwind { input, expr, var } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::new();
                for row in rows_in {
                    let val = eval::eval_expr(expr, &row, backend, tx, ctx).await?;
                    match val {
                        Value::Null => {}
                        Value::List(items) => {
                            for item in items {
                                let mut new_row = row.clone();
                                new_row.insert(var.clone(), item);
                                out.push(new_row);
                            }
                        }
                        other => {
                            let mut new_row = row.clone();
                            new_row.insert(var.clone(), other);
                            out.push(new_row);
                        }
                    }
                }
                Ok(out)
            }

            LogicalPlan::Create { input, steps } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::with_capacity(rows_in.len());
                for row in &rows_in {
                    out.push(exec_create_steps(steps, row, backend, tx, ctx).await?);
                }
                Ok(out)
            }

            LogicalPlan::Merge { input, match_plan, steps, on_create, on_match } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::with_capacity(rows_in.len());
                for row in rows_in {
                    let prev_seed = std::mem::replace(&mut ctx.seed, row.clone());
                    let match_rows = execute_plan(backend, tx, match_plan, ctx).await;
                    ctx.seed = prev_seed;
                    let match_rows = match_rows?;
                    if !match_rows.is_empty() {
                        for mrow in match_rows {
                            out.push(apply_set_items(on_match, mrow, backend, tx, ctx).await?);
                        }
                    } else {
                        let created = exec_create_steps(steps, &row, backend, tx, ctx).await?;
                        out.push(apply_set_items(on_create, created, backend, tx, ctx).await?);
                    }
                }
                Ok(out)
            }

            LogicalPlan::Set { input, items } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::with_capacity(rows_in.len());
                for row in rows_in {
                    out.push(apply_set_items(items, row, backend, tx, ctx).await?);
                }
                Ok(out)
            }

            LogicalPlan::Remove { input, items } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::with_capacity(rows_in.len());
                for row in rows_in {
                    out.push(apply_remove_items(items, row, backend, tx, ctx).await?);
                }
                Ok(out)
            }

            LogicalPlan::Delete { input, exprs, detach } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                for row in &rows_in {
                    for e in exprs {
                        let val = eval::eval_expr(e, row, backend, tx, ctx).await?;
                        match val {
                            Value::Null => {}
                            Value::Node(n) => {
                                if *detach {
                                    let removed = backend.detach_delete_node(tx, n.id).await?;
                                    ctx.stats.nodes_deleted += 1;
                                    ctx.stats.relationships_deleted += removed.len() as u64;
                                } else {
                                    backend.delete_node(tx, n.id).await?;
                                    ctx.stats.nodes_deleted += 1;
                                }
                            }
                            Value::Rel(r) => {
                                backend.delete_rel(tx, r.id).await?;
                                ctx.stats.relationships_deleted += 1;
                            }
                            other => return Err(Error::TypeError { expected: "NODE or RELATIONSHIP".into(), got: other.type_name().into() }),
                        }
                    }
                }
                Ok(rows_in)
            }

            LogicalPlan::Union { inputs, distinct, columns } => {
                let mut all_rows = Vec::new();
                for sub in inputs {
                    let rows = execute_plan(backend, tx, sub, ctx).await?;
                    let branch_cols = ctx.columns.clone();
                    for row in rows {
                        let mut new_row = Row::new();
                        for (i, col_name) in columns.iter().enumerate() {
                            let branch_col = branch_cols.get(i).cloned().unwrap_or_else(|| col_name.clone());
                            let v = row.get(&branch_col).cloned().unwrap_or(Value::Null);
                            new_row.insert(col_name.clone(), v);
                        }
                        all_rows.push(new_row);
                    }
                }
                ctx.columns = columns.clone();
                if *distinct {
                    all_rows = dedup_rows(all_rows, columns);
                }
                Ok(all_rows)
            }

            LogicalPlan::CallSubquery { input, imported_vars: _, subplan, returns } => {
                let rows_in = execute_plan(backend, tx, input, ctx).await?;
                let mut out = Vec::with_capacity(rows_in.len());
                for row in rows_in {
                    let prev_seed = std::mem::replace(&mut ctx.seed, row.clone());
                    let sub_rows = execute_plan(backend, tx, subplan, ctx).await;
                    ctx.seed = prev_seed;
                    let sub_rows = sub_rows?;
                    if *returns {
                        for sub_row in sub_rows {
                            let mut combined = row.clone();
                            for (k, v) in sub_row {
                                combined.insert(k, v);
                            }
                            out.push(combined);
                        }
                    } else {
                        out.push(row);
                    }
                }
                Ok(out)
            }

            LogicalPlan::Eof { input } => {
                execute_plan(backend, tx, input, ctx).await?;
                ctx.columns = Vec::new();
                Ok(Vec::new())
            }
        }
    })
}

fn single_binding(var: &str, val: Value) -> Row {
    let mut row = Row::new();
    row.insert(var.to_string(), val);
    row
}

async fn passes_predicate<B: StorageBackend>(predicate: &Option<Expr>, row: &Row, backend: &B, tx: &mut B::Tx, ctx: &mut ExecContext) -> Result<bool> {
    match predicate {
        Some(pred) => Ok(eval::eval_expr(pred, row, backend, tx, ctx).await?.is_truthy()),
        None => Ok(true),
    }
}

async fn eval_count_expr<B: StorageBackend>(expr: &Expr, backend: &B, tx: &mut B::Tx, ctx: &mut ExecContext) -> Result<usize> {
    let empty = Row::new();
    let v = eval::eval_expr(expr, &empty, backend, tx, ctx).await?;
    let n = v.as_int().ok_or_else(|| Error::TypeError { expected: "INTEGER".into(), got: v.type_name().into() })?;
    Ok(n.max(0) as usize)
}

// ============================================================================
// Relationship-uniqueness and adjacency
// ============================================================================

/// Relationship ids already consumed earlier in this row's path, so a
/// later `Expand`/`VarExpand`/`OptionalExpand` can't re-traverse them
/// (spec §4.6: a single matched path never reuses the same relationship).
fn row_used_rel_ids(row: &Row) -> HashSet<RelId> {
    let mut out = HashSet::new();
    for v in row.values() {
        collect_rel_ids(v, &mut out);
    }
    out
}

fn collect_rel_ids(v: &Value, out: &mut HashSet<RelId>) {
    match v {
        Value::Rel(r) => {
            out.insert(r.id);
        }
        Value::List(items) => {
            for it in items {
                collect_rel_ids(it, out);
            }
        }
        Value::Path(p) => {
            for id in p.relationship_ids() {
                out.insert(id);
            }
        }
        _ => {}
    }
}

async fn fetch_edges<B: StorageBackend>(
    backend: &B,
    tx: &B::Tx,
    node: NodeId,
    direction: ArrowDirection,
    types: &[String],
) -> Result<Vec<(RelId, NodeId, Direction)>> {
    match direction {
        ArrowDirection::Outgoing => {
            Ok(backend.out_edges(tx, node, types).await?.into_iter().map(|(r, n)| (r, n, Direction::Outgoing)).collect())
        }
        ArrowDirection::Incoming => {
            Ok(backend.in_edges(tx, node, types).await?.into_iter().map(|(r, n)| (r, n, Direction::Incoming)).collect())
        }
        ArrowDirection::Either => backend.both_edges(tx, node, types).await,
    }
}

#[derive(Clone)]
struct Hop {
    rel: Relationship,
    node: Node,
    dir: Direction,
}

#[derive(Clone)]
struct VarExpandState {
    node_id: NodeId,
    hops: Vec<Hop>,
    used: HashSet<RelId>,
}

fn build_path_value(row: &Row, node_vars: &[String], rel_vars: &[(String, ArrowDirection)]) -> Result<Value> {
    let first_node = match node_vars.first().and_then(|n| row.get(n)) {
        Some(Value::Node(n)) => (**n).clone(),
        _ => return Err(Error::RuntimeError("path references an unbound node".into())),
    };
    let mut path = Path::single(first_node);
    let mut prev_id = path.start().id;
    for (i, (rel_name, _)) in rel_vars.iter().enumerate() {
        let rel = match row.get(rel_name) {
            Some(Value::Rel(r)) => (**r).clone(),
            _ => return Err(Error::RuntimeError(format!("path references unbound relationship '{rel_name}'"))),
        };
        let node_name = node_vars.get(i + 1).ok_or_else(|| Error::RuntimeError("internal error: path node/relationship count mismatch".into()))?;
        let node = match row.get(node_name) {
            Some(Value::Node(n)) => (**n).clone(),
            _ => return Err(Error::RuntimeError(format!("path references unbound node '{node_name}'"))),
        };
        let actual_dir = if rel.src == prev_id { Direction::Outgoing } else { Direction::Incoming };
        path.append(rel, actual_dir, node);
        prev_id = path.end().id;
    }
    Ok(Value::Path(Box::new(path)))
}

// ============================================================================
// Writes: CREATE / MERGE / SET / REMOVE
// ============================================================================

async fn exec_create_steps<B: StorageBackend>(
    steps: &[CreateStep],
    row: &Row,
    backend: &B,
    tx: &mut B::Tx,
    ctx: &mut ExecContext,
) -> Result<Row> {
    let mut row = row.clone();
    for step in steps {
        match step {
            CreateStep::Node(spec) => {
                if spec.already_bound {
                    continue;
                }
                let mut props = PropertyMap::new();
                for (k, e) in &spec.properties {
                    let v = eval::eval_expr(e, &row, backend, tx, ctx).await?;
                    if !v.is_null() {
                        props.insert(k.clone(), v);
                    }
                }
                let id = backend.create_node(tx, spec.labels.clone(), props).await?;
                ctx.stats.nodes_created += 1;
                ctx.stats.labels_added += spec.labels.len() as u64;
                let node = backend.get_node(tx, id).await?.ok_or_else(|| Error::RuntimeError("node vanished immediately after creation".into()))?;
                row.insert(spec.var.clone(), Value::Node(Box::new(node)));
            }
            CreateStep::Rel(spec) => {
                let from_val = row.get(&spec.from).cloned().unwrap_or(Value::Null);
                let to_val = row.get(&spec.to).cloned().unwrap_or(Value::Null);
                let (Value::Node(from_node), Value::Node(to_node)) = (&from_val, &to_val) else {
                    // An endpoint resolved to Null (e.g. via a failed OPTIONAL
                    // MATCH) — skip creating this relationship for this row,
                    // no error (spec §4.8).
                    continue;
                };
                let mut props = PropertyMap::new();
                for (k, e) in &spec.properties {
                    let v = eval::eval_expr(e, &row, backend, tx, ctx).await?;
                    if !v.is_null() {
                        props.insert(k.clone(), v);
                    }
                }
                let id = backend.create_rel(tx, &spec.rel_type, from_node.id, to_node.id, props).await?;
                ctx.stats.relationships_created += 1;
                let rel = backend.get_rel(tx, id).await?.ok_or_else(|| Error::RuntimeError("relationship vanished immediately after creation".into()))?;
                row.insert(spec.var.clone(), Value::Rel(Box::new(rel)));
            }
        }
    }
    Ok(row)
}

fn set_target_var(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Variable(name) => Some(name),
        _ => None,
    }
}

async fn refresh_node_binding<B: StorageBackend>(row: &mut Row, target: &Expr, backend: &B, tx: &B::Tx) -> Result<()> {
    if let Some(name) = set_target_var(target) {
        if let Some(Value::Node(n)) = row.get(name) {
            if let Some(fresh) = backend.get_node(tx, n.id).await? {
                row.insert(name.to_string(), Value::Node(Box::new(fresh)));
            }
        }
    }
    Ok(())
}

async fn refresh_rel_binding<B: StorageBackend>(row: &mut Row, target: &Expr, backend: &B, tx: &B::Tx) -> Result<()> {
    if let Some(name) = set_target_var(target) {
        if let Some(Value::Rel(r)) = row.get(name) {
            if let Some(fresh) = backend.get_rel(tx, r.id).await? {
                row.insert(name.to_string(), Value::Rel(Box::new(fresh)));
            }
        }
    }
    Ok(())
}

async fn apply_set_items<B: StorageBackend>(items: &[SetItem], mut row: Row, backend: &B, tx: &mut B::Tx, ctx: &mut ExecContext) -> Result<Row> {
    for item in items {
        match item {
            SetItem::Property { target, key, value } => {
                let target_val = eval::eval_expr(target, &row, backend, tx, ctx).await?;
                let val = eval::eval_expr(value, &row, backend, tx, ctx).await?;
                match &target_val {
                    Value::Node(n) => {
                        if val.is_null() {
                            backend.remove_node_prop(tx, n.id, key).await?;
                        } else {
                            backend.set_node_prop(tx, n.id, key, val).await?;
                        }
                        ctx.stats.properties_set += 1;
                        refresh_node_binding(&mut row, target, backend, tx).await?;
                    }
                    Value::Rel(r) => {
                        if val.is_null() {
                            backend.remove_rel_prop(tx, r.id, key).await?;
                        } else {
                            backend.set_rel_prop(tx, r.id, key, val).await?;
                        }
                        ctx.stats.properties_set += 1;
                        refresh_rel_binding(&mut row, target, backend, tx).await?;
                    }
                    Value::Null => {}
                    other => return Err(Error::TypeError { expected: "NODE or RELATIONSHIP".into(), got: other.type_name().into() }),
                }
            }
            SetItem::AddProperties { target, value } => {
                let target_val = eval::eval_expr(target, &row, backend, tx, ctx).await?;
                let val = eval::eval_expr(value, &row, backend, tx, ctx).await?;
                let Value::Map(map) = val else {
                    return Err(Error::TypeError { expected: "MAP".into(), got: "non-map value".into() });
                };
                match &target_val {
                    Value::Node(n) => {
                        for (k, v) in &map {
                            if v.is_null() {
                                backend.remove_node_prop(tx, n.id, k).await?;
                            } else {
                                backend.set_node_prop(tx, n.id, k, v.clone()).await?;
                            }
                            ctx.stats.properties_set += 1;
                        }
                        refresh_node_binding(&mut row, target, backend, tx).await?;
                    }
                    Value::Rel(r) => {
                        for (k, v) in &map {
                            if v.is_null() {
                                backend.remove_rel_prop(tx, r.id, k).await?;
                            } else {
                                backend.set_rel_prop(tx, r.id, k, v.clone()).await?;
                            }
                            ctx.stats.properties_set += 1;
                        }
                        refresh_rel_binding(&mut row, target, backend, tx).await?;
                    }
                    _ => {}
                }
            }
            SetItem::ReplaceProperties { target, value } => {
                let target_val = eval::eval_expr(target, &row, backend, tx, ctx).await?;
                let val = eval::eval_expr(value, &row, backend, tx, ctx).await?;
                let Value::Map(map) = val else {
                    return Err(Error::TypeError { expected: "MAP".into(), got: "non-map value".into() });
                };
                match &target_val {
                    Value::Node(n) => {
                        let existing: Vec<String> = n.properties.keys().cloned().collect();
                        for k in existing {
                            if !map.contains_key(&k) {
                                backend.remove_node_prop(tx, n.id, &k).await?;
                            }
                        }
                        for (k, v) in &map {
                            if !v.is_null() {
                                backend.set_node_prop(tx, n.id, k, v.clone()).await?;
                            }
                        }
                        ctx.stats.properties_set += 1;
                        refresh_node_binding(&mut row, target, backend, tx).await?;
                    }
                    Value::Rel(r) => {
                        let existing: Vec<String> = r.properties.keys().cloned().collect();
                        for k in existing {
                            if !map.contains_key(&k) {
                                backend.remove_rel_prop(tx, r.id, &k).await?;
                            }
                        }
                        for (k, v) in &map {
                            if !v.is_null() {
                                backend.set_rel_prop(tx, r.id, k, v.clone()).await?;
                            }
                        }
                        ctx.stats.properties_set += 1;
                        refresh_rel_binding(&mut row, target, backend, tx).await?;
                    }
                    _ => {}
                }
            }
            SetItem::SetLabel { target, labels } => {
                let target_val = eval::eval_expr(target, &row, backend, tx, ctx).await?;
                if let Value::Node(n) = &target_val {
                    for label in labels {
                        backend.add_label(tx, n.id, label).await?;
                        ctx.stats.labels_added += 1;
                    }
                    refresh_node_binding(&mut row, target, backend, tx).await?;
                }
            }
        }
    }
    Ok(row)
}

async fn apply_remove_items<B: StorageBackend>(items: &[RemoveItem], mut row: Row, backend: &B, tx: &mut B::Tx, ctx: &mut ExecContext) -> Result<Row> {
    for item in items {
        match item {
            RemoveItem::Property { target, key } => {
                let target_val = eval::eval_expr(target, &row, backend, tx, ctx).await?;
                match &target_val {
                    Value::Node(n) => {
                        backend.remove_node_prop(tx, n.id, key).await?;
                        ctx.stats.properties_set += 1;
                        refresh_node_binding(&mut row, target, backend, tx).await?;
                    }
                    Value::Rel(r) => {
                        backend.remove_rel_prop(tx, r.id, key).await?;
                        ctx.stats.properties_set += 1;
                        refresh_rel_binding(&mut row, target, backend, tx).await?;
                    }
                    _ => {}
                }
            }
            RemoveItem::Label { target, labels } => {
                let target_val = eval::eval_expr(target, &row, backend, tx, ctx).await?;
                if let Value::Node(n) = &target_val {
                    for label in labels {
                        backend.remove_label(tx, n.id, label).await?;
                        ctx.stats.labels_removed += 1;
                    }
                    refresh_node_binding(&mut row, target, backend, tx).await?;
                }
            }
        }
    }
    Ok(row)
}

// ============================================================================
// Grouping / distinctness
// ============================================================================

/// Key equality for `GROUP BY`/`DISTINCT` purposes: unlike [`Value::eq3`]
/// (three-valued, so `Null = Null` is unknown), two `Null`s must group
/// together here. Graph elements compare by id, matching `collect(DISTINCT
/// n)` deduplicating by node/relationship identity rather than by property
/// snapshot (spec §4.5/§6.2).
fn value_key_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Node(x), Value::Node(y)) => x.id == y.id,
        (Value::Rel(x), Value::Rel(y)) => x.id == y.id,
        (Value::List(x), Value::List(y)) => x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| value_key_eq(p, q)),
        (Value::Map(x), Value::Map(y)) => x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| value_key_eq(v, w))),
        _ => a == b,
    }
}

fn row_key_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| value_key_eq(x, y))
}

fn dedup_values(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for v in values {
        if !out.iter().any(|existing| value_key_eq(existing, &v)) {
            out.push(v);
        }
    }
    out
}

fn dedup_rows(rows: Vec<Row>, columns: &[String]) -> Vec<Row> {
    let tuple_of = |row: &Row| -> Vec<Value> { columns.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect() };
    let mut out: Vec<Row> = Vec::new();
    let mut seen: Vec<Vec<Value>> = Vec::new();
    for row in rows {
        let tuple = tuple_of(&row);
        if !seen.iter().any(|existing| row_key_eq(existing, &tuple)) {
            seen.push(tuple);
            out.push(row);
        }
    }
    out
}

// ============================================================================
// Aggregation
// ============================================================================

async fn exec_aggregate<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    rows_in: Vec<Row>,
    keys: &[(String, Expr)],
    aggregates: &[(String, AggregateCall)],
    ctx: &mut ExecContext,
) -> Result<Vec<Row>> {
    struct Group {
        key: Vec<Value>,
        rows: Vec<Row>,
    }

    let mut groups: Vec<Group> = Vec::new();
    for row in rows_in {
        let mut key_vals = Vec::with_capacity(keys.len());
        for (_, expr) in keys {
            key_vals.push(eval::eval_expr(expr, &row, backend, tx, ctx).await?);
        }
        match groups.iter_mut().find(|g| row_key_eq(&g.key, &key_vals)) {
            Some(g) => g.rows.push(row),
            None => groups.push(Group { key: key_vals, rows: vec![row] }),
        }
    }
    // `RETURN count(*)` (no grouping keys) over zero input rows still
    // yields one row — the empty set has a count, it just needs that one
    // implicit group to carry it.
    if groups.is_empty() && keys.is_empty() {
        groups.push(Group { key: Vec::new(), rows: Vec::new() });
    }

    let mut out = Vec::with_capacity(groups.len());
    for g in groups {
        let mut row = Row::new();
        for ((name, _), val) in keys.iter().zip(g.key.iter()) {
            row.insert(name.clone(), val.clone());
        }
        for (name, call) in aggregates {
            let val = compute_aggregate(call, &g.rows, backend, tx, ctx).await?;
            row.insert(name.clone(), val);
        }
        out.push(row);
    }
    Ok(out)
}

fn arith_err(e: value::ArithmeticTypeError) -> Error {
    Error::TypeError { expected: format!("numeric or compatible operands for '{}'", e.op), got: format!("{} and {}", e.lhs, e.rhs) }
}

async fn compute_aggregate<B: StorageBackend>(call: &AggregateCall, rows: &[Row], backend: &B, tx: &mut B::Tx, ctx: &mut ExecContext) -> Result<Value> {
    let fname = call.name.to_lowercase();
    if fname == "count" && call.arg.is_none() {
        return Ok(Value::Int(rows.len() as i64));
    }
    let arg_expr = call.arg.as_ref().ok_or_else(|| Error::RuntimeError(format!("{}() requires an argument", call.name)))?;

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        values.push(eval::eval_expr(arg_expr, row, backend, tx, ctx).await?);
    }
    let non_null: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    let values = if call.distinct { dedup_values(non_null) } else { non_null };

    match fname.as_str() {
        "count" => Ok(Value::Int(values.len() as i64)),
        "sum" => {
            let mut acc = Value::Int(0);
            for v in &values {
                acc = value::add(&acc, v).map_err(arith_err)?;
            }
            Ok(acc)
        }
        "avg" => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = Value::Int(0);
            for v in &values {
                sum = value::add(&sum, v).map_err(arith_err)?;
            }
            value::div(&sum, &Value::Int(values.len() as i64)).map_err(arith_err)
        }
        "min" => Ok(values.iter().cloned().min_by(|a, b| a.cypher_cmp(b).unwrap_or(Ordering::Equal)).unwrap_or(Value::Null)),
        "max" => Ok(values.iter().cloned().max_by(|a, b| a.cypher_cmp(b).unwrap_or(Ordering::Equal)).unwrap_or(Value::Null)),
        "collect" => Ok(Value::List(values)),
        "percentilecont" => percentile_cont(&values, call, rows.first(), backend, tx, ctx).await,
        "percentiledisc" => percentile_disc(&values, call, rows.first(), backend, tx, ctx).await,
        "stdev" => Ok(Value::Float(stdev(&values, false))),
        "stdevp" => Ok(Value::Float(stdev(&values, true))),
        other => Err(Error::RuntimeError(format!("unknown aggregate function '{other}'"))),
    }
}

async fn eval_fraction<B: StorageBackend>(call: &AggregateCall, sample_row: Option<&Row>, backend: &B, tx: &mut B::Tx, ctx: &mut ExecContext) -> Result<f64> {
    let expr = call.extra_args.first().ok_or_else(|| Error::RuntimeError(format!("{}() requires a percentile argument", call.name)))?;
    let empty = Row::new();
    let row = sample_row.unwrap_or(&empty);
    let v = eval::eval_expr(expr, row, backend, tx, ctx).await?;
    v.as_float().ok_or_else(|| Error::TypeError { expected: "FLOAT".into(), got: v.type_name().into() })
}

fn numeric_values(values: &[Value]) -> Result<Vec<f64>> {
    values.iter().map(|v| v.as_float().ok_or_else(|| Error::TypeError { expected: "numeric".into(), got: v.type_name().into() })).collect()
}

async fn percentile_cont<B: StorageBackend>(
    values: &[Value],
    call: &AggregateCall,
    sample_row: Option<&Row>,
    backend: &B,
    tx: &mut B::Tx,
    ctx: &mut ExecContext,
) -> Result<Value> {
    let mut nums = numeric_values(values)?;
    if nums.is_empty() {
        return Ok(Value::Null);
    }
    nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let frac = eval_fraction(call, sample_row, backend, tx, ctx).await?.clamp(0.0, 1.0);
    let idx = frac * (nums.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        Ok(Value::Float(nums[lo]))
    } else {
        let frac_part = idx - lo as f64;
        Ok(Value::Float(nums[lo] + (nums[hi] - nums[lo]) * frac_part))
    }
}

async fn percentile_disc<B: StorageBackend>(
    values: &[Value],
    call: &AggregateCall,
    sample_row: Option<&Row>,
    backend: &B,
    tx: &mut B::Tx,
    ctx: &mut ExecContext,
) -> Result<Value> {
    let mut nums = numeric_values(values)?;
    if nums.is_empty() {
        return Ok(Value::Null);
    }
    nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let frac = eval_fraction(call, sample_row, backend, tx, ctx).await?.clamp(0.0, 1.0);
    let idx = (frac * (nums.len() - 1) as f64).round() as usize;
    Ok(Value::Float(nums[idx]))
}

fn stdev(values: &[Value], population: bool) -> f64 {
    let nums: Vec<f64> = values.iter().filter_map(Value::as_float).collect();
    let n = nums.len();
    if n < 2 {
        return 0.0;
    }
    let mean = nums.iter().sum::<f64>() / n as f64;
    let sum_sq: f64 = nums.iter().map(|x| (x - mean).powi(2)).sum();
    let denom = if population { n as f64 } else { (n - 1) as f64 };
    (sum_sq / denom).sqrt()
}
