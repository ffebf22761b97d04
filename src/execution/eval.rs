//! Expression evaluator (C5).
//!
//! Splits "returns `Null`" from "raises an error" at the boundary: missing
//! properties, out-of-range subscripts and most type mismatches on
//! already-`Null` operands degrade to `Value::Null`; a genuine type clash
//! between two concrete values raises `Error::TypeError`.

use std::cmp::Ordering;

use crate::cypher::ast::{BinaryOp, Expr, StringOp, UnaryOp};
use crate::model::value;
use crate::model::{PropertyMap, Value};
use crate::storage::StorageBackend;
use crate::{Error, Result};

use super::{execute_plan, ExecContext, Row};

pub(super) fn eval_expr<'a, B: StorageBackend>(
    expr: &'a Expr,
    row: &'a Row,
    backend: &'a B,
    tx: &'a mut B::Tx,
    ctx: &'a mut ExecContext,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value>> + Send + 'a>> {
    Box::pin(async move {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),

            Expr::Parameter(name) => Ok(ctx.params.get(name).cloned().unwrap_or(Value::Null)),

            Expr::Variable(name) => Ok(row.get(name).cloned().unwrap_or(Value::Null)),

            Expr::Property { target, key } => {
                let v = eval_expr(target, row, backend, tx, ctx).await?;
                eval_property(&v, key)
            }

            Expr::Subscript { target, index } => {
                let t = eval_expr(target, row, backend, tx, ctx).await?;
                let i = eval_expr(index, row, backend, tx, ctx).await?;
                eval_subscript(&t, &i)
            }

            Expr::Slice { target, from, to } => {
                let t = eval_expr(target, row, backend, tx, ctx).await?;
                let from_v = match from {
                    Some(e) => Some(eval_expr(e, row, backend, tx, ctx).await?),
                    None => None,
                };
                let to_v = match to {
                    Some(e) => Some(eval_expr(e, row, backend, tx, ctx).await?),
                    None => None,
                };
                eval_slice(&t, from_v.as_ref(), to_v.as_ref())
            }

            Expr::BinaryOp { op, lhs, rhs } => {
                match op {
                    BinaryOp::And => {
                        let l = eval_expr(lhs, row, backend, tx, ctx).await?;
                        if matches!(l.as_bool3(), Some(false)) {
                            return Ok(Value::Bool(false));
                        }
                        let r = eval_expr(rhs, row, backend, tx, ctx).await?;
                        return Ok(value::logical_and(&l, &r));
                    }
                    BinaryOp::Or => {
                        let l = eval_expr(lhs, row, backend, tx, ctx).await?;
                        if matches!(l.as_bool3(), Some(true)) {
                            return Ok(Value::Bool(true));
                        }
                        let r = eval_expr(rhs, row, backend, tx, ctx).await?;
                        return Ok(value::logical_or(&l, &r));
                    }
                    _ => {}
                }
                let l = eval_expr(lhs, row, backend, tx, ctx).await?;
                let r = eval_expr(rhs, row, backend, tx, ctx).await?;
                eval_binary(*op, &l, &r)
            }

            Expr::UnaryOp { op, operand } => {
                let v = eval_expr(operand, row, backend, tx, ctx).await?;
                match op {
                    UnaryOp::Not => Ok(value::logical_not(&v)),
                    UnaryOp::Neg => value::neg(&v).map_err(arith_err),
                }
            }

            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for it in items {
                    out.push(eval_expr(it, row, backend, tx, ctx).await?);
                }
                Ok(Value::List(out))
            }

            Expr::MapLiteral(entries) => {
                let mut out = PropertyMap::new();
                for (k, e) in entries {
                    out.insert(k.clone(), eval_expr(e, row, backend, tx, ctx).await?);
                }
                Ok(Value::Map(out))
            }

            Expr::FunctionCall { name, args, .. } => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(eval_expr(a, row, backend, tx, ctx).await?);
                }
                eval_function(name, vals)
            }

            Expr::IsNull { operand, negated } => {
                let v = eval_expr(operand, row, backend, tx, ctx).await?;
                Ok(Value::Bool(if *negated { !v.is_null() } else { v.is_null() }))
            }

            Expr::In { probe, list } => {
                let p = eval_expr(probe, row, backend, tx, ctx).await?;
                let l = eval_expr(list, row, backend, tx, ctx).await?;
                match l {
                    Value::Null => Ok(Value::Null),
                    Value::List(items) => Ok(p.in_list(&items)),
                    other => Err(Error::TypeError { expected: "LIST".into(), got: other.type_name().into() }),
                }
            }

            Expr::HasLabel { operand, label_expr } => {
                let v = eval_expr(operand, row, backend, tx, ctx).await?;
                match v {
                    Value::Null => Ok(Value::Null),
                    Value::Node(n) => Ok(Value::Bool(label_expr.matches(&n.labels))),
                    other => Err(Error::TypeError { expected: "NODE".into(), got: other.type_name().into() }),
                }
            }

            Expr::StringOp { op, lhs, rhs } => {
                let l = eval_expr(lhs, row, backend, tx, ctx).await?;
                let r = eval_expr(rhs, row, backend, tx, ctx).await?;
                eval_string_op(*op, &l, &r)
            }

            Expr::Case { subject, whens, default } => {
                if let Some(subj) = subject {
                    let s = eval_expr(subj, row, backend, tx, ctx).await?;
                    for (w, t) in whens {
                        let wv = eval_expr(w, row, backend, tx, ctx).await?;
                        if s.eq3(&wv) == Some(true) {
                            return eval_expr(t, row, backend, tx, ctx).await;
                        }
                    }
                } else {
                    for (w, t) in whens {
                        let wv = eval_expr(w, row, backend, tx, ctx).await?;
                        if matches!(wv.as_bool3(), Some(true)) {
                            return eval_expr(t, row, backend, tx, ctx).await;
                        }
                    }
                }
                match default {
                    Some(d) => eval_expr(d, row, backend, tx, ctx).await,
                    None => Ok(Value::Null),
                }
            }

            Expr::Exists(stmt) => {
                let rows = run_correlated(stmt, row, backend, tx, ctx).await?;
                Ok(Value::Bool(!rows.is_empty()))
            }

            Expr::Count(stmt) => {
                let rows = run_correlated(stmt, row, backend, tx, ctx).await?;
                Ok(Value::Int(rows.len() as i64))
            }

            Expr::PatternPath(_) => {
                Err(Error::RuntimeError("standalone pattern expressions are not evaluable at runtime".into()))
            }
        }
    })
}

async fn run_correlated<B: StorageBackend>(
    stmt: &crate::cypher::ast::Statement,
    row: &Row,
    backend: &B,
    tx: &mut B::Tx,
    ctx: &mut ExecContext,
) -> Result<Vec<Row>> {
    let outer_scope = row.keys().cloned().collect();
    let subplan = crate::planner::plan_correlated(stmt, &outer_scope)?;
    let prev_seed = std::mem::replace(&mut ctx.seed, row.clone());
    let result = execute_plan(backend, tx, &subplan, ctx).await;
    ctx.seed = prev_seed;
    result
}

fn arith_err(e: value::ArithmeticTypeError) -> Error {
    Error::TypeError { expected: format!("numeric or compatible operands for '{}'", e.op), got: format!("{} and {}", e.lhs, e.rhs) }
}

fn eval_property(v: &Value, key: &str) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Node(n) => Ok(n.get(key).cloned().unwrap_or(Value::Null)),
        Value::Rel(r) => Ok(r.properties.get(key).cloned().unwrap_or(Value::Null)),
        Value::Map(m) => Ok(m.get(key).cloned().unwrap_or(Value::Null)),
        Value::Date(_)
        | Value::LocalTime(_)
        | Value::ZonedTime(_)
        | Value::LocalDateTime(_)
        | Value::ZonedDateTime(_)
        | Value::Duration(_) => Ok(value::temporal_component(v, key)),
        Value::Point2DCartesian { .. }
        | Value::Point3DCartesian { .. }
        | Value::Point2DGeographic { .. }
        | Value::Point3DGeographic { .. } => Ok(eval_point_component(v, key)),
        other => Err(Error::TypeError { expected: "NODE, RELATIONSHIP, MAP, temporal, or point".into(), got: other.type_name().into() }),
    }
}

fn eval_point_component(v: &Value, key: &str) -> Value {
    match (v, key) {
        (Value::Point2DCartesian { x, .. }, "x") => Value::Float(*x),
        (Value::Point2DCartesian { y, .. }, "y") => Value::Float(*y),
        (Value::Point3DCartesian { x, .. }, "x") => Value::Float(*x),
        (Value::Point3DCartesian { y, .. }, "y") => Value::Float(*y),
        (Value::Point3DCartesian { z, .. }, "z") => Value::Float(*z),
        (Value::Point2DGeographic { longitude, .. }, "longitude" | "x") => Value::Float(*longitude),
        (Value::Point2DGeographic { latitude, .. }, "latitude" | "y") => Value::Float(*latitude),
        (Value::Point3DGeographic { longitude, .. }, "longitude" | "x") => Value::Float(*longitude),
        (Value::Point3DGeographic { latitude, .. }, "latitude" | "y") => Value::Float(*latitude),
        (Value::Point3DGeographic { height, .. }, "height" | "z") => Value::Float(*height),
        (v, "crs") => value::point_crs(v).map(|c| Value::Str(c.name().to_string())).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn eval_subscript(target: &Value, index: &Value) -> Result<Value> {
    if target.is_null() || index.is_null() {
        return Ok(Value::Null);
    }
    match target {
        Value::List(items) => {
            let Some(i) = index.as_int() else {
                return Err(Error::TypeError { expected: "INTEGER".into(), got: index.type_name().into() });
            };
            Ok(resolve_index(items.len(), i).and_then(|i| items.get(i).cloned()).unwrap_or(Value::Null))
        }
        Value::Map(m) => {
            let Some(k) = index.as_str() else {
                return Err(Error::TypeError { expected: "STRING".into(), got: index.type_name().into() });
            };
            Ok(m.get(k).cloned().unwrap_or(Value::Null))
        }
        other => Err(Error::TypeError { expected: "LIST or MAP".into(), got: other.type_name().into() }),
    }
}

fn resolve_index(len: usize, i: i64) -> Option<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

fn eval_slice(target: &Value, from: Option<&Value>, to: Option<&Value>) -> Result<Value> {
    if target.is_null() {
        return Ok(Value::Null);
    }
    let Value::List(items) = target else {
        return Err(Error::TypeError { expected: "LIST".into(), got: target.type_name().into() });
    };
    let len = items.len() as i64;
    let clamp = |i: i64| -> usize {
        let i = if i < 0 { i + len } else { i };
        i.clamp(0, len) as usize
    };
    let start = match from {
        Some(v) if v.is_null() => 0,
        Some(v) => clamp(v.as_int().unwrap_or(0)),
        None => 0,
    };
    let end = match to {
        Some(v) if v.is_null() => items.len(),
        Some(v) => clamp(v.as_int().unwrap_or(len)),
        None => items.len(),
    };
    if start >= end {
        Ok(Value::List(Vec::new()))
    } else {
        Ok(Value::List(items[start..end].to_vec()))
    }
}

fn cmp_nulls_last(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cypher_cmp(b).unwrap_or(Ordering::Equal),
    }
}

pub(super) fn sort_key_cmp(a: &[Value], b: &[Value], descending: &[bool]) -> Ordering {
    for (i, desc) in descending.iter().enumerate() {
        let mut ord = cmp_nulls_last(&a[i], &b[i]);
        if *desc {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn eval_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => value::add(l, r).map_err(arith_err),
        BinaryOp::Sub => value::sub(l, r).map_err(arith_err),
        BinaryOp::Mul => value::mul(l, r).map_err(arith_err),
        BinaryOp::Div => value::div(l, r).map_err(arith_err),
        BinaryOp::Mod => value::modulo(l, r).map_err(arith_err),
        BinaryOp::Pow => value::pow(l, r).map_err(arith_err),
        BinaryOp::Eq => Ok(bool3_to_value(l.eq3(r))),
        BinaryOp::Neq => Ok(bool3_to_value(l.eq3(r).map(|b| !b))),
        BinaryOp::Lt => Ok(cmp_to_value(l.cypher_cmp(r), |o| o == Ordering::Less)),
        BinaryOp::Lte => Ok(cmp_to_value(l.cypher_cmp(r), |o| o != Ordering::Greater)),
        BinaryOp::Gt => Ok(cmp_to_value(l.cypher_cmp(r), |o| o == Ordering::Greater)),
        BinaryOp::Gte => Ok(cmp_to_value(l.cypher_cmp(r), |o| o != Ordering::Less)),
        BinaryOp::And => Ok(value::logical_and(l, r)),
        BinaryOp::Or => Ok(value::logical_or(l, r)),
        BinaryOp::Xor => Ok(value::logical_xor(l, r)),
    }
}

fn bool3_to_value(b: Option<bool>) -> Value {
    match b {
        Some(b) => Value::Bool(b),
        None => Value::Null,
    }
}

fn cmp_to_value(ord: Option<Ordering>, pred: impl Fn(Ordering) -> bool) -> Value {
    match ord {
        Some(o) => Value::Bool(pred(o)),
        None => Value::Null,
    }
}

fn eval_string_op(op: StringOp, l: &Value, r: &Value) -> Result<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let (Some(a), Some(b)) = (l.as_str(), r.as_str()) else {
        return Err(Error::TypeError { expected: "STRING".into(), got: format!("{} and {}", l.type_name(), r.type_name()) });
    };
    match op {
        StringOp::StartsWith => Ok(Value::Bool(a.starts_with(b))),
        StringOp::EndsWith => Ok(Value::Bool(a.ends_with(b))),
        StringOp::Contains => Ok(Value::Bool(a.contains(b))),
        StringOp::RegexMatch => {
            let re = regex::Regex::new(b).map_err(|e| Error::RuntimeError(format!("invalid regular expression '{b}': {e}")))?;
            Ok(Value::Bool(re.is_match(a)))
        }
    }
}

// ============================================================================
// Builtin scalar functions
// ============================================================================

fn eval_function(name: &str, args: Vec<Value>) -> Result<Value> {
    let lower = name.to_lowercase();
    let min_arity: usize = match lower.as_str() {
        "substring" | "left" | "right" | "split" | "distance" | "range" => 2,
        "replace" => 3,
        "trim" | "ltrim" | "rtrim" | "upper" | "toupper" | "lower" | "tolower" | "reverse" | "tostring" | "abs" | "ceil"
        | "floor" | "round" | "sign" | "tointeger" | "toint" | "tofloat" | "toboolean" | "size" | "head" | "last" | "tail"
        | "id" | "type" | "labels" | "properties" | "keys" | "point" | "length" | "nodes" | "relationships" => 1,
        _ => 0,
    };
    if args.len() < min_arity {
        return Err(Error::RuntimeError(format!("{name}() expects at least {min_arity} argument(s), got {}", args.len())));
    }
    match lower.as_str() {
        "substring" => {
            let Some(s) = args[0].as_str() else { return null_or_err(&args[0]) };
            let chars: Vec<char> = s.chars().collect();
            let start = args.get(1).and_then(Value::as_int).unwrap_or(0).max(0) as usize;
            let start = start.min(chars.len());
            let len = match args.get(2) {
                Some(v) if !v.is_null() => v.as_int().unwrap_or(0).max(0) as usize,
                _ => chars.len() - start,
            };
            let end = (start + len).min(chars.len());
            Ok(Value::Str(chars[start..end].iter().collect()))
        }
        "trim" => str_fn(&args, |s| s.trim().to_string()),
        "ltrim" => str_fn(&args, |s| s.trim_start().to_string()),
        "rtrim" => str_fn(&args, |s| s.trim_end().to_string()),
        "upper" | "toupper" => str_fn(&args, |s| s.to_uppercase()),
        "lower" | "tolower" => str_fn(&args, |s| s.to_lowercase()),
        "split" => {
            if args[0].is_null() || args[1].is_null() {
                return Ok(Value::Null);
            }
            let (Some(s), Some(sep)) = (args[0].as_str(), args[1].as_str()) else {
                return Err(type_err("STRING", &args));
            };
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::Str(c.to_string())).collect()
            } else {
                s.split(sep).map(|p| Value::Str(p.to_string())).collect()
            };
            Ok(Value::List(parts))
        }
        "replace" => {
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let (Some(s), Some(search), Some(rep)) = (args[0].as_str(), args[1].as_str(), args[2].as_str()) else {
                return Err(type_err("STRING", &args));
            };
            Ok(Value::Str(s.replace(search, rep)))
        }
        "reverse" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Str(s) => Ok(Value::Str(s.chars().rev().collect())),
            Value::List(items) => {
                let mut out = items.clone();
                out.reverse();
                Ok(Value::List(out))
            }
            other => Err(Error::TypeError { expected: "STRING or LIST".into(), got: other.type_name().into() }),
        },
        "left" => {
            let Some(s) = args[0].as_str() else { return null_or_err(&args[0]) };
            let n = args[1].as_int().unwrap_or(0).max(0) as usize;
            Ok(Value::Str(s.chars().take(n).collect()))
        }
        "right" => {
            let Some(s) = args[0].as_str() else { return null_or_err(&args[0]) };
            let chars: Vec<char> = s.chars().collect();
            let n = (args[1].as_int().unwrap_or(0).max(0) as usize).min(chars.len());
            Ok(Value::Str(chars[chars.len() - n..].iter().collect()))
        }
        "tostring" => Ok(args[0].to_string_value()),
        "abs" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(Error::TypeError { expected: "numeric".into(), got: other.type_name().into() }),
        },
        "ceil" => num_fn(&args[0], f64::ceil),
        "floor" => num_fn(&args[0], f64::floor),
        "round" => num_fn(&args[0], f64::round),
        "sign" => match args[0].as_float() {
            None if args[0].is_null() => Ok(Value::Null),
            None => Err(Error::TypeError { expected: "numeric".into(), got: args[0].type_name().into() }),
            Some(f) => Ok(Value::Int(if f > 0.0 { 1 } else if f < 0.0 { -1 } else { 0 })),
        },
        "tointeger" | "toint" => Ok(args[0].to_integer()),
        "tofloat" => Ok(args[0].to_float()),
        "toboolean" => Ok(args[0].to_boolean()),
        "size" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(l) => Ok(Value::Int(l.len() as i64)),
            Value::Map(m) => Ok(Value::Int(m.len() as i64)),
            other => Err(Error::TypeError { expected: "STRING, LIST, or MAP".into(), got: other.type_name().into() }),
        },
        "head" => list_fn(&args[0], |l| l.first().cloned().unwrap_or(Value::Null)),
        "last" => list_fn(&args[0], |l| l.last().cloned().unwrap_or(Value::Null)),
        "tail" => list_fn(&args[0], |l| Value::List(l.get(1..).unwrap_or(&[]).to_vec())),
        "range" => {
            let start = args[0].as_int().ok_or_else(|| Error::TypeError { expected: "INTEGER".into(), got: args[0].type_name().into() })?;
            let end = args[1].as_int().ok_or_else(|| Error::TypeError { expected: "INTEGER".into(), got: args[1].type_name().into() })?;
            let step = match args.get(2) {
                Some(v) => v.as_int().ok_or_else(|| Error::TypeError { expected: "INTEGER".into(), got: v.type_name().into() })?,
                None => 1,
            };
            if step == 0 {
                return Err(Error::RuntimeError("range() step must not be zero".into()));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i <= end) || (step < 0 && i >= end) {
                out.push(Value::Int(i));
                i += step;
            }
            Ok(Value::List(out))
        }
        "id" => match &args[0] {
            Value::Node(n) => Ok(Value::Int(n.id.0 as i64)),
            Value::Rel(r) => Ok(Value::Int(r.id.0 as i64)),
            other => Err(Error::TypeError { expected: "NODE or RELATIONSHIP".into(), got: other.type_name().into() }),
        },
        "type" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Rel(r) => Ok(Value::Str(r.rel_type.clone())),
            other => Err(Error::TypeError { expected: "RELATIONSHIP".into(), got: other.type_name().into() }),
        },
        "labels" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Node(n) => Ok(Value::List(n.labels.iter().cloned().map(Value::Str).collect())),
            other => Err(Error::TypeError { expected: "NODE".into(), got: other.type_name().into() }),
        },
        "properties" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Node(n) => Ok(Value::Map(n.properties.clone())),
            Value::Rel(r) => Ok(Value::Map(r.properties.clone())),
            Value::Map(m) => Ok(Value::Map(m.clone())),
            other => Err(Error::TypeError { expected: "NODE, RELATIONSHIP, or MAP".into(), got: other.type_name().into() }),
        },
        "keys" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Node(n) => Ok(Value::List(n.properties.keys().cloned().map(Value::Str).collect())),
            Value::Rel(r) => Ok(Value::List(r.properties.keys().cloned().map(Value::Str).collect())),
            Value::Map(m) => Ok(Value::List(m.keys().cloned().map(Value::Str).collect())),
            other => Err(Error::TypeError { expected: "NODE, RELATIONSHIP, or MAP".into(), got: other.type_name().into() }),
        },
        "coalesce" => Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)),
        "point" => Ok(value::construct_point(&args[0])),
        "distance" => Ok(value::distance(&args[0], &args[1])),
        "date" => Ok(value::construct_date(args.first().unwrap_or(&Value::Null))),
        "localtime" => Ok(value::construct_local_time(args.first().unwrap_or(&Value::Null))),
        "time" => Ok(value::construct_zoned_time(args.first().unwrap_or(&Value::Null))),
        "localdatetime" => Ok(value::construct_local_datetime(args.first().unwrap_or(&Value::Null))),
        "datetime" => Ok(value::construct_zoned_datetime(args.first().unwrap_or(&Value::Null))),
        "duration" => {
            if args.is_empty() {
                return Ok(Value::Null);
            }
            Ok(value::construct_duration(&args[0]))
        }
        "length" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Path(p) => Ok(Value::Int(p.len() as i64)),
            other => Err(Error::TypeError { expected: "PATH".into(), got: other.type_name().into() }),
        },
        "nodes" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Path(p) => Ok(Value::List(p.nodes.iter().cloned().map(|n| Value::Node(Box::new(n))).collect())),
            other => Err(Error::TypeError { expected: "PATH".into(), got: other.type_name().into() }),
        },
        "relationships" => match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Path(p) => Ok(Value::List(p.relationships().cloned().map(|r| Value::Rel(Box::new(r))).collect())),
            other => Err(Error::TypeError { expected: "PATH".into(), got: other.type_name().into() }),
        },
        "count" | "sum" | "avg" | "min" | "max" | "collect" | "percentilecont" | "percentiledisc" | "stdev" | "stdevp" => {
            Err(Error::RuntimeError(format!("aggregate function '{name}' used outside of a RETURN/WITH projection")))
        }
        other => Err(Error::RuntimeError(format!("unknown function '{other}'"))),
    }
}

fn null_or_err(v: &Value) -> Result<Value> {
    if v.is_null() {
        Ok(Value::Null)
    } else {
        Err(Error::TypeError { expected: "STRING".into(), got: v.type_name().into() })
    }
}

fn type_err(expected: &str, args: &[Value]) -> Error {
    Error::TypeError { expected: expected.into(), got: args.iter().map(Value::type_name).collect::<Vec<_>>().join(", ") }
}

fn str_fn(args: &[Value], f: impl Fn(&str) -> String) -> Result<Value> {
    match args[0].as_str() {
        Some(s) => Ok(Value::Str(f(s))),
        None if args[0].is_null() => Ok(Value::Null),
        None => Err(Error::TypeError { expected: "STRING".into(), got: args[0].type_name().into() }),
    }
}

fn num_fn(v: &Value, f: impl Fn(f64) -> f64) -> Result<Value> {
    match v.as_float() {
        Some(n) => Ok(Value::Float(f(n))),
        None if v.is_null() => Ok(Value::Null),
        None => Err(Error::TypeError { expected: "numeric".into(), got: v.type_name().into() }),
    }
}

fn list_fn(v: &Value, f: impl Fn(&[Value]) -> Value) -> Result<Value> {
    match v {
        Value::List(items) => Ok(f(items)),
        Value::Null => Ok(Value::Null),
        other => Err(Error::TypeError { expected: "LIST".into(), got: other.type_name().into() }),
    }
}
