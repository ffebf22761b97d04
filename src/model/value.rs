//! Universal value type for the openCypher type system.
//!
//! `Value` is a tagged sum covering scalars, containers, graph elements,
//! temporal values and spatial points. Comparison, equality and arithmetic
//! all follow three-valued-logic / Null-propagation rules rather than
//! panicking or raising on the cases a SQL-style type system would reject.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Node, Path, Relationship};

/// A point in time with a UTC offset but no named timezone (`time(...)`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZonedTime {
    pub time: NaiveTime,
    pub offset: FixedOffset,
}

/// Coordinate reference system tag for a spatial point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crs {
    Cartesian2D,
    Cartesian3D,
    Wgs84_2D,
    Wgs84_3D,
}

impl Crs {
    pub fn name(self) -> &'static str {
        match self {
            Crs::Cartesian2D => "cartesian-2d",
            Crs::Cartesian3D => "cartesian-3d",
            Crs::Wgs84_2D => "wgs84-2d",
            Crs::Wgs84_3D => "wgs84-3d",
        }
    }
}

/// Earth radius in meters, used for Haversine distance on geographic points.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// openCypher value. Every variant admits `Null`; refinement to "not null"
/// is a type predicate applied at the call site, not a separate type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),

    Node(Box<Node>),
    Rel(Box<Relationship>),
    Path(Box<Path>),

    Date(NaiveDate),
    LocalTime(NaiveTime),
    ZonedTime(ZonedTime),
    LocalDateTime(NaiveDateTime),
    ZonedDateTime(DateTime<FixedOffset>),
    Duration(IsoDuration),

    Point2DCartesian { x: f64, y: f64 },
    Point3DCartesian { x: f64, y: f64, z: f64 },
    Point2DGeographic { longitude: f64, latitude: f64 },
    Point3DGeographic { longitude: f64, latitude: f64, height: f64 },
}

/// ISO-8601 duration, stored as the four components Cypher keeps distinct
/// (months and days do not collapse to a fixed number of seconds because
/// calendar arithmetic is not uniform).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsoDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i32,
}

impl IsoDuration {
    pub const ZERO: IsoDuration = IsoDuration { months: 0, days: 0, seconds: 0, nanoseconds: 0 };
}

// ============================================================================
// Type checking / truthiness / conversions
// ============================================================================

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Str(_) => "STRING",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Node(_) => "NODE",
            Value::Rel(_) => "RELATIONSHIP",
            Value::Path(_) => "PATH",
            Value::Date(_) => "DATE",
            Value::LocalTime(_) => "LOCAL_TIME",
            Value::ZonedTime(_) => "ZONED_TIME",
            Value::LocalDateTime(_) => "LOCAL_DATETIME",
            Value::ZonedDateTime(_) => "ZONED_DATETIME",
            Value::Duration(_) => "DURATION",
            Value::Point2DCartesian { .. } | Value::Point3DCartesian { .. } => "POINT",
            Value::Point2DGeographic { .. } | Value::Point3DGeographic { .. } => "POINT",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }
    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// openCypher truthiness: everything but `Null` and `false` is truthy,
    /// and `Null` itself is neither true nor false (callers that need a
    /// definite bool, e.g. `WHERE`, treat non-true as "filtered out").
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            _ => true,
        }
    }

    /// `Some(true)`/`Some(false)` for a definite boolean, `None` for `Null`
    /// or a non-boolean value (the latter is a caller error elsewhere).
    pub fn as_bool3(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Null => None,
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// `toInteger`: parses strings, truncates floats, passes ints through.
    /// Failure degrades to `Null`, never raises.
    pub fn to_integer(&self) -> Value {
        match self {
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
            Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).unwrap_or_else(|_| {
                s.trim().parse::<f64>().map(|f| Value::Int(f.trunc() as i64)).unwrap_or(Value::Null)
            }),
            Value::Bool(b) => Value::Int(if *b { 1 } else { 0 }),
            _ => Value::Null,
        }
    }

    /// `toFloat`: parses strings, widens ints, passes floats through.
    pub fn to_float(&self) -> Value {
        match self {
            Value::Float(f) => Value::Float(*f),
            Value::Int(i) => Value::Float(*i as f64),
            Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// `toString`.
    pub fn to_string_value(&self) -> Value {
        match self {
            Value::Null => Value::Null,
            Value::Str(s) => Value::Str(s.clone()),
            Value::Bool(b) => Value::Str(b.to_string()),
            Value::Int(i) => Value::Str(i.to_string()),
            Value::Float(f) => Value::Str(f.to_string()),
            _ => Value::Null,
        }
    }

    /// `toBoolean`.
    pub fn to_boolean(&self) -> Value {
        match self {
            Value::Bool(b) => Value::Bool(*b),
            Value::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Null,
            },
            _ => Value::Null,
        }
    }
}

// ============================================================================
// From impls
// ============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Node(n) => write!(f, "{n:?}"),
            Value::Rel(r) => write!(f, "{r:?}"),
            Value::Path(p) => write!(f, "{p:?}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::LocalTime(t) => write!(f, "{t}"),
            Value::ZonedTime(t) => write!(f, "{}{}", t.time, t.offset),
            Value::LocalDateTime(dt) => write!(f, "{dt}"),
            Value::ZonedDateTime(dt) => write!(f, "{dt}"),
            Value::Duration(d) => write!(f, "P{}M{}DT{}.{:09}S", d.months, d.days, d.seconds, d.nanoseconds),
            Value::Point2DCartesian { x, y } => write!(f, "point({{x: {x}, y: {y}, crs: 'cartesian'}})"),
            Value::Point3DCartesian { x, y, z } => {
                write!(f, "point({{x: {x}, y: {y}, z: {z}, crs: 'cartesian-3d'}})")
            }
            Value::Point2DGeographic { longitude, latitude } => {
                write!(f, "point({{longitude: {longitude}, latitude: {latitude}, crs: 'wgs-84'}})")
            }
            Value::Point3DGeographic { longitude, latitude, height } => write!(
                f,
                "point({{longitude: {longitude}, latitude: {latitude}, height: {height}, crs: 'wgs-84-3d'}})"
            ),
        }
    }
}

// ============================================================================
// Comparison (openCypher ordering rules) and three-valued equality
// ============================================================================

impl Value {
    /// Total ordering within a type; `None` for `Null` on either side or a
    /// cross-type comparison that numeric widening doesn't bridge.
    pub fn cypher_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (Value::List(a), Value::List(b)) => a.iter().zip(b.iter()).find_map(|(x, y)| {
                match x.cypher_cmp(y) {
                    Some(std::cmp::Ordering::Equal) => None,
                    other => Some(other.unwrap_or(std::cmp::Ordering::Equal)),
                }
            }).or_else(|| a.len().partial_cmp(&b.len())),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::LocalTime(a), Value::LocalTime(b)) => a.partial_cmp(b),
            (Value::LocalDateTime(a), Value::LocalDateTime(b)) => a.partial_cmp(b),
            (Value::ZonedDateTime(a), Value::ZonedDateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Three-valued equality. `Null` on either side yields `Null`
    /// (represented here as `None`); containers compare pointwise; graph
    /// elements compare by id only.
    pub fn eq3(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Node(a), Value::Node(b)) => Some(a.id == b.id),
            (Value::Rel(a), Value::Rel(b)) => Some(a.id == b.id),
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut any_null = false;
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.eq3(y) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => any_null = true,
                    }
                }
                if any_null { None } else { Some(true) }
            }
            (Value::Map(a), Value::Map(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut any_null = false;
                for (k, v) in a {
                    match b.get(k) {
                        None => return Some(false),
                        Some(bv) => match v.eq3(bv) {
                            Some(false) => return Some(false),
                            Some(true) => {}
                            None => any_null = true,
                        },
                    }
                }
                if any_null { None } else { Some(true) }
            }
            (Value::Int(a), Value::Float(b)) => Some((*a as f64) == *b),
            (Value::Float(a), Value::Int(b)) => Some(*a == (*b as f64)),
            _ => Some(self == other),
        }
    }

    /// `IN` semantics: `true` if any element equals the probe; `Null` if no
    /// element equals but the list contains `Null` or the probe is `Null`;
    /// else `false`.
    pub fn in_list(&self, list: &[Value]) -> Value {
        if self.is_null() {
            return Value::Null;
        }
        let mut saw_null = false;
        for item in list {
            match self.eq3(item) {
                Some(true) => return Value::Bool(true),
                Some(false) => {}
                None => saw_null = true,
            }
        }
        if saw_null { Value::Null } else { Value::Bool(false) }
    }
}

// ============================================================================
// Three-valued logic: AND / OR / XOR / NOT
// ============================================================================

/// `AND` short-circuits on a definite `false` operand; otherwise `Null`
/// propagates if either operand is non-definite.
pub fn logical_and(a: &Value, b: &Value) -> Value {
    match (a.as_bool3(), b.as_bool3()) {
        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    }
}

/// `OR` short-circuits on a definite `true` operand; otherwise `Null`
/// propagates if either operand is non-definite.
pub fn logical_or(a: &Value, b: &Value) -> Value {
    match (a.as_bool3(), b.as_bool3()) {
        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    }
}

/// `XOR` is only definite when both operands are definite booleans.
pub fn logical_xor(a: &Value, b: &Value) -> Value {
    match (a.as_bool3(), b.as_bool3()) {
        (Some(x), Some(y)) => Value::Bool(x != y),
        _ => Value::Null,
    }
}

pub fn logical_not(a: &Value) -> Value {
    match a.as_bool3() {
        Some(b) => Value::Bool(!b),
        None => Value::Null,
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Errors arithmetic can still raise after Null-propagation and
/// div/mod-by-zero have both been ruled out (genuine type mismatches).
#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticTypeError {
    pub op: &'static str,
    pub lhs: &'static str,
    pub rhs: &'static str,
}

type ArithResult = Result<Value, ArithmeticTypeError>;

pub fn add(a: &Value, b: &Value) -> ArithResult {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
        (Value::Str(x), y) if !matches!(y, Value::List(_)) => Ok(Value::Str(format!("{x}{y}"))),
        (x, Value::Str(y)) if !matches!(x, Value::List(_)) => Ok(Value::Str(format!("{x}{y}"))),
        (Value::List(x), Value::List(y)) => {
            let mut out = x.clone();
            out.extend(y.clone());
            Ok(Value::List(out))
        }
        (Value::List(x), y) => {
            let mut out = x.clone();
            out.push(y.clone());
            Ok(Value::List(out))
        }
        (x, Value::List(y)) => {
            let mut out = vec![x.clone()];
            out.extend(y.clone());
            Ok(Value::List(out))
        }
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_add(*y))),
        _ if a.is_numeric() && b.is_numeric() => {
            Ok(Value::Float(a.as_float().unwrap() + b.as_float().unwrap()))
        }
        (Value::Duration(x), Value::Duration(y)) => Ok(Value::Duration(add_durations(*x, *y))),
        (Value::Date(_), Value::Duration(_))
        | (Value::LocalDateTime(_), Value::Duration(_))
        | (Value::LocalTime(_), Value::Duration(_))
        | (Value::ZonedTime(_), Value::Duration(_))
        | (Value::ZonedDateTime(_), Value::Duration(_)) => Ok(add_temporal_duration(a, b)),
        _ => Err(ArithmeticTypeError { op: "+", lhs: a.type_name(), rhs: b.type_name() }),
    }
}

pub fn sub(a: &Value, b: &Value) -> ArithResult {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_sub(*y))),
        _ if a.is_numeric() && b.is_numeric() => {
            Ok(Value::Float(a.as_float().unwrap() - b.as_float().unwrap()))
        }
        _ => Err(ArithmeticTypeError { op: "-", lhs: a.type_name(), rhs: b.type_name() }),
    }
}

pub fn mul(a: &Value, b: &Value) -> ArithResult {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_mul(*y))),
        _ if a.is_numeric() && b.is_numeric() => {
            Ok(Value::Float(a.as_float().unwrap() * b.as_float().unwrap()))
        }
        _ => Err(ArithmeticTypeError { op: "*", lhs: a.type_name(), rhs: b.type_name() }),
    }
}

/// Division of two `Int`s always produces a `Float` (spec §3.1); division
/// by zero degrades to `Null` rather than raising.
pub fn div(a: &Value, b: &Value) -> ArithResult {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        _ if a.is_numeric() && b.is_numeric() => {
            let y = b.as_float().unwrap();
            if y == 0.0 {
                return Ok(Value::Null);
            }
            Ok(Value::Float(a.as_float().unwrap() / y))
        }
        _ => Err(ArithmeticTypeError { op: "/", lhs: a.type_name(), rhs: b.type_name() }),
    }
}

/// Modulo by zero degrades to `Null`. Result keeps `Int` when both operands
/// are `Int`.
pub fn modulo(a: &Value, b: &Value) -> ArithResult {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                Ok(Value::Null)
            } else {
                Ok(Value::Int(x % y))
            }
        }
        _ if a.is_numeric() && b.is_numeric() => {
            let y = b.as_float().unwrap();
            if y == 0.0 {
                Ok(Value::Null)
            } else {
                Ok(Value::Float(a.as_float().unwrap() % y))
            }
        }
        _ => Err(ArithmeticTypeError { op: "%", lhs: a.type_name(), rhs: b.type_name() }),
    }
}

/// `^`, right-associative at the parser level. Returns `Int` only when the
/// mathematical result is integral and both operands were integral;
/// otherwise `Float`.
pub fn pow(a: &Value, b: &Value) -> ArithResult {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        _ if a.is_numeric() && b.is_numeric() => {
            let base = a.as_float().unwrap();
            let exp = b.as_float().unwrap();
            let result = base.powf(exp);
            if matches!(a, Value::Int(_)) && matches!(b, Value::Int(_)) && *b.as_int().as_ref().unwrap() >= 0 && result.is_finite() && result.fract() == 0.0 && result.abs() < (i64::MAX as f64) {
                Ok(Value::Int(result as i64))
            } else {
                Ok(Value::Float(result))
            }
        }
        _ => Err(ArithmeticTypeError { op: "^", lhs: a.type_name(), rhs: b.type_name() }),
    }
}

pub fn neg(a: &Value) -> ArithResult {
    match a {
        Value::Null => Ok(Value::Null),
        Value::Int(x) => Ok(Value::Int(-x)),
        Value::Float(x) => Ok(Value::Float(-x)),
        _ => Err(ArithmeticTypeError { op: "unary -", lhs: a.type_name(), rhs: "" }),
    }
}

fn add_durations(x: IsoDuration, y: IsoDuration) -> IsoDuration {
    let mut nanos = x.nanoseconds as i64 + y.nanoseconds as i64;
    let mut seconds = x.seconds + y.seconds;
    if nanos >= 1_000_000_000 {
        nanos -= 1_000_000_000;
        seconds += 1;
    }
    IsoDuration {
        months: x.months + y.months,
        days: x.days + y.days,
        seconds,
        nanoseconds: nanos as i32,
    }
}

/// Calendar-correct add: months before days before the sub-day remainder,
/// per spec §4.1 ("applies calendar arithmetic, months before days").
fn add_temporal_duration(t: &Value, d: &Value) -> Value {
    let Value::Duration(dur) = d else { return Value::Null };
    match t {
        Value::Date(date) => {
            let stepped = add_months_to_date(*date, dur.months);
            Value::Date(stepped + chrono::Duration::days(dur.days))
        }
        Value::LocalDateTime(dt) => {
            let stepped_date = add_months_to_date(dt.date(), dur.months);
            let stepped = NaiveDateTime::new(stepped_date, dt.time());
            Value::LocalDateTime(
                stepped
                    + chrono::Duration::days(dur.days)
                    + chrono::Duration::seconds(dur.seconds)
                    + chrono::Duration::nanoseconds(dur.nanoseconds as i64),
            )
        }
        Value::ZonedDateTime(dt) => {
            let stepped_date = add_months_to_date(dt.date_naive(), dur.months);
            let naive = NaiveDateTime::new(stepped_date, dt.time())
                + chrono::Duration::days(dur.days)
                + chrono::Duration::seconds(dur.seconds)
                + chrono::Duration::nanoseconds(dur.nanoseconds as i64);
            let offset = *dt.offset();
            let utc_naive = naive - chrono::Duration::seconds(offset.local_minus_utc() as i64);
            Value::ZonedDateTime(DateTime::from_naive_utc_and_offset(utc_naive, offset))
        }
        Value::LocalTime(t) => {
            let nanos = (t.num_seconds_from_midnight() as i64) * 1_000_000_000
                + t.nanosecond() as i64
                + dur.seconds * 1_000_000_000
                + dur.nanoseconds as i64;
            let day_nanos = 86_400_000_000_000i64;
            let wrapped = nanos.rem_euclid(day_nanos);
            Value::LocalTime(
                NaiveTime::from_num_seconds_from_midnight_opt(
                    (wrapped / 1_000_000_000) as u32,
                    (wrapped % 1_000_000_000) as u32,
                )
                .unwrap_or(*t),
            )
        }
        Value::ZonedTime(zt) => {
            let nanos = (zt.time.num_seconds_from_midnight() as i64) * 1_000_000_000
                + zt.time.nanosecond() as i64
                + dur.seconds * 1_000_000_000
                + dur.nanoseconds as i64;
            let day_nanos = 86_400_000_000_000i64;
            let wrapped = nanos.rem_euclid(day_nanos);
            let time = NaiveTime::from_num_seconds_from_midnight_opt(
                (wrapped / 1_000_000_000) as u32,
                (wrapped % 1_000_000_000) as u32,
            )
            .unwrap_or(zt.time);
            Value::ZonedTime(ZonedTime { time, offset: zt.offset })
        }
        _ => Value::Null,
    }
}

fn add_months_to_date(date: NaiveDate, months: i64) -> NaiveDate {
    let total_months = date.year() as i64 * 12 + (date.month() as i64 - 1) + months;
    let year = total_months.div_euclid(12) as i32;
    let month = (total_months.rem_euclid(12) + 1) as u32;
    let day = date.day();
    // Clamp to the last valid day of the target month rather than panicking.
    for d in (1..=day).rev() {
        if let Some(nd) = NaiveDate::from_ymd_opt(year, month, d) {
            return nd;
        }
    }
    date
}

// ============================================================================
// Spatial
// ============================================================================

pub fn point_crs(v: &Value) -> Option<Crs> {
    match v {
        Value::Point2DCartesian { .. } => Some(Crs::Cartesian2D),
        Value::Point3DCartesian { .. } => Some(Crs::Cartesian3D),
        Value::Point2DGeographic { .. } => Some(Crs::Wgs84_2D),
        Value::Point3DGeographic { .. } => Some(Crs::Wgs84_3D),
        _ => None,
    }
}

/// `distance(a, b)`: Euclidean for cartesian points, Haversine for
/// geographic ones; `Null` when either value isn't a point or the CRS tags
/// don't match.
pub fn distance(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Point2DCartesian { x: x1, y: y1 }, Value::Point2DCartesian { x: x2, y: y2 }) => {
            Value::Float(((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt())
        }
        (
            Value::Point3DCartesian { x: x1, y: y1, z: z1 },
            Value::Point3DCartesian { x: x2, y: y2, z: z2 },
        ) => Value::Float(((x1 - x2).powi(2) + (y1 - y2).powi(2) + (z1 - z2).powi(2)).sqrt()),
        (
            Value::Point2DGeographic { longitude: lon1, latitude: lat1 },
            Value::Point2DGeographic { longitude: lon2, latitude: lat2 },
        ) => Value::Float(haversine(*lat1, *lon1, *lat2, *lon2)),
        (
            Value::Point3DGeographic { longitude: lon1, latitude: lat1, height: h1 },
            Value::Point3DGeographic { longitude: lon2, latitude: lat2, height: h2 },
        ) => {
            let surface = haversine(*lat1, *lon1, *lat2, *lon2);
            Value::Float((surface.powi(2) + (h1 - h2).powi(2)).sqrt())
        }
        _ => Value::Null,
    }
}

fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

// ============================================================================
// Temporal construction (spec §4.1)
// ============================================================================

/// Parse an ISO-8601 `P...` duration string into its four components.
/// Recognizes `PnYnMnDTnHnMnS` (with `W` weeks folded into days) and a
/// fractional seconds component. Returns `None` on anything malformed —
/// callers degrade that to `Value::Null`, never a raised error.
pub fn parse_iso_duration(s: &str) -> Option<IsoDuration> {
    let s = s.trim();
    let neg = s.starts_with('-');
    let s = s.strip_prefix('-').unwrap_or(s);
    let s = s.strip_prefix('P')?;
    let (date_part, time_part) = match s.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (s, None),
    };

    let mut months: i64 = 0;
    let mut days: i64 = 0;
    let mut num = String::new();
    for c in date_part.chars() {
        if c.is_ascii_digit() || c == '.' {
            num.push(c);
            continue;
        }
        let n: f64 = num.parse().ok()?;
        num.clear();
        match c {
            'Y' => months += (n * 12.0) as i64,
            'M' => months += n as i64,
            'W' => days += (n * 7.0) as i64,
            'D' => days += n as i64,
            _ => return None,
        }
    }
    if !num.is_empty() {
        return None;
    }

    let mut seconds: i64 = 0;
    let mut nanoseconds: i32 = 0;
    if let Some(time_part) = time_part {
        let mut num = String::new();
        for c in time_part.chars() {
            if c.is_ascii_digit() || c == '.' {
                num.push(c);
                continue;
            }
            let n: f64 = num.parse().ok()?;
            num.clear();
            match c {
                'H' => seconds += (n * 3600.0) as i64,
                'M' => seconds += (n * 60.0) as i64,
                'S' => {
                    seconds += n.trunc() as i64;
                    nanoseconds += (n.fract() * 1_000_000_000.0).round() as i32;
                }
                _ => return None,
            }
        }
        if !num.is_empty() {
            return None;
        }
    }

    if neg {
        months = -months;
        days = -days;
        seconds = -seconds;
        nanoseconds = -nanoseconds;
    }
    Some(IsoDuration { months, days, seconds, nanoseconds })
}

fn lookup_int(map: &IndexMap<String, Value>, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_int)
}

/// `date(...)`: an ISO-8601 string, or a component map `{year, month, day}`
/// (month/day default to 1 when absent). Malformed input degrades to
/// `Value::Null`.
pub fn construct_date(arg: &Value) -> Value {
    match arg {
        Value::Str(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Value::Date).unwrap_or(Value::Null),
        Value::Map(m) => {
            let Some(year) = lookup_int(m, "year") else { return Value::Null };
            let month = lookup_int(m, "month").unwrap_or(1);
            let day = lookup_int(m, "day").unwrap_or(1);
            NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).map(Value::Date).unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

fn time_from_components(m: &IndexMap<String, Value>) -> Option<NaiveTime> {
    let hour = lookup_int(m, "hour").unwrap_or(0);
    let minute = lookup_int(m, "minute").unwrap_or(0);
    let second = lookup_int(m, "second").unwrap_or(0);
    let milli = lookup_int(m, "millisecond").unwrap_or(0);
    let micro = lookup_int(m, "microsecond").unwrap_or(0);
    let nano = lookup_int(m, "nanosecond").unwrap_or(0);
    let total_nanos = milli * 1_000_000 + micro * 1_000 + nano;
    NaiveTime::from_hms_nano_opt(hour as u32, minute as u32, second as u32, total_nanos as u32)
}

fn parse_offset(m: &IndexMap<String, Value>) -> Option<FixedOffset> {
    match m.get("timezone") {
        Some(Value::Str(tz)) => parse_offset_str(tz),
        Some(Value::Int(minutes)) => FixedOffset::east_opt((*minutes as i32) * 60),
        _ => None,
    }
}

fn parse_offset_str(s: &str) -> Option<FixedOffset> {
    if s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = if let Some(r) = s.strip_prefix('+') {
        (1, r)
    } else if let Some(r) = s.strip_prefix('-') {
        (-1, r)
    } else {
        return None;
    };
    let rest = rest.replace(':', "");
    if rest.len() < 2 {
        return None;
    }
    let hours: i32 = rest[0..2].parse().ok()?;
    let minutes: i32 = if rest.len() >= 4 { rest[2..4].parse().ok()? } else { 0 };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// `localtime(...)`.
pub fn construct_local_time(arg: &Value) -> Value {
    match arg {
        Value::Str(s) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .map(Value::LocalTime)
            .unwrap_or(Value::Null),
        Value::Map(m) => time_from_components(m).map(Value::LocalTime).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// `time(...)`: local time plus a UTC offset.
pub fn construct_zoned_time(arg: &Value) -> Value {
    match arg {
        Value::Str(s) => {
            let (time_str, offset) = match s.rfind(['+', '-', 'Z']) {
                Some(idx) if idx > 0 => (&s[..idx], parse_offset_str(&s[idx..])),
                _ => (s.as_str(), FixedOffset::east_opt(0)),
            };
            let Some(offset) = offset else { return Value::Null };
            let Ok(time) = NaiveTime::parse_from_str(time_str, "%H:%M:%S%.f").or_else(|_| NaiveTime::parse_from_str(time_str, "%H:%M")) else {
                return Value::Null;
            };
            Value::ZonedTime(ZonedTime { time, offset })
        }
        Value::Map(m) => {
            let Some(time) = time_from_components(m) else { return Value::Null };
            let offset = parse_offset(m).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
            Value::ZonedTime(ZonedTime { time, offset })
        }
        _ => Value::Null,
    }
}

/// `localdatetime(...)`.
pub fn construct_local_datetime(arg: &Value) -> Value {
    match arg {
        Value::Str(s) => {
            let normalized = s.replacen('T', " ", 1);
            NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M"))
                .map(Value::LocalDateTime)
                .unwrap_or(Value::Null)
        }
        Value::Map(m) => {
            let Some(year) = lookup_int(m, "year") else { return Value::Null };
            let month = lookup_int(m, "month").unwrap_or(1);
            let day = lookup_int(m, "day").unwrap_or(1);
            let (Some(date), Some(time)) =
                (NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32), time_from_components(m))
            else {
                return Value::Null;
            };
            Value::LocalDateTime(NaiveDateTime::new(date, time))
        }
        _ => Value::Null,
    }
}

/// `datetime(...)`.
pub fn construct_zoned_datetime(arg: &Value) -> Value {
    match arg {
        Value::Str(s) => DateTime::parse_from_rfc3339(s)
            .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
            .map(Value::ZonedDateTime)
            .unwrap_or(Value::Null),
        Value::Map(m) => {
            let Value::LocalDateTime(ndt) = construct_local_datetime(arg) else { return Value::Null };
            let offset = parse_offset(m).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
            match offset.from_local_datetime(&ndt).single() {
                Some(dt) => Value::ZonedDateTime(dt),
                None => Value::Null,
            }
        }
        _ => Value::Null,
    }
}

/// `duration(...)`: an ISO-8601 string or a component map.
pub fn construct_duration(arg: &Value) -> Value {
    match arg {
        Value::Str(s) => parse_iso_duration(s).map(Value::Duration).unwrap_or(Value::Null),
        Value::Map(m) => {
            let years = lookup_int(m, "years").unwrap_or(0) * 12;
            let months = lookup_int(m, "months").unwrap_or(0) + years;
            let weeks = lookup_int(m, "weeks").unwrap_or(0) * 7;
            let days = lookup_int(m, "days").unwrap_or(0) + weeks;
            let hours = lookup_int(m, "hours").unwrap_or(0) * 3600;
            let minutes = lookup_int(m, "minutes").unwrap_or(0) * 60;
            let seconds = lookup_int(m, "seconds").unwrap_or(0) + hours + minutes;
            let nanoseconds = (lookup_int(m, "milliseconds").unwrap_or(0) * 1_000_000
                + lookup_int(m, "microseconds").unwrap_or(0) * 1_000
                + lookup_int(m, "nanoseconds").unwrap_or(0)) as i32;
            Value::Duration(IsoDuration { months, days, seconds, nanoseconds })
        }
        _ => Value::Null,
    }
}

/// Temporal component accessor used by property access on a temporal value
/// (e.g. `d.year`, `t.hour`, `dur.months`) — spec §4.1's component keys.
pub fn temporal_component(value: &Value, key: &str) -> Value {
    match value {
        Value::Date(d) => match key {
            "year" => Value::Int(d.year() as i64),
            "month" => Value::Int(d.month() as i64),
            "day" => Value::Int(d.day() as i64),
            "dayOfWeek" => Value::Int(d.weekday().number_from_monday() as i64),
            "dayOfYear" => Value::Int(d.ordinal() as i64),
            "week" => Value::Int(d.iso_week().week() as i64),
            "quarter" => Value::Int((d.month() as i64 - 1) / 3 + 1),
            _ => Value::Null,
        },
        Value::LocalTime(t) => time_component(t, key),
        Value::ZonedTime(zt) => match key {
            "timezone" | "offset" => Value::Str(zt.offset.to_string()),
            _ => time_component(&zt.time, key),
        },
        Value::LocalDateTime(dt) => match key {
            "year" | "month" | "day" | "dayOfWeek" | "dayOfYear" | "week" | "quarter" => {
                temporal_component(&Value::Date(dt.date()), key)
            }
            _ => time_component(&dt.time(), key),
        },
        Value::ZonedDateTime(dt) => match key {
            "year" | "month" | "day" | "dayOfWeek" | "dayOfYear" | "week" | "quarter" => {
                temporal_component(&Value::Date(dt.date_naive()), key)
            }
            "timezone" | "offset" => Value::Str(dt.offset().to_string()),
            "epochSeconds" => Value::Int(dt.timestamp()),
            "epochMillis" => Value::Int(dt.timestamp_millis()),
            _ => time_component(&dt.time(), key),
        },
        Value::Duration(d) => match key {
            "months" => Value::Int(d.months),
            "days" => Value::Int(d.days),
            "seconds" => Value::Int(d.seconds),
            "nanoseconds" => Value::Int(d.nanoseconds as i64),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

fn time_component(t: &NaiveTime, key: &str) -> Value {
    match key {
        "hour" => Value::Int(t.hour() as i64),
        "minute" => Value::Int(t.minute() as i64),
        "second" => Value::Int(t.second() as i64),
        "millisecond" => Value::Int((t.nanosecond() / 1_000_000) as i64),
        "microsecond" => Value::Int((t.nanosecond() / 1_000) as i64),
        "nanosecond" => Value::Int(t.nanosecond() as i64),
        _ => Value::Null,
    }
}

// ============================================================================
// Spatial construction
// ============================================================================

/// `point({...})`: dispatches on which coordinate keys are present —
/// `x`/`y`(/`z`) for cartesian, `longitude`/`latitude`(/`height`) for
/// geographic.
pub fn construct_point(arg: &Value) -> Value {
    let Value::Map(m) = arg else { return Value::Null };
    let x = m.get("x").and_then(Value::as_float);
    let y = m.get("y").and_then(Value::as_float);
    let z = m.get("z").and_then(Value::as_float);
    let lon = m.get("longitude").or_else(|| m.get("lon")).and_then(Value::as_float);
    let lat = m.get("latitude").or_else(|| m.get("lat")).and_then(Value::as_float);
    let height = m.get("height").and_then(Value::as_float);
    match (x, y, z, lon, lat, height) {
        (Some(x), Some(y), Some(z), ..) => Value::Point3DCartesian { x, y, z },
        (Some(x), Some(y), None, ..) => Value::Point2DCartesian { x, y },
        (.., Some(lon), Some(lat), Some(height)) => Value::Point3DGeographic { longitude: lon, latitude: lat, height },
        (.., Some(lon), Some(lat), None) => Value::Point2DGeographic { longitude: lon, latitude: lat },
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::Str("hello".into()));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(3.14), Value::Float(3.14));
        assert_eq!(Value::from(true), Value::Bool(true));
    }

    #[test]
    fn test_null_comparison() {
        assert_eq!(Value::Null.cypher_cmp(&Value::Null), None);
        assert_eq!(Value::Null.cypher_cmp(&Value::Int(1)), None);
        assert_eq!(Value::Null.eq3(&Value::Null), None);
    }

    #[test]
    fn test_numeric_comparison() {
        assert_eq!(Value::Int(1).cypher_cmp(&Value::Float(1.5)), Some(std::cmp::Ordering::Less));
    }

    #[test]
    fn test_division_by_zero_is_null() {
        assert_eq!(div(&Value::Int(1), &Value::Int(0)), Ok(Value::Null));
        assert_eq!(modulo(&Value::Int(1), &Value::Int(0)), Ok(Value::Null));
    }

    #[test]
    fn test_arithmetic_null_propagation() {
        assert_eq!(add(&Value::Int(1), &Value::Null), Ok(Value::Null));
        assert_eq!(mul(&Value::Int(1), &Value::Null), Ok(Value::Null));
        assert_eq!(div(&Value::Null, &Value::Int(1)), Ok(Value::Null));
        assert_eq!(modulo(&Value::Null, &Value::Int(1)), Ok(Value::Null));
    }

    #[test]
    fn test_power_integral_rule() {
        assert_eq!(pow(&Value::Int(2), &Value::Int(10)), Ok(Value::Int(1024)));
        assert_eq!(pow(&Value::Int(2), &Value::Float(0.5)), Ok(Value::Float(2f64.sqrt())));
    }

    #[test]
    fn test_three_valued_logic() {
        assert_eq!(logical_and(&Value::Bool(false), &Value::Null), Value::Bool(false));
        assert_eq!(logical_and(&Value::Bool(true), &Value::Null), Value::Null);
        assert_eq!(logical_or(&Value::Bool(true), &Value::Null), Value::Bool(true));
        assert_eq!(logical_or(&Value::Bool(false), &Value::Null), Value::Null);
        assert_eq!(logical_not(&Value::Null), Value::Null);
        assert_eq!(logical_xor(&Value::Bool(true), &Value::Null), Value::Null);
        assert_eq!(logical_xor(&Value::Bool(true), &Value::Bool(false)), Value::Bool(true));
    }

    #[test]
    fn test_in_list_semantics() {
        let list = vec![Value::Int(1), Value::Null, Value::Int(3)];
        assert_eq!(Value::Int(1).in_list(&list), Value::Bool(true));
        assert_eq!(Value::Int(2).in_list(&list), Value::Null);
        assert_eq!(Value::Null.in_list(&list), Value::Null);
    }

    #[test]
    fn test_distance_mismatched_crs_is_null() {
        let cart = Value::Point2DCartesian { x: 0.0, y: 0.0 };
        let geo = Value::Point2DGeographic { longitude: 0.0, latitude: 0.0 };
        assert_eq!(distance(&cart, &geo), Value::Null);
    }
}
