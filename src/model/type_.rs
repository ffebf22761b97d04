//! `Type` — a parallel enum to `Value` used by type predicates and
//! internal type-error messages, keeping "what shape is this value" separate
//! from "what is this value" (spec §9 design note: avoid dynamic typing
//! spread through the value representation itself).

use super::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Node,
    Rel,
    Path,
    Date,
    LocalTime,
    ZonedTime,
    LocalDateTime,
    ZonedDateTime,
    Duration,
    Point,
}

impl Type {
    pub fn of(value: &Value) -> Type {
        match value {
            Value::Null => Type::Null,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::Str,
            Value::List(_) => Type::List,
            Value::Map(_) => Type::Map,
            Value::Node(_) => Type::Node,
            Value::Rel(_) => Type::Rel,
            Value::Path(_) => Type::Path,
            Value::Date(_) => Type::Date,
            Value::LocalTime(_) => Type::LocalTime,
            Value::ZonedTime(_) => Type::ZonedTime,
            Value::LocalDateTime(_) => Type::LocalDateTime,
            Value::ZonedDateTime(_) => Type::ZonedDateTime,
            Value::Duration(_) => Type::Duration,
            Value::Point2DCartesian { .. }
            | Value::Point3DCartesian { .. }
            | Value::Point2DGeographic { .. }
            | Value::Point3DGeographic { .. } => Type::Point,
        }
    }

    /// Is this a value restricted to scalar/temporal/spatial, or a
    /// homogeneous list of such — i.e. legal at the property-storage
    /// boundary (spec §3.1).
    pub fn is_property_legal(value: &Value) -> bool {
        match value {
            Value::Map(_) | Value::Node(_) | Value::Rel(_) | Value::Path(_) => false,
            Value::List(items) => {
                let mut elem_ty: Option<Type> = None;
                for item in items {
                    if !Self::is_scalar_like(item) {
                        return false;
                    }
                    let ty = Type::of(item);
                    if ty == Type::Null {
                        continue;
                    }
                    match elem_ty {
                        None => elem_ty = Some(ty),
                        Some(t) if t == ty => {}
                        Some(_) => return false,
                    }
                }
                true
            }
            other => Self::is_scalar_like(other),
        }
    }

    fn is_scalar_like(value: &Value) -> bool {
        !matches!(value, Value::Map(_) | Value::Node(_) | Value::Rel(_) | Value::Path(_) | Value::List(_))
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Type::Null => "NULL",
            Type::Bool => "BOOLEAN",
            Type::Int => "INTEGER",
            Type::Float => "FLOAT",
            Type::Str => "STRING",
            Type::List => "LIST",
            Type::Map => "MAP",
            Type::Node => "NODE",
            Type::Rel => "RELATIONSHIP",
            Type::Path => "PATH",
            Type::Date => "DATE",
            Type::LocalTime => "LOCAL_TIME",
            Type::ZonedTime => "ZONED_TIME",
            Type::LocalDateTime => "LOCAL_DATETIME",
            Type::ZonedDateTime => "ZONED_DATETIME",
            Type::Duration => "DURATION",
            Type::Point => "POINT",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_legality() {
        assert!(Type::is_property_legal(&Value::Int(1)));
        assert!(Type::is_property_legal(&Value::List(vec![Value::Int(1), Value::Int(2)])));
        assert!(!Type::is_property_legal(&Value::List(vec![Value::Int(1), Value::Str("x".into())])));
        assert!(!Type::is_property_legal(&Value::Map(Default::default())));
    }
}
