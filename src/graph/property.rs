//! Typed property values

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A value held under a property key.
///
/// Integers and floats keep their width through storage. `Array` and `Map`
/// nest arbitrarily; index collections expand them into one term per leaf.
/// `Blob` carries opaque bytes that are stored but never indexed. `Null`
/// only appears in results and is rejected on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Int32(i32),
    Float(f64),
    Float32(f32),
    Boolean(bool),
    /// Milliseconds since the Unix epoch
    DateTime(i64),
    Array(Vec<PropertyValue>),
    Map(HashMap<String, PropertyValue>),
    Blob(Vec<u8>),
    Null,
}

/// Whole property bag of one element
pub type PropertyMap = HashMap<String, PropertyValue>;

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_string(&self) -> Option<&str> {
        if let Self::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Integer of either width, widened
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Self::Integer(i) => Some(i),
            Self::Int32(i) => Some(i64::from(i)),
            _ => None,
        }
    }

    /// Float of either width, widened
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Self::Float(f) => Some(f),
            Self::Float32(f) => Some(f64::from(f)),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        if let Self::Boolean(b) = *self {
            Some(b)
        } else {
            None
        }
    }

    pub fn as_datetime(&self) -> Option<i64> {
        if let Self::DateTime(ms) = *self {
            Some(ms)
        } else {
            None
        }
    }

    pub fn as_array(&self) -> Option<&Vec<PropertyValue>> {
        if let Self::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }

    pub fn as_map(&self) -> Option<&PropertyMap> {
        if let Self::Map(entries) = self {
            Some(entries)
        } else {
            None
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Self::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Variant name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Integer(_) => "Integer",
            Self::Int32(_) => "Int32",
            Self::Float(_) => "Float",
            Self::Float32(_) => "Float32",
            Self::Boolean(_) => "Boolean",
            Self::DateTime(_) => "DateTime",
            Self::Array(_) => "Array",
            Self::Map(_) => "Map",
            Self::Blob(_) => "Blob",
            Self::Null => "Null",
        }
    }

    /// Fails with the type name of the first component a property store
    /// cannot hold: `Null` at any depth, or a NaN float.
    pub fn check_storable(&self) -> Result<(), &'static str> {
        match self {
            Self::Null => Err("Null"),
            Self::Float(f) if f.is_nan() => Err("Float(NaN)"),
            Self::Float32(f) if f.is_nan() => Err("Float32(NaN)"),
            Self::Array(items) => items.iter().try_for_each(Self::check_storable),
            Self::Map(entries) => entries.values().try_for_each(Self::check_storable),
            _ => Ok(()),
        }
    }
}

fn write_joined<T, I, F>(f: &mut fmt::Formatter<'_>, items: I, mut each: F) -> fmt::Result
where
    I: IntoIterator<Item = T>,
    F: FnMut(&mut fmt::Formatter<'_>, T) -> fmt::Result,
{
    for (n, item) in items.into_iter().enumerate() {
        if n > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    Ok(())
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{:?}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Int32(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Float32(x) => write!(f, "{}", x),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::DateTime(ms) => write!(f, "DateTime({})", ms),
            Self::Array(items) => {
                f.write_str("[")?;
                write_joined(f, items, |f, item| write!(f, "{}", item))?;
                f.write_str("]")
            }
            Self::Map(entries) => {
                // Sorted so output is stable
                let mut sorted: Vec<_> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(b.0));
                f.write_str("{")?;
                write_joined(f, sorted, |f, (k, v)| write!(f, "{}: {}", k, v))?;
                f.write_str("}")
            }
            Self::Blob(bytes) => write!(f, "Blob({} bytes)", bytes.len()),
            Self::Null => f.write_str("null"),
        }
    }
}

macro_rules! property_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for PropertyValue {
                fn from(value: $source) -> Self {
                    PropertyValue::$variant(value)
                }
            }
        )*
    };
}

property_from! {
    String => String,
    i64 => Integer,
    i32 => Int32,
    f64 => Float,
    f32 => Float32,
    bool => Boolean,
    Vec<PropertyValue> => Array,
    PropertyMap => Map,
    Vec<u8> => Blob,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_keep_width() {
        assert_eq!(PropertyValue::from(29i32), PropertyValue::Int32(29));
        assert_eq!(PropertyValue::from(29i64), PropertyValue::Integer(29));
        assert_eq!(PropertyValue::from(0.5f32), PropertyValue::Float32(0.5));
        assert_eq!(PropertyValue::from("a").as_string(), Some("a"));
        assert_eq!(PropertyValue::from(vec![1u8, 2]).as_blob(), Some(&[1u8, 2][..]));

        // Accessors widen
        assert_eq!(PropertyValue::Int32(7).as_integer(), Some(7));
        assert_eq!(PropertyValue::Float32(0.25).as_float(), Some(0.25));
        assert_eq!(PropertyValue::Boolean(true).as_integer(), None);
    }

    #[test]
    fn test_check_storable() {
        assert!(PropertyValue::DateTime(0).check_storable().is_ok());
        assert_eq!(PropertyValue::Null.check_storable(), Err("Null"));
        assert_eq!(
            PropertyValue::Float32(f32::NAN).check_storable(),
            Err("Float32(NaN)")
        );

        let nested = PropertyValue::Array(vec![1i64.into(), PropertyValue::Null]);
        assert_eq!(nested.check_storable(), Err("Null"));

        let mut inner = PropertyMap::new();
        inner.insert("x".to_string(), PropertyValue::Float(f64::NAN));
        let mut outer = PropertyMap::new();
        outer.insert("inner".to_string(), PropertyValue::Map(inner));
        assert_eq!(PropertyValue::Map(outer).check_storable(), Err("Float(NaN)"));
    }

    #[test]
    fn test_display() {
        let mut map = PropertyMap::new();
        map.insert("b".to_string(), PropertyValue::Integer(2));
        map.insert("a".to_string(), PropertyValue::from("x"));
        assert_eq!(PropertyValue::Map(map).to_string(), "{a: \"x\", b: 2}");
        assert_eq!(
            PropertyValue::Array(vec![1i64.into(), true.into()]).to_string(),
            "[1, true]"
        );
        assert_eq!(PropertyValue::Blob(vec![0; 4]).to_string(), "Blob(4 bytes)");
    }

    #[test]
    fn test_bincode_round_trip_keeps_width() {
        for value in [
            PropertyValue::Int32(7),
            PropertyValue::Float32(0.25),
            PropertyValue::Blob(vec![9, 8]),
        ] {
            let bytes = bincode::serialize(&value).unwrap();
            let back: PropertyValue = bincode::deserialize(&bytes).unwrap();
            assert_eq!(back, value);
        }
    }
}
