// Row Mapping
// Maps result rows onto caller types by column name

use serde::de::{self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, Visitor};
use serde::{forward_to_deserialize_any, Deserializer};
use serde_json::Value;

use crate::db::traits::{CellValue, DatabaseError, Row};

/// Map one row onto `T`.
///
/// Struct targets pick up columns by field name, ignoring ASCII case; columns with
/// no matching field are skipped. A row with a single column also maps onto a
/// scalar target (`i64`, `String`, ...).
pub fn from_row<T: DeserializeOwned>(row: &Row) -> Result<T, DatabaseError> {
    T::deserialize(RowDeserializer { row }).map_err(DatabaseError::Mapping)
}

/// Map every row, keeping order
pub fn from_rows<T: DeserializeOwned>(rows: &[Row]) -> Result<Vec<T>, DatabaseError> {
    rows.iter().map(from_row).collect()
}

struct RowDeserializer<'a> {
    row: &'a Row,
}

impl<'a> RowDeserializer<'a> {
    fn single_value(&self) -> Option<Value> {
        match self.row.values() {
            [only] => Some(only.clone().into()),
            _ => None,
        }
    }

    fn map_access(&self, fields: &'static [&'static str]) -> RowMapAccess<'a> {
        RowMapAccess {
            columns: Box::new(self.row.iter()),
            fields,
            value: None,
        }
    }
}

impl<'de, 'a> Deserializer<'de> for RowDeserializer<'a> {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.single_value() {
            Some(value) => value.deserialize_any(visitor),
            None => visitor.visit_map(self.map_access(&[])),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.single_value() {
            Some(value) => value.deserialize_option(visitor),
            None => visitor.visit_some(self),
        }
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_map(self.map_access(&[]))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_map(self.map_access(fields))
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple
        tuple_struct enum identifier ignored_any
    }
}

struct RowMapAccess<'a> {
    columns: Box<dyn Iterator<Item = (&'a str, &'a CellValue)> + 'a>,
    fields: &'static [&'static str],
    value: Option<&'a CellValue>,
}

impl<'de, 'a> MapAccess<'de> for RowMapAccess<'a> {
    type Error = serde_json::Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        let Some((column, value)) = self.columns.next() else {
            return Ok(None);
        };
        self.value = Some(value);

        let key = self
            .fields
            .iter()
            .copied()
            .find(|field| field.eq_ignore_ascii_case(column))
            .unwrap_or(column);
        let key: de::value::StrDeserializer<'_, serde_json::Error> = key.into_deserializer();
        seed.deserialize(key).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| de::Error::custom("value requested before key"))?;
        seed.deserialize(Value::from(value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "PascalCase")]
    struct User {
        username: Option<String>,
        phone: Option<String>,
        email: Option<String>,
    }

    fn row(columns: &[&str], values: Vec<CellValue>) -> Row {
        Row::new(columns.iter().map(|c| c.to_string()).collect(), values)
    }

    #[test]
    fn test_maps_columns_ignoring_case() {
        let row = row(
            &["username", "PHONE", "Email"],
            vec![
                CellValue::String("alice".to_string()),
                CellValue::Null,
                CellValue::String("alice@example.com".to_string()),
            ],
        );

        let user: User = from_row(&row).unwrap();
        assert_eq!(
            user,
            User {
                username: Some("alice".to_string()),
                phone: None,
                email: Some("alice@example.com".to_string()),
            }
        );
    }

    #[test]
    fn test_extra_and_missing_columns() {
        let row = row(
            &["Id", "Username"],
            vec![CellValue::Int(3), CellValue::String("bob".to_string())],
        );

        let user: User = from_row(&row).unwrap();
        assert_eq!(user.username.as_deref(), Some("bob"));
        assert_eq!(user.phone, None);
        assert_eq!(user.email, None);
    }

    #[test]
    fn test_scalar_targets() {
        let count = row(&[""], vec![CellValue::Int(42)]);
        assert_eq!(from_row::<i64>(&count).unwrap(), 42);

        let name = row(&["name"], vec![CellValue::String("carol".to_string())]);
        assert_eq!(from_row::<String>(&name).unwrap(), "carol");

        let missing = row(&["name"], vec![CellValue::Null]);
        assert_eq!(from_row::<Option<String>>(&missing).unwrap(), None);
    }

    #[test]
    fn test_typed_fields() {
        #[derive(Debug, Deserialize)]
        struct Audit {
            id: i32,
            active: bool,
            created_at: NaiveDateTime,
        }

        let row = row(
            &["ID", "Active", "CREATED_AT"],
            vec![
                CellValue::Int(9),
                CellValue::Bool(true),
                CellValue::DateTime("2024-01-02T03:04:05".to_string()),
            ],
        );

        let audit: Audit = from_row(&row).unwrap();
        assert_eq!(audit.id, 9);
        assert!(audit.active);
        assert_eq!(audit.created_at.to_string(), "2024-01-02 03:04:05");
    }

    #[test]
    fn test_type_mismatch_is_a_mapping_error() {
        #[derive(Debug, Deserialize)]
        struct Counter {
            #[allow(dead_code)]
            total: i64,
        }

        let row = row(&["total"], vec![CellValue::String("many".to_string())]);
        let err = from_row::<Counter>(&row).unwrap_err();
        assert!(matches!(err, DatabaseError::Mapping(_)));
    }

    #[test]
    fn test_dynamic_rows() {
        let rows = vec![
            row(&["a", "b"], vec![CellValue::Int(1), CellValue::Bool(false)]),
            row(&["a", "b"], vec![CellValue::Int(2), CellValue::Bool(true)]),
        ];

        let values: Vec<serde_json::Value> = from_rows(&rows).unwrap();
        assert_eq!(values[0], serde_json::json!({"a": 1, "b": false}));
        assert_eq!(values[1], serde_json::json!({"a": 2, "b": true}));
    }
}
