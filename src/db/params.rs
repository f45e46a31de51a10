// Named Query Parameters
// Ordered name -> value pairs bound to SQL text or stored procedure arguments

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::db::traits::CellValue;

/// Format used for date/time cells; accepted by chrono's serde impls
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Ordered set of named parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, CellValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, replacing any earlier one with the same name
    pub fn add(&mut self, name: impl AsRef<str>, value: impl Into<CellValue>) -> &mut Self {
        let name = normalize_name(name.as_ref()).to_string();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    /// Builder form of [`Params::add`]
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<CellValue>) -> Self {
        self.add(name, value);
        self
    }

    /// Look up a parameter by name, ignoring case and any `@`/`:` prefix
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.find(name).map(|(_, value)| value)
    }

    /// Index and value of a parameter
    pub(crate) fn find(&self, name: &str) -> Option<(usize, &CellValue)> {
        let name = normalize_name(name);
        self.entries
            .iter()
            .enumerate()
            .find(|(_, (existing, _))| existing.eq_ignore_ascii_case(name))
            .map(|(idx, (_, value))| (idx, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: AsRef<str>, V: Into<CellValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.add(name, value);
        }
        params
    }
}

/// Strip the `@` (T-SQL) or `:` prefix callers sometimes include
fn normalize_name(name: &str) -> &str {
    name.trim_start_matches(['@', ':'])
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<i16> for CellValue {
    fn from(value: i16) -> Self {
        CellValue::Int(value as i64)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Int(value as i64)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<f32> for CellValue {
    fn from(value: f32) -> Self {
        CellValue::Float(value as f64)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(value: Vec<u8>) -> Self {
        CellValue::Binary(value)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        CellValue::DateTime(value.format(DATETIME_FORMAT).to_string())
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::DateTime(value.to_string())
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(value: DateTime<Utc>) -> Self {
        CellValue::DateTime(value.to_rfc3339())
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_strips_prefix_and_replaces() {
        let mut params = Params::new();
        params.add("@UserId", 1).add(":name", "alice").add("userid", 2);

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("UserId"), Some(&CellValue::Int(2)));
        assert_eq!(params.get("@NAME"), Some(&CellValue::String("alice".to_string())));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let params: Params = vec![("b", 1), ("a", 2), ("c", 3)].into_iter().collect();
        let names: Vec<&str> = params.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_optional_values() {
        let params = Params::new()
            .with("phone", None::<String>)
            .with("email", Some("a@example.com"));

        assert!(params.get("phone").unwrap().is_null());
        assert_eq!(
            params.get("email"),
            Some(&CellValue::String("a@example.com".to_string()))
        );
    }

    #[test]
    fn test_datetime_format() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        assert_eq!(
            CellValue::from(dt),
            CellValue::DateTime("2024-05-06T07:08:09".to_string())
        );
    }
}
