//! External tables: client-side tables shipped alongside a query.
//!
//! Rows are appended row-wise but stored column-major, which is the layout the native block
//! codec writes.
use std::collections::HashSet;

use crate::types::Type;
use crate::value::Value;
use crate::{Error, Result};

/// Declared name and ClickHouse type of an external-table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name:      String,
    pub type_name: String,
}

/// Describe a column by name and ClickHouse type name, e.g. `column("col1", "UInt8")`.
pub fn column(name: impl Into<String>, type_name: impl Into<String>) -> ColumnDef {
    ColumnDef { name: name.into(), type_name: type_name.into() }
}

#[derive(Debug, Clone)]
pub(crate) struct ExternalColumn {
    pub(crate) name:   String,
    pub(crate) ty:     Type,
    pub(crate) values: Vec<Value>,
}

/// An in-memory table referenceable by name from the query it is attached to.
#[derive(Debug, Clone)]
pub struct ExternalTable {
    name:    String,
    columns: Vec<ExternalColumn>,
    rows:    usize,
}

impl ExternalTable {
    /// Create an empty table.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an empty table name, no columns, an empty or
    /// duplicate column name, or an unknown column type.
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = ColumnDef>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("external table name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        let columns = columns
            .into_iter()
            .map(|def| {
                if def.name.trim().is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "external table {name}: column name must not be empty"
                    )));
                }
                if !seen.insert(def.name.clone()) {
                    return Err(Error::InvalidArgument(format!(
                        "external table {name}: duplicate column {}",
                        def.name
                    )));
                }
                let ty = def.type_name.parse::<Type>()?;
                Ok(ExternalColumn { name: def.name, ty, values: Vec::new() })
            })
            .collect::<Result<Vec<_>>>()?;

        if columns.is_empty() {
            return Err(Error::InvalidArgument(format!("external table {name} has no columns")));
        }

        Ok(Self { name, columns, rows: 0 })
    }

    /// Append one row. On error the table is left unchanged.
    ///
    /// # Errors
    /// Returns [`Error::ArityMismatch`] if the value count differs from the column count and
    /// [`Error::TypeMismatch`] if a value cannot be represented as its column's type.
    pub fn append<I, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<Value>>();
        if values.len() != self.columns.len() {
            return Err(Error::ArityMismatch {
                expected: self.columns.len(),
                provided: values.len(),
            });
        }

        let row = self
            .columns
            .iter()
            .zip(values)
            .map(|(column, value)| {
                column.ty.coerce(value).map_err(|e| e.with_column_name(&column.name))
            })
            .collect::<Result<Vec<_>>>()?;

        for (column, value) in self.columns.iter_mut().zip(row) {
            column.values.push(value);
        }
        self.rows += 1;
        Ok(())
    }

    pub fn name(&self) -> &str { &self.name }

    /// Column names and types in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.columns.iter().map(|c| (c.name.as_str(), &c.ty))
    }

    pub fn len(&self) -> usize { self.rows }

    pub fn is_empty(&self) -> bool { self.rows == 0 }

    pub(crate) fn data(&self) -> &[ExternalColumn] { &self.columns }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::ErrorKind;

    fn table(name: &str) -> Result<ExternalTable> {
        ExternalTable::new(name, [
            column("col1", "UInt8"),
            column("col2", "String"),
            column("col3", "DateTime"),
        ])
    }

    #[test]
    fn test_append_rows_in_order() {
        let mut t = table("external_table_1").unwrap();
        for i in 0..10_u8 {
            t.append([
                Value::from(i),
                Value::from(format!("value_{i}")),
                Value::from(Utc::now()),
            ])
            .unwrap();
        }
        assert_eq!(t.len(), 10);
        assert_eq!(t.name(), "external_table_1");
        let col1 = &t.data()[0].values;
        assert_eq!(col1.first(), Some(&Value::UInt8(0)));
        assert_eq!(col1.last(), Some(&Value::UInt8(9)));
        assert!(t.data().iter().all(|c| c.values.len() == 10));
        assert_eq!(
            t.columns().map(|(n, ty)| format!("{n} {ty}")).collect::<Vec<_>>(),
            ["col1 UInt8", "col2 String", "col3 DateTime"]
        );
    }

    #[test]
    fn test_new_rejects_bad_definitions() {
        assert_eq!(table("").unwrap_err().kind(), ErrorKind::InvalidArgument);
        let no_columns = ExternalTable::new("t", Vec::<ColumnDef>::new()).unwrap_err();
        assert_eq!(no_columns.kind(), ErrorKind::InvalidArgument);
        let bad_type = ExternalTable::new("t", [column("a", "Uint8")]).unwrap_err();
        assert_eq!(bad_type.kind(), ErrorKind::InvalidArgument);
        let duplicate = ExternalTable::new("t", [column("a", "UInt8"), column("a", "String")]);
        assert_eq!(duplicate.unwrap_err().kind(), ErrorKind::InvalidArgument);
        let unnamed = ExternalTable::new("t", [column("", "UInt8")]).unwrap_err();
        assert_eq!(unnamed.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_append_errors_leave_table_unchanged() {
        let mut t = table("t").unwrap();
        let arity = t.append([Value::from(1_u8), Value::from("x")]).unwrap_err();
        assert!(matches!(arity, Error::ArityMismatch { expected: 3, provided: 2 }));

        let mismatch = t
            .append([Value::from(1_u8), Value::from(2_u8), Value::from(Utc::now())])
            .unwrap_err();
        assert_eq!(mismatch.kind(), ErrorKind::TypeMismatch);
        assert!(mismatch.to_string().contains("col2"));

        let overflow = t
            .append([Value::from(300_u16), Value::from("x"), Value::from(Utc::now())])
            .unwrap_err();
        assert_eq!(overflow.kind(), ErrorKind::TypeMismatch);

        assert!(t.is_empty());
        assert!(t.data().iter().all(|c| c.values.is_empty()));
    }
}
