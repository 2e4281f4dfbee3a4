//! `COPY ... FROM STDIN` command text.

use crate::config::{CopyFormat, CopyOptions, DEFAULT_DELIMITER};

/// Escape a PostgreSQL identifier: always double-quoted, embedded `"` doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a string literal for use in a COPY option list.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The table (and optional column list) a session loads into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    pub schema: Option<String>,
    pub table: String,
    /// Empty means all columns in table order.
    pub columns: Vec<String>,
}

impl CopyTarget {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// `"schema"."table"` or `"table"`.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.table)),
            None => quote_ident(&self.table),
        }
    }

    /// Build the COPY command for these options.
    pub fn copy_command(&self, options: &CopyOptions) -> String {
        let mut sql = format!("COPY {}", self.qualified_name());
        if !self.columns.is_empty() {
            let cols: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&format!(" ({})", cols.join(", ")));
        }
        sql.push_str(" FROM STDIN ");
        match options.format {
            CopyFormat::Binary => sql.push_str("(FORMAT binary)"),
            CopyFormat::Text => {
                sql.push_str("(FORMAT text, NULL ");
                sql.push_str(&quote_literal(&options.null_marker));
                if options.delimiter != DEFAULT_DELIMITER {
                    sql.push_str(", DELIMITER ");
                    sql.push_str(&quote_literal(&options.delimiter.to_string()));
                }
                sql.push(')');
            }
        }
        sql
    }
}
