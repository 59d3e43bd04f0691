//! Structured SQL statements issued by the ledger writer.
//!
//! Statements are built as values and rendered to parameterised SQL
//! (`$n` placeholders) by [`SqlStatement`]. Backends may either execute the
//! rendered text or interpret the structure directly, as
//! [`MemoryStorage`](super::memory_storage::MemoryStorage) does.

use std::fmt;

/// A single column value as stored or bound to a statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    /// Timestamp rendered as `YYYY-MM-DD HH:MM:SS`.
    Timestamp(String),
}

impl SqlValue {
    /// Text form of the value, the way a driver returns a row as strings.
    ///
    /// `NULL` renders as the empty string and byte arrays as their raw bytes.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Text(s) | SqlValue::Timestamp(s) => s.clone(),
            SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Raw bytes of the value; text is taken as its UTF-8 encoding.
    pub fn raw_bytes(&self) -> Vec<u8> {
        match self {
            SqlValue::Bytes(b) => b.clone(),
            other => other.render().into_bytes(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Renders the value as an inline SQL literal, doubling single quotes.
    pub fn literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Text(s) | SqlValue::Timestamp(s) => quote(s),
            SqlValue::Bytes(b) => format!("decode('{}','HEX')", hex::encode(b)),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(b: Vec<u8>) -> Self {
        SqlValue::Bytes(b)
    }
}

/// Single-quotes a string, doubling embedded quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Right-hand side of an assignment or inserted value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// Plain value.
    Value(SqlValue),
    /// `column + value`
    Add(SqlValue),
    /// `column - value`
    Sub(SqlValue),
    /// `to_timestamp(value)` from unix seconds.
    ToTimestamp(SqlValue),
    /// `timestamp '...'` literal.
    TimestampLiteral(String),
}

/// AND-joined `column = value` conditions. Empty means "every row".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(pub Vec<(String, SqlValue)>);

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.0.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn conditions(&self) -> &[(String, SqlValue)] {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub selector: Selector,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub selector: Selector,
}

/// Rendered statement text plus its positional parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqlStatement {
    pub text: String,
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    fn new() -> Self {
        Self {
            text: String::new(),
            params: Vec::new(),
        }
    }

    /// Binds a parameter and returns its placeholder.
    fn bind(&mut self, value: &SqlValue) -> String {
        self.params.push(value.clone());
        format!("${}", self.params.len())
    }

    fn expr(&mut self, column: &str, expr: &Expr) -> String {
        match expr {
            Expr::Value(SqlValue::Null) => "NULL".to_string(),
            Expr::Value(v) => self.bind(v),
            Expr::Add(v) => format!("{column} + {}", self.bind(v)),
            Expr::Sub(v) => format!("{column} - {}", self.bind(v)),
            Expr::ToTimestamp(v) => format!("to_timestamp({})", self.bind(v)),
            Expr::TimestampLiteral(s) => {
                format!("{}::timestamp", self.bind(&SqlValue::Timestamp(s.clone())))
            }
        }
    }

    fn selector(&mut self, selector: &Selector) {
        if selector.is_empty() {
            return;
        }
        let conditions: Vec<String> = selector
            .conditions()
            .iter()
            .map(|(column, value)| format!("{column} = {}", self.bind(value)))
            .collect();
        self.text.push_str(" WHERE ");
        self.text.push_str(&conditions.join(" AND "));
    }

    /// Statement text with every parameter inlined as a literal.
    ///
    /// Only meant for logging; execution should bind `params`.
    pub fn inline(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut chars = self.text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            match digits
                .parse::<usize>()
                .ok()
                .and_then(|i| self.params.get(i.wrapping_sub(1)))
            {
                Some(value) => out.push_str(&value.literal()),
                None => {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
        }
        out
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Select {
    pub fn to_sql(&self) -> SqlStatement {
        let mut stmt = SqlStatement::new();
        stmt.text = format!(
            "SELECT {} FROM \"{}\"",
            self.columns.join(", "),
            self.table
        );
        stmt.selector(&self.selector);
        stmt
    }
}

impl Insert {
    pub fn to_sql(&self) -> SqlStatement {
        let mut stmt = SqlStatement::new();
        let values: Vec<String> = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, expr)| stmt.expr(column, expr))
            .collect();
        stmt.text = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.table,
            self.columns.join(", "),
            values.join(", ")
        );
        stmt
    }
}

impl Update {
    pub fn to_sql(&self) -> SqlStatement {
        let mut stmt = SqlStatement::new();
        let sets: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, expr)| format!("{column} = {}", stmt.expr(column, expr)))
            .collect();
        stmt.text = format!("UPDATE \"{}\" SET {}", self.table, sets.join(", "));
        stmt.selector(&self.selector);
        stmt
    }
}
