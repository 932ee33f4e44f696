//! Local, file-backed warehouse
//!
//! Tables live as parquet files under `<root>/<database>/<table>.parquet`.
//! Queries are executed by the polars SQL engine against the tables they
//! mention, either as `database.table` or, for the default database, by bare
//! table name. A table may carry a declared schema
//! (`<table>.schema.json`), in which case writes are checked positionally
//! against it the way a warehouse checks an insert against its DDL.

use super::{DataAccess, WriteMode};
use crate::context::TableRef;
use crate::error::{LifecycleError, Result};
use polars::prelude::*;
use polars::sql::SQLContext;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TABLE_EXT: &str = "parquet";
const SCHEMA_SUFFIX: &str = ".schema.json";

/// Warehouse column types understood by declared schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Varchar,
    BigInt,
    Double,
    Clob,
}

impl ColumnType {
    /// Whether a frame column of `dtype` can be stored in this column type
    pub fn accepts(&self, dtype: &DataType) -> bool {
        match self {
            ColumnType::Varchar | ColumnType::Clob => matches!(dtype, DataType::String),
            ColumnType::BigInt => dtype.is_integer(),
            ColumnType::Double => dtype.is_primitive_numeric(),
        }
    }

    fn storage_dtype(&self) -> DataType {
        match self {
            ColumnType::Varchar | ColumnType::Clob => DataType::String,
            ColumnType::BigInt => DataType::Int64,
            ColumnType::Double => DataType::Float64,
        }
    }
}

/// Declared column of a warehouse table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Declared, ordered table schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    /// Positional compatibility check. Column names are not compared: the
    /// warehouse matches inserted columns by position only.
    pub fn check(&self, frame: &DataFrame, table: &TableRef) -> Result<()> {
        if frame.width() != self.columns.len() {
            return Err(LifecycleError::SchemaMismatch {
                table: table.fqtn(),
                detail: format!(
                    "table has {} columns, frame has {}",
                    self.columns.len(),
                    frame.width()
                ),
            });
        }
        for (pos, (def, column)) in self.columns.iter().zip(frame.get_columns()).enumerate() {
            if !def.column_type.accepts(column.dtype()) {
                return Err(LifecycleError::SchemaMismatch {
                    table: table.fqtn(),
                    detail: format!(
                        "position {} ({}) is {:?}, frame column '{}' is {}",
                        pos,
                        def.name,
                        def.column_type,
                        column.name(),
                        column.dtype()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Rename and cast a positionally compatible frame to the declared layout
    fn conform(&self, frame: &DataFrame) -> Result<DataFrame> {
        let columns = self
            .columns
            .iter()
            .zip(frame.get_columns())
            .map(|(def, column)| -> Result<Column> {
                let series = column
                    .as_materialized_series()
                    .cast(&def.column_type.storage_dtype())?
                    .with_name(def.name.as_str().into());
                Ok(series.into())
            })
            .collect::<Result<Vec<Column>>>()?;
        Ok(DataFrame::new(columns)?)
    }
}

/// Parquet-on-disk warehouse queried through the polars SQL engine
#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    root: PathBuf,
    default_database: String,
}

impl LocalWarehouse {
    /// Open (and create if needed) a warehouse rooted at `root`
    pub fn open(root: impl Into<PathBuf>, default_database: impl Into<String>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            default_database: default_database.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    fn table_path(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(&table.database)
            .join(format!("{}.{}", table.table, TABLE_EXT))
    }

    fn schema_path(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(&table.database)
            .join(format!("{}{}", table.table, SCHEMA_SUFFIX))
    }

    /// Declare a table layout. Existing rows are left in place.
    pub fn create_table(&self, table: &TableRef, schema: &TableSchema) -> Result<()> {
        let path = self.schema_path(table);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(schema)?)?;
        info!(table = %table, columns = schema.columns.len(), "Declared table");
        Ok(())
    }

    /// Declared schema of a table, if any
    pub fn table_schema(&self, table: &TableRef) -> Result<Option<TableSchema>> {
        let path = self.schema_path(table);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str::<TableSchema>(&raw)?))
    }

    /// Whether a table holds data
    pub fn table_exists(&self, table: &TableRef) -> bool {
        self.table_path(table).exists()
    }

    /// Read a whole table
    pub fn read_table(&self, table: &TableRef) -> Result<DataFrame> {
        let path = self.table_path(table);
        let file = File::open(&path).map_err(|_| {
            LifecycleError::Resolution(format!("table {} does not exist", table))
        })?;
        Ok(ParquetReader::new(file).finish()?)
    }

    /// Load a CSV file into a table, replacing its contents
    pub fn import_csv(&self, path: &Path, table: &TableRef) -> Result<usize> {
        let df = CsvReadOptions::default()
            .with_infer_schema_length(Some(1000))
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;
        let rows = df.height();
        self.persist(&df, table, WriteMode::Replace)?;
        Ok(rows)
    }

    /// All tables on disk, in database then table order
    pub fn list_tables(&self) -> Result<Vec<TableRef>> {
        let mut tables = Vec::new();
        for db in fs::read_dir(&self.root)? {
            let db = db?;
            if !db.file_type()?.is_dir() {
                continue;
            }
            let database = db.file_name().to_string_lossy().to_string();
            for entry in fs::read_dir(db.path())? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(TABLE_EXT) {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        tables.push(TableRef::new(database.clone(), stem));
                    }
                }
            }
        }
        tables.sort_by(|a, b| a.fqtn().cmp(&b.fqtn()));
        Ok(tables)
    }

    /// Names a table can be referenced by inside a query
    fn query_names(&self, table: &TableRef) -> Vec<String> {
        let mut names = vec![table.fqtn()];
        if table.database == self.default_database {
            names.push(table.table.clone());
        }
        names
    }

    fn write_atomic(&self, frame: &DataFrame, destination: &TableRef) -> Result<()> {
        let path = self.table_path(destination);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("parquet.tmp");
        let mut out = frame.clone();
        {
            let file = File::create(&tmp)?;
            ParquetWriter::new(file).finish(&mut out)?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl DataAccess for LocalWarehouse {
    fn resolve(&self, query: &str) -> Result<DataFrame> {
        let tables = self.list_tables()?;
        let dotted: HashSet<String> = tables.iter().map(TableRef::fqtn).collect();
        let (rewritten, referenced) = scan_identifiers(query, &dotted);

        let mut ctx = SQLContext::new();
        let mut registered = 0usize;
        for table in &tables {
            let names: Vec<String> = self
                .query_names(table)
                .into_iter()
                .filter(|name| referenced.contains(name))
                .collect();
            if names.is_empty() {
                continue;
            }
            let lf = self.read_table(table)?.lazy();
            for name in names {
                ctx.register(&name, lf.clone());
                registered += 1;
            }
        }
        debug!(registered, query = %rewritten, "Resolving query");

        let lf = ctx
            .execute(&rewritten)
            .map_err(|e| LifecycleError::Resolution(format!("{}: {}", query, e)))?;
        lf.collect()
            .map_err(|e| LifecycleError::Resolution(format!("{}: {}", query, e)))
    }

    fn persist(&self, frame: &DataFrame, destination: &TableRef, mode: WriteMode) -> Result<()> {
        let schema = self.table_schema(destination)?;
        let incoming = match &schema {
            Some(schema) => {
                schema.check(frame, destination)?;
                schema.conform(frame)?
            }
            None => frame.clone(),
        };

        let output = match mode {
            WriteMode::Replace => incoming,
            WriteMode::Append if self.table_exists(destination) => {
                let existing = self.read_table(destination)?;
                let implied = TableSchema::new(
                    existing
                        .get_columns()
                        .iter()
                        .map(|c| {
                            let column_type = match c.dtype() {
                                DataType::String => ColumnType::Varchar,
                                dt if dt.is_integer() => ColumnType::BigInt,
                                _ => ColumnType::Double,
                            };
                            ColumnDef::new(c.name().as_str(), column_type)
                        })
                        .collect(),
                );
                implied.check(&incoming, destination)?;
                existing.vstack(&implied.conform(&incoming)?)?
            }
            WriteMode::Append => incoming,
        };

        self.write_atomic(&output, destination)?;
        info!(table = %destination, rows = output.height(), ?mode, "Persisted table");
        Ok(())
    }

    /// Tables are registered under their dotted name, which the SQL engine
    /// only reads back as a single identifier when quoted. `resolve` quotes
    /// unquoted `database.table` references itself.
    fn qualify(&self, table: &TableRef) -> String {
        format!("\"{}\"", table.fqtn())
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Identifiers referenced by `query`, plus the query with every unquoted
/// reference to a name in `dotted` wrapped in double quotes.
///
/// String literals and `--` comments are copied through untouched and
/// contribute no identifiers. Unquoted identifiers are read together with
/// their `.` parts, so `demo.t1` is one token.
fn scan_identifiers(query: &str, dotted: &HashSet<String>) -> (String, HashSet<String>) {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len() + 8);
    let mut names = HashSet::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c == '\'' || c == '"' {
            // A doubled quote escapes itself
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == c {
                    if chars.get(i + 1) == Some(&c) {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    closed = true;
                    break;
                }
                i += 1;
            }
            out.extend(&chars[start..i]);
            if c == '"' {
                let end = if closed { i - 1 } else { i };
                let inner: String = chars[start + 1..end].iter().collect();
                names.insert(inner.replace("\"\"", "\""));
            }
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            out.extend(&chars[start..i]);
        } else if is_identifier_start(c) {
            while i < chars.len() {
                let ch = chars[i];
                let dotted_part =
                    ch == '.' && chars.get(i + 1).is_some_and(|&n| is_identifier_start(n));
                if ch.is_alphanumeric() || ch == '_' || dotted_part {
                    i += 1;
                } else {
                    break;
                }
            }
            let token: String = chars[start..i].iter().collect();
            if token.contains('.') && dotted.contains(&token) {
                out.push('"');
                out.push_str(&token);
                out.push('"');
            } else {
                out.push_str(&token);
            }
            names.insert(token);
        } else if c.is_ascii_digit() {
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '.' || chars[i] == '_')
            {
                i += 1;
            }
            out.extend(&chars[start..i]);
        } else {
            out.push(c);
            i += 1;
        }
    }

    (out, names)
}
