use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Fully qualified name of an upstream table, carried with every change event
/// so downstream recovery can route records per table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
    // Upstream table id; the per-table resolved timestamps are keyed by it
    pub table_id: i64,
}

impl Display for TableName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.schema, self.table, self.table_id)
    }
}

/// A single column value within a row change. The value is the upstream
/// datum in its encoded form; `None` represents SQL NULL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: Option<Vec<u8>>,
    // Upstream column flags (primary key, unique, generated, ...)
    pub flag: u64,
}

/// One committed row mutation from the upstream database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChangedEvent {
    pub table: TableName,
    // Transaction start timestamp
    pub start_ts: u64,
    // Transaction commit timestamp; drives the redo watermarks
    pub commit_ts: u64,
    pub columns: Vec<Column>,
}

/// One schema-level mutation from the upstream database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdlEvent {
    pub start_ts: u64,
    pub commit_ts: u64,
    pub table: Option<TableName>,
    pub query: String,
}

/// Redo envelope for a row change. An envelope without a row carries no
/// payload and is dropped by the writer before it reaches storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedoRowEvent {
    pub row: Option<RowChangedEvent>,
}

/// Redo envelope for a DDL event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedoDdlEvent {
    pub ddl: Option<DdlEvent>,
}
