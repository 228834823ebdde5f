//! Records persisted from a structural index: symbols, where they occur, and
//! how they relate to each other.

use serde::{Deserialize, Serialize};

/// Occurrence role bits, as carried by the structural index.
pub mod roles {
    pub const DEFINITION: i32 = 0x1;
    pub const IMPORT: i32 = 0x2;
    pub const WRITE_ACCESS: i32 = 0x4;
    pub const READ_ACCESS: i32 = 0x8;
    pub const GENERATED: i32 = 0x10;
    pub const TEST: i32 = 0x20;
    pub const FORWARD_DEFINITION: i32 = 0x40;
}

/// Ownership keys copied onto every record of one ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordScope {
    pub user_id: i64,
    pub version_id: i64,
    pub document_id: i64,
    pub owner: String,
    pub repo_name: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Assigned by the store on create.
    pub id: i64,
    pub scope: RecordScope,
    pub symbol: String,
    pub kind: i32,
    pub display_name: String,
    pub documentation: Vec<String>,
    pub enclosing_symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub id: i64,
    pub scope: RecordScope,
    pub symbol: String,
    pub symbol_roles: i32,
    pub start_line: i32,
    pub start_col: i32,
    pub end_line: i32,
    pub end_col: i32,
    pub syntax_kind: Option<i32>,
    pub enclosing_range: Option<[i32; 4]>,
}

impl OccurrenceRecord {
    pub fn is_definition(&self) -> bool {
        self.symbol_roles & roles::DEFINITION != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: i64,
    /// Row id of the owning [`SymbolRecord`].
    pub symbol_id: i64,
    pub target_symbol: String,
    pub is_reference: bool,
    pub is_implementation: bool,
    pub is_type_definition: bool,
    pub is_definition: bool,
}
