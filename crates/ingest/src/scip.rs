//! Decoding of the protobuf structural index (SCIP) returned by indexers.
//!
//! Only the fields the pipeline persists are declared; prost skips the rest.

use prost::Message;

use quarry_core::{OccurrenceRecord, RecordScope, RelationshipRecord, SymbolRecord};

use crate::error::ClientError;

mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Index {
        #[prost(message, repeated, tag = "2")]
        pub documents: Vec<Document>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Document {
        #[prost(string, tag = "1")]
        pub relative_path: String,
        #[prost(message, repeated, tag = "2")]
        pub occurrences: Vec<Occurrence>,
        #[prost(message, repeated, tag = "3")]
        pub symbols: Vec<SymbolInformation>,
        #[prost(string, tag = "4")]
        pub language: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Occurrence {
        #[prost(int32, repeated, tag = "1")]
        pub range: Vec<i32>,
        #[prost(string, tag = "2")]
        pub symbol: String,
        #[prost(int32, tag = "3")]
        pub symbol_roles: i32,
        #[prost(int32, tag = "5")]
        pub syntax_kind: i32,
        #[prost(int32, repeated, tag = "7")]
        pub enclosing_range: Vec<i32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SymbolInformation {
        #[prost(string, tag = "1")]
        pub symbol: String,
        #[prost(string, repeated, tag = "3")]
        pub documentation: Vec<String>,
        #[prost(message, repeated, tag = "4")]
        pub relationships: Vec<Relationship>,
        #[prost(int32, tag = "5")]
        pub kind: i32,
        #[prost(string, tag = "6")]
        pub display_name: String,
        #[prost(string, tag = "8")]
        pub enclosing_symbol: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Relationship {
        #[prost(string, tag = "1")]
        pub symbol: String,
        #[prost(bool, tag = "2")]
        pub is_reference: bool,
        #[prost(bool, tag = "3")]
        pub is_implementation: bool,
        #[prost(bool, tag = "4")]
        pub is_type_definition: bool,
        #[prost(bool, tag = "5")]
        pub is_definition: bool,
    }
}

// ── Decoded form ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuralIndex {
    pub files: Vec<IndexedFile>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexedFile {
    pub path: String,
    pub symbols: Vec<IndexedSymbol>,
    pub occurrences: Vec<IndexedOccurrence>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexedSymbol {
    pub symbol: String,
    pub kind: i32,
    pub display_name: String,
    pub documentation: Vec<String>,
    pub enclosing_symbol: Option<String>,
    pub relationships: Vec<IndexedRelationship>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexedRelationship {
    pub target_symbol: String,
    pub is_reference: bool,
    pub is_implementation: bool,
    pub is_type_definition: bool,
    pub is_definition: bool,
}

/// Zero-based, end-exclusive source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceRange {
    pub start_line: i32,
    pub start_col: i32,
    pub end_line: i32,
    pub end_col: i32,
}

impl SourceRange {
    /// `[line, start_col, end_col]` for single-line spans, otherwise
    /// `[start_line, start_col, end_line, end_col]`.
    pub fn from_packed(range: &[i32]) -> Option<Self> {
        match *range {
            [line, start_col, end_col] => Some(Self {
                start_line: line,
                start_col,
                end_line: line,
                end_col,
            }),
            [start_line, start_col, end_line, end_col, ..] => Some(Self {
                start_line,
                start_col,
                end_line,
                end_col,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexedOccurrence {
    pub symbol: String,
    pub roles: i32,
    /// All zeros when the index carried no usable range.
    pub range: SourceRange,
    pub syntax_kind: Option<i32>,
    pub enclosing_range: Option<SourceRange>,
}

/// Decode an encoded index. Pure: no I/O, no side effects.
pub fn decode(bytes: &[u8]) -> Result<StructuralIndex, ClientError> {
    let index = proto::Index::decode(bytes).map_err(|e| ClientError::Decode(e.to_string()))?;
    Ok(StructuralIndex {
        files: index.documents.into_iter().map(convert_document).collect(),
    })
}

fn convert_document(doc: proto::Document) -> IndexedFile {
    IndexedFile {
        path: doc.relative_path,
        symbols: doc.symbols.into_iter().map(convert_symbol).collect(),
        occurrences: doc.occurrences.into_iter().map(convert_occurrence).collect(),
    }
}

fn convert_symbol(info: proto::SymbolInformation) -> IndexedSymbol {
    IndexedSymbol {
        symbol: info.symbol,
        kind: info.kind,
        display_name: info.display_name,
        documentation: info.documentation,
        enclosing_symbol: Some(info.enclosing_symbol).filter(|s| !s.is_empty()),
        relationships: info
            .relationships
            .into_iter()
            .map(|r| IndexedRelationship {
                target_symbol: r.symbol,
                is_reference: r.is_reference,
                is_implementation: r.is_implementation,
                is_type_definition: r.is_type_definition,
                is_definition: r.is_definition,
            })
            .collect(),
    }
}

fn convert_occurrence(occ: proto::Occurrence) -> IndexedOccurrence {
    IndexedOccurrence {
        symbol: occ.symbol,
        roles: occ.symbol_roles,
        range: SourceRange::from_packed(&occ.range).unwrap_or_default(),
        syntax_kind: Some(occ.syntax_kind).filter(|k| *k != 0),
        enclosing_range: SourceRange::from_packed(&occ.enclosing_range),
    }
}

// ── Records ─────────────────────────────────────────────────────────

impl IndexedSymbol {
    pub fn to_record(&self, scope: RecordScope) -> SymbolRecord {
        SymbolRecord {
            id: 0,
            scope,
            symbol: self.symbol.clone(),
            kind: self.kind,
            display_name: self.display_name.clone(),
            documentation: self.documentation.clone(),
            enclosing_symbol: self.enclosing_symbol.clone(),
        }
    }
}

impl IndexedRelationship {
    pub fn to_record(&self, symbol_id: i64) -> RelationshipRecord {
        RelationshipRecord {
            id: 0,
            symbol_id,
            target_symbol: self.target_symbol.clone(),
            is_reference: self.is_reference,
            is_implementation: self.is_implementation,
            is_type_definition: self.is_type_definition,
            is_definition: self.is_definition,
        }
    }
}

impl IndexedOccurrence {
    pub fn to_record(&self, scope: RecordScope) -> OccurrenceRecord {
        OccurrenceRecord {
            id: 0,
            scope,
            symbol: self.symbol.clone(),
            symbol_roles: self.roles,
            start_line: self.range.start_line,
            start_col: self.range.start_col,
            end_line: self.range.end_line,
            end_col: self.range.end_col,
            syntax_kind: self.syntax_kind,
            enclosing_range: self
                .enclosing_range
                .map(|r| [r.start_line, r.start_col, r.end_line, r.end_col]),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{encode, FileSpec};
    use super::*;

    #[test]
    fn decodes_files_symbols_and_occurrences() {
        let bytes = encode(&[
            FileSpec {
                path: "pkg/server.go",
                symbols: &[("go pkg/Server#", &["go io/Closer#"]), ("go pkg/New().", &[])],
                occurrences: &[("go pkg/Server#", &[4, 5, 11]), ("go pkg/New().", &[10, 0, 12, 1])],
            },
            FileSpec {
                path: "README.md",
                symbols: &[],
                occurrences: &[],
            },
        ]);

        let index = decode(&bytes).unwrap();
        assert_eq!(index.files.len(), 2);

        let server = &index.files[0];
        assert_eq!(server.path, "pkg/server.go");
        assert_eq!(server.symbols.len(), 2);
        assert_eq!(server.symbols[0].relationships[0].target_symbol, "go io/Closer#");
        assert!(server.symbols[0].relationships[0].is_implementation);
        assert_eq!(server.symbols[0].enclosing_symbol, None);

        let single = server.occurrences[0].range;
        assert_eq!((single.start_line, single.end_line, single.end_col), (4, 4, 11));
        let multi = server.occurrences[1].range;
        assert_eq!((multi.start_line, multi.end_line, multi.end_col), (10, 12, 1));
    }

    #[test]
    fn short_ranges_become_zero() {
        assert_eq!(SourceRange::from_packed(&[]), None);
        assert_eq!(SourceRange::from_packed(&[1, 2]), None);
        let occ = convert_occurrence(proto::Occurrence {
            range: vec![7],
            ..Default::default()
        });
        assert_eq!(occ.range, SourceRange::default());
        assert_eq!(occ.syntax_kind, None);
        assert_eq!(occ.enclosing_range, None);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn empty_input_is_an_empty_index() {
        assert_eq!(decode(&[]).unwrap(), StructuralIndex::default());
    }

    #[test]
    fn records_carry_scope_and_owner_row() {
        let scope = RecordScope {
            user_id: 1,
            version_id: 2,
            document_id: 3,
            owner: "acme".into(),
            repo_name: "widgets".into(),
            tag: "v1".into(),
        };
        let sym = IndexedSymbol {
            symbol: "go pkg/Run().".into(),
            relationships: vec![IndexedRelationship {
                target_symbol: "go pkg/Runner#".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let rec = sym.to_record(scope.clone());
        assert_eq!(rec.scope.document_id, 3);
        assert_eq!(sym.relationships[0].to_record(42).symbol_id, 42);
    }
}
