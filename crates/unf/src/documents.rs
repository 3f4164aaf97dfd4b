//! Concatenated BSON document stream decoding and `_type` bucketing

use bson::{Document, RawArray, RawBsonRef, RawDocument};
use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::{Result, UnfError};

/// Field that names a document's bucket.
pub const TYPE_FIELD: &str = "_type";

/// Bucket for documents without a string `_type`.
pub const UNCLASSIFIED: &str = "unclassified";

/// Smallest well-formed document: length prefix plus terminating NUL.
const MIN_DOCUMENT_LEN: usize = 5;

/// Deepest sub-document or array nesting accepted below a top-level document.
pub const MAX_DEPTH: usize = 100;

/// How to treat a stream that ends in the middle of a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecodeMode {
    /// Drop the partial trailing document and finish successfully.
    #[default]
    Lenient,
    /// Report the partial trailing document as [`UnfError::Truncated`].
    Strict,
}

/// Decode back-to-back documents until the buffer is exhausted.
pub fn decode_documents(bytes: &[u8], mode: DecodeMode) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];

        let needed = if remaining.len() < 4 {
            4
        } else {
            let mut prefix = [0u8; 4];
            prefix.copy_from_slice(&remaining[..4]);
            let declared = i32::from_le_bytes(prefix);
            if declared < MIN_DOCUMENT_LEN as i32 {
                return Err(UnfError::Decode {
                    offset,
                    reason: format!("invalid document length {declared}"),
                });
            }
            declared as usize
        };

        if needed > remaining.len() {
            match mode {
                DecodeMode::Lenient => {
                    warn!(
                        offset,
                        needed,
                        available = remaining.len(),
                        "stream ended inside a document; treating as end of stream"
                    );
                    break;
                }
                DecodeMode::Strict => {
                    return Err(UnfError::Truncated {
                        offset,
                        needed,
                        available: remaining.len(),
                    })
                }
            }
        }

        check_depth(&remaining[..needed]).map_err(|reason| UnfError::Decode { offset, reason })?;

        let mut body = &remaining[..needed];
        let document = Document::from_reader(&mut body).map_err(|e| UnfError::Decode {
            offset,
            reason: e.to_string(),
        })?;

        trace!(offset, len = needed, keys = document.len(), "document decoded");
        documents.push(document);
        offset += needed;
    }

    Ok(documents)
}

enum Container<'a> {
    Document(&'a RawDocument),
    Array(&'a RawArray),
}

/// Walk one encoded document with an explicit stack so that hostile nesting
/// is rejected before the recursive decoder and renderer ever see it.
fn check_depth(body: &[u8]) -> std::result::Result<(), String> {
    let root = RawDocument::from_bytes(body).map_err(|e| e.to_string())?;
    let mut stack = vec![(Container::Document(root), 0usize)];

    while let Some((container, depth)) = stack.pop() {
        let values: Vec<RawBsonRef<'_>> = match container {
            Container::Document(doc) => doc
                .iter()
                .map(|item| item.map(|(_, value)| value))
                .collect::<std::result::Result<_, _>>(),
            Container::Array(arr) => arr.into_iter().collect::<std::result::Result<_, _>>(),
        }
        .map_err(|e| e.to_string())?;

        for value in values {
            let child = match value {
                RawBsonRef::Document(doc) => Container::Document(doc),
                RawBsonRef::Array(arr) => Container::Array(arr),
                RawBsonRef::JavaScriptCodeWithScope(code) => Container::Document(code.scope),
                _ => continue,
            };
            if depth + 1 > MAX_DEPTH {
                return Err("nesting too deep".to_string());
            }
            stack.push((child, depth + 1));
        }
    }

    Ok(())
}

/// Documents sharing one `_type` value, in decode order.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentGroup {
    pub name: String,
    pub documents: Vec<Document>,
}

/// Buckets in first-seen order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentGroups {
    groups: IndexMap<String, Vec<Document>>,
}

impl DocumentGroups {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total_documents(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn get(&self, name: &str) -> Option<&[Document]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn into_groups(self) -> Vec<DocumentGroup> {
        self.groups
            .into_iter()
            .map(|(name, documents)| DocumentGroup { name, documents })
            .collect()
    }
}

pub fn group_documents(documents: Vec<Document>) -> DocumentGroups {
    let mut groups: IndexMap<String, Vec<Document>> = IndexMap::new();

    for doc in documents {
        let name = match doc.get_str(TYPE_FIELD) {
            Ok(t) => t.to_string(),
            Err(_) => UNCLASSIFIED.to_string(),
        };
        groups.entry(name).or_default().push(doc);
    }

    DocumentGroups { groups }
}
