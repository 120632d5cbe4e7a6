//! Mapping from raw builder output to canonical published names.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use ferry_types::{BuildTarget, TargetTable};

use crate::error::PublishError;

/// Pure lookup over the target table. Construction fails if the table would
/// map two targets to the same published name.
#[derive(Debug, Clone)]
pub struct ArtifactNameMapper {
    table: TargetTable,
}

impl ArtifactNameMapper {
    pub fn new(table: TargetTable) -> Result<Self, PublishError> {
        let mut triples: HashSet<&str> = HashSet::new();
        let mut canonical: HashMap<&str, &str> = HashMap::new();

        for target in &table {
            if !triples.insert(target.triple.as_str()) {
                return Err(PublishError::DuplicateTarget {
                    triple: target.triple.clone(),
                });
            }
            if let Some(first) = canonical.insert(&target.canonical_name, &target.triple) {
                return Err(PublishError::DuplicateCanonicalName {
                    name: target.canonical_name.clone(),
                    first: first.to_string(),
                    second: target.triple.clone(),
                });
            }
        }

        Ok(Self { table })
    }

    /// Canonical name for `raw_name` built for `triple`.
    ///
    /// `raw_name` may carry a directory; only the file name is compared.
    pub fn map(&self, triple: &str, raw_name: &str) -> Result<String, PublishError> {
        let target = self.target(triple)?;
        let file_name = Path::new(raw_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(raw_name);
        if file_name != target.raw_name {
            return Err(PublishError::RawNameMismatch {
                triple: triple.to_string(),
                expected: target.raw_name.clone(),
                actual: raw_name.to_string(),
            });
        }
        Ok(target.canonical_name.clone())
    }

    pub fn target(&self, triple: &str) -> Result<&BuildTarget, PublishError> {
        self.table
            .find(triple)
            .ok_or_else(|| PublishError::UnknownTarget {
                triple: triple.to_string(),
            })
    }

    pub fn targets(&self) -> &TargetTable {
        &self.table
    }
}
