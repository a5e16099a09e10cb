//! Dataset references: `name[@version]` for the registry, `owner/repo[@revision]` for the hub.

use crate::error::{DatasetError, Result};

/// A parsed dataset reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetRef {
    /// Named dataset in the registry
    Registry {
        /// Dataset name
        name: String,
        /// Requested version; `None` means latest
        version: Option<String>,
    },
    /// Dataset repository on the hub
    Hub {
        /// `owner/name`
        repo: String,
        /// Branch, tag or commit
        revision: Option<String>,
    },
}

impl DatasetRef {
    /// Parse a reference string.
    pub fn parse(reference: &str) -> Result<Self> {
        let raw = reference.trim();
        if raw.is_empty() {
            return Err(DatasetError::InvalidRef {
                reference: reference.to_string(),
                reason: "dataset ref cannot be empty".to_string(),
            });
        }

        let (head, tail) = match raw.split_once('@') {
            Some((head, tail)) => (head, (!tail.is_empty()).then(|| tail.to_string())),
            None => (raw, None),
        };

        if head.contains('/') {
            Ok(DatasetRef::Hub { repo: head.to_string(), revision: tail })
        } else {
            Ok(DatasetRef::Registry { name: head.to_string(), version: tail })
        }
    }

    /// Short label used in default output directory names.
    pub fn label(&self) -> String {
        self.to_string().replace('/', "__").replace('@', "_")
    }
}

impl std::fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetRef::Registry { name, version: Some(v) } => write!(f, "{}@{}", name, v),
            DatasetRef::Registry { name, version: None } => f.write_str(name),
            DatasetRef::Hub { repo, revision: Some(r) } => write!(f, "{}@{}", repo, r),
            DatasetRef::Hub { repo, revision: None } => f.write_str(repo),
        }
    }
}
