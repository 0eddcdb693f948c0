//! Subresource integrity attributes.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::metafile::OutputFile;
use crate::{Error, Result};

/// Hash algorithm of an `integrity` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl IntegrityAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrityAlgorithm::Sha256 => "sha256",
            IntegrityAlgorithm::Sha384 => "sha384",
            IntegrityAlgorithm::Sha512 => "sha512",
        }
    }

    /// `"<algorithm>-<base64 digest>"` for `contents`.
    pub fn integrity(self, contents: &[u8]) -> String {
        let digest = match self {
            IntegrityAlgorithm::Sha256 => STANDARD.encode(Sha256::digest(contents)),
            IntegrityAlgorithm::Sha384 => STANDARD.encode(Sha384::digest(contents)),
            IntegrityAlgorithm::Sha512 => STANDARD.encode(Sha512::digest(contents)),
        };
        format!("{}-{}", self.as_str(), digest)
    }
}

impl fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrityAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(IntegrityAlgorithm::Sha256),
            "sha384" => Ok(IntegrityAlgorithm::Sha384),
            "sha512" => Ok(IntegrityAlgorithm::Sha512),
            other => Err(Error::UnsupportedIntegrity(other.to_string())),
        }
    }
}

/// Integrity attribute for the output at `path`, or `None` when no algorithm
/// is configured.
///
/// The contents come from the in-memory output set; a path missing from it is
/// an error.
pub fn integrity_for(
    algorithm: Option<IntegrityAlgorithm>,
    path: &Path,
    output_files: &[OutputFile],
) -> Result<Option<String>> {
    let Some(algorithm) = algorithm else {
        return Ok(None);
    };

    let file = output_files
        .iter()
        .find(|file| file.path == path)
        .ok_or_else(|| Error::MissingOutputFile {
            path: path.to_path_buf(),
        })?;

    Ok(Some(algorithm.integrity(&file.contents)))
}
