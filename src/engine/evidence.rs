//! Proof-of-delivery photos.
//!
//! Evidence arrives either inline as a `data:image/<subtype>;base64,...` URL
//! or as the name of a file already sitting in the evidence directory. Inline
//! images are written to `{delivery_id}.{ext}`, replacing whatever proof that
//! delivery had before.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const MAX_EVIDENCE_BYTES: usize = 5 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpeg", "jpg", "png"];

const DATA_URL_PREFIX: &str = "data:image";

#[derive(Debug, Error, PartialEq)]
pub enum EvidenceError {
    #[error("invalid proof format: {0}")]
    InvalidFormat(String),

    #[error("proof image has {size} bytes, more than the {limit} byte limit")]
    SizeExceeded { size: usize, limit: usize },

    #[error("proof file {0:?} not found")]
    FileNotFound(String),

    #[error("evidence storage i/o failed: {0}")]
    Io(String),
}

impl From<io::Error> for EvidenceError {
    fn from(err: io::Error) -> Self {
        EvidenceError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    Inline {
        media_subtype: String,
        payload: String,
    },
    FileRef(String),
}

impl Evidence {
    pub fn parse(raw: &str) -> Result<Self, EvidenceError> {
        let raw = raw.trim();
        let is_data_url = raw
            .get(..DATA_URL_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(DATA_URL_PREFIX));
        if !is_data_url {
            return Ok(Evidence::FileRef(raw.to_string()));
        }

        let (header, payload) = raw
            .split_once(',')
            .ok_or_else(|| EvidenceError::InvalidFormat("data URL has no payload".to_string()))?;

        let media_subtype = header
            .split(';')
            .next()
            .and_then(|media_type| media_type.rsplit('/').next())
            .unwrap_or_default()
            .to_ascii_lowercase();

        Ok(Evidence::Inline {
            media_subtype,
            payload: payload.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedEvidence {
    /// A new file was written.
    Stored { file_name: String, bytes: usize },
    /// The referenced file already existed and passed the checks.
    Existing { file_name: String },
}

impl ProcessedEvidence {
    pub fn file_name(&self) -> &str {
        match self {
            ProcessedEvidence::Stored { file_name, .. } => file_name,
            ProcessedEvidence::Existing { file_name } => file_name,
        }
    }

    pub fn into_file_name(self) -> String {
        match self {
            ProcessedEvidence::Stored { file_name, .. } => file_name,
            ProcessedEvidence::Existing { file_name } => file_name,
        }
    }

    pub fn bytes_written(&self) -> usize {
        match self {
            ProcessedEvidence::Stored { bytes, .. } => *bytes,
            ProcessedEvidence::Existing { .. } => 0,
        }
    }
}

/// Evidence that passed every check and is ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedEvidence {
    Inline {
        extension: &'static str,
        bytes: Vec<u8>,
    },
    Existing { file_name: String },
}

#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    /// Opens the evidence directory, creating it when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EvidenceError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn process(
        &self,
        evidence: &Evidence,
        delivery_id: Uuid,
    ) -> Result<ProcessedEvidence, EvidenceError> {
        let prepared = self.prepare(evidence)?;
        self.persist(prepared, delivery_id)
    }

    /// Decodes and checks evidence without writing anything.
    pub fn prepare(&self, evidence: &Evidence) -> Result<PreparedEvidence, EvidenceError> {
        match evidence {
            Evidence::Inline {
                media_subtype,
                payload,
            } => {
                let extension = allowed_extension(media_subtype)?;
                let bytes = STANDARD.decode(payload.trim()).map_err(|err| {
                    EvidenceError::InvalidFormat(format!("payload is not base64: {err}"))
                })?;

                if bytes.len() > MAX_EVIDENCE_BYTES {
                    return Err(EvidenceError::SizeExceeded {
                        size: bytes.len(),
                        limit: MAX_EVIDENCE_BYTES,
                    });
                }

                Ok(PreparedEvidence::Inline { extension, bytes })
            }
            Evidence::FileRef(name) => self.verify_reference(name),
        }
    }

    /// Writes prepared inline evidence as the delivery's current proof.
    pub fn persist(
        &self,
        prepared: PreparedEvidence,
        delivery_id: Uuid,
    ) -> Result<ProcessedEvidence, EvidenceError> {
        let (extension, bytes) = match prepared {
            PreparedEvidence::Inline { extension, bytes } => (extension, bytes),
            PreparedEvidence::Existing { file_name } => {
                return Ok(ProcessedEvidence::Existing { file_name });
            }
        };

        let file_name = format!("{delivery_id}.{extension}");
        write_file(&self.root.join(&file_name), &bytes)?;
        self.remove_stale_siblings(delivery_id, extension)?;

        info!(%delivery_id, file_name = %file_name, bytes = bytes.len(), "proof photo stored");

        Ok(ProcessedEvidence::Stored {
            file_name,
            bytes: bytes.len(),
        })
    }

    fn verify_reference(&self, name: &str) -> Result<PreparedEvidence, EvidenceError> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(EvidenceError::InvalidFormat(format!(
                "{name:?} is not a plain file name"
            )));
        }

        if !self.root.join(name).is_file() {
            return Err(EvidenceError::FileNotFound(name.to_string()));
        }

        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        allowed_extension(&extension)?;

        Ok(PreparedEvidence::Existing {
            file_name: name.to_string(),
        })
    }

    /// Keeps one current proof per delivery when the image type changes.
    fn remove_stale_siblings(&self, delivery_id: Uuid, kept: &str) -> Result<(), EvidenceError> {
        for extension in ALLOWED_EXTENSIONS.iter().filter(|ext| **ext != kept) {
            let path = self.root.join(format!("{delivery_id}.{extension}"));
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed superseded proof photo"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

fn allowed_extension(candidate: &str) -> Result<&'static str, EvidenceError> {
    ALLOWED_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| *ext == candidate)
        .ok_or_else(|| {
            EvidenceError::InvalidFormat(format!(
                "image type {candidate:?} is not allowed; expected one of {ALLOWED_EXTENSIONS:?}"
            ))
        })
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
