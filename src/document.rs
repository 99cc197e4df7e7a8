// src/document.rs
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

/// A document read for one initiation call; dropped with the request.
pub struct LoadedDocument {
    pub file_name: String,
    pub base64: String,
    pub size: usize,
}

/// Resolves document references against a single directory. Nothing is
/// cached: each call reads the file fresh.
#[derive(Clone, Debug)]
pub struct DocumentStore {
    root: PathBuf,
    default_ref: Option<String>,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>, default_ref: Option<String>) -> Self {
        Self {
            root: root.into(),
            default_ref,
        }
    }

    /// The explicit reference wins; otherwise the configured default.
    pub fn resolve_ref(&self, requested: Option<&str>) -> GatewayResult<String> {
        let chosen = requested
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .or_else(|| self.default_ref.clone())
            .ok_or_else(|| {
                GatewayError::InvalidRequest(
                    "document_id is required (no default document configured)".into(),
                )
            })?;
        validate_ref(&chosen)?;
        Ok(chosen)
    }

    pub async fn load(&self, document_ref: &str) -> GatewayResult<LoadedDocument> {
        validate_ref(document_ref)?;
        let path = self.root.join(document_ref);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GatewayError::DocumentNotFound(document_ref.to_string()))
            }
            Err(e) => {
                return Err(GatewayError::DocumentUnreadable(format!("{document_ref}: {e}")))
            }
        };
        if bytes.is_empty() {
            return Err(GatewayError::InvalidDocument(format!("{document_ref} is empty")));
        }
        debug!(document = document_ref, size = bytes.len(), "loaded document");
        Ok(LoadedDocument {
            file_name: document_ref.to_string(),
            size: bytes.len(),
            base64: B64.encode(&bytes),
        })
    }
}

/// A reference is a bare file name inside the store; no directories, no
/// parent hops, no absolute paths.
fn validate_ref(document_ref: &str) -> GatewayResult<()> {
    let mut components = Path::new(document_ref).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal || document_ref.contains(['/', '\\']) || document_ref.starts_with('.') {
        return Err(GatewayError::InvalidDocument(document_ref.to_string()));
    }
    Ok(())
}
