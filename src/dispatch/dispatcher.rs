//! Request Dispatcher
//!
//! Runs one parse request end to end:
//!
//! 1. Cheap validation: file present, size, extension, form options, backend
//! 2. Scratch acquisition
//! 3. Upload persisted and synced, job submitted to the worker pool
//! 4. Result shaped, scratch cleanup scheduled (or run at once on failure)
//!
//! Nothing touches the filesystem before step 2. Steps 3 and 4 run on a
//! detached task, so a client disconnect never skips cleanup.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::options::{ParseOptions, ParseUpload};
use super::response::{shape, ParseResponse, ResponseContext};
use crate::backend::{BackendRegistry, EffectiveBackend};
use crate::converter::ConverterConfig;
use crate::error::{AppError, ParseFailure};
use crate::pool::{RequestJob, WorkerPool};
use crate::scratch::{ScratchDirectory, ScratchManager};

/// File extensions accepted for parsing
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".pdf", ".png", ".jpeg", ".jpg", ".webp", ".gif"];

/// Short request identifier used in logs and scratch names
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Lowercase extension with its leading dot
fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Final path component, safe to join onto the scratch directory
fn safe_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename).trim();
    if name.is_empty() || name == "." || name == ".." {
        format!("upload{}", extension_of(filename))
    } else {
        name.to_string()
    }
}

/// A request that passed validation
struct Accepted {
    request_id: String,
    filename: String,
    data: Bytes,
    options: ParseOptions,
    effective: EffectiveBackend,
    config: ConverterConfig,
    started: Instant,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    pool: WorkerPool,
    scratch: ScratchManager,
    max_file_size: u64,
}

impl Dispatcher {
    pub fn new(registry: Arc<BackendRegistry>, pool: WorkerPool, scratch: ScratchManager, max_file_size: u64) -> Self {
        Self {
            registry,
            pool,
            scratch,
            max_file_size,
        }
    }

    /// Parse one uploaded document
    pub async fn dispatch(&self, upload: ParseUpload) -> Result<ParseResponse, ParseFailure> {
        let request_id = new_request_id();
        let accepted = self
            .accept(&request_id, upload)
            .map_err(|e| ParseFailure::new(request_id.clone(), e))?;

        let scratch = self
            .scratch
            .acquire(&request_id, accepted.effective.backend.id())
            .map_err(|e| ParseFailure::new(request_id.clone(), e))?;

        let this = self.clone();
        tokio::spawn(async move { this.run(scratch, accepted).await })
            .await
            .map_err(|e| {
                ParseFailure::new(request_id, AppError::Internal(format!("Parse task failed: {}", e)))
            })?
    }

    /// Validation that needs no I/O
    fn accept(&self, request_id: &str, upload: ParseUpload) -> Result<Accepted, AppError> {
        let started = Instant::now();
        let data = upload.data.ok_or(AppError::MissingFile)?;
        let filename = upload
            .filename
            .filter(|f| !f.trim().is_empty())
            .ok_or(AppError::MissingFile)?;

        let size = data.len() as u64;
        if size > self.max_file_size {
            return Err(AppError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let extension = extension_of(&filename);
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::UnsupportedExtension {
                extension: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    extension
                },
                supported: SUPPORTED_EXTENSIONS.join(", "),
            });
        }

        let options = ParseOptions::from_form(&upload.fields, self.registry.default_backend())?;
        let effective = self.registry.validate(
            &options.backend,
            options.parse_method,
            options.server_url.as_deref(),
        )?;
        if let Some(warning) = &effective.warning {
            tracing::warn!(request_id, "{}", warning);
        }

        let config = options.converter_config(&effective);
        tracing::info!(
            request_id,
            filename = %filename,
            size,
            backend = %effective.backend,
            parse_method = %effective.parse_method,
            output_format = %options.output_format,
            key = %config.key().digest(),
            "Accepted parse request"
        );

        Ok(Accepted {
            request_id: request_id.to_string(),
            filename,
            data,
            options,
            effective,
            config,
            started,
        })
    }

    async fn run(&self, scratch: ScratchDirectory, accepted: Accepted) -> Result<ParseResponse, ParseFailure> {
        let request_id = accepted.request_id.clone();
        match self.process(&scratch, accepted).await {
            Ok(response) => {
                tracing::info!(
                    request_id = %request_id,
                    pages = response.pages,
                    elapsed_ms = response.processing_time_ms,
                    "Parse completed"
                );
                self.scratch.schedule_delayed_cleanup(scratch);
                Ok(response)
            }
            Err(e) => {
                self.scratch.cleanup_immediately(scratch).await;
                Err(ParseFailure::new(request_id, e))
            }
        }
    }

    async fn process(&self, scratch: &ScratchDirectory, accepted: Accepted) -> Result<ParseResponse, AppError> {
        let source = scratch.source_path(&safe_filename(&accepted.filename));
        persist(&source, &accepted.data).await.map_err(|e| {
            AppError::Internal(format!("Failed to persist upload to {}: {}", source.display(), e))
        })?;

        let job = RequestJob::new(
            accepted.request_id.clone(),
            source,
            scratch.output_dir(),
            accepted.config.clone(),
        );
        let outcome = self.pool.submit(job).await?;

        // Image encoding and format conversion are CPU-bound
        tokio::task::spawn_blocking(move || {
            shape(
                ResponseContext {
                    request_id: &accepted.request_id,
                    filename: &accepted.filename,
                    options: &accepted.options,
                    effective: &accepted.effective,
                    elapsed: accepted.started.elapsed(),
                },
                outcome,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("Response shaping failed: {}", e)))
    }
}

/// Write and fsync before the worker opens the file
async fn persist(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}
