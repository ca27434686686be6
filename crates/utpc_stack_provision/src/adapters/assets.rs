//! Deterministic zip packaging for layer and function artifacts.
//!
//! Entries are sorted and stamped with a fixed timestamp so an unchanged
//! directory always yields the same archive digest, and an unchanged digest
//! never causes an update.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use utpc_stack_core::fingerprint::bytes_fingerprint;
use utpc_stack_core::{Property, ResourceDescriptor, ResourceKind, ResourceRef};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset directory '{path}' for {resource} does not exist")]
    Missing { resource: ResourceRef, path: PathBuf },
    #[error("{resource} declares no 'code' location")]
    NoCodeLocation { resource: ResourceRef },
    #[error("failed to package asset for {resource}: {source}")]
    Io {
        resource: ResourceRef,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build zip archive for {resource}: {source}")]
    Zip {
        resource: ResourceRef,
        #[source]
        source: zip::result::ZipError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedAsset {
    pub archive_path: PathBuf,
    pub sha256: String,
}

impl PackagedAsset {
    /// Archive name without the output directory, stable across machines.
    pub fn file_name(&self) -> String {
        format!("asset.{}.zip", self.sha256)
    }
}

/// Packages artifact directories (resolved against `base_dir`) into
/// `out_dir/asset.<sha256>.zip`.
#[derive(Debug, Clone)]
pub struct AssetPackager {
    base_dir: PathBuf,
    out_dir: PathBuf,
}

impl AssetPackager {
    pub fn new(base_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            out_dir: out_dir.into(),
        }
    }

    pub fn package_dir(
        &self,
        resource: &ResourceRef,
        location: &str,
    ) -> Result<PackagedAsset, AssetError> {
        let source_dir = self.base_dir.join(location);
        if !source_dir.is_dir() {
            return Err(AssetError::Missing {
                resource: resource.clone(),
                path: source_dir,
            });
        }

        let io_error = |source: std::io::Error| AssetError::Io {
            resource: resource.clone(),
            source,
        };
        let zip_error = |source: zip::result::ZipError| AssetError::Zip {
            resource: resource.clone(),
            source,
        };

        let mut files = Vec::new();
        collect_files(&source_dir, &mut files).map_err(io_error)?;
        files.sort();

        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for file in &files {
            let entry_name = entry_name(&source_dir, file);
            zip.start_file(entry_name, options).map_err(zip_error)?;
            let body = fs::read(file).map_err(io_error)?;
            zip.write_all(&body).map_err(io_error)?;
        }
        let archive = zip.finish().map_err(zip_error)?.into_inner();

        let sha256 = bytes_fingerprint(&archive);
        fs::create_dir_all(&self.out_dir).map_err(io_error)?;
        let archive_path = self.out_dir.join(format!("asset.{sha256}.zip"));
        fs::write(&archive_path, &archive).map_err(io_error)?;

        debug!(
            resource = %resource,
            files = files.len(),
            sha256 = %sha256,
            "asset packaged"
        );
        Ok(PackagedAsset {
            archive_path,
            sha256,
        })
    }

    /// Packages the `code` location of every layer and function and records
    /// the archive digest as `code_sha256`, so code changes surface as
    /// property changes.
    pub fn stamp(
        &self,
        descriptors: Vec<ResourceDescriptor>,
    ) -> Result<Vec<ResourceDescriptor>, AssetError> {
        descriptors
            .into_iter()
            .map(|descriptor| {
                if !matches!(descriptor.kind, ResourceKind::Layer | ResourceKind::Function) {
                    return Ok(descriptor);
                }
                let resource = descriptor.resource_ref();
                let location = match descriptor.properties.get("code") {
                    Some(Property::Literal(serde_json::Value::String(location))) => {
                        location.clone()
                    }
                    _ => return Err(AssetError::NoCodeLocation { resource }),
                };
                let packaged = self.package_dir(&resource, &location)?;
                let archive_name = packaged.file_name();
                Ok(descriptor
                    .with_property("code_sha256", Property::literal(packaged.sha256))
                    .with_property("code_archive", Property::literal(archive_name)))
            })
            .collect()
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn entry_name(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
