use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db;
use crate::photos;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/enroll.sqlite3";
const PHOTOS_PREFIX: &str = "photos/";
pub const BUNDLE_FORMAT_V1: &str = "enroll-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub photo_count: usize,
}

/// Bundles the whole workspace (database + photo blobs) into one zip with a
/// manifest carrying per-entry SHA-256 digests.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(db::DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;

    // BTreeMap keeps manifest digests in a stable order.
    let mut digests: BTreeMap<String, String> = BTreeMap::new();
    digests.insert(DB_ENTRY.to_string(), sha256_hex(&db_bytes));

    let photo_files = collect_photo_files(workspace_path)?;
    let mut photo_payloads: Vec<(String, Vec<u8>)> = Vec::with_capacity(photo_files.len());
    for (key, path) in &photo_files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read blob {}", path.to_string_lossy()))?;
        let entry = format!("{}{}", PHOTOS_PREFIX, key);
        digests.insert(entry.clone(), sha256_hex(&bytes));
        photo_payloads.push((entry, bytes));
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": db::now_timestamp(),
        "sha256": digests,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    for (entry, bytes) in &photo_payloads {
        zip.start_file(entry, opts)
            .with_context(|| format!("failed to start entry {}", entry))?;
        zip.write_all(bytes)
            .with_context(|| format!("failed to write entry {}", entry))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2 + photo_payloads.len(),
    })
}

/// Restores a bundle into the workspace: database via temp-file-then-rename,
/// photo blobs under `photos/`, every entry checked against the manifest
/// digests.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let digests = manifest.get("sha256").and_then(|v| v.as_object());

    let dst = workspace_path.join(db::DB_FILE);
    let tmp_dst = workspace_path.join(format!("{}.importing", db::DB_FILE));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/enroll.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    verify_digest(digests, DB_ENTRY, &db_bytes)?;

    let mut db_out = File::create(&tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    db_out
        .write_all(&db_bytes)
        .context("failed to write extracted database")?;
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    let mut photo_count = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("failed to read zip entry")?;
        let name = entry.name().to_string();
        let Some(key) = name.strip_prefix(PHOTOS_PREFIX) else {
            continue;
        };
        let Some(rel) = safe_photo_rel_path(key) else {
            return Err(anyhow!("bundle entry escapes photos directory: {}", name));
        };
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to extract {}", name))?;
        verify_digest(digests, &name, &bytes)?;

        let out_path = workspace_path.join(photos::PHOTOS_DIR).join(rel);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
        std::fs::write(&out_path, &bytes)
            .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
        photo_count += 1;
    }

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        photo_count,
    })
}

fn collect_photo_files(workspace_path: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let root = workspace_path.join(photos::PHOTOS_DIR);
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    for category in ["student_photos", "contact_photos"] {
        let dir = root.join(category);
        if !dir.is_dir() {
            continue;
        }
        for ent in std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.to_string_lossy()))?
        {
            let ent = ent?;
            let path = ent.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = ent.file_name().to_str() {
                out.push((format!("{}/{}", category, name), path));
            }
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn safe_photo_rel_path(key: &str) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for part in key.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return None;
        }
        rel.push(part);
    }
    (rel.components().count() > 0).then_some(rel)
}

fn verify_digest(
    digests: Option<&serde_json::Map<String, serde_json::Value>>,
    entry: &str,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let Some(map) = digests else {
        return Ok(()); // manifest without digests is accepted as-is
    };
    let Some(expected) = map.get(entry).and_then(|v| v.as_str()) else {
        return Err(anyhow!("bundle entry not listed in manifest: {}", entry));
    };
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(anyhow!(
            "digest mismatch for {}: expected {}, got {}",
            entry,
            expected,
            actual
        ));
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    crate::auth::hex_digest(&Sha256::digest(bytes))
}
