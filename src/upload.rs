//! Batch upload submission and directory collection.
//!
//! [`submit_batch`] fires every upload at once and waits for all of them.
//! There is no ordering between uploads and no rollback: when one fails,
//! the others that succeeded stay in the registry. The [`SubmitReport`]
//! records the outcome of each file.

use anyhow::{bail, Result};
use futures::future::join_all;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use ragdesk_core::models::UploadRequest;
use ragdesk_core::registry::DocumentRegistry;
use ragdesk_core::wizard::{SubmitReport, UploadOutcome, UploadWizard, WizardFile, WizardVariant};
use ragdesk_core::WizardError;

use crate::config::UploadConfig;

/// Uploads every request concurrently and reports per file.
pub async fn submit_batch(
    registry: &dyn DocumentRegistry,
    requests: Vec<UploadRequest>,
) -> SubmitReport {
    let uploads = requests.into_iter().map(|req| async move {
        let name = req.name.clone();
        match registry.upload_file(req).await {
            Ok(doc) => UploadOutcome::ok(&name, &doc.id),
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "upload failed");
                UploadOutcome::failed(&name, e.to_string())
            }
        }
    });

    let report = SubmitReport {
        outcomes: join_all(uploads).await,
    };
    tracing::info!(
        files = report.outcomes.len(),
        failed = report.failures().count(),
        "batch submitted"
    );
    report
}

/// Runs a single-tool wizard over `files` in one go: every file is
/// associated with `ferramenta` and the batch is submitted.
pub async fn upload_with_tool(
    registry: &dyn DocumentRegistry,
    cliente: &str,
    ferramenta: &str,
    tipo: &str,
    files: Vec<WizardFile>,
) -> Result<SubmitReport, WizardError> {
    let mut wizard = UploadWizard::new(WizardVariant::SingleTool);
    wizard.set_client(cliente)?;
    wizard.set_tipo(tipo)?;
    let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    for f in files {
        wizard.add_file(f)?;
    }
    wizard.proceed_to_tools()?;
    wizard.create_tool(ferramenta)?;
    for name in &names {
        wizard.assign(name, ferramenta.trim())?;
    }
    wizard.advance()?;

    let requests = wizard.begin_submit()?;
    let report = submit_batch(registry, requests).await;
    wizard.finish(report.clone())?;
    Ok(report)
}

/// `rdk upload <dir>`: collects the directory and uploads it under one tool.
pub async fn run_upload(
    registry: &dyn DocumentRegistry,
    upload: &UploadConfig,
    root: &Path,
    cliente: &str,
    ferramenta: &str,
    tipo: &str,
) -> Result<()> {
    let files = collect_files(root, upload)?;
    println!("Uploading {} files from {}", files.len(), root.display());

    let report = upload_with_tool(registry, cliente, ferramenta, tipo, files).await?;
    for o in &report.outcomes {
        match (&o.document_id, &o.error) {
            (Some(id), _) => println!("  ok      {}  ({})", o.file, id),
            (None, err) => println!("  FAILED  {}  {}", o.file, err.as_deref().unwrap_or("")),
        }
    }
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{} of {} uploads failed", failed, report.outcomes.len());
    }
    println!("Done.");
    Ok(())
}

/// Reads every matching file under `root` into wizard files, sorted by
/// relative path. The relative path (with `/` separators) is the name.
pub fn collect_files(root: &Path, upload: &UploadConfig) -> Result<Vec<WizardFile>> {
    if !root.is_dir() {
        bail!("Upload directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&upload.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/.DS_Store".to_string()];
    excludes.extend(upload.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let data = std::fs::read(path)?;
        files.push(WizardFile::new(&rel_str, content_type_for(&rel_str), data));
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// MIME type from the file extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdesk_core::registry::memory::InMemoryRegistry;
    use ragdesk_core::Metadata;
    use tempfile::TempDir;

    fn request(name: &str) -> UploadRequest {
        UploadRequest {
            name: name.to_string(),
            content_type: "text/plain".to_string(),
            data: b"hello".to_vec(),
            metadata: Metadata::new().with("Ferramenta", "X"),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_per_file() {
        let reg = InMemoryRegistry::new();
        reg.fail_uploads_named("b.txt");
        let report = submit_batch(&reg, vec![request("a.txt"), request("b.txt"), request("c.txt")]).await;

        assert_eq!(report.outcomes.len(), 3);
        assert!(!report.succeeded());
        let failed: Vec<&str> = report.failures().map(|o| o.file.as_str()).collect();
        assert_eq!(failed, vec!["b.txt"]);
        // No rollback.
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let reg = InMemoryRegistry::new();
        let report = submit_batch(&reg, vec![request("a.txt")]).await;
        assert!(report.succeeded());
        assert!(report.outcomes[0].document_id.is_some());
    }

    #[tokio::test]
    async fn test_upload_with_tool_tags_every_file() {
        let reg = InMemoryRegistry::new();
        let files = vec![
            WizardFile::new("a.txt", "text/plain", b"a".to_vec()),
            WizardFile::new("b.txt", "text/plain", b"b".to_vec()),
        ];
        let report = upload_with_tool(&reg, "Acme", "Zendesk", "", files).await.unwrap();
        assert!(report.succeeded());

        let docs = reg.list_documents(None).await.unwrap();
        assert_eq!(docs.len(), 2);
        for d in &docs {
            assert_eq!(d.metadata.first("cliente"), Some("Acme"));
            assert_eq!(d.metadata.first("Ferramenta"), Some("Zendesk"));
            assert_eq!(d.metadata.first("tipo"), Some("documento"));
        }
    }

    #[tokio::test]
    async fn test_upload_with_tool_needs_client() {
        let reg = InMemoryRegistry::new();
        let files = vec![WizardFile::new("a.txt", "text/plain", b"a".to_vec())];
        let err = upload_with_tool(&reg, " ", "Zendesk", "", files).await.unwrap_err();
        assert_eq!(err, WizardError::MissingClient);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_collect_files_respects_globs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("sub/b.md"), b"# b").unwrap();
        std::fs::write(dir.path().join("skip.log"), b"x").unwrap();

        let config = UploadConfig {
            include_globs: vec!["**/*".to_string()],
            exclude_globs: vec!["**/*.log".to_string()],
        };
        let files = collect_files(dir.path(), &config).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "sub/b.md"]);
        assert_eq!(files[0].content_type, "application/pdf");
        assert_eq!(files[1].data, b"# b");
    }

    #[test]
    fn test_missing_dir() {
        assert!(collect_files(Path::new("/nonexistent/rdk"), &UploadConfig::default()).is_err());
    }
}
