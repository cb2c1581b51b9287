//! Extension management (spec §4.F "Extension management", §6 on-disk
//! layout): stages the LLM tool's runtime home directory the subprocess
//! runs against, so the real user home is never touched by a worker
//! process. Two independent steps, each skipped if already satisfied:
//! installing required extensions, and copying OAuth credential files.

use std::path::Path;
use tracing::{instrument, warn};

/// Ensures `runtime_home` exists, then installs each of `required` from
/// `bundle_dir` that is not already present. Extensions are directories;
/// installation is a recursive copy, not a symlink, so the subprocess can
/// freely write into its own copy without mutating the bundle.
#[instrument(skip(bundle_dir))]
pub async fn ensure_extensions_installed(runtime_home: &Path, required: &[String], bundle_dir: Option<&Path>) -> std::io::Result<()> {
    let extensions_dir = runtime_home.join("extensions");
    tokio::fs::create_dir_all(&extensions_dir).await?;

    let Some(bundle_dir) = bundle_dir else {
        if !required.is_empty() {
            warn!(?required, "extensions required but no extension_bundle_dir configured");
        }
        return Ok(());
    };

    for name in required {
        let dest = extensions_dir.join(name);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            continue;
        }
        let src = bundle_dir.join(name);
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            warn!(extension = %name, src = %src.display(), "required extension not found in bundle dir, skipping");
            continue;
        }
        copy_dir_recursive(&src, &dest).await?;
    }
    Ok(())
}

/// Copies OAuth credential files from the user's real LLM-tool home into
/// `runtime_home`, so the subprocess authenticates without ever running
/// against the user's actual home directory. A missing source home is not
/// an error: a fresh worker may run with no prior interactive login.
#[instrument(skip(default_llm_home))]
pub async fn copy_oauth_credentials(default_llm_home: Option<&Path>, runtime_home: &Path) -> std::io::Result<()> {
    let Some(source) = default_llm_home else {
        return Ok(());
    };
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::create_dir_all(runtime_home).await?;

    const CREDENTIAL_FILES: &[&str] = &["oauth_creds.json", "google_accounts.json", ".credentials.json"];
    for file_name in CREDENTIAL_FILES {
        let src = source.join(file_name);
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            continue;
        }
        let dest = runtime_home.join(file_name);
        tokio::fs::copy(&src, &dest).await?;
    }
    Ok(())
}

fn copy_dir_recursive<'a>(src: &'a Path, dest: &'a Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dest).await?;
        let mut entries = tokio::fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let src_path = entry.path();
            let dest_path = dest.join(entry.file_name());
            if file_type.is_dir() {
                copy_dir_recursive(&src_path, &dest_path).await?;
            } else {
                tokio::fs::copy(&src_path, &dest_path).await?;
            }
        }
        Ok(())
    })
}
