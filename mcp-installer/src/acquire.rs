//! Acquisition: fetch an [`Origin`] into
//! `<install_root>/<type>/<name>`, after removing any previous directory
//! at that path.

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::command::{safe_join, CommandRunner};
use crate::error::{InstallError, InstallResult};
use crate::origin::Origin;

/// Fetch `origin` into `dest`, overwriting any prior contents. `dest`'s
/// parent is created but `dest` itself must not exist on entry (callers
/// remove it first step 3).
pub async fn acquire(
    origin: &Origin,
    dest: &Path,
    runner: &dyn CommandRunner,
    command_timeout: std::time::Duration,
) -> InstallResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::metadata(dest).await.is_ok() {
        tokio::fs::remove_dir_all(dest).await?;
    }

    match origin {
        Origin::Github { clone_url, branch, subpath }
        | Origin::Gitlab { clone_url, branch, subpath }
        | Origin::Bitbucket { clone_url, branch, subpath } => {
            clone_git(clone_url, branch, subpath.as_deref(), dest, runner, command_timeout).await
        }
        Origin::GenericGit { clone_url } => clone_git(clone_url, "main", None, dest, runner, command_timeout).await,
        Origin::Npm { package, version } => acquire_npm(package, version, dest, runner, command_timeout).await,
        Origin::Pip { package, version } => acquire_pip(package, version, dest, runner, command_timeout).await,
        Origin::Tarball { download_url } => acquire_tarball(download_url, dest).await,
        Origin::LocalFile { path } => acquire_local(path, dest).await,
    }
}

async fn clone_git(
    clone_url: &str,
    branch: &str,
    subpath: Option<&str>,
    dest: &Path,
    runner: &dyn CommandRunner,
    timeout: std::time::Duration,
) -> InstallResult<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let dest_str = dest.to_string_lossy().into_owned();
    let mut args = vec!["clone", "--depth", "1", "--branch", branch, clone_url, dest_str.as_str()];
    // `git clone --branch main` fails for repos whose default branch isn't
    // `main`; callers that didn't request a specific branch fall back to a
    // branch-less clone on failure.
    let requested_default_branch = branch == "main";
    let output = runner.run("git", &args, parent, timeout).await;
    let output = match (output, requested_default_branch) {
        (Ok(out), _) if out.success() => out,
        (_, true) => {
            args = vec!["clone", "--depth", "1", clone_url, dest_str.as_str()];
            let out = runner.run("git", &args, parent, timeout).await?;
            if !out.success() {
                return Err(InstallError::AcquisitionFailed {
                    url: clone_url.to_string(),
                    reason: out.stderr,
                });
            }
            out
        }
        (Ok(out), false) => {
            return Err(InstallError::AcquisitionFailed {
                url: clone_url.to_string(),
                reason: out.stderr,
            })
        }
        (Err(e), _) => return Err(e),
    };
    let _ = output;

    if let Some(subpath) = subpath {
        hoist_subtree(dest, subpath).await?;
    }
    Ok(())
}

/// Hoist a subtree of a cloned repo up to `dest` itself, for GitHub/GitLab/
/// Bitbucket URLs that name a path within the repo.
async fn hoist_subtree(dest: &Path, subpath: &str) -> InstallResult<()> {
    let nested = safe_join(dest, subpath)?;
    let staging = dest.with_extension("hoist-tmp");
    if tokio::fs::metadata(&staging).await.is_ok() {
        tokio::fs::remove_dir_all(&staging).await?;
    }
    copy_dir_recursive(&nested, &staging)?;
    tokio::fs::remove_dir_all(dest).await?;
    tokio::fs::rename(&staging, dest).await?;
    Ok(())
}

async fn acquire_npm(
    package: &str,
    version: &str,
    dest: &Path,
    runner: &dyn CommandRunner,
    timeout: std::time::Duration,
) -> InstallResult<()> {
    let staging = dest.with_extension("npm-stage");
    if tokio::fs::metadata(&staging).await.is_ok() {
        tokio::fs::remove_dir_all(&staging).await?;
    }
    tokio::fs::create_dir_all(&staging).await?;

    let spec = format!("{package}@{version}");
    let output = runner.run("npm", &["pack", &spec, "--pack-destination", &staging.to_string_lossy()], &staging, timeout).await?;
    if !output.success() {
        return Err(InstallError::AcquisitionFailed {
            url: spec,
            reason: output.stderr,
        });
    }

    let tarball = find_one_file(&staging, "tgz")?.ok_or_else(|| InstallError::AcquisitionFailed {
        url: package.to_string(),
        reason: "npm pack produced no .tgz".to_string(),
    })?;

    extract_tar_gz(&tarball, &staging)?;
    let hoisted = staging.join("package");
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(&hoisted, dest).await?;
    let _ = tokio::fs::remove_dir_all(&staging).await;
    Ok(())
}

async fn acquire_pip(
    package: &str,
    version: &str,
    dest: &Path,
    runner: &dyn CommandRunner,
    timeout: std::time::Duration,
) -> InstallResult<()> {
    tokio::fs::create_dir_all(dest).await?;
    let spec = if version == "latest" {
        package.to_string()
    } else {
        format!("{package}=={version}")
    };
    let dest_str = dest.to_string_lossy().into_owned();
    let output = runner
        .run("pip", &["download", "--no-deps", "--no-binary", ":none:", "--dest", &dest_str, &spec], dest, timeout)
        .await?;
    if !output.success() {
        return Err(InstallError::AcquisitionFailed {
            url: spec,
            reason: output.stderr,
        });
    }
    Ok(())
}

async fn acquire_tarball(download_url: &str, dest: &Path) -> InstallResult<()> {
    let response = reqwest::get(download_url).await?;
    let bytes = response.bytes().await?;
    let staging = dest.with_extension("tar-stage");
    if tokio::fs::metadata(&staging).await.is_ok() {
        tokio::fs::remove_dir_all(&staging).await?;
    }
    tokio::fs::create_dir_all(&staging).await?;

    if download_url.ends_with(".zip") {
        extract_zip_bytes(&bytes, &staging)?;
    } else {
        let tmp = staging.join("archive.tar.gz");
        tokio::fs::write(&tmp, &bytes).await?;
        extract_tar_gz(&tmp, &staging)?;
        let _ = tokio::fs::remove_file(&tmp).await;
    }

    // `--strip-components=1`-equivalent: if the archive unpacked to a
    // single top-level directory, hoist its contents.
    let entries = collect_dir_entries(&staging)?;
    if entries.len() == 1 && entries[0].is_dir() {
        let inner = entries[0].clone();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&inner, dest).await?;
        let _ = tokio::fs::remove_dir_all(&staging).await;
    } else {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&staging, dest).await?;
    }
    Ok(())
}

async fn acquire_local(path: &str, dest: &Path) -> InstallResult<()> {
    let source = PathBuf::from(path);
    if !source.exists() {
        return Err(InstallError::AcquisitionFailed {
            url: path.to_string(),
            reason: "local path does not exist".to_string(),
        });
    }
    copy_dir_recursive(&source, dest)?;
    Ok(())
}

fn copy_dir_recursive(from: &Path, to: &Path) -> InstallResult<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest_path = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}

fn find_one_file(dir: &Path, extension: &str) -> InstallResult<Option<PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().extension().and_then(|e| e.to_str()) == Some(extension) {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

fn collect_dir_entries(dir: &Path) -> InstallResult<Vec<PathBuf>> {
    Ok(std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect())
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> InstallResult<()> {
    let file = std::fs::File::open(archive)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(dest)
        .map_err(|e| InstallError::Archive(format!("failed to extract tar.gz: {e}")))
}

fn extract_zip_bytes(bytes: &[u8], dest: &Path) -> InstallResult<()> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor).map_err(|e| InstallError::Archive(e.to_string()))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| InstallError::Archive(e.to_string()))?;
        let Some(rel) = file.enclosed_name() else { continue };
        let out_path = dest.join(rel);
        if file.name().ends_with('/') {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| InstallError::Archive(e.to_string()))?;
        std::io::Write::write_all(&mut out_file, &buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_local_copies_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("index.js"), "console.log(1)").unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub").join("a.txt"), "a").unwrap();

        let dest_parent = tempfile::tempdir().unwrap();
        let dest = dest_parent.path().join("copied");

        acquire_local(&src.path().to_string_lossy(), &dest).await.unwrap();
        assert!(dest.join("index.js").exists());
        assert!(dest.join("sub").join("a.txt").exists());
    }
}
