//! Package action
//!
//! Wraps the rest of the chain: validates the output path and source
//! directory, delegates (the downstream actions export the machine into
//! the directory), then copies include files, embeds the private key,
//! writes `metadata.json` and compresses the directory into a `.box`
//! archive (gzip-compressed tar).
//!
//! Context keys:
//! - `package.output` (optional): archive path, relative to the working directory
//! - `package.directory` (required): directory whose top level is archived
//! - `package.include` (optional): files or directories copied under `include/`
//! - `package.vagrantfile` (optional): copied as `include/_Vagrantfile`
//! - `package.info` (optional): copied to the root when named `info.json`
//! - `package.fullpath` (set): absolute archive path after validation

use crate::config::DEFAULT_PACKAGE_OUTPUT;
use crate::context::ActionContext;
use crate::error::{ActionError, Result};
use crate::progress::Progress;
use crate::traits::Action;
use crate::warden::Next;
use async_compression::tokio::write::GzipEncoder;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const OUTPUT_KEY: &str = "package.output";
pub const DIRECTORY_KEY: &str = "package.directory";
pub const INCLUDE_KEY: &str = "package.include";
pub const VAGRANTFILE_KEY: &str = "package.vagrantfile";
pub const INFO_KEY: &str = "package.info";
pub const FULLPATH_KEY: &str = "package.fullpath";

const INCLUDE_DIR: &str = "include";
const INFO_FILE: &str = "info.json";
const METADATA_FILE: &str = "metadata.json";
const PRIVATE_KEY_SOURCE: &str = "private_key";
const PRIVATE_KEY_FILE: &str = "vagrant_private_key";
const PACKAGE_PHASES: u32 = 3;

const PRIVATE_KEY_STANZA: &str = r#"Vagrant.configure("2") do |config|
  config.ssh.private_key_path = File.expand_path("../vagrant_private_key", __FILE__)
end
"#;

/// Native box packaging action
#[derive(Debug, Clone, Default)]
pub struct PackageAction;

impl PackageAction {
    pub const TAG: &'static str = "package";

    async fn package(&self, ctx: &ActionContext, directory: &Path, fullpath: &Path) -> Result<()> {
        let reporter = ctx.ui();

        reporter.report(
            Progress::new(Self::TAG, 20, "Copying include files").with_phase(
                "include",
                1,
                PACKAGE_PHASES,
            ),
        );
        copy_includes(ctx, directory).await?;
        copy_info(ctx, directory).await?;

        if let Some(machine) = ctx.machine() {
            let key = machine.data_dir().join(PRIVATE_KEY_SOURCE);
            if is_file(&key).await {
                reporter.report(
                    Progress::new(Self::TAG, 40, "Embedding private key").with_phase(
                        "private_key",
                        2,
                        PACKAGE_PHASES,
                    ),
                );
                embed_private_key(&key, directory).await?;
            }
        }

        write_metadata(ctx, directory).await?;

        reporter.report(
            Progress::new(
                Self::TAG,
                60,
                format!("Compressing package to {}", fullpath.display()),
            )
            .with_phase("compress", 3, PACKAGE_PHASES),
        );
        compress(directory, fullpath).await?;

        let size = fs::metadata(fullpath).await?.len();
        info!(path = %fullpath.display(), bytes = size, "package written");
        Ok(())
    }
}

#[async_trait]
impl Action for PackageAction {
    fn description(&self) -> &str {
        "Compress an exported machine directory into a box archive"
    }

    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
        let fullpath = resolve_output(ctx)?;
        validate_output(&fullpath).await?;

        let directory: Option<PathBuf> = ctx.get(DIRECTORY_KEY)?;
        let directory = match directory {
            Some(dir) if is_dir(&dir).await => absolute(dir)?,
            _ => return Err(ActionError::PackageRequiresDirectory),
        };

        for source in include_sources(ctx)? {
            if fs::symlink_metadata(&source).await.is_err() {
                return Err(ActionError::PackageIncludeMissing(source));
            }
        }

        ctx.set(FULLPATH_KEY, &fullpath)?;
        debug!(path = %fullpath.display(), directory = %directory.display(), "package pre-flight passed");

        next.call(ctx).await?;

        if let Err(fault) = self.package(ctx, &directory, &fullpath).await {
            if let Err(e) = remove_partial_output(&fault, &fullpath).await {
                warn!(path = %fullpath.display(), error = %e, "failed to remove partial package");
            }
            return Err(fault);
        }

        ctx.ui().report(Progress::completed(Self::TAG));
        Ok(())
    }

    async fn recover(&self, ctx: &mut ActionContext) -> Result<()> {
        let Some(fault) = ctx.failure() else {
            return Ok(());
        };
        let Some(fullpath) = ctx.get::<PathBuf>(FULLPATH_KEY)? else {
            return Ok(());
        };
        remove_partial_output(fault, &fullpath).await
    }
}

/// Absolute archive path for `package.output`
pub(crate) fn resolve_output(ctx: &ActionContext) -> Result<PathBuf> {
    let output: PathBuf = ctx
        .get(OUTPUT_KEY)?
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PACKAGE_OUTPUT));
    absolute(output)
}

/// Anchor a relative path at the working directory
fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// The output must not exist yet, as a file or a directory
pub(crate) async fn validate_output(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => Err(ActionError::PackageOutputDirectory(path.to_path_buf())),
        Ok(_) => Err(ActionError::PackageOutputExists(path.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete the archive unless `fault` says nothing was written
async fn remove_partial_output(fault: &ActionError, fullpath: &Path) -> Result<()> {
    if fault.is_benign() {
        debug!(path = %fullpath.display(), error = %fault, "skipping package cleanup");
        return Ok(());
    }
    match fs::remove_file(fullpath).await {
        Ok(()) => {
            info!(path = %fullpath.display(), "removed partial package");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn include_sources(ctx: &ActionContext) -> Result<Vec<PathBuf>> {
    let mut sources: Vec<PathBuf> = ctx.get(INCLUDE_KEY)?.unwrap_or_default();
    if let Some(vagrantfile) = ctx.get::<PathBuf>(VAGRANTFILE_KEY)? {
        sources.push(vagrantfile);
    }
    Ok(sources)
}

async fn copy_includes(ctx: &ActionContext, directory: &Path) -> Result<()> {
    let includes: Vec<PathBuf> = ctx.get(INCLUDE_KEY)?.unwrap_or_default();
    let vagrantfile: Option<PathBuf> = ctx.get(VAGRANTFILE_KEY)?;
    if includes.is_empty() && vagrantfile.is_none() {
        return Ok(());
    }

    let include_dir = directory.join(INCLUDE_DIR);
    fs::create_dir_all(&include_dir).await?;

    for source in includes {
        let Some(name) = source.file_name() else {
            return Err(ActionError::PackageIncludeMissing(source));
        };
        let dest = include_dir.join(name);
        debug!(from = %source.display(), to = %dest.display(), "copying include");
        copy_tree(&source, &dest).await?;
    }

    if let Some(vagrantfile) = vagrantfile {
        copy_tree(&vagrantfile, &include_dir.join("_Vagrantfile")).await?;
    }
    Ok(())
}

async fn copy_info(ctx: &ActionContext, directory: &Path) -> Result<()> {
    let Some(info) = ctx.get::<PathBuf>(INFO_KEY)? else {
        return Ok(());
    };
    if info.file_name().is_some_and(|n| n == INFO_FILE) && is_file(&info).await {
        fs::copy(&info, directory.join(INFO_FILE)).await?;
    } else {
        debug!(path = %info.display(), "ignoring package info that is not an info.json file");
    }
    Ok(())
}

/// Copy a file, symlink or directory tree to `dest`.
///
/// Symlinks are recreated, not followed. An existing symlink at a
/// destination is a [`ActionError::PackageIncludeSymlink`] fault.
async fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        let file_type = fs::symlink_metadata(&from).await?.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(&from).await?;
            fs::symlink(&target, &to)
                .await
                .map_err(|e| symlink_collision(e, &to))?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&to).await?;
            let mut entries = fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                pending.push((entry.path(), to.join(entry.file_name())));
            }
        } else {
            if is_symlink(&to).await {
                return Err(ActionError::PackageIncludeSymlink(to));
            }
            fs::copy(&from, &to).await?;
        }
    }
    Ok(())
}

fn symlink_collision(err: std::io::Error, path: &Path) -> ActionError {
    if err.kind() == ErrorKind::AlreadyExists {
        ActionError::PackageIncludeSymlink(path.to_path_buf())
    } else {
        err.into()
    }
}

async fn embed_private_key(key: &Path, directory: &Path) -> Result<()> {
    fs::copy(key, directory.join(PRIVATE_KEY_FILE)).await?;

    let mut vagrantfile = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(directory.join("Vagrantfile"))
        .await?;
    vagrantfile
        .write_all(format!("\n{PRIVATE_KEY_STANZA}").as_bytes())
        .await?;
    vagrantfile.flush().await?;
    Ok(())
}

async fn write_metadata(ctx: &ActionContext, directory: &Path) -> Result<()> {
    let path = directory.join(METADATA_FILE);
    if fs::symlink_metadata(&path).await.is_ok() {
        debug!(path = %path.display(), "keeping existing metadata");
        return Ok(());
    }

    let provider = ctx
        .machine()
        .map(|m| m.provider_name.as_str())
        .filter(|name| !name.is_empty())
        .or_else(|| ctx.provider().map(|p| p.provider_name()));
    let Some(provider) = provider else {
        warn!("no provider known, skipping metadata.json");
        return Ok(());
    };

    let metadata = serde_json::json!({ "provider": provider });
    fs::write(&path, serde_json::to_vec(&metadata)?).await?;
    Ok(())
}

/// Archive the immediate children of `directory` into `fullpath`.
/// The archive itself is never an entry, whatever path spelling reaches it.
async fn compress(directory: &Path, fullpath: &Path) -> Result<()> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(fullpath)
        .await
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                ActionError::PackageOutputExists(fullpath.to_path_buf())
            } else {
                e.into()
            }
        })?;
    let archive = file.metadata().await?;

    let mut children = Vec::new();
    let mut entries = fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        children.push(entry.path());
    }
    children.sort();

    let encoder = GzipEncoder::new(file);
    let mut builder = tokio_tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for path in children {
        let Some(name) = path.file_name() else {
            continue;
        };
        let meta = fs::symlink_metadata(&path).await?;
        if meta.dev() == archive.dev() && meta.ino() == archive.ino() {
            debug!(path = %path.display(), "skipping the archive being written");
            continue;
        }
        if meta.is_dir() {
            builder.append_dir_all(name, &path).await?;
        } else {
            builder.append_path_with_name(&path, name).await?;
        }
    }

    let mut encoder = builder.into_inner().await?;
    encoder.shutdown().await?;
    Ok(())
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .await
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}
