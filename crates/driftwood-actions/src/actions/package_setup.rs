//! Package folder setup action
//!
//! Runs ahead of [`PackageAction`](super::PackageAction): fills in the
//! default output path, fails early if it is taken, and provides a
//! scratch directory for the export when the caller did not name one.

use super::package::{resolve_output, validate_output, DIRECTORY_KEY, OUTPUT_KEY};
use crate::config::PackageDefaults;
use crate::context::ActionContext;
use crate::error::Result;
use crate::traits::Action;
use crate::warden::Next;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Scratch directory created by this action, if any
pub const SCRATCH_KEY: &str = "package_setup.scratch_dir";

#[derive(Debug, Clone, Default)]
pub struct PackageSetupFoldersAction {
    defaults: PackageDefaults,
}

impl PackageSetupFoldersAction {
    pub const TAG: &'static str = "package_setup_folders";

    pub fn new(defaults: PackageDefaults) -> Self {
        Self { defaults }
    }

    fn scratch_root(&self, ctx: &ActionContext) -> PathBuf {
        if let Some(dir) = &self.defaults.temp_dir {
            return dir.clone();
        }
        match ctx.machine() {
            Some(machine) => machine.data_dir().join("tmp"),
            None => std::env::temp_dir(),
        }
    }
}

#[async_trait]
impl Action for PackageSetupFoldersAction {
    fn description(&self) -> &str {
        "Prepare the output path and scratch directory for packaging"
    }

    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
        if !ctx.contains(OUTPUT_KEY) {
            ctx.set(OUTPUT_KEY, &self.defaults.output)?;
        }
        let fullpath = resolve_output(ctx)?;
        validate_output(&fullpath).await?;

        if !ctx.contains(DIRECTORY_KEY) {
            let root = self.scratch_root(ctx);
            fs::create_dir_all(&root).await?;
            let scratch = root.join(format!("driftwood-package-{}", Uuid::new_v4()));
            fs::create_dir(&scratch).await?;
            debug!(path = %scratch.display(), "created package scratch directory");

            ctx.set(DIRECTORY_KEY, &scratch)?;
            ctx.set(SCRATCH_KEY, &scratch)?;
        }

        next.call(ctx).await?;

        if let Some(scratch) = ctx.get::<PathBuf>(SCRATCH_KEY)? {
            remove_scratch(&scratch).await?;
        }
        Ok(())
    }

    async fn recover(&self, ctx: &mut ActionContext) -> Result<()> {
        match ctx.get::<PathBuf>(SCRATCH_KEY)? {
            Some(scratch) => remove_scratch(&scratch).await,
            None => Ok(()),
        }
    }
}

async fn remove_scratch(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => {
            info!(path = %path.display(), "removed package scratch directory");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
