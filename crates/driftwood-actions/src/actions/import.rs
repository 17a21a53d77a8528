//! Import action
//!
//! Creates a backend machine from an unpacked box. The box must hold a
//! machine definition under `Virtual Machines/` and a disk image under
//! `Virtual Hard Disks/`. The backend's identifier for the new machine is
//! written to the machine handle before the rest of the chain runs.
//!
//! There is no compensating step: a failed import leaves nothing behind
//! for this action to undo.

use crate::config::ImportOptions;
use crate::context::ActionContext;
use crate::driver::ImportParams;
use crate::error::{ActionError, Result};
use crate::progress::Progress;
use crate::traits::Action;
use crate::warden::Next;
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CONFIG_DIR: &str = "Virtual Machines";
const DISK_DIR: &str = "Virtual Hard Disks";

const CONFIG_EXTENSIONS: &[&str] = &["xml"];
const VMCX_EXTENSION: &str = "vmcx";
const DISK_EXTENSIONS: &[&str] = &["vhd", "vhdx"];

/// Native machine import action
#[derive(Debug, Clone, Default)]
pub struct ImportAction {
    options: ImportOptions,
}

impl ImportAction {
    pub const TAG: &'static str = "import";

    pub fn new(options: ImportOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }
}

#[async_trait]
impl Action for ImportAction {
    fn description(&self) -> &str {
        "Import a machine from box files through the provider driver"
    }

    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
        let driver = ctx.require_provider()?.clone();
        let machine = ctx.require_machine()?;
        let box_dir = machine
            .box_dir
            .clone()
            .ok_or(ActionError::MissingContext("machine box directory"))?;
        let data_dir = machine.data_dir().to_path_buf();
        let name = machine.name.clone();

        let mut config_extensions = CONFIG_EXTENSIONS.to_vec();
        if driver.supports_vmcx() {
            config_extensions.push(VMCX_EXTENSION);
        }

        let config_dir = box_dir.join(CONFIG_DIR);
        let config_file = find_by_extension(&config_dir, &config_extensions)
            .await?
            .ok_or_else(|| ActionError::MachineConfigNotFound {
                machine: name.clone(),
                dir: config_dir.clone(),
            })?;

        let disk_dir = box_dir.join(DISK_DIR);
        let image = find_by_extension(&disk_dir, DISK_EXTENSIONS)
            .await?
            .ok_or_else(|| ActionError::DiskImageNotFound {
                machine: name.clone(),
                dir: disk_dir.clone(),
            })?;

        debug!(
            machine = %name,
            config = %config_file.display(),
            image = %image.display(),
            "found box files"
        );

        let mut destination = data_dir.join(DISK_DIR);
        if let Some(file_name) = image.file_name() {
            destination.push(file_name);
        }

        let style = driver.path_style();
        let params = ImportParams {
            config_file: style.render(&config_file),
            destination_path: style.render(&destination),
            data_path: style.render(&data_dir),
            linked_clone: self.options.linked_clone,
            source_path: style.render(&image),
            vm_name: self.options.vmname.clone(),
            memory: self.options.memory,
            max_memory: self.options.maxmemory,
            processors: self.options.cpus,
        };

        ctx.ui().report(Progress::new(
            Self::TAG,
            10,
            format!("Importing machine '{}'", name),
        ));

        let response = driver.import(&params).await.map_err(|e| match e {
            ActionError::Driver(_) => e,
            other => ActionError::Driver(other.to_string()),
        })?;

        let id = response
            .get("id")
            .ok_or_else(|| ActionError::InvalidIdentifier("response has no id".to_string()))
            .and_then(normalize_identifier)?;

        info!(machine = %name, id = %id, provider = driver.provider_name(), "machine imported");
        if let Some(machine) = ctx.machine_mut() {
            machine.id = Some(id);
        }
        ctx.ui().report(Progress::completed(Self::TAG));

        next.call(ctx).await
    }
}

/// Reduce a backend identifier to a single string.
///
/// A string is used as is; a non-empty array uses its first element,
/// which must itself be a string. Anything else is an integrity fault.
pub fn normalize_identifier(value: &Value) -> Result<String> {
    match value {
        Value::String(id) if !id.is_empty() => Ok(id.clone()),
        Value::Array(items) => match items.first() {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            _ => Err(ActionError::InvalidIdentifier(value.to_string())),
        },
        _ => Err(ActionError::InvalidIdentifier(value.to_string())),
    }
}

/// First file in `dir` (by name) with one of `extensions`, compared
/// case-insensitively. A missing directory finds nothing.
async fn find_by_extension(dir: &Path, extensions: &[&str]) -> Result<Option<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let accepted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if accepted && entry.file_type().await?.is_file() {
            matches.push(path);
        }
    }

    matches.sort();
    Ok(matches.into_iter().next())
}
