//! Built-in action implementations
//!
//! # Available Actions
//!
//! - `package_setup_folders` - Default the output path and create a scratch directory
//! - `package` - Compress an exported machine into a box archive
//! - `import` - Create a backend machine from box files

mod import;
mod package;
mod package_setup;

pub use import::{normalize_identifier, ImportAction};
pub use package::{
    PackageAction, DIRECTORY_KEY, FULLPATH_KEY, INCLUDE_KEY, INFO_KEY, OUTPUT_KEY,
    VAGRANTFILE_KEY,
};
pub use package_setup::{PackageSetupFoldersAction, SCRATCH_KEY};

use crate::config::{from_params, ImportOptions, PackageDefaults};
use crate::traits::Action;
use crate::ActionEngine;

/// Register all built-in actions with the engine
pub fn register_all(engine: &mut ActionEngine) {
    engine.register(PackageSetupFoldersAction::TAG, |params| {
        let defaults: PackageDefaults = from_params(params)?;
        Ok(Box::new(PackageSetupFoldersAction::new(defaults)) as Box<dyn Action>)
    });
    engine.register_action(PackageAction::TAG, PackageAction);
    engine.register(ImportAction::TAG, |params| {
        let options: ImportOptions = from_params(params)?;
        Ok(Box::new(ImportAction::new(options)?) as Box<dyn Action>)
    });
}

/// Create an engine with all built-in actions pre-registered
pub fn create_engine_with_actions() -> ActionEngine {
    let mut engine = ActionEngine::new();
    register_all(&mut engine);
    engine
}
