//! Driftwood Action Pipeline Engine
//!
//! Every machine operation (import, package, provision, destroy) is an
//! ordered chain of small actions. Callers assemble a [`Builder`],
//! extensions splice their own actions in through [`HookPoint`]s, and a
//! [`Warden`] runs the compiled chain, unwinding started actions in
//! reverse order when one of them faults.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ActionEngine                 │
//! │  ┌────────────────────────────────────┐   │
//! │  │  Action Registry (tag -> factory)  │   │
//! │  │  package_setup_folders | package | │   │
//! │  │  import | ...                      │   │
//! │  └────────────────────────────────────┘   │
//! │  ┌────────────────────────────────────┐   │
//! │  │  Hook Registry (point -> hooks)    │   │
//! │  └────────────────────────────────────┘   │
//! │                  │                        │
//! │        Builder ──┴──> compile ──> Chain   │
//! │                                    │      │
//! │                                    ▼      │
//! │  ┌────────────────────────────────────┐   │
//! │  │  Warden                            │   │
//! │  │  - Run forward steps in order      │   │
//! │  │  - Unwind started steps on fault   │   │
//! │  └────────────────────────────────────┘   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use driftwood_actions::{actions, ActionContext, Builder, HookPoint};
//!
//! let engine = actions::create_engine_with_actions();
//! let mut builder = Builder::new();
//! builder.use_action(engine.descriptor("import", serde_json::Value::Null)?);
//!
//! let mut ctx = ActionContext::new().with_machine(machine).with_provider(driver);
//! engine.run(&HookPoint::MACHINE_ACTION_IMPORT, builder, &mut ctx).await?;
//! ```

pub mod actions;
pub mod builder;
pub mod config;
pub mod context;
pub mod driver;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod progress;
pub mod traits;
pub mod warden;

pub use builder::*;
pub use config::*;
pub use context::*;
pub use driver::*;
pub use engine::*;
pub use error::*;
pub use hooks::*;
pub use progress::*;
pub use traits::*;
pub use warden::*;
