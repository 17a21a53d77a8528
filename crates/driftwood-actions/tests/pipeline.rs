use async_trait::async_trait;
use driftwood_actions::actions::{self, DIRECTORY_KEY, OUTPUT_KEY, SCRATCH_KEY};
use driftwood_actions::{
    Action, ActionContext, ActionDescriptor, ActionError, Builder, Driver, Hook, HookPoint,
    ImportParams, Machine, Next, Result, Warden, WardenState,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

/// Records its forward and compensating steps; optionally faults
#[derive(Clone)]
struct Recorder {
    name: String,
    log: Log,
    fail: bool,
}

impl Recorder {
    fn descriptor(name: &str, log: &Log) -> ActionDescriptor {
        Self::build(name, log, false)
    }

    fn failing(name: &str, log: &Log) -> ActionDescriptor {
        Self::build(name, log, true)
    }

    fn build(name: &str, log: &Log, fail: bool) -> ActionDescriptor {
        let action = Recorder {
            name: name.to_string(),
            log: log.clone(),
            fail,
        };
        ActionDescriptor::from_action(name.to_string(), action)
    }
}

#[async_trait]
impl Action for Recorder {
    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
        self.log.lock().unwrap().push(format!("call:{}", self.name));
        if self.fail {
            return Err(ActionError::ExecutionFailed(self.name.clone()));
        }
        next.call(ctx).await
    }

    async fn recover(&self, _ctx: &mut ActionContext) -> Result<()> {
        self.log.lock().unwrap().push(format!("recover:{}", self.name));
        Ok(())
    }
}

/// Stand-in for a provider export: writes a disk into the package directory
#[derive(Clone)]
struct Export;

#[async_trait]
impl Action for Export {
    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
        let dir: PathBuf = ctx
            .get(DIRECTORY_KEY)?
            .ok_or(ActionError::MissingContext("package directory"))?;
        tokio::fs::create_dir_all(dir.join("Virtual Hard Disks")).await?;
        tokio::fs::write(dir.join("Virtual Hard Disks").join("disk.vhdx"), b"disk").await?;
        next.call(ctx).await
    }
}

fn log_entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn test_fault_unwinds_prior_actions_in_reverse() {
    let log = Log::default();
    let mut builder = Builder::new();
    for name in ["one", "two"] {
        builder.use_action(Recorder::descriptor(name, &log));
    }
    builder.use_action(Recorder::failing("three", &log));
    for name in ["four", "five"] {
        builder.use_action(Recorder::descriptor(name, &log));
    }
    let chain = builder.compile().unwrap();
    let mut ctx = ActionContext::new();
    let mut warden = Warden::new(&chain);

    let err = warden.call(&mut ctx).await.unwrap_err();

    assert!(matches!(err, ActionError::ExecutionFailed(ref n) if n == "three"));
    assert_eq!(warden.state(), WardenState::Failed);
    assert_eq!(warden.faulted(), Some("three"));
    assert_eq!(
        log_entries(&log),
        vec!["call:one", "call:two", "call:three", "recover:two", "recover:one"]
    );
    assert_eq!(ctx.failure().map(|e| e.to_string()), Some(err.to_string()));
}

#[tokio::test]
async fn test_insert_before_runs_immediately_before() {
    let log = Log::default();
    let mut builder = Builder::new();
    builder
        .use_action(Recorder::descriptor("setup", &log))
        .use_action(Recorder::descriptor("export", &log))
        .use_action(Recorder::descriptor("finish", &log));
    builder
        .insert_before("export", Recorder::descriptor("halt", &log))
        .unwrap();

    let chain = builder.compile().unwrap();
    Warden::new(&chain)
        .call(&mut ActionContext::new())
        .await
        .unwrap();

    assert_eq!(
        log_entries(&log),
        vec!["call:setup", "call:halt", "call:export", "call:finish"]
    );
}

#[tokio::test]
async fn test_hooks_from_independent_extensions() {
    let log = Log::default();
    let mut engine = actions::create_engine_with_actions();

    let mut first = Hook::new();
    first.after("export", Recorder::descriptor("compact", &log));
    engine.register_hook(HookPoint::new("machine_action_halt"), "compactor", first);

    let mut second = Hook::new();
    second.before("export", Recorder::descriptor("snapshot", &log));
    engine.register_hook(HookPoint::new("machine_action_halt"), "snapshots", second);

    let mut builder = Builder::new();
    builder.use_action(Recorder::descriptor("export", &log));

    engine
        .run(&HookPoint::new("machine_action_halt"), builder, &mut ActionContext::new())
        .await
        .unwrap();

    assert_eq!(
        log_entries(&log),
        vec!["call:snapshot", "call:export", "call:compact"]
    );
}

#[tokio::test]
async fn test_nested_builder_failure_recorded_once() {
    let log = Log::default();
    let mut inner = Builder::new();
    inner
        .use_action(Recorder::descriptor("inner_a", &log))
        .use_action(Recorder::failing("inner_b", &log));

    let mut outer = Builder::new();
    outer
        .use_action(Recorder::descriptor("outer_a", &log))
        .use_action(inner.into_descriptor("nested"))
        .use_action(Recorder::descriptor("outer_b", &log));

    let chain = outer.compile().unwrap();
    let mut ctx = ActionContext::new();
    let err = Warden::new(&chain).call(&mut ctx).await.unwrap_err();

    assert!(matches!(err, ActionError::ExecutionFailed(ref n) if n == "inner_b"));
    assert_eq!(
        log_entries(&log),
        vec![
            "call:outer_a",
            "call:inner_a",
            "call:inner_b",
            "recover:inner_a",
            "recover:outer_a",
        ]
    );
    assert_eq!(ctx.failure().map(|e| e.to_string()), Some(err.to_string()));
}

#[tokio::test]
async fn test_nested_builder_unwound_by_later_outer_fault() {
    let log = Log::default();
    let mut inner = Builder::new();
    inner
        .use_action(Recorder::descriptor("inner_a", &log))
        .use_action(Recorder::descriptor("inner_b", &log));

    let mut outer = Builder::new();
    outer
        .use_action(Recorder::descriptor("outer_a", &log))
        .use_action(inner.into_descriptor("nested"))
        .use_action(Recorder::failing("outer_b", &log));

    let chain = outer.compile().unwrap();
    let mut ctx = ActionContext::new();
    let err = Warden::new(&chain).call(&mut ctx).await.unwrap_err();

    assert!(matches!(err, ActionError::ExecutionFailed(ref n) if n == "outer_b"));
    assert_eq!(
        log_entries(&log),
        vec![
            "call:outer_a",
            "call:inner_a",
            "call:inner_b",
            "call:outer_b",
            "recover:inner_b",
            "recover:inner_a",
            "recover:outer_a",
        ]
    );
    assert!(ctx.recovery_faults().is_empty());
}

#[tokio::test]
async fn test_package_pipeline_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let output = root.path().join("web.box");
    let engine = actions::create_engine_with_actions();

    let mut builder = Builder::new();
    builder
        .use_action(
            engine
                .descriptor(
                    "package_setup_folders",
                    json!({"temp_dir": root.path().join("scratch")}),
                )
                .unwrap(),
        )
        .use_action(engine.descriptor("package", Value::Null).unwrap())
        .use_action(ActionDescriptor::from_action("export", Export));

    let mut ctx = ActionContext::new()
        .with_machine(Machine::new("web", "hyperv", root.path().join("machine")))
        .with_value(OUTPUT_KEY, &output)
        .unwrap();

    engine
        .run(&HookPoint::MACHINE_ACTION_PACKAGE, builder, &mut ctx)
        .await
        .unwrap();

    assert!(output.is_file());
    let scratch: PathBuf = ctx.get(SCRATCH_KEY).unwrap().unwrap();
    assert!(!scratch.exists());
}

#[tokio::test]
async fn test_package_pipeline_downstream_fault_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let output = root.path().join("web.box");
    let log = Log::default();
    let mut engine = actions::create_engine_with_actions();

    let mut hook = Hook::new();
    hook.replace("export", Recorder::failing("export", &log));
    engine.register_hook(HookPoint::MACHINE_ACTION_PACKAGE, "broken-export", hook);

    let mut builder = Builder::new();
    builder
        .use_action(
            engine
                .descriptor(
                    "package_setup_folders",
                    json!({"temp_dir": root.path().join("scratch")}),
                )
                .unwrap(),
        )
        .use_action(engine.descriptor("package", Value::Null).unwrap())
        .use_action(ActionDescriptor::from_action("export", Export));

    let mut ctx = ActionContext::new()
        .with_machine(Machine::new("web", "hyperv", root.path().join("machine")))
        .with_value(OUTPUT_KEY, &output)
        .unwrap();

    let err = engine
        .run(&HookPoint::MACHINE_ACTION_PACKAGE, builder, &mut ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::ExecutionFailed(_)));
    assert!(!output.exists());
    let scratch: PathBuf = ctx.get(SCRATCH_KEY).unwrap().unwrap();
    assert!(!scratch.exists());
    assert!(ctx.recovery_faults().is_empty());
}

#[tokio::test]
async fn test_existing_output_fails_without_side_effects() {
    let root = tempfile::tempdir().unwrap();
    let output = root.path().join("web.box");
    tokio::fs::write(&output, b"previous build").await.unwrap();
    let engine = actions::create_engine_with_actions();

    let mut builder = Builder::new();
    builder
        .use_action(
            engine
                .descriptor(
                    "package_setup_folders",
                    json!({"temp_dir": root.path().join("scratch")}),
                )
                .unwrap(),
        )
        .use_action(engine.descriptor("package", Value::Null).unwrap())
        .use_action(ActionDescriptor::from_action("export", Export));

    let mut ctx = ActionContext::new().with_value(OUTPUT_KEY, &output).unwrap();
    let err = engine
        .run(&HookPoint::MACHINE_ACTION_PACKAGE, builder, &mut ctx)
        .await
        .unwrap_err();

    assert!(err.is_benign());
    assert_eq!(tokio::fs::read(&output).await.unwrap(), b"previous build");
    assert!(!root.path().join("scratch").exists());
}

struct StaticDriver;

#[async_trait]
impl Driver for StaticDriver {
    fn provider_name(&self) -> &str {
        "hyperv"
    }

    async fn import(&self, _params: &ImportParams) -> Result<Value> {
        Ok(json!({"id": ["c0ffee"]}))
    }
}

/// Checks the machine id is visible to actions after import
#[derive(Clone)]
struct ExpectId(Log);

#[async_trait]
impl Action for ExpectId {
    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
        let id = ctx.require_machine()?.id.clone().unwrap_or_default();
        self.0.lock().unwrap().push(format!("id:{id}"));
        next.call(ctx).await
    }
}

#[tokio::test]
async fn test_import_pipeline_with_hook() {
    let root = tempfile::tempdir().unwrap();
    let box_dir = root.path().join("box");
    tokio::fs::create_dir_all(box_dir.join("Virtual Machines")).await.unwrap();
    tokio::fs::create_dir_all(box_dir.join("Virtual Hard Disks")).await.unwrap();
    tokio::fs::write(box_dir.join("Virtual Machines").join("web.xml"), b"<vm/>")
        .await
        .unwrap();
    tokio::fs::write(box_dir.join("Virtual Hard Disks").join("web.vhdx"), b"disk")
        .await
        .unwrap();

    let log = Log::default();
    let mut engine = actions::create_engine_with_actions();
    let mut hook = Hook::new();
    hook.after("import", ActionDescriptor::from_action("expect_id", ExpectId(log.clone())));
    engine.register_hook(HookPoint::MACHINE_ACTION_IMPORT, "provisioner", hook);

    let mut builder = Builder::new();
    builder.use_action(engine.descriptor("import", json!({"cpus": 2})).unwrap());

    let mut ctx = ActionContext::new()
        .with_machine(Machine::new("web", "hyperv", root.path().join("data")).with_box_dir(&box_dir))
        .with_provider(Arc::new(StaticDriver));

    engine
        .run(&HookPoint::MACHINE_ACTION_IMPORT, builder, &mut ctx)
        .await
        .unwrap();

    assert_eq!(ctx.machine().unwrap().id.as_deref(), Some("c0ffee"));
    assert_eq!(log_entries(&log), vec!["id:c0ffee"]);
}
