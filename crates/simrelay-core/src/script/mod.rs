//! Rhai-backed interpreter.
//!
//! A relay program is an ordinary Rhai script. Its top-level code runs
//! once at start; after that the relay calls two optional functions:
//!
//! ```text
//! fn resume(event) { ... }   // once per host callback
//! fn finish() { ... }        // once at shutdown
//! ```
//!
//! Both run with `this` bound to a map that survives between calls, which
//! is where a program keeps its state. The top-level code sees `ARGV` and
//! `PROGRAM_NAME`; the `relay` module carries `yield_host()` and
//! `is_finishing()`.

pub mod api;
pub mod options;

use std::path::PathBuf;

use rhai::module_resolvers::{FileModuleResolver, ModuleResolversCollection};
use rhai::{Array, CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Position, Scope, AST};

use crate::arguments::ArgumentList;
use crate::config::ScriptSettings;
use crate::error::{Error, Result};
use crate::events::EventRecord;
use crate::interpreter::{HostLink, Interpreter, InterpreterFactory};

pub use options::ScriptOptions;

/// Create a Rhai engine with the relay's limits and log routing.
pub fn create_engine(settings: &ScriptSettings) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(settings.max_expr_depth, settings.max_expr_depth);
    engine.set_max_call_levels(settings.max_call_levels);

    engine.on_print(|text| {
        log::info!("[script] {}", text);
    });
    engine.on_debug(|text, source, pos| {
        log::debug!("[script]{} {}", location(source, pos), text);
    });

    engine
}

fn location(source: Option<&str>, pos: Position) -> String {
    match (source, pos) {
        (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
        (Some(src), _) => format!(" ({})", src),
        (None, pos) if !pos.is_none() => format!(" ({})", pos),
        _ => String::new(),
    }
}

fn script_error(err: Box<EvalAltResult>) -> Error {
    Error::Script(err.to_string())
}

/// Program text and where it came from.
struct Program {
    name: String,
    path: Option<PathBuf>,
    source: String,
}

pub struct ScriptInterpreter {
    engine: Engine,
    settings: ScriptSettings,
    scope: Scope<'static>,
    program: Option<Program>,
    ast: Option<AST>,
    state: Dynamic,
}

impl ScriptInterpreter {
    pub fn new(settings: ScriptSettings) -> Self {
        Self {
            engine: create_engine(&settings),
            settings,
            scope: Scope::new(),
            program: None,
            ast: None,
            state: Dynamic::from_map(Map::new()),
        }
    }

    /// Access the engine, e.g. to register host-specific functions.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// The map bound to `this` in `resume` and `finish`.
    pub fn state(&self) -> &Dynamic {
        &self.state
    }

    /// Factory creating a plain script interpreter.
    pub fn factory(settings: ScriptSettings) -> InterpreterFactory {
        Self::factory_with(settings, |_| {})
    }

    /// Factory that lets the caller extend the engine before any program
    /// code is seen.
    pub fn factory_with<F>(settings: ScriptSettings, setup: F) -> InterpreterFactory
    where
        F: FnOnce(&mut Engine) + Send + 'static,
    {
        Box::new(move || {
            let mut interpreter = ScriptInterpreter::new(settings);
            setup(interpreter.engine_mut());
            Ok(Box::new(interpreter) as Box<dyn Interpreter>)
        })
    }

    fn install_resolvers(&mut self, options: &ScriptOptions) {
        let mut collection = ModuleResolversCollection::new();

        // Directory of the program file first, then -I paths in order
        if let Some(dir) = options
            .program
            .as_ref()
            .and_then(|p| p.parent())
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            collection.push(FileModuleResolver::new_with_path(dir));
        } else {
            collection.push(FileModuleResolver::new());
        }
        for dir in &options.import_paths {
            collection.push(FileModuleResolver::new_with_path(dir));
        }

        self.engine.set_module_resolver(collection);
    }

    fn has_function(&self, name: &str, arity: usize) -> bool {
        self.ast.as_ref().is_some_and(|ast| {
            ast.iter_functions()
                .any(|f| f.name == name && f.params.len() == arity)
        })
    }
}

impl Interpreter for ScriptInterpreter {
    fn configure(&mut self, args: &ArgumentList) -> Result<()> {
        let options = ScriptOptions::parse(args.iter())?;

        if options.debug {
            self.engine.on_debug(|text, source, pos| {
                log::info!("[script]{} {}", location(source, pos), text);
            });
        }
        self.install_resolvers(&options);

        let source = match (options.inline_source(), &options.program) {
            (Some(code), _) => code,
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                Error::Script(format!("cannot load {}: {}", path.display(), e))
            })?,
            (None, None) => {
                log::warn!("no program given; only the relay callbacks will run");
                String::new()
            }
        };

        let argv: Array = options
            .program_args
            .iter()
            .cloned()
            .map(Dynamic::from)
            .collect();
        self.scope.push_constant("ARGV", argv);
        self.scope
            .push_constant("PROGRAM_NAME", options.program_name());

        log::debug!(
            "script: program {} with {} arguments",
            options.program_name(),
            options.program_args.len()
        );
        self.program = Some(Program {
            name: options.program_name(),
            path: options.program.clone(),
            source,
        });
        Ok(())
    }

    fn bind(&mut self, host: HostLink) -> Result<()> {
        api::register(&mut self.engine, &self.settings.module, host);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let Some(program) = &self.program else {
            return Ok(());
        };

        let mut ast = self
            .engine
            .compile_with_scope(&self.scope, &program.source)
            .map_err(|e| Error::Script(format!("{}: {}", program.name, e)))?;
        match &program.path {
            Some(path) => ast.set_source(path.display().to_string()),
            None => ast.set_source(program.name.clone()),
        };

        let result = self.engine.run_ast_with_scope(&mut self.scope, &ast);
        // Function definitions stay callable even if the top level failed
        self.ast = Some(ast);
        result.map_err(script_error)
    }

    fn resume(&mut self, event: Option<&EventRecord>) -> Result<()> {
        if !self.has_function(&self.settings.resume_fn, 1) {
            log::debug!(
                "program defines no {}(event); event dropped",
                self.settings.resume_fn
            );
            return Ok(());
        }
        let Some(ast) = &self.ast else {
            return Ok(());
        };

        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut self.state);
        self.engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut self.scope,
                ast,
                &self.settings.resume_fn,
                (api::event_to_dynamic(event),),
            )
            .map(|_| ())
            .map_err(script_error)
    }

    fn finish(&mut self) -> Result<()> {
        if !self.has_function(&self.settings.finish_fn, 0) {
            return Ok(());
        }
        let Some(ast) = &self.ast else {
            return Ok(());
        };

        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut self.state);
        self.engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut self.scope,
                ast,
                &self.settings.finish_fn,
                (),
            )
            .map(|_| ())
            .map_err(script_error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::{RelayConfig, Variant};
    use crate::events::{CallbackData, Reason};
    use crate::interpreter::InterpreterHandle;
    use crate::lifecycle::{LifecycleController, LifecycleState};
    use crate::testing::serial;

    const VARIANTS: [Variant; 2] = [Variant::Direct, Variant::Threaded];

    type Lines = Arc<Mutex<Vec<String>>>;

    /// Controller whose scripts can call `record(value)`.
    fn relay(variant: Variant) -> (LifecycleController, Lines) {
        let lines: Lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let factory = ScriptInterpreter::factory_with(ScriptSettings::default(), move |engine| {
            engine.register_fn("record", move |value: Dynamic| {
                sink.lock().unwrap().push(value.to_string());
            });
        });
        let config = RelayConfig {
            variant,
            ..RelayConfig::default()
        };
        (LifecycleController::new(config, factory), lines)
    }

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn tick(tag: u64) -> CallbackData<'static> {
        CallbackData::new(Reason::AfterDelay, tag * 10).with_tag(tag)
    }

    fn recorded(lines: &Lines) -> Vec<String> {
        lines.lock().unwrap().clone()
    }

    #[test]
    fn test_resume_function_sees_each_event() {
        let _guard = serial();
        for variant in VARIANTS {
            let (mut relay, lines) = relay(variant);
            let site = args(&[
                "-e",
                r#"record("init"); fn resume(ev) { record(ev.tag); record(ev.time); }"#,
            ]);
            relay.on_start(None, Some(&site)).unwrap();
            assert_eq!(recorded(&lines), vec!["init"]);

            for tag in 1..=3 {
                relay.on_resume(Some(&tick(tag))).unwrap();
            }
            relay.on_finish(None).unwrap();

            assert_eq!(
                recorded(&lines),
                vec!["init", "1", "10", "2", "20", "3", "30"]
            );
            assert!(!InterpreterHandle::is_live());
        }
    }

    #[test]
    fn test_program_loop_over_yield_host() {
        let _guard = serial();
        let (mut relay, lines) = relay(Variant::Threaded);
        let program = r#"
            record("start");
            let ev = relay::yield_host();
            while type_of(ev) == "map" {
                record(`${ev.reason}:${ev.tag}`);
                ev = relay::yield_host();
            }
            record("done");

            fn finish() { record("finish"); }
        "#;
        relay.on_start(None, Some(&args(&["-e", program]))).unwrap();
        assert_eq!(recorded(&lines), vec!["start"]);

        relay.on_resume(Some(&tick(1))).unwrap();
        relay.on_resume(Some(&tick(2))).unwrap();
        assert_eq!(
            recorded(&lines),
            vec!["start", "after_delay:1", "after_delay:2"]
        );

        relay.on_finish(None).unwrap();
        assert_eq!(
            recorded(&lines),
            vec!["start", "after_delay:1", "after_delay:2", "done", "finish"]
        );
    }

    #[test]
    fn test_yield_after_finish_is_refused() {
        let _guard = serial();
        let (mut relay, lines) = relay(Variant::Threaded);
        let program = r#"
            relay::yield_host();
            record(relay::is_finishing());
            try { relay::yield_host(); } catch (err) { record("refused"); }
            fn finish() { record("finish"); }
        "#;
        relay.on_start(None, Some(&args(&["-e", program]))).unwrap();
        assert!(recorded(&lines).is_empty());

        relay.on_finish(None).unwrap();
        assert_eq!(recorded(&lines), vec!["true", "refused", "finish"]);
    }

    #[test]
    fn test_state_persists_in_this() {
        let _guard = serial();
        for variant in VARIANTS {
            let (mut relay, lines) = relay(variant);
            let program = r#"
                fn resume(ev) {
                    if this.count == () { this.count = 0; }
                    this.count += 1;
                }
                fn finish() { record(this.count); }
            "#;
            relay.on_start(None, Some(&args(&["-e", program]))).unwrap();
            for tag in 1..=4 {
                relay.on_resume(Some(&tick(tag))).unwrap();
            }
            relay.on_finish(None).unwrap();
            assert_eq!(recorded(&lines), vec!["4"]);
        }
    }

    #[test]
    fn test_argv_and_program_name() {
        let _guard = serial();
        let (mut relay, lines) = relay(Variant::Direct);
        let site = args(&[
            "-e",
            "record(PROGRAM_NAME); for a in ARGV { record(a); }",
            "x",
            "y",
        ]);
        relay.on_start(None, Some(&site)).unwrap();
        relay.on_finish(None).unwrap();
        assert_eq!(recorded(&lines), vec!["-e", "x", "y"]);
    }

    #[test]
    fn test_program_file_with_import_path() {
        let _guard = serial();
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        std::fs::create_dir(&lib).unwrap();
        std::fs::write(lib.join("helpers.rhai"), "fn twice(x) { x * 2 }").unwrap();
        let main = dir.path().join("main.rhai");
        std::fs::write(
            &main,
            r#"import "helpers" as h; record(h::twice(21)); record(PROGRAM_NAME == ARGV[0]);"#,
        )
        .unwrap();

        for variant in VARIANTS {
            let (mut relay, lines) = relay(variant);
            let lib_dir = lib.display().to_string();
            let main_name = main.display().to_string();
            let site = args(&["-I", lib_dir.as_str(), main_name.as_str(), main_name.as_str()]);
            relay.on_start(None, Some(&site)).unwrap();
            relay.on_finish(None).unwrap();
            assert_eq!(recorded(&lines), vec!["42", "true"]);
        }
    }

    #[test]
    fn test_errors_in_resume_are_not_fatal() {
        let _guard = serial();
        for variant in VARIANTS {
            let (mut relay, lines) = relay(variant);
            let program = r#"
                fn resume(ev) {
                    if ev.tag == 2 { throw "bad tag"; }
                    record(ev.tag);
                }
            "#;
            relay.on_start(None, Some(&args(&["-e", program]))).unwrap();
            for tag in 1..=3 {
                relay.on_resume(Some(&tick(tag))).unwrap();
            }
            relay.on_finish(None).unwrap();
            assert_eq!(recorded(&lines), vec!["1", "3"]);
        }
    }

    #[test]
    fn test_program_without_callbacks() {
        let _guard = serial();
        for variant in VARIANTS {
            let (mut relay, lines) = relay(variant);
            relay.on_start(None, Some(&args(&["-e", "record(1)"]))).unwrap();
            relay.on_resume(Some(&tick(1))).unwrap();
            relay.on_resume(None).unwrap();
            relay.on_finish(None).unwrap();
            assert_eq!(recorded(&lines), vec!["1"]);
        }
    }

    #[test]
    fn test_absent_event_has_reason_none() {
        let _guard = serial();
        let (mut relay, lines) = relay(Variant::Threaded);
        let program = "fn resume(ev) { record(ev.reason); }";
        relay.on_start(None, Some(&args(&["-e", program]))).unwrap();
        relay.on_resume(None).unwrap();
        relay.on_resume(Some(&tick(1))).unwrap();
        relay.on_finish(None).unwrap();
        assert_eq!(recorded(&lines), vec!["none", "after_delay"]);
    }

    #[test]
    fn test_yield_loop_survives_absent_record() {
        let _guard = serial();
        let (mut relay, lines) = relay(Variant::Threaded);
        let program = r#"
            let ev = relay::yield_host();
            while type_of(ev) == "map" {
                record(if ev.reason == "none" { "none" } else { ev.tag });
                ev = relay::yield_host();
            }
            record("loop-exited");
        "#;
        relay.on_start(None, Some(&args(&["-e", program]))).unwrap();
        relay.on_resume(Some(&tick(1))).unwrap();
        relay.on_resume(None).unwrap();
        relay.on_resume(Some(&tick(3))).unwrap();
        assert_eq!(
            recorded(&lines),
            vec!["1", "none", "3"]
        );

        relay.on_finish(None).unwrap();
        assert_eq!(recorded(&lines).last().map(String::as_str), Some("loop-exited"));
    }

    #[test]
    fn test_compile_error_is_logged_not_fatal() {
        let _guard = serial();
        for variant in VARIANTS {
            let (mut relay, lines) = relay(variant);
            relay.on_start(None, Some(&args(&["-e", "let = ;"]))).unwrap();
            assert_eq!(relay.state(), LifecycleState::Running);
            relay.on_resume(Some(&tick(1))).unwrap();
            relay.on_finish(None).unwrap();
            assert!(recorded(&lines).is_empty());
        }
    }

    #[test]
    fn test_direct_yield_keeps_control() {
        let _guard = serial();
        let (mut relay, lines) = relay(Variant::Direct);
        let program = "record(type_of(relay::yield_host())); record(relay::is_finishing());";
        relay.on_start(None, Some(&args(&["-e", program]))).unwrap();
        relay.on_finish(None).unwrap();
        assert_eq!(recorded(&lines), vec!["()", "false"]);
    }

    #[test]
    fn test_bad_arguments_fail_start() {
        let _guard = serial();
        for variant in VARIANTS {
            for site in [args(&["--bogus"]), args(&["/nonexistent/relay/main.rhai"])] {
                let (mut relay, _) = relay(variant);
                assert!(relay.on_start(None, Some(&site)).is_err());
                assert_eq!(relay.state(), LifecycleState::Finalized);
                assert!(!InterpreterHandle::is_live());
            }
        }
    }

    #[test]
    fn test_demo_programs_run() {
        let _guard = serial();
        let demos = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
        for name in ["counter.rhai", "coroutine.rhai"] {
            let (mut relay, _) = relay(Variant::Threaded);
            let path = demos.join(name).display().to_string();
            relay.on_start(None, Some(&args(&[path.as_str(), "verbose"]))).unwrap();
            for tag in 1..=3 {
                relay.on_resume(Some(&tick(tag))).unwrap();
            }
            relay.on_resume(None).unwrap();
            relay
                .on_resume(Some(
                    &CallbackData::new(Reason::ValueChange, 35)
                        .with_object("top.clk")
                        .with_value("0"),
                ))
                .unwrap();
            relay.on_finish(None).unwrap();
            assert_eq!(relay.state(), LifecycleState::Finalized);
        }
    }

    #[test]
    fn test_custom_callback_names() {
        let _guard = serial();
        let lines: Lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let settings = ScriptSettings {
            module: "sim".to_string(),
            resume_fn: "on_event".to_string(),
            finish_fn: "on_end".to_string(),
            ..ScriptSettings::default()
        };
        let factory = ScriptInterpreter::factory_with(settings, move |engine| {
            engine.register_fn("record", move |value: Dynamic| {
                sink.lock().unwrap().push(value.to_string());
            });
        });
        let mut relay = LifecycleController::new(RelayConfig::default(), factory);
        let program = r#"
            record(sim::is_finishing());
            fn on_event(ev) { record(ev.reason); }
            fn on_end() { record("end"); }
        "#;
        relay.on_start(None, Some(&args(&["-e", program]))).unwrap();
        relay
            .on_resume(Some(
                &CallbackData::new(Reason::ValueChange, 5)
                    .with_object("top.clk")
                    .with_value("1"),
            ))
            .unwrap();
        relay.on_finish(None).unwrap();
        assert_eq!(recorded(&lines), vec!["false", "value_change", "end"]);
    }
}
