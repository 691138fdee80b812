use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bl_core::{Bot, BotError, BotValue, Context, ScriptedButton, Target, ROOT_THEME, START_STATE};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{
    Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position, Scope, AST, INT,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bridge::{dynamic_to_text, dynamic_to_value, rewrite_bindings, value_to_dynamic};
use crate::resolver::resolve;
use crate::HostFunctionRegistry;

const CONTEXT_VARIABLE: &str = "__bl_context";
const INPUT_VARIABLE: &str = "__bl_input";
const REACTIONS_VARIABLE: &str = "reactions";
const SECTIONS: [(&str, &str); 3] = [
    ("session", "__bl_session"),
    ("client", "__bl_client"),
    ("request", "__bl_request"),
];
const MAX_HOST_ARITY: usize = 3;

/// An author helper script whose functions are visible to every script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperScript {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub target: String,
    pub deferred: bool,
}

/// Everything one script evaluation asked for, merged by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptEffects {
    pub answers: Vec<String>,
    pub buttons: Vec<ScriptedButton>,
    pub transition: Option<TransitionRequest>,
}

struct ReactionSink {
    bot: Arc<Bot>,
    position: Target,
    effects: ScriptEffects,
}

#[derive(Clone)]
struct Reactions {
    sink: Rc<RefCell<ReactionSink>>,
}

impl Reactions {
    fn answer(&mut self, text: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let text = dynamic_to_text(text).map_err(runtime_error)?;
        self.sink.borrow_mut().effects.answers.push(text);
        Ok(())
    }

    fn buttons(&mut self, arg: Dynamic) -> Result<(), Box<EvalAltResult>> {
        if arg.is::<ImmutableString>() || arg.is::<char>() {
            let label = dynamic_to_text(arg).map_err(runtime_error)?;
            self.push_button(label, None);
            return Ok(());
        }
        if arg.is::<Array>() {
            for item in arg.cast::<Array>() {
                self.buttons(item)?;
            }
            return Ok(());
        }
        if arg.is::<Map>() {
            let map = arg.cast::<Map>();
            if let Some(list) = map.get("buttons") {
                return self.buttons(list.clone());
            }
            let label = map
                .get("text")
                .or_else(|| map.get("label"))
                .cloned()
                .ok_or_else(|| script_error("reactions.buttons: a button map needs \"text\"."))?;
            let label = dynamic_to_text(label).map_err(runtime_error)?;
            let target = match map.get("transition").filter(|value| !value.is_unit()) {
                Some(target) => Some(dynamic_to_text(target.clone()).map_err(runtime_error)?),
                None => None,
            };
            self.push_button(label, target.as_deref());
            return Ok(());
        }
        Err(script_error(format!(
            "reactions.buttons: unsupported argument of type \"{}\".",
            arg.type_name()
        )))
    }

    fn transition(&mut self, arg: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let request = if arg.is::<Map>() {
            let map = arg.cast::<Map>();
            let target = map
                .get("value")
                .cloned()
                .ok_or_else(|| script_error("reactions.transition: a map needs \"value\"."))?;
            TransitionRequest {
                target: dynamic_to_text(target).map_err(runtime_error)?,
                deferred: map
                    .get("deferred")
                    .and_then(|value| value.as_bool().ok())
                    .unwrap_or(false),
            }
        } else if arg.is::<ImmutableString>() {
            TransitionRequest {
                target: arg.cast::<ImmutableString>().to_string(),
                deferred: false,
            }
        } else {
            return Err(script_error(format!(
                "reactions.transition: unsupported argument of type \"{}\".",
                arg.type_name()
            )));
        };

        let mut sink = self.sink.borrow_mut();
        if let Some(existing) = &sink.effects.transition {
            debug!(
                kept = %existing.target,
                ignored = %request.target,
                "transition already requested"
            );
            return Ok(());
        }
        sink.effects.transition = Some(request);
        Ok(())
    }

    fn push_button(&mut self, label: String, target: Option<&str>) {
        let mut sink = self.sink.borrow_mut();
        let resolved = target
            .and_then(|target| {
                resolve(
                    &sink.bot,
                    target,
                    &sink.position.state,
                    &sink.position.theme,
                )
            })
            .filter(|resolved| sink.bot.state_at(resolved).is_some());
        if let (Some(target), None) = (target, &resolved) {
            warn!(%label, %target, "button target does not resolve; button is inert");
        }
        sink.effects.buttons.push(ScriptedButton {
            label,
            target: resolved,
        });
    }
}

struct Bindings {
    context: BotValue,
    sections: [BotValue; 3],
}

/// Sandboxed script context bound to one session.
pub struct ScriptHost {
    engine: Engine,
    helpers: AST,
    scope: Scope<'static>,
    sink: Rc<RefCell<ReactionSink>>,
    deadline: Rc<Cell<Option<Instant>>>,
    timeout: Duration,
}

impl ScriptHost {
    pub fn new(
        bot: Arc<Bot>,
        helpers: &[HelperScript],
        timeout: Duration,
        host_functions: Option<Arc<dyn HostFunctionRegistry>>,
    ) -> Self {
        let deadline = Rc::new(Cell::new(None));
        let sink = Rc::new(RefCell::new(ReactionSink {
            bot,
            position: Target::new(ROOT_THEME, START_STATE),
            effects: ScriptEffects::default(),
        }));

        let mut engine = Engine::new();
        configure_sandbox(&mut engine, &deadline);
        register_utilities(&mut engine, &deadline);
        engine
            .register_type_with_name::<Reactions>("Reactions")
            .register_fn("answer", Reactions::answer)
            .register_fn("buttons", Reactions::buttons)
            .register_fn("transition", Reactions::transition);
        if let Some(registry) = host_functions {
            register_host_functions(&mut engine, registry);
        }

        let helpers = compile_helpers(&engine, helpers);
        let mut scope = Scope::new();
        scope.push(
            REACTIONS_VARIABLE,
            Reactions {
                sink: Rc::clone(&sink),
            },
        );

        Self {
            engine,
            helpers,
            scope,
            sink,
            deadline,
            timeout,
        }
    }

    /// Runs one `script:` body. Faults are logged and yield no effects.
    pub fn run_script(&mut self, body: &str, context: &mut Context, position: &Target) -> ScriptEffects {
        {
            let mut sink = self.sink.borrow_mut();
            sink.position = position.clone();
            sink.effects = ScriptEffects::default();
        }
        let before = self.bind_context(context);

        self.arm_deadline();
        let result = self.execute(body);
        self.deadline.set(None);

        self.write_back(context, &before);
        self.compact_scope();
        let effects = std::mem::take(&mut self.sink.borrow_mut().effects);

        match result {
            Ok(()) => {
                debug!(
                    state = %position,
                    answers = effects.answers.len(),
                    buttons = effects.buttons.len(),
                    transition = ?effects.transition,
                    "script finished"
                );
                effects
            }
            Err(error) => {
                warn!(
                    state = %position,
                    code = %error.code,
                    message = %error.message,
                    "script failed; its effects are dropped"
                );
                ScriptEffects::default()
            }
        }
    }

    fn execute(&mut self, body: &str) -> Result<(), BotError> {
        let source = rewrite_bindings(body);
        let ast = self
            .engine
            .compile_with_scope(&self.scope, &source)
            .map_err(|error| {
                BotError::new(
                    "SCRIPT_COMPILE_ERROR",
                    format!("Script compile failed: {}", error),
                )
            })?;
        let ast = self.helpers.merge(&ast);
        self.engine
            .run_ast_with_scope(&mut self.scope, &ast)
            .map_err(|error| eval_failure("SCRIPT", *error))
    }

    pub(crate) fn evaluate_text(&mut self, expr: &str) -> Result<String, BotError> {
        let source = rewrite_bindings(expr.trim());
        let ast = self
            .engine
            .compile_expression_with_scope(&self.scope, &source)
            .map_err(|error| {
                BotError::new(
                    "EXPR_COMPILE_ERROR",
                    format!("Expression compile failed: {}", error),
                )
            })?;
        let ast = self.helpers.merge(&ast);
        self.arm_deadline();
        let value = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, &ast);
        self.deadline.set(None);
        dynamic_to_text(value.map_err(|error| eval_failure("EXPR", *error))?)
    }

    fn arm_deadline(&self) {
        self.deadline.set(Some(Instant::now() + self.timeout));
    }

    pub(crate) fn refresh_bindings(&mut self, context: &Context) {
        self.bind_context(context);
    }

    fn bind_context(&mut self, context: &Context) -> Bindings {
        let bindings = Bindings {
            context: context.as_value(),
            sections: [
                BotValue::Map(context.session.clone()),
                BotValue::Map(context.client.clone()),
                BotValue::Map(context.request.clone()),
            ],
        };
        self.scope
            .set_value(CONTEXT_VARIABLE, value_to_dynamic(&bindings.context));
        for ((_, variable), value) in SECTIONS.iter().zip(&bindings.sections) {
            self.scope.set_value(*variable, value_to_dynamic(value));
        }
        self.scope
            .set_value(INPUT_VARIABLE, Dynamic::from(context.input_text().to_string()));
        bindings
    }

    /// Copies script mutations back. A direct `$session` write wins over a
    /// write through `$context.session` in the same script.
    fn write_back(&self, context: &mut Context, before: &Bindings) {
        let mut sections = before.sections.clone();

        if let Some(BotValue::Map(after)) = self
            .read_binding(CONTEXT_VARIABLE)
            .filter(|after| *after != before.context)
        {
            for (index, (name, _)) in SECTIONS.iter().enumerate() {
                if let Some(value) = after.get(*name) {
                    sections[index] = value.clone();
                }
            }
        }
        for (index, (_, variable)) in SECTIONS.iter().enumerate() {
            if let Some(after) = self
                .read_binding(variable)
                .filter(|after| *after != before.sections[index])
            {
                sections[index] = after;
            }
        }

        let [session, client, request] = sections;
        for (name, value, slot) in [
            ("session", session, &mut context.session),
            ("client", client, &mut context.client),
            ("request", request, &mut context.request),
        ] {
            match value {
                BotValue::Map(map) => *slot = map,
                other => warn!(
                    section = name,
                    found = other.type_name(),
                    "context section must stay a map; write ignored"
                ),
            }
        }
    }

    fn read_binding(&self, variable: &str) -> Option<BotValue> {
        let value = self.scope.get_value::<Dynamic>(variable)?;
        match dynamic_to_value(value) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%variable, code = %error.code, "binding holds an unsupported value");
                None
            }
        }
    }

    /// Drops shadowed entries so repeated `let` across turns does not grow the scope.
    fn compact_scope(&mut self) {
        let mut seen = BTreeSet::new();
        let mut kept = Vec::new();
        for (name, constant, value) in self.scope.iter().collect::<Vec<_>>().into_iter().rev() {
            if seen.insert(name.to_string()) {
                kept.push((name.to_string(), constant, value));
            }
        }
        if kept.len() == self.scope.len() {
            return;
        }

        let mut scope = Scope::new();
        for (name, constant, value) in kept.into_iter().rev() {
            if constant {
                scope.push_constant_dynamic(name, value);
            } else {
                scope.push_dynamic(name, value);
            }
        }
        self.scope = scope;
    }
}

fn configure_sandbox(engine: &mut Engine, deadline: &Rc<Cell<Option<Instant>>>) {
    engine.set_strict_variables(true);
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    let deadline = Rc::clone(deadline);
    engine.on_progress(move |_operations| match deadline.get() {
        Some(limit) if Instant::now() >= limit => Some(Dynamic::from("script timed out")),
        _ => None,
    });
    engine.on_print(|text| info!(target: "bl_runtime::script", "{}", text));
    engine.on_debug(|text, source, position| {
        debug!(
            target: "bl_runtime::script",
            source = source.unwrap_or_default(),
            %position,
            "{}",
            text
        )
    });
}

fn register_utilities(engine: &mut Engine, deadline: &Rc<Cell<Option<Instant>>>) {
    engine.register_fn("now", || -> INT {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as INT)
            .unwrap_or_default()
    });

    let deadline = Rc::clone(deadline);
    engine.register_fn("sleep", move |millis: INT| {
        let requested = Duration::from_millis(millis.max(0) as u64);
        let remaining = deadline
            .get()
            .map_or(requested, |limit| limit.saturating_duration_since(Instant::now()));
        std::thread::sleep(requested.min(remaining));
    });

    engine.register_fn(
        "to_json",
        |value: Dynamic| -> Result<ImmutableString, Box<EvalAltResult>> {
            dynamic_to_value(value)
                .map(|value| value.to_json().into())
                .map_err(runtime_error)
        },
    );
    engine.register_fn(
        "parse_json",
        |text: ImmutableString| -> Result<Dynamic, Box<EvalAltResult>> {
            serde_json::from_str::<BotValue>(&text)
                .map(|value| value_to_dynamic(&value))
                .map_err(|error| {
                    runtime_error(BotError::new(
                        "SCRIPT_JSON_INVALID",
                        format!("parse_json failed: {}", error),
                    ))
                })
        },
    );
}

fn register_host_functions(engine: &mut Engine, registry: Arc<dyn HostFunctionRegistry>) {
    for name in registry.names().to_vec() {
        debug!(function = %name, max_arity = MAX_HOST_ARITY, "registering host function");

        let (host, function) = (Arc::clone(&registry), name.clone());
        engine.register_fn(name.clone(), move || call_host(&*host, &function, Vec::new()));

        let (host, function) = (Arc::clone(&registry), name.clone());
        engine.register_fn(name.clone(), move |a: Dynamic| {
            call_host(&*host, &function, vec![a])
        });

        let (host, function) = (Arc::clone(&registry), name.clone());
        engine.register_fn(name.clone(), move |a: Dynamic, b: Dynamic| {
            call_host(&*host, &function, vec![a, b])
        });

        let (host, function) = (Arc::clone(&registry), name.clone());
        engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| {
            call_host(&*host, &function, vec![a, b, c])
        });
    }
}

fn call_host(
    registry: &dyn HostFunctionRegistry,
    name: &str,
    args: Vec<Dynamic>,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let args = args
        .into_iter()
        .map(dynamic_to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(runtime_error)?;
    registry
        .call(name, &args)
        .map(|value| value_to_dynamic(&value))
        .map_err(runtime_error)
}

fn compile_helpers(engine: &Engine, helpers: &[HelperScript]) -> AST {
    let mut merged = AST::empty();
    for helper in helpers {
        match engine.compile(&helper.source) {
            Ok(ast) => {
                debug!(helper = %helper.name, "helper script loaded");
                merged = merged.merge(&ast.clone_functions_only());
            }
            Err(error) => warn!(
                helper = %helper.name,
                %error,
                "helper script failed to compile and was skipped"
            ),
        }
    }
    merged
}

fn eval_failure(layer: &str, error: EvalAltResult) -> BotError {
    match error {
        EvalAltResult::ErrorTerminated(..) => BotError::new(
            format!("{}_TIMEOUT", layer),
            "Evaluation exceeded its time budget.",
        ),
        other => BotError::new(
            format!("{}_EVAL_ERROR", layer),
            format!("Evaluation failed: {}", other),
        ),
    }
}

fn script_error(message: impl Into<String>) -> Box<EvalAltResult> {
    runtime_error(BotError::new("SCRIPT_REACTION_INVALID", message))
}

fn runtime_error(error: BotError) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(error.to_string()), Position::NONE).into()
}
