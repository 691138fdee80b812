use std::sync::Arc;

use bl_core::{parent_path, Bot, Context, ScriptedButton, State, Tag, Target, ROOT_THEME, START_STATE};
use tracing::{debug, warn};

use crate::buttons::parse_buttons;
use crate::host::{HelperScript, ScriptHost, TransitionRequest};
use crate::reply::render_options;
use crate::resolver::resolve;
use crate::SessionOptions;

pub const NOT_UNDERSTOOD: &str = "I didn\u{2019}t understand that. Please try again.";

/// One conversation: current position, live context, and its own script host.
///
/// A session is not `Send`: its script engine state lives in `Rc` cells, so a
/// transport keeps each session on the thread that created it and runs many
/// sessions concurrently by giving each its own thread or local task set.
pub struct Session {
    bot: Arc<Bot>,
    theme: String,
    current_state: String,
    context: Context,
    host: ScriptHost,
    scripted_buttons: Option<(Target, Vec<ScriptedButton>)>,
    button_guard: Option<String>,
    max_transition_depth: usize,
    transitions: usize,
}

impl Session {
    pub fn new(bot: Arc<Bot>, helpers: &[HelperScript], options: SessionOptions) -> Self {
        let theme = bot.default_theme().unwrap_or(ROOT_THEME).to_string();
        let host = ScriptHost::new(
            Arc::clone(&bot),
            helpers,
            options.script_timeout,
            options.host_functions,
        );
        Self {
            bot,
            theme,
            current_state: String::new(),
            context: Context::default(),
            host,
            scripted_buttons: None,
            button_guard: None,
            max_transition_depth: options.max_transition_depth,
            transitions: 0,
        }
    }

    /// Enters `/Start` and returns its reply.
    pub fn start(&mut self) -> String {
        self.transitions = 0;
        debug!(theme = %self.theme, "starting session");
        self.transition(START_STATE, None)
    }

    pub fn handle_message(&mut self, message: &str) -> String {
        debug!(%message, state = %self.position(), "received message");
        self.context.input = Some(message.to_string());
        self.transitions = 0;
        self.dispatch(message)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    pub fn current_theme(&self) -> &str {
        &self.theme
    }

    pub fn position(&self) -> Target {
        Target::new(self.theme.clone(), self.current_state.clone())
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    fn dispatch(&mut self, message: &str) -> String {
        if let Some(reply) = self.press_button(message) {
            return reply;
        }

        let bot = Arc::clone(&self.bot);
        let here = self.position();
        if let Some(state) = bot.state_at(&here) {
            if state
                .q_global
                .as_ref()
                .is_some_and(|trigger| trigger.is_match(message))
            {
                let declared = state.declared_target().and_then(|target| {
                    resolve(&bot, target, &here.state, &here.theme).map(|resolved| (target, resolved))
                });
                match declared {
                    Some((target, resolved)) if resolved != here => {
                        debug!(%target, "local q! matched");
                        return self.transition(target, Some(message));
                    }
                    Some(_) => debug!(state = %here, "local q! loops back to itself; skipping to global triggers"),
                    None => debug!(state = %here, "local q! has no target; skipping to global triggers"),
                }
                return self.fire_global_trigger(&bot, message);
            }

            if let Some(go) = &state.go {
                debug!(target = %go, "deferred go consumes the message");
                return self.transition(go, Some(message));
            }
        }

        if let Some(target) = self.match_structural(&bot, message) {
            debug!(to = %target, "q matched a child or sibling");
            let display = target.to_string();
            return self.enter(target, &display, Some(message));
        }
        self.fire_global_trigger(&bot, message)
    }

    fn fire_global_trigger(&mut self, bot: &Bot, message: &str) -> String {
        let here = self.position();
        let matched = bot
            .states()
            .filter(|(theme, state)| !(*theme == here.theme && state.path == here.state))
            .find(|(_, state)| {
                state
                    .q_global
                    .as_ref()
                    .is_some_and(|trigger| trigger.is_match(message))
            })
            .map(|(theme, state)| Target::new(theme, state.path.clone()));

        match matched {
            Some(target) => {
                debug!(to = %target, "global q! matched");
                let display = target.to_string();
                self.enter(target, &display, Some(message))
            }
            None => {
                debug!(state = %here, "no trigger matched; staying");
                NOT_UNDERSTOOD.to_string()
            }
        }
    }

    /// Children of the current state first, then its siblings.
    fn match_structural(&self, bot: &Bot, message: &str) -> Option<Target> {
        let theme = bot.theme(&self.theme)?;
        let matches = |state: &&State| {
            state
                .q
                .as_ref()
                .is_some_and(|trigger| trigger.is_match(message))
        };
        let child = theme
            .children_of(Some(self.current_state.as_str()))
            .find(matches);
        let found = child.or_else(|| {
            theme
                .children_of(parent_path(&self.current_state))
                .filter(|state| state.path != self.current_state)
                .find(matches)
        })?;
        Some(Target::new(self.theme.clone(), found.path.clone()))
    }

    fn press_button(&mut self, message: &str) -> Option<String> {
        let bot = Arc::clone(&self.bot);
        let here = self.position();

        let mut offered: Vec<(String, Option<(Target, String)>)> = Vec::new();
        if let Some((owner, buttons)) = &self.scripted_buttons {
            if *owner == here {
                offered.extend(buttons.iter().map(|button| {
                    let target = button
                        .target
                        .clone()
                        .map(|target| {
                            let display = target.to_string();
                            (target, display)
                        });
                    (button.label.clone(), target)
                }));
            }
        }
        if let Some(raw) = bot.state_at(&here).and_then(|state| state.buttons.as_deref()) {
            offered.extend(parse_buttons(raw).into_iter().map(|button| {
                let target = button.target.and_then(|authored| {
                    resolve(&bot, &authored, &here.state, &here.theme)
                        .map(|resolved| (resolved, authored))
                });
                (button.label, target)
            }));
        }

        let lowered = message.to_lowercase();
        let (label, target) = offered
            .into_iter()
            .find(|(label, _)| label.to_lowercase() == lowered)?;

        match target {
            Some((target, display)) => {
                debug!(button = %label, to = %target, "button pressed");
                Some(self.enter(target, &display, Some(message)))
            }
            None => {
                if self.button_guard.as_deref() == Some(message) {
                    debug!(button = %label, "button already re-dispatched; continuing with triggers");
                    return None;
                }
                debug!(button = %label, "button has no target; handling its label as a message");
                self.button_guard = Some(message.to_string());
                let reply = self.dispatch(message);
                self.button_guard = None;
                Some(reply)
            }
        }
    }

    fn transition(&mut self, target: &str, input: Option<&str>) -> String {
        match resolve(&self.bot, target, &self.current_state, &self.theme) {
            Some(resolved) => self.enter(resolved, target.trim(), input),
            None => String::new(),
        }
    }

    fn enter(&mut self, target: Target, display_name: &str, input: Option<&str>) -> String {
        let bot = Arc::clone(&self.bot);
        let Some(state) = bot.state_at(&target) else {
            warn!(target = %display_name, resolved = %target, "transition target not found");
            return format!("State \"{}\" not found", display_name);
        };
        if self.transitions >= self.max_transition_depth {
            warn!(
                to = %target,
                limit = self.max_transition_depth,
                "transition chain too deep; stopping"
            );
            return String::new();
        }
        self.transitions += 1;

        debug!(from = %self.position(), to = %target, ?input, "transitioning");
        self.theme = target.theme;
        self.current_state = target.state;
        self.context.input = input.map(str::to_string);
        self.run_state(state)
    }

    /// Replays the state's tags in authored order and assembles its reply.
    fn run_state(&mut self, state: &State) -> String {
        let here = self.position();
        self.scripted_buttons = None;

        let mut reply = String::new();
        let mut emitted = Vec::new();
        let mut requested: Option<TransitionRequest> = None;

        for tag in &state.tags {
            match tag {
                Tag::Script(body) => {
                    let effects = self.host.run_script(body, &mut self.context, &here);
                    for answer in &effects.answers {
                        reply.push_str(answer);
                        reply.push('\n');
                    }
                    emitted.extend(effects.buttons);
                    let Some(request) = effects.transition else {
                        continue;
                    };
                    if let Some(kept) = &requested {
                        debug!(kept = %kept.target, ignored = %request.target, "transition already requested in this state");
                    } else if request.deferred {
                        requested = Some(request);
                    } else {
                        debug!(to = %request.target, "script requested an instant transition");
                        let next = self.transition(&request.target, None);
                        return join_instant(&reply, &next);
                    }
                }
                Tag::Answer(text) => {
                    let text = self.host.substitute(text, &self.context);
                    reply.push_str(&text);
                    reply.push('\n');
                }
                Tag::GoNow(target) => {
                    if let Some(kept) = &requested {
                        debug!(kept = %kept.target, ignored = %target, "transition already requested in this state");
                        continue;
                    }
                    debug!(to = %target, "instant go!");
                    let next = self.transition(target, None);
                    return join_instant(&reply, &next);
                }
                Tag::Go(_) => {}
            }
        }

        self.scripted_buttons = Some((here, emitted.clone()));

        let deferred = requested
            .map(|request| request.target)
            .or_else(|| state.go.clone());
        if let Some(target) = deferred {
            debug!(to = %target, "deferred transition");
            let next = self.transition(&target, None);
            reply.push('\n');
            reply.push_str(&next);
        }

        let mut labels = emitted
            .into_iter()
            .map(|button| button.label)
            .collect::<Vec<_>>();
        if let Some(raw) = &state.buttons {
            labels.extend(parse_buttons(raw).into_iter().map(|button| button.label));
        }
        if !labels.is_empty() {
            debug!(?labels, "buttons displayed");
            reply.truncate(reply.trim_end().len());
            reply.push_str(&render_options(&labels));
        }

        reply.trim().to_string()
    }
}

fn join_instant(reply: &str, next: &str) -> String {
    format!("{}\n{}", reply, next).trim().to_string()
}

#[cfg(test)]
mod session_tests {
    use std::collections::BTreeMap;

    use bl_compiler::compile_bot_from_source_map;
    use bl_core::BotValue;

    use super::*;
    use crate::format_reply;

    fn open_with(source: &str, options: SessionOptions) -> Session {
        let bot = compile_bot_from_source_map(&BTreeMap::from([(
            "main.bot".to_string(),
            source.to_string(),
        )]));
        Session::new(Arc::new(bot), &[], options)
    }

    fn open(source: &str) -> Session {
        open_with(source, SessionOptions::default())
    }

    fn with_depth(max_transition_depth: usize) -> SessionOptions {
        SessionOptions {
            max_transition_depth,
            ..SessionOptions::default()
        }
    }

    #[test]
    fn start_enters_the_start_state() {
        let mut session = open("state: Start\n    a: Hello!\n    a: How can I help?\n");
        assert_eq!(session.start(), "Hello!\nHow can I help?");
        assert_eq!(session.current_state(), "/Start");
        assert_eq!(session.current_theme(), "/");
    }

    #[test]
    fn missing_start_state_is_reported() {
        let mut session = open("state: Other\n    a: x\n");
        assert_eq!(session.start(), "State \"/Start\" not found");
        assert_eq!(session.current_state(), "");
    }

    #[test]
    fn start_follows_instant_go_before_replying() {
        let mut session = open(
            "state: Start\n    a: Hi\n    go!: /Menu\n    a: never\nstate: Menu\n    a: Menu here\n",
        );
        assert_eq!(session.start(), "Hi\n\nMenu here");
        assert_eq!(session.current_state(), "/Menu");
    }

    #[test]
    fn buttons_outrank_local_and_global_overrides() {
        let mut session = open(
            "state: Start\n    a: Ready?\n    q!: $regex<(?i)yes>\n    buttons:\n        Yes -> /Confirm\n        \"No\" -> Start\nstate: Confirm\n    a: Confirmed\nstate: Global\n    q!: $regex<(?i)yes>\n    a: Global hit\n",
        );
        assert_eq!(session.start(), "Ready?\n\nOptions:\n- Yes\n- No");
        assert_eq!(session.handle_message("YES"), "Confirmed");
        assert_eq!(session.current_state(), "/Confirm");
    }

    #[test]
    fn local_override_outranks_child_triggers_on_a_state_held_by_the_depth_limit() {
        let mut session = open_with(
            "state: Start\n    a: Hi\n    q!: $regex<menu>\n    go!: /Menu\n    state: Child\n        q: *\n        a: child\nstate: Menu\n    a: Menu\n",
            with_depth(1),
        );
        // Entry always follows go!, so only the depth limit can leave the session on Start.
        assert_eq!(session.start(), "Hi");
        assert_eq!(session.current_state(), "/Start");
        assert_eq!(session.handle_message("menu"), "Menu");
        assert_eq!(session.current_state(), "/Menu");
    }

    #[test]
    fn self_targeting_local_override_falls_through_to_global() {
        let mut session = open_with(
            "state: Start\n    buttons:\n        Loop -> /Loop\nstate: Loop\n    q!: $regex<^again$>\n    a: loop\n    go!: /Loop\nstate: Other\n    q!: $regex<again>\n    a: other\n",
            with_depth(3),
        );
        session.start();
        session.handle_message("loop");
        assert_eq!(session.current_state(), "/Loop");

        assert_eq!(session.handle_message("again"), "other");
        assert_eq!(session.current_state(), "/Other");
    }

    #[test]
    fn local_override_without_target_skips_to_global() {
        let mut session = open(
            "state: Start\n    a: Hi\n    q!: $regex<help>\n    state: Help\n        q: $regex<help>\n        a: child help\nstate: Help\n    q!: $regex<help me>\n    a: global help\n",
        );
        session.start();
        assert_eq!(session.handle_message("help me"), "global help");
        assert_eq!(session.current_state(), "/Help");
    }

    #[test]
    fn deferred_script_transition_runs_after_remaining_tags() {
        let mut session = open(
            "state: Start\n    script:\n        reactions.transition(#{ value: \"/Wait\", deferred: true });\n    a: Name?\nstate: Wait\n    a: Waiting\n",
        );
        assert_eq!(session.start(), "Name?\n\nWaiting");
        assert_eq!(session.current_state(), "/Wait");
    }

    #[test]
    fn go_field_forwards_the_message_from_a_state_held_by_the_depth_limit() {
        let mut session = open_with(
            "state: Start\n    a: Tell me\n    go: /Echo\nstate: Echo\n    a: You said ${$input}\n",
            with_depth(1),
        );
        assert_eq!(session.start(), "Tell me");
        assert_eq!(session.current_state(), "/Start");
        assert_eq!(session.handle_message("pizza"), "You said pizza");
        assert_eq!(session.current_state(), "/Echo");
    }

    #[test]
    fn children_are_matched_before_siblings() {
        let mut session = open(
            "state: Start\n    a: Root\n    state: Order\n        q: $regex<order>\n        a: Ordering\n        state: Size\n            q: $regex<large|small>\n            a: Size picked\n    state: Other\n        q: $regex<large>\n        a: Sibling\n",
        );
        session.start();
        assert_eq!(session.handle_message("order please"), "Ordering");
        assert_eq!(session.handle_message("large"), "Size picked");
        assert_eq!(session.current_state(), "/Start/Order/Size");
    }

    #[test]
    fn siblings_exclude_the_current_state() {
        let mut session = open(
            "state: Start\n    a: Root\n    state: A\n        q: $regex<go>\n        a: In A\n    state: B\n        q: $regex<go>\n        a: In B\n",
        );
        session.start();
        assert_eq!(session.handle_message("go"), "In A");
        assert_eq!(session.handle_message("go"), "In B");
        assert_eq!(session.handle_message("go"), "In A");
    }

    #[test]
    fn global_override_scans_all_themes() {
        let mut session = open(
            "state: Start\n    a: Hi\ntheme: Deliv\nstate: Address\n    q!: $regex<(?i)deliver>\n    a: Where to?\n",
        );
        session.start();
        assert_eq!(session.handle_message("Deliver it"), "Where to?");
        assert_eq!(session.current_theme(), "/Deliv");
        assert_eq!(session.current_state(), "/Address");
    }

    #[test]
    fn unmatched_message_keeps_the_state() {
        let mut session = open("state: Start\n    a: Hi\n    state: Child\n        q: $regex<^x$>\n");
        session.start();
        assert_eq!(session.handle_message("nothing matches"), NOT_UNDERSTOOD);
        assert_eq!(session.handle_message("nothing matches"), NOT_UNDERSTOOD);
        assert_eq!(session.current_state(), "/Start");
        assert_eq!(session.context().input.as_deref(), Some("nothing matches"));
    }

    #[test]
    fn tags_replay_in_order_and_stop_at_instant_transition() {
        let mut session = open(
            "state: Start\n    script:\n        reactions.answer(\"A ran\");\n        $session.step = 1;\n    a: Hello ${$session.step}\n    script:\n        reactions.answer(\"B says\");\n        reactions.transition(\"/Next\");\n    a: never\n    script:\n        $session.step = 99;\nstate: Next\n    a: Next here\n",
        );
        assert_eq!(session.start(), "A ran\nHello 1\nB says\n\nNext here");
        assert_eq!(session.current_state(), "/Next");
        assert_eq!(
            session.context().session.get("step"),
            Some(&BotValue::Number(1.0))
        );
    }

    #[test]
    fn first_transition_request_in_an_entry_wins() {
        let mut session = open(
            "state: Start\n    script:\n        reactions.transition(#{ value: \"/First\", deferred: true });\n    script:\n        reactions.transition(\"/Second\");\n    a: still here\nstate: First\n    a: first\nstate: Second\n    a: second\n",
        );
        assert_eq!(session.start(), "still here\n\nfirst");
        assert_eq!(session.current_state(), "/First");
    }

    #[test]
    fn go_now_tag_does_not_override_an_earlier_deferred_request() {
        let mut session = open(
            "state: Start\n    script:\n        reactions.transition(#{ value: \"/First\", deferred: true });\n    go!: /Second\n    a: still here\nstate: First\n    a: first\nstate: Second\n    a: second\n",
        );
        assert_eq!(session.start(), "still here\n\nfirst");
        assert_eq!(session.current_state(), "/First");
    }

    #[test]
    fn sessions_sharing_a_bot_run_on_their_own_threads() {
        let bot = Arc::new(compile_bot_from_source_map(&BTreeMap::from([(
            "main.bot".to_string(),
            "state: Start\n    script:\n        $session.count = ($session.count ?? 0) + 1;\n    a: Visit ${$session.count}\n    buttons:\n        Again -> /Start\n".to_string(),
        )])));
        let replies = std::thread::scope(|scope| {
            let workers = (0..2)
                .map(|presses| {
                    let bot = Arc::clone(&bot);
                    scope.spawn(move || {
                        let mut session = Session::new(bot, &[], SessionOptions::default());
                        let mut reply = session.start();
                        for _ in 0..presses {
                            reply = session.handle_message("again");
                        }
                        reply
                    })
                })
                .collect::<Vec<_>>();
            workers
                .into_iter()
                .map(|worker| worker.join().expect("session thread should finish"))
                .collect::<Vec<_>>()
        });
        assert_eq!(
            replies,
            vec![
                "Visit 1\n\nOptions:\n- Again",
                "Visit 2\n\nOptions:\n- Again"
            ]
        );
    }

    #[test]
    fn failing_script_does_not_abort_the_entry() {
        let mut session = open(
            "state: Start\n    script:\n        reactions.answer(\"lost\");\n        throw \"boom\";\n    a: after ${missing_var}!\n",
        );
        assert_eq!(session.start(), "after !");
    }

    #[test]
    fn scripted_buttons_render_first_and_are_clickable() {
        let mut session = open(
            "state: Start\n    a: Pick\n    script:\n        reactions.buttons(#{ text: \"Pizza\", transition: \"Pizza\" });\n        reactions.buttons(\"Echo\");\n    buttons:\n        Static -> /Other\n    state: Pizza\n        a: Pizza time\nstate: Other\n    a: other\n",
        );
        let reply = session.start();
        assert_eq!(format_reply(&reply).buttons, vec!["Pizza", "Echo", "Static"]);
        assert_eq!(session.handle_message("pizza"), "Pizza time");
        assert_eq!(session.current_state(), "/Start/Pizza");
    }

    #[test]
    fn targetless_scripted_button_reaches_global_trigger() {
        let mut session = open(
            "state: Start\n    script:\n        reactions.buttons(\"Echo\");\nstate: Echo\n    q!: $regex<(?i)^echo$>\n    a: echoed\n",
        );
        assert_eq!(session.start(), "Options:\n- Echo");
        assert_eq!(session.handle_message("echo"), "echoed");
    }

    #[test]
    fn targetless_button_redispatches_once() {
        let mut session = open(
            "state: Start\n    a: Menu\n    buttons:\n        Help\n    state: Help\n        q: $regex<(?i)help>\n        a: Helping\n",
        );
        session.start();
        assert_eq!(session.handle_message("help"), "Helping");

        let mut session = open("state: Start\n    a: Menu\n    buttons:\n        Nothing\n");
        session.start();
        assert_eq!(session.handle_message("nothing"), NOT_UNDERSTOOD);
        assert_eq!(session.current_state(), "/Start");
    }

    #[test]
    fn unknown_targets_report_not_found_and_keep_state() {
        let mut session = open("state: Start\n    a: Hi\n    buttons:\n        Broken -> /Nowhere\n");
        session.start();
        assert_eq!(session.handle_message("broken"), "State \"/Nowhere\" not found");
        assert_eq!(session.current_state(), "/Start");
    }

    #[test]
    fn sanitizer_escapes_script_tags_in_answers() {
        let mut session = open("state: Start\n    a: Look ${\"<script>x</script>\"}\n");
        assert_eq!(session.start(), "Look &lt;script&gt;x&lt;/script&gt;");
    }

    #[test]
    fn transition_chains_stop_at_the_depth_limit() {
        let mut session = open_with(
            "state: Start\n    go!: /A\nstate: A\n    a: a\n    go!: /B\nstate: B\n    a: b\n    go!: /A\n",
            with_depth(5),
        );
        assert_eq!(session.start(), "a\n\nb\n\na\n\nb");
        assert_eq!(session.current_state(), "/B");
    }

    #[test]
    fn script_state_survives_between_messages() {
        let mut session = open(
            "state: Start\n    script:\n        $session.count = 0;\n    buttons:\n        Tick -> /Count\nstate: Count\n    script:\n        $session.count += 1;\n    a: Count ${$session.count}\n    buttons:\n        Tick -> /Count\n",
        );
        session.start();
        assert_eq!(session.handle_message("tick"), "Count 1\n\nOptions:\n- Tick");
        assert_eq!(session.handle_message("TICK"), "Count 2\n\nOptions:\n- Tick");
    }
}
