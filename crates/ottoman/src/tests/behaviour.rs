//! Behavioural tests for whole host conversations.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use super::support::{CapturedLogs, Session};
use crate::dispatch::ServeError;

type StepResult = Result<(), String>;

/// Scenario world shared across BDD steps.
#[derive(Default)]
pub struct TestWorld {
    session: Option<Session>,
    answers: Vec<Value>,
    outcome: Option<Result<(), ServeError>>,
    logs: CapturedLogs,
}

impl TestWorld {
    fn session(&mut self) -> Result<&mut Session, String> {
        self.session
            .as_mut()
            .ok_or_else(|| "no query server was started".to_owned())
    }

    fn send(&mut self, line: Value) -> StepResult {
        let logs = self.logs.clone();
        let session = self.session()?;
        let (outcome, answers) = logs.capture(|| session.exchange(vec![line]));
        self.outcome = Some(outcome);
        self.answers = answers;
        Ok(())
    }
}

fn parse(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|error| format!("invalid JSON '{text}': {error}"))
}

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::default())
}

#[given("a query server for host version \"{version}\"")]
fn given_server(world: &RefCell<TestWorld>, version: String) {
    world.borrow_mut().session = Some(Session::new(&version));
}

#[given("the map function \"{source}\"")]
fn given_map_function(world: &RefCell<TestWorld>, source: String) -> StepResult {
    let mut world = world.borrow_mut();
    world.session()?.setup(vec![json!(["add_fun", source])]);
    Ok(())
}

#[given("the design document \"{id}\" with validation \"{source}\"")]
fn given_validating_ddoc(world: &RefCell<TestWorld>, id: String, source: String) -> StepResult {
    let mut world = world.borrow_mut();
    let body = json!({ "validate_doc_update": source });
    world.session()?.setup(vec![json!(["ddoc", "new", id, body])]);
    Ok(())
}

#[when("the host sends map_doc with '{doc}'")]
fn when_map_doc(world: &RefCell<TestWorld>, doc: String) -> StepResult {
    let doc = parse(&doc)?;
    world.borrow_mut().send(json!(["map_doc", doc]))
}

#[when("the host sends '{line}'")]
fn when_host_sends(world: &RefCell<TestWorld>, line: String) -> StepResult {
    let line = parse(&line)?;
    world.borrow_mut().send(line)
}

#[then("the answer is '{expected}'")]
fn then_answer(world: &RefCell<TestWorld>, expected: String) -> StepResult {
    let expected = parse(&expected)?;
    let world = world.borrow();
    match world.answers.as_slice() {
        [answer] if *answer == expected => Ok(()),
        other => Err(format!("expected [{expected}], got {other:?}")),
    }
}

#[then("the server is still serving")]
fn then_still_serving(world: &RefCell<TestWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    if !matches!(world.outcome, Some(Ok(()))) {
        return Err(format!("serve loop stopped: {:?}", world.outcome));
    }
    let answer = world.session()?.ask(json!(["reset"]));
    if answer == json!(true) {
        Ok(())
    } else {
        Err(format!("reset answered {answer}"))
    }
}

#[then("a warning on \"{target}\" gives the reason '{reason}'")]
fn then_warning_logged(world: &RefCell<TestWorld>, target: String, reason: String) -> StepResult {
    let world = world.borrow();
    if world.logs.contains("WARN", &target, "reason", &reason) {
        Ok(())
    } else {
        Err(format!("no warning with reason '{reason}' in {:?}", world.logs.events()))
    }
}

#[then("the server has stopped")]
fn then_stopped(world: &RefCell<TestWorld>) -> StepResult {
    match &world.borrow().outcome {
        Some(Err(ServeError::Fatal { .. })) => Ok(()),
        other => Err(format!("expected a fatal stop, got {other:?}")),
    }
}

#[scenario(
    path = "tests/features/query_server.feature",
    name = "Map functions emit one row per tag"
)]
fn map_functions_emit_rows(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_server.feature",
    name = "Built-in count reduces and rereduces"
)]
fn builtin_count(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_server.feature",
    name = "Validation refusals do not end the connection"
)]
fn validation_refusals(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_server.feature",
    name = "Old hosts get a synthesised user context for filters"
)]
fn synthesised_userctx(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_server.feature",
    name = "Fatal errors stop the server"
)]
fn fatal_errors_stop(world: RefCell<TestWorld>) {
    drop(world);
}
