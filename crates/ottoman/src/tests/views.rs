//! Map and reduce commands through the serve loop.

use std::rc::Rc;

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::support::Session;
use crate::compiler::DisabledArtifacts;
use crate::state::Options;

const TAG_MAP: &str = r"
function(doc)
  if doc.type == 'post' then
    for _, tag in ipairs(doc.tags) do
      emit(tag, 1)
    end
  end
end
";

#[fixture]
fn session() -> Session {
    Session::new("1.2.0")
}

#[rstest]
fn map_doc_emits_one_row_per_tag(mut session: Session) {
    session.setup(vec![json!(["reset"]), json!(["add_fun", TAG_MAP])]);
    let answer = session.ask(json!(["map_doc", {"type": "post", "tags": ["a", "b"]}]));
    assert_eq!(answer, json!([[["a", 1], ["b", 1]]]));
}

#[rstest]
fn map_doc_answers_one_list_per_function(mut session: Session) {
    session.setup(vec![
        json!(["add_fun", "function(doc) emit(doc._id, nil) end"]),
        json!(["add_fun", "function(doc) end"]),
        json!(["add_fun", "function(doc) return {{'returned', 2}} end"]),
    ]);
    let answer = session.ask(json!(["map_doc", {"_id": "x"}]));
    assert_eq!(answer, json!([[["x", null]], [], [["returned", 2]]]));
}

#[rstest]
fn map_functions_cannot_see_each_others_changes(mut session: Session) {
    session.setup(vec![
        json!(["add_fun", "function(doc) doc.touched = true; emit('first', doc.touched) end"]),
        json!(["add_fun", "function(doc) emit('second', doc.touched == true) end"]),
    ]);
    let answer = session.ask(json!(["map_doc", {"_id": "x"}]));
    assert_eq!(answer, json!([[["first", true]], [["second", false]]]));

    let again = session.ask(json!(["map_doc", {"_id": "x"}]));
    assert_eq!(again, answer);
}

const LIBRARY_CHECK: &str = r"
function(doc)
  local entries = 0
  for _ in pairs(math) do entries = entries + 1 end
  emit('intact', math.pi > 3.14 and math.pi < 3.15 and string.upper('a') == 'A'
    and ('b'):upper() == 'B' and json.null ~= nil and entries > 10)
  emit(doc._id, 1)
end
";

#[rstest]
#[case::library_field("math.pi = 4")]
#[case::raw_library_field("rawset(math, 'pi', 4)")]
#[case::environment_fallback("getmetatable(_ENV).__index.emit = function() end")]
#[case::string_methods("getmetatable('').__index.upper = function() return 'x' end")]
#[case::library_metatable("setmetatable(json, nil)")]
#[case::new_library_entry("string.shout = function() end")]
fn scripts_cannot_change_the_shared_sandbox(mut session: Session, #[case] change: &str) {
    session.setup(vec![json!(["add_fun", format!("function(doc) {change} end")])]);
    let refused = session.ask(json!(["map_doc", {"_id": "x"}]));
    assert_eq!(refused.get(1), Some(&json!("runtime_error")), "{refused}");

    session.setup(vec![json!(["reset"]), json!(["add_fun", LIBRARY_CHECK])]);
    let answer = session.ask(json!(["map_doc", {"_id": "x"}]));
    assert_eq!(answer, json!([[["intact", true], ["x", 1]]]));
}

#[rstest]
fn rawset_still_works_on_script_tables(mut session: Session) {
    session.setup(vec![json!([
        "add_fun",
        "function(doc) local t = {}; rawset(t, 'k', 1); emit('k', t.k) end"
    ])]);
    assert_eq!(session.ask(json!(["map_doc", {}])), json!([[["k", 1]]]));
}

#[rstest]
fn map_failures_keep_the_connection(mut session: Session) {
    session.setup(vec![json!(["add_fun", "function(doc) error('boom') end"])]);
    let answer = session.ask(json!(["map_doc", {"_id": "x"}]));
    assert_eq!(answer.get(0), Some(&json!("error")));
    assert_eq!(answer.get(1), Some(&json!("runtime_error")));

    assert_eq!(session.ask(json!(["reset"])), json!(true));
}

#[rstest]
fn log_lines_precede_the_answer(mut session: Session) {
    session.setup(vec![json!(["add_fun", "function(doc) log('mapping ' .. doc._id) end"])]);
    let (outcome, written) = session.exchange(vec![json!(["map_doc", {"_id": "x"}])]);
    assert!(outcome.is_ok());
    assert_eq!(written, vec![json!(["log", "mapping x"]), json!([[]])]);
}

#[rstest]
fn builtin_count_reduces_and_rereduces(mut session: Session) {
    let rows = json!([[["a", "1"], 1], [["b", "2"], 1], [["c", "3"], 1]]);
    let reduced = session.ask(json!(["reduce", ["_count"], rows]));
    assert_eq!(reduced, json!([true, [3]]));

    let rereduced = session.ask(json!(["rereduce", ["_count"], [3, 3]]));
    assert_eq!(rereduced, json!([true, [6]]));
}

#[rstest]
fn script_reducers_see_keys_values_and_mode(mut session: Session) {
    let source = r"
function(keys, values, rereduce)
  if rereduce then return 'again' end
  return #keys + #values
end
";
    let rows = json!([[["k", "1"], 2], [["k", "2"], 5]]);
    let reduced = session.ask(json!(["reduce", [source, "_sum"], rows]));
    assert_eq!(reduced, json!([true, [4, 7]]));

    let rereduced = session.ask(json!(["rereduce", [source], [1, 2]]));
    assert_eq!(rereduced, json!([true, ["again"]]));
}

const TWO_LETTERS: &str = "function(keys, values, rereduce) return 'ab' end";
const THREE_LETTERS: &str = "function(keys, values, rereduce) return 'abc' end";

#[rstest]
#[case::exactly_double(TWO_LETTERS, true)]
#[case::one_byte_over(THREE_LETTERS, false)]
fn reduce_limit_allows_exactly_double_output(
    mut session: Session,
    #[case] source: &str,
    #[case] accepted: bool,
) {
    let answer = session.ask(json!(["rereduce", [source], [1]]));
    if accepted {
        assert_eq!(answer, json!([true, ["ab"]]));
    } else {
        assert_eq!(answer.get(1), Some(&json!("reduce_overflow_error")));
    }
}

#[rstest]
fn reduce_limit_can_be_disabled_by_reset(mut session: Session) {
    session.setup(vec![json!(["reset", {"reduce_limit": false}])]);
    let answer = session.ask(json!(["rereduce", [THREE_LETTERS], [1]]));
    assert_eq!(answer, json!([true, ["abc"]]));
}

#[test]
fn reduce_limit_off_in_options_accepts_growth() {
    let options = Options {
        reduce_limit: false,
        ..Options::default()
    };
    let mut session = Session::with_options("1.2.0", options, Rc::new(DisabledArtifacts));
    let answer = session.ask(json!(["rereduce", [THREE_LETTERS], [1]]));
    assert_eq!(answer, json!([true, ["abc"]]));
    assert!(!session.server().state().options().reduce_limit);
}

#[rstest]
fn malformed_reduce_rows_are_invalid_arguments(mut session: Session) {
    let answer = session.ask(json!(["reduce", ["_count"], [1, 2]]));
    assert_eq!(answer.get(1), Some(&json!("invalid_arguments")));
}

#[rstest]
fn view_library_is_required_from_map_functions(mut session: Session) {
    let library = json!({"util": "return { double = function(x) return x * 2 end }"});
    session.setup(vec![
        json!(["add_lib", library]),
        json!([
            "add_fun",
            "function(doc) emit(doc._id, require('views/lib/util').double(doc.n)) end"
        ]),
    ]);
    let answer = session.ask(json!(["map_doc", {"_id": "x", "n": 21}]));
    assert_eq!(answer, json!([[["x", 42]]]));
}

#[rstest]
fn compilation_errors_are_recoverable(mut session: Session) {
    let answer = session.ask(json!(["add_fun", "local x = 1"]));
    assert_eq!(
        answer,
        json!(["error", "compilation_error", "Expression does not eval to a function"])
    );
    let reply: Value = session.ask(json!(["add_fun", "function(doc) end"]));
    assert_eq!(reply, json!(true));
}
