use ripplekeep::datatype::Value;
use ripplekeep::script::{
    AliasScript, ChoiceScript, ConstantScript, DefinedScript, EvalStack, LookupScript,
    NameResolver, Script, StackItem, SumScript,
};

/// Fixed-map resolver, standing in for a repository.
struct Fixture(Vec<(String, Value)>);

impl NameResolver for Fixture {
    fn get(&self, name: &str) -> Value {
        self.0
            .iter()
            .find(|(kept, _)| kept == name)
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Undefined)
    }
}

fn run(script: &dyn Script, fixture: &Fixture) -> (Value, Option<String>) {
    let mut stack = EvalStack::new();
    script.run(&mut stack, fixture).unwrap();
    stack.take_result().unwrap()
}

#[test]
fn stable_save_strings() {
    assert_eq!(
        ConstantScript::new(Value::Number(5.0)).save_string(),
        "const 5"
    );
    assert_eq!(
        ConstantScript::new(Value::Text("hi".into())).save_string(),
        "const \"hi\""
    );
    assert_eq!(LookupScript::new("/a/b").save_string(), "lookup /a/b");
    assert_eq!(AliasScript::new("/real").save_string(), "alias /real");
    assert_eq!(DefinedScript::new("x").save_string(), "defined x");
    assert_eq!(
        SumScript::new(vec!["a", "b"]).save_string(),
        "sum a,b"
    );
    assert_eq!(
        ChoiceScript::new("s", "t", "f").save_string(),
        "choice s ? t : f"
    );
}

#[test]
fn alias_scripts_leave_the_descriptor_beneath_the_result() {
    let fixture = Fixture(vec![("/real".into(), Value::Number(3.0))]);
    let (value, alias) = run(&AliasScript::new("/real"), &fixture);
    assert_eq!(value, Value::Number(3.0));
    assert_eq!(alias, Some("/real".into()));
}

#[test]
fn plain_scripts_have_no_alias_descriptor() {
    let fixture = Fixture(vec![("/a".into(), Value::Number(3.0))]);
    let (value, alias) = run(&LookupScript::new("/a"), &fixture);
    assert_eq!(value, Value::Number(3.0));
    assert_eq!(alias, None);
}

#[test]
fn sum_skips_undefined_operands() {
    let fixture = Fixture(vec![
        ("a".into(), Value::Number(1.0)),
        ("c".into(), Value::Number(2.0)),
    ]);
    let (value, _) = run(&SumScript::new(vec!["a", "b", "c"]), &fixture);
    assert_eq!(value, Value::Number(3.0));

    let empty = Fixture(Vec::new());
    let (value, _) = run(&SumScript::new(vec!["a", "b"]), &empty);
    assert_eq!(value, Value::Undefined);
}

#[test]
fn taking_a_result_from_an_empty_stack_is_an_error() {
    let mut stack = EvalStack::new();
    assert!(stack.take_result().is_err());
    stack.push_alias("/real");
    assert!(stack.pop_value().is_err());
}

#[test]
fn stack_items_compare_structurally() {
    assert_eq!(
        StackItem::Value(Value::Number(1.0)),
        StackItem::Value(Value::Number(1.0))
    );
    assert_ne!(
        StackItem::Alias("/a".into()),
        StackItem::Value(Value::Undefined)
    );
}

#[test]
fn value_sniffing_classifies_import_tokens() {
    assert_eq!(Value::sniff("12.5"), Value::Number(12.5));
    assert_eq!(Value::sniff("-3"), Value::Number(-3.0));
    assert_eq!(Value::sniff("TAG"), Value::Tag);
    assert!(matches!(Value::sniff("2026-08-07"), Value::Date(_)));
    assert_eq!(Value::sniff("hello world"), Value::Text("hello world".into()));
    assert_eq!(Value::sniff("   "), Value::Undefined);
    // a malformed date falls back to text
    assert_eq!(
        Value::sniff("2026-13-40"),
        Value::Text("2026-13-40".into())
    );
}
