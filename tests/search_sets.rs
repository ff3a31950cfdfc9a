use std::sync::Arc;

use ripplekeep::datatype::Value;
use ripplekeep::repository::Repository;
use ripplekeep::script::DefinedScript;
use ripplekeep::search::DynamicSearchSet;

fn members(set: &DynamicSearchSet) -> Vec<String> {
    set.value().to_vec()
}

#[test]
fn tagged_elements_contribute_their_prefix_exactly_once() {
    let repository = Repository::with_defaults();
    repository.put_value("/Proj/Alpha/Selected", Value::Tag);
    let set = DynamicSearchSet::build(&repository, "/Search/Selected", "/Proj", "/Selected", None);

    assert_eq!(members(&set), vec!["/Proj/Alpha"]);

    repository.put_value("/Proj/Beta/Selected", Value::Tag);
    assert_eq!(members(&set), vec!["/Proj/Alpha", "/Proj/Beta"]);

    repository.remove_value("/Proj/Alpha/Selected");
    assert_eq!(members(&set), vec!["/Proj/Beta"]);
}

#[test]
fn untagged_and_foreign_elements_are_ignored() {
    let repository = Repository::with_defaults();
    let set = DynamicSearchSet::build(&repository, "/Search/Selected", "/Proj", "/Selected", None);

    repository.put_value("/Proj/Alpha/Notes", Value::Text("x".into()));
    repository.put_value("/Other/Gamma/Selected", Value::Tag);

    assert!(members(&set).is_empty());
}

#[test]
fn result_order_matches_hierarchy_order_regardless_of_insertion() {
    let repository = Repository::with_defaults();
    let set = DynamicSearchSet::build(&repository, "/Search/Selected", "/Proj", "/Selected", None);

    repository.put_value("/Proj/Zeta/Selected", Value::Tag);
    repository.put_value("/Proj/Alpha/Sub/Selected", Value::Tag);
    repository.put_value("/Proj/Alpha/Selected", Value::Tag);
    repository.put_value("/Proj/Mid/Selected", Value::Tag);

    assert_eq!(
        members(&set),
        vec!["/Proj/Alpha", "/Proj/Alpha/Sub", "/Proj/Mid", "/Proj/Zeta"]
    );
}

#[test]
fn a_condition_gates_membership() {
    let repository = Repository::with_defaults();
    repository.put_value("/Proj/Alpha/Selected", Value::Tag);
    repository.put_value("/Proj/Beta/Selected", Value::Tag);
    repository.put_value("/Proj/Beta/Enabled", Value::Tag);
    let set = DynamicSearchSet::build(
        &repository,
        "/Search/Enabled",
        "/Proj",
        "/Selected",
        Some(Arc::new(DefinedScript::new("Enabled"))),
    );

    // only Beta's condition evaluates true
    assert_eq!(members(&set), vec!["/Proj/Beta"]);
}

#[test]
fn toggling_the_condition_adds_and_removes_without_duplication() {
    let repository = Repository::with_defaults();
    repository.put_value("/Proj/Alpha/Selected", Value::Tag);
    let set = DynamicSearchSet::build(
        &repository,
        "/Search/Enabled",
        "/Proj",
        "/Selected",
        Some(Arc::new(DefinedScript::new("Enabled"))),
    );
    assert!(members(&set).is_empty());

    repository.put_value("/Proj/Alpha/Enabled", Value::Tag);
    assert_eq!(members(&set), vec!["/Proj/Alpha"]);

    repository.put_value("/Proj/Alpha/Enabled", Value::Tag);
    assert_eq!(members(&set), vec!["/Proj/Alpha"]);

    repository.remove_value("/Proj/Alpha/Enabled");
    assert!(members(&set).is_empty());

    repository.put_value("/Proj/Alpha/Enabled", Value::Tag);
    assert_eq!(members(&set), vec!["/Proj/Alpha"]);
}

#[test]
fn removing_the_tag_removes_the_prefix_and_its_condition() {
    let repository = Repository::with_defaults();
    repository.put_value("/Proj/Alpha/Selected", Value::Tag);
    repository.put_value("/Proj/Alpha/Enabled", Value::Tag);
    let set = DynamicSearchSet::build(
        &repository,
        "/Search/Enabled",
        "/Proj",
        "/Selected",
        Some(Arc::new(DefinedScript::new("Enabled"))),
    );
    assert_eq!(members(&set), vec!["/Proj/Alpha"]);

    repository.remove_value("/Proj/Alpha/Selected");
    assert!(members(&set).is_empty());

    // the synthesized condition is gone from the repository too
    assert!(repository
        .keys_under("/Proj/Alpha", None)
        .all(|key| !key.contains("Search_Condition")));
}

#[test]
fn the_external_snapshot_is_cached_until_a_mutation() {
    let repository = Repository::with_defaults();
    repository.put_value("/Proj/Alpha/Selected", Value::Tag);
    let set = DynamicSearchSet::build(&repository, "/Search/Selected", "/Proj", "/Selected", None);

    let first = set.value();
    let second = set.value();
    assert!(Arc::ptr_eq(&first, &second));

    repository.put_value("/Proj/Beta/Selected", Value::Tag);
    let third = set.value();
    assert!(!Arc::ptr_eq(&second, &third));
    // the earlier snapshot is read-only and untouched by the mutation
    assert_eq!(first.to_vec(), vec!["/Proj/Alpha"]);
}

#[test]
fn an_undefined_tracked_value_drops_the_prefix() {
    let repository = Repository::with_defaults();
    repository.put_value("/Proj/Alpha/Selected", Value::Tag);
    let set = DynamicSearchSet::build(&repository, "/Search/Selected", "/Proj", "/Selected", None);
    assert_eq!(members(&set), vec!["/Proj/Alpha"]);

    // the tag element disappears: the prefix goes with it
    repository.remove_value("/Proj/Alpha/Selected");
    assert!(members(&set).is_empty());
}

#[test]
fn dispose_stops_maintenance_and_cleans_up_conditions() {
    let repository = Repository::with_defaults();
    repository.put_value("/Proj/Alpha/Selected", Value::Tag);
    repository.put_value("/Proj/Alpha/Enabled", Value::Tag);
    let set = DynamicSearchSet::build(
        &repository,
        "/Search/Enabled",
        "/Proj",
        "/Selected",
        Some(Arc::new(DefinedScript::new("Enabled"))),
    );
    assert_eq!(members(&set), vec!["/Proj/Alpha"]);

    set.dispose();
    assert!(members(&set).is_empty());

    repository.put_value("/Proj/Beta/Selected", Value::Tag);
    assert!(members(&set).is_empty());
    assert!(repository
        .keys_under("/Proj/Alpha", None)
        .all(|key| !key.contains("Search_Condition")));
}
