//! Rename resolution for merged data maps.
//!
//! When a child data map is merged against an ancestor's rule source, the
//! rules need not be declared in dependency order: a rule may rename a name
//! that another rule is itself about to produce. Resolution therefore runs
//! in two stages — pattern rules are expanded against exactly one generation
//! of original keys, then simple rules are followed transitively until a
//! present key is found. Each resolution step consumes a rule, so cyclic
//! declarations terminate instead of looping.

use core::hash::BuildHasherDefault;
use std::collections::HashMap;

use regex::Regex;
use seahash::SeaHasher;
use tracing::warn;

pub type RuleHasher = BuildHasherDefault<SeaHasher>;

/// Directive marker for a literal remap: `new = <=old/name`.
pub const SIMPLE_RENAME_MARK: &str = "<=";
/// Directive marker for a pattern remap: the entry key is the replacement
/// template and the directive carries the regex: `$1/foo = <~foo ([0-9]+)`.
pub const PATTERN_RENAME_MARK: &str = "<~";

#[derive(Debug, Clone, PartialEq)]
pub enum RenameRule {
    Simple { new_name: String, old_name: String },
    Pattern { template: String, pattern: String },
}

impl RenameRule {
    /// Classifies one rule-source entry; entries without a rename marker are
    /// plain definitions, not rules.
    pub fn classify(target: &str, directive: &str) -> Option<RenameRule> {
        if let Some(old_name) = directive.strip_prefix(SIMPLE_RENAME_MARK) {
            Some(RenameRule::Simple {
                new_name: target.to_owned(),
                old_name: old_name.trim().to_owned(),
            })
        } else if let Some(pattern) = directive.strip_prefix(PATTERN_RENAME_MARK) {
            Some(RenameRule::Pattern {
                template: target.to_owned(),
                pattern: pattern.trim().to_owned(),
            })
        } else {
            None
        }
    }
}

/// Applies the rule source's renames to `values` in place. Returns whether
/// any value moved. Rules whose target is shadowed by a literal key already
/// present are skipped (a rename cannot land on an explicitly defined
/// name), and a malformed pattern regex only disables that one rule.
pub fn perform_renames<V>(
    values: &mut HashMap<String, V, RuleHasher>,
    rule_source: &HashMap<String, String, RuleHasher>,
) -> bool {
    let mut simple: HashMap<String, String, RuleHasher> = HashMap::default();
    let mut patterns: Vec<(String, String)> = Vec::new();
    for (target, directive) in rule_source {
        if values.contains_key(target) {
            continue;
        }
        match RenameRule::classify(target, directive) {
            Some(RenameRule::Simple { new_name, old_name }) => {
                simple.insert(new_name, old_name);
            }
            Some(RenameRule::Pattern { template, pattern }) => {
                patterns.push((template, pattern));
            }
            None => (),
        }
    }

    // Pattern rules see one generation of original names only: each match
    // synthesizes a simple rule, so patterns are never chained.
    for (template, pattern) in patterns {
        let matcher = match Regex::new(&pattern) {
            Ok(matcher) => matcher,
            Err(error) => {
                warn!(%pattern, %error, "skipping malformed rename pattern");
                continue;
            }
        };
        for key in values.keys() {
            let captures = match matcher.captures(key) {
                Some(captures) => captures,
                None => continue,
            };
            let whole = captures
                .get(0)
                .map(|m| m.start() == 0 && m.end() == key.len())
                .unwrap_or(false);
            if !whole {
                continue;
            }
            let mut new_name = String::new();
            captures.expand(&template, &mut new_name);
            if new_name != *key && !values.contains_key(&new_name) {
                simple.entry(new_name).or_insert_with(|| key.clone());
            }
        }
    }

    // Transitive resolution: follow each rule's old side through the
    // remaining chain until a present key is found or the chain runs out.
    let mut moved = false;
    while let Some(new_name) = simple.keys().next().cloned() {
        let mut old_name = simple.remove(&new_name).unwrap();
        loop {
            if let Some(value) = values.remove(&old_name) {
                values.insert(new_name.clone(), value);
                moved = true;
                break;
            }
            match simple.remove(&old_name) {
                Some(older) => old_name = older,
                None => break,
            }
        }
    }
    moved
}
