//! Compiled scripts and the stack machine they run against.
//!
//! A script is a pre-parsed executable formula: an opaque pure function over
//! an evaluation stack and a name-resolving context. The repository never
//! inspects a script; it only runs it and reads the result off the stack.
//! Expression cells, search conditions, and tests all plug in through the
//! [`Script`] trait, and the built-in scripts below cover the operations the
//! repository itself needs (constants, lookups, aliases, conditions).

use crate::datatype::Value;
use crate::error::{RepositoryError, Result};

/// Resolves names read during one execution pass. Absent names resolve to
/// [`Value::Undefined`], never an error.
pub trait NameResolver {
    fn get(&self, name: &str) -> Value;
}

/// One entry on the scratch evaluation stack: a plain value, or an alias
/// descriptor naming the element the result really refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum StackItem {
    Value(Value),
    Alias(String),
}

// ------------- EvalStack -------------
#[derive(Debug, Default)]
pub struct EvalStack {
    items: Vec<StackItem>,
}

impl EvalStack {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push_value(&mut self, value: Value) {
        self.items.push(StackItem::Value(value));
    }
    pub fn push_alias(&mut self, target: &str) {
        self.items.push(StackItem::Alias(target.to_owned()));
    }
    pub fn pop_value(&mut self) -> Result<Value> {
        match self.items.pop() {
            Some(StackItem::Value(value)) => Ok(value),
            Some(StackItem::Alias(target)) => Err(RepositoryError::Execution(format!(
                "expected a value on the stack, found alias '{}'",
                target
            ))),
            None => Err(RepositoryError::Execution(String::from(
                "expected a value on an empty stack",
            ))),
        }
    }
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Reads the computed result: the top-of-stack value plus the optional
    /// alias descriptor directly beneath it.
    pub fn take_result(&mut self) -> Result<(Value, Option<String>)> {
        let value = self.pop_value()?;
        let alias = if matches!(self.items.last(), Some(StackItem::Alias(_))) {
            match self.items.pop() {
                Some(StackItem::Alias(target)) => Some(target),
                _ => None,
            }
        } else {
            None
        };
        Ok((value, alias))
    }
}

// ------------- Script -------------
pub trait Script: Send + Sync {
    /// Runs against a scratch stack and a name-resolving context, leaving
    /// the result on top of the stack.
    fn run(&self, stack: &mut EvalStack, resolver: &dyn NameResolver) -> Result<()>;
    /// Stable textual form for serialization.
    fn save_string(&self) -> String;
}

fn save_token(value: &Value) -> String {
    match value {
        Value::Text(text) => format!("\"{}\"", text),
        other => other.to_string(),
    }
}

// ------------- Built-in scripts -------------
/// Pushes a fixed value.
#[derive(Debug, Clone)]
pub struct ConstantScript {
    value: Value,
}

impl ConstantScript {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

impl Script for ConstantScript {
    fn run(&self, stack: &mut EvalStack, _resolver: &dyn NameResolver) -> Result<()> {
        stack.push_value(self.value.clone());
        Ok(())
    }
    fn save_string(&self) -> String {
        format!("const {}", save_token(&self.value))
    }
}

/// Pushes the current value of one name.
#[derive(Debug, Clone)]
pub struct LookupScript {
    name: String,
}

impl LookupScript {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }
}

impl Script for LookupScript {
    fn run(&self, stack: &mut EvalStack, resolver: &dyn NameResolver) -> Result<()> {
        stack.push_value(resolver.get(&self.name));
        Ok(())
    }
    fn save_string(&self) -> String {
        format!("lookup {}", self.name)
    }
}

/// Declares the result to really be another element's value: pushes the
/// alias descriptor, then the target's current value on top of it.
#[derive(Debug, Clone)]
pub struct AliasScript {
    target: String,
}

impl AliasScript {
    pub fn new(target: &str) -> Self {
        Self { target: target.to_owned() }
    }
}

impl Script for AliasScript {
    fn run(&self, stack: &mut EvalStack, resolver: &dyn NameResolver) -> Result<()> {
        stack.push_alias(&self.target);
        stack.push_value(resolver.get(&self.target));
        Ok(())
    }
    fn save_string(&self) -> String {
        format!("alias {}", self.target)
    }
}

/// Pushes 1 when the named element is defined, 0 otherwise.
#[derive(Debug, Clone)]
pub struct DefinedScript {
    name: String,
}

impl DefinedScript {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }
}

impl Script for DefinedScript {
    fn run(&self, stack: &mut EvalStack, resolver: &dyn NameResolver) -> Result<()> {
        let defined = resolver.get(&self.name).is_defined();
        stack.push_value(Value::Number(if defined { 1.0 } else { 0.0 }));
        Ok(())
    }
    fn save_string(&self) -> String {
        format!("defined {}", self.name)
    }
}

/// Numeric fold over a list of names. Undefined operands are skipped; when
/// nothing is defined the result is undefined.
#[derive(Debug, Clone)]
pub struct SumScript {
    names: Vec<String>,
}

impl SumScript {
    pub fn new<N: Into<String>>(names: Vec<N>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Script for SumScript {
    fn run(&self, stack: &mut EvalStack, resolver: &dyn NameResolver) -> Result<()> {
        let mut total = None;
        for name in &self.names {
            if let Some(number) = resolver.get(name).as_number() {
                total = Some(total.unwrap_or(0.0) + number);
            }
        }
        stack.push_value(match total {
            Some(number) => Value::Number(number),
            None => Value::Undefined,
        });
        Ok(())
    }
    fn save_string(&self) -> String {
        format!("sum {}", self.names.join(","))
    }
}

/// Reads a switch name, then exactly one of two branch names. Which names a
/// pass reads depends on the switch, so the dependency set changes between
/// passes.
#[derive(Debug, Clone)]
pub struct ChoiceScript {
    switch: String,
    when_true: String,
    when_false: String,
}

impl ChoiceScript {
    pub fn new(switch: &str, when_true: &str, when_false: &str) -> Self {
        Self {
            switch: switch.to_owned(),
            when_true: when_true.to_owned(),
            when_false: when_false.to_owned(),
        }
    }
}

impl Script for ChoiceScript {
    fn run(&self, stack: &mut EvalStack, resolver: &dyn NameResolver) -> Result<()> {
        let branch = if resolver.get(&self.switch).is_truthy() {
            &self.when_true
        } else {
            &self.when_false
        };
        stack.push_value(resolver.get(branch));
        Ok(())
    }
    fn save_string(&self) -> String {
        format!("choice {} ? {} : {}", self.switch, self.when_true, self.when_false)
    }
}
