//! Late binding of `{var: name}` and `{secret: key}` argument values

use crate::modules::{ModuleArgs, ModuleExecutionError};
use crate::secrets::{Redactor, Secret, SecretsProvider};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A value that is looked up when the task runs instead of being literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgReference<'a> {
    Variable(&'a str),
    Secret(&'a str),
}

impl<'a> ArgReference<'a> {
    /// A single-key mapping `{var: x}` or `{secret: x}` with a string value
    pub fn parse(value: &'a Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.len() != 1 {
            return None;
        }
        let (kind, name) = map.iter().next()?;
        let name = name.as_str()?;
        match kind.as_str() {
            "var" => Some(Self::Variable(name)),
            "secret" => Some(Self::Secret(name)),
            _ => None,
        }
    }
}

pub struct ArgumentResolver<'a> {
    variables: &'a BTreeMap<String, Value>,
    secrets: &'a dyn SecretsProvider,
}

impl<'a> ArgumentResolver<'a> {
    pub fn new(variables: &'a BTreeMap<String, Value>, secrets: &'a dyn SecretsProvider) -> Self {
        Self { variables, secrets }
    }

    pub async fn resolve(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<ModuleArgs, ModuleExecutionError> {
        let mut keys = BTreeSet::new();
        for value in args.values() {
            collect_secret_keys(value, &mut keys);
        }

        // Fetched per task and dropped with the resolved arguments
        let mut secrets = HashMap::with_capacity(keys.len());
        for key in keys {
            let secret = self.secrets.fetch(key).await?;
            secrets.insert(key, secret);
        }

        let mut resolved = HashMap::with_capacity(args.len());
        for (name, value) in args {
            resolved.insert(name.clone(), self.substitute(value, &secrets)?);
        }
        let redactor = Redactor::new(secrets.values());
        Ok(ModuleArgs::new(resolved).with_redactor(redactor))
    }

    fn substitute(
        &self,
        value: &Value,
        secrets: &HashMap<&str, Secret>,
    ) -> Result<Value, ModuleExecutionError> {
        if let Some(reference) = ArgReference::parse(value) {
            return match reference {
                ArgReference::Variable(name) => self.lookup(name),
                ArgReference::Secret(key) => secrets
                    .get(key)
                    .map(|s| Value::String(s.expose().to_string()))
                    .ok_or_else(|| ModuleExecutionError::InvalidArgs {
                        message: format!("secret {key} was not fetched"),
                    }),
            };
        }

        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.substitute(item, secrets))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.substitute(v, secrets)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Dotted names walk into nested mappings
    fn lookup(&self, name: &str) -> Result<Value, ModuleExecutionError> {
        let mut parts = name.split('.');
        let mut current = parts.next().and_then(|first| self.variables.get(first));
        for part in parts {
            current = current.and_then(|v| v.get(part));
        }
        current
            .cloned()
            .ok_or_else(|| ModuleExecutionError::UndefinedVariable {
                name: name.to_string(),
            })
    }
}

fn collect_secret_keys<'v>(value: &'v Value, keys: &mut BTreeSet<&'v str>) {
    match ArgReference::parse(value) {
        Some(ArgReference::Secret(key)) => {
            keys.insert(key);
        }
        Some(ArgReference::Variable(_)) => {}
        None => match value {
            Value::Array(items) => items.iter().for_each(|v| collect_secret_keys(v, keys)),
            Value::Object(map) => map.values().for_each(|v| collect_secret_keys(v, keys)),
            _ => {}
        },
    }
}
