//! Auxiliary variables visible to `@` expressions: model constants and lookup
//! providers.

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::ConstantValue;

use crate::skim::LookupProvider;

#[derive(Debug, Clone)]
pub enum EnvValue {
    Number(f64),
    Text(String),
    Lookup(Arc<dyn LookupProvider>),
}

#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: BTreeMap<String, EnvValue>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model constants from settings; flags become 0/1.
    pub fn from_constants(constants: &BTreeMap<String, ConstantValue>) -> Self {
        let values = constants
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    ConstantValue::Number(number) => EnvValue::Number(*number),
                    ConstantValue::Flag(flag) => EnvValue::Number(if *flag { 1.0 } else { 0.0 }),
                    ConstantValue::Text(text) => EnvValue::Text(text.clone()),
                };
                (name.clone(), value)
            })
            .collect();
        Self { values }
    }

    pub fn with_number(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, EnvValue::Number(value));
        self
    }

    pub fn with_text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, EnvValue::Text(value.into()));
        self
    }

    pub fn with_lookup(
        mut self,
        name: impl Into<String>,
        provider: impl LookupProvider + 'static,
    ) -> Self {
        self.insert(name, EnvValue::Lookup(Arc::new(provider)));
        self
    }

    /// Later inserts replace earlier ones.
    pub fn insert(&mut self, name: impl Into<String>, value: EnvValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&EnvValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
