//! Prompt template rendering.
//!
//! Templates are rendered with Tera (autoescape off). Variables come from an
//! explicit, ordered stack of named layers; when two layers define the same
//! key the later layer wins. The agent uses this order, lowest precedence
//! first:
//!
//! 1. `agent` - agent configuration fields
//! 2. `environment` - environment configuration fields
//! 3. `model` - model configuration fields
//! 4. `platform` - host facts (`system`, `node`, `release`, `version`, `machine`)
//! 5. `process_env` - variables of the current process
//! 6. `call` - substitution variables of the render call (`task`, `output`, ...)
//!
//! Referencing an undefined variable is a render error.

pub mod platform;

pub use platform::{platform_vars, process_env_vars};

use serde::Serialize;
use serde_json::{Map, Value};
use tera::{Context, Tera};

use crate::error::TemplateError;

/// An ordered stack of named variable layers.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    layers: Vec<(String, Map<String, Value>)>,
}

impl TemplateVars {
    /// Create an empty variable stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a layer on top of the stack.
    pub fn layer(mut self, name: impl Into<String>, vars: Map<String, Value>) -> Self {
        self.layers.push((name.into(), vars));
        self
    }

    /// Push a layer built from serializable call variables.
    pub fn call_layer<K, V, I>(self, vars: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let mut map = Map::new();
        for (key, value) in vars {
            let key = key.into();
            let value = serde_json::to_value(value).map_err(|e| TemplateError::Variable {
                name: key.clone(),
                message: e.to_string(),
            })?;
            map.insert(key, value);
        }
        Ok(self.layer("call", map))
    }

    /// Names of the layers, lowest precedence first.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Flatten the stack into one map.
    pub fn merged(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for (_, vars) in &self.layers {
            for (key, value) in vars {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Build a Tera context from the flattened stack.
    pub fn to_context(&self) -> Context {
        let mut context = Context::new();
        for (key, value) in self.merged() {
            context.insert(key, &value);
        }
        context
    }

    /// Render `template` against these variables.
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        render(template, &self.to_context())
    }
}

/// Render a template string against a Tera context.
pub fn render(template: &str, context: &Context) -> Result<String, TemplateError> {
    Ok(Tera::one_off(template, context, false)?)
}
