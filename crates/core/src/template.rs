//! Named payload templates. Only used when the server itself has to
//! originate a payload (reinit synthesis); every other payload is opaque
//! caller-supplied text.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::{Error, Result};

/// Turns a named template plus substitutions into payload text.
pub trait TemplateResolver: Send + Sync {
    fn resolve(&self, name: &str, substitutions: &HashMap<String, String>) -> Result<String>;
}

/// Built-in reinit payload: hands the config object back to the in-page
/// agent's init hook after navigation wiped its state.
const REINIT_TEMPLATE: &str = "(() => { if (typeof window.__tabrelay_init === 'function') { window.__tabrelay_init({{config}}); return true; } return false; })()";

/// Template table seeded with the built-ins, overridable by name from the
/// config file's `templates` section.
pub struct ConfigTemplates {
    templates: HashMap<String, String>,
}

impl ConfigTemplates {
    pub fn from_config(config: &Config) -> Self {
        let mut templates = HashMap::new();
        templates.insert("reinit".to_string(), REINIT_TEMPLATE.to_string());
        for (name, body) in &config.templates {
            templates.insert(name.clone(), body.clone());
        }
        Self { templates }
    }
}

impl Default for ConfigTemplates {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl TemplateResolver for ConfigTemplates {
    fn resolve(&self, name: &str, substitutions: &HashMap<String, String>) -> Result<String> {
        let body = self
            .templates
            .get(name)
            .ok_or_else(|| Error::Template(format!("unknown template '{}'", name)))?;
        let mut out = body.clone();
        for (key, value) in substitutions {
            out = out.replace(&format!("{{{{{}}}}}", key), value);
        }
        Ok(out)
    }
}
