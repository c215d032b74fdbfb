//! Placeholder substitution for commands and paths
//!
//! Two placeholder spellings are recognised: shell style `${KEY}` and the
//! `{{.Key}}` form used in path templates. Unknown placeholders are left as-is.

use std::collections::BTreeMap;

/// Fixed key/value set a template is rendered against
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, builder style
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Variables used when resolving pid and log paths
    pub fn for_release(app_name: &str, release_name: &str) -> Self {
        Self::new()
            .with("AppName", app_name)
            .with("ReleaseName", release_name)
            .with("Date", chrono::Local::now().format("%Y-%m-%d").to_string())
    }
}

/// Render `template` by substituting every known placeholder
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut rendered = template.to_string();
    for (key, value) in &vars.vars {
        rendered = rendered.replace(&format!("${{{}}}", key), value);
        rendered = rendered.replace(&format!("{{{{.{}}}}}", key), value);
    }
    rendered
}

/// True if the template references `key` in either spelling
pub fn references(template: &str, key: &str) -> bool {
    template.contains(&format!("${{{}}}", key)) || template.contains(&format!("{{{{.{}}}}}", key))
}
