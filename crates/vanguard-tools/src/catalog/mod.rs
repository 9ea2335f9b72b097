//! Tool catalog
//!
//! Maps tool identifiers to declarative [`ToolSpec`]s and renders them into
//! concrete [`Invocation`]s. Argument templates reference `{name}` variables;
//! `{name?}` marks an optional variable whose argument is dropped when the
//! variable is absent. Rendered values are passed as discrete arguments and
//! never go through a shell.

mod types;

#[cfg(test)]
mod tests;

pub use types::{Invocation, PreparedStep, SetupStep, ToolSpec};

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{Error, Result};
use crate::supervisor::ProcessSpec;

/// `{name}` or `{name?}`
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(\?)?\}")
        .expect("PLACEHOLDER_REGEX is a compile-time constant")
});

/// Registry of tool specs keyed by name
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolCatalog {
    /// Build a catalog; later entries replace earlier ones with the same name
    pub fn new(specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        let tools = specs.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { tools }
    }

    /// Look up a tool
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// All specs, ordered by name
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    /// Number of tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the invocation of `tool` with the given template variables
    pub fn invocation(&self, tool: &str, vars: &HashMap<String, String>) -> Result<Invocation> {
        let spec = self
            .get(tool)
            .ok_or_else(|| Error::UnknownTool(tool.to_string()))?;

        let main = ProcessSpec::new(&spec.program, render_args(&spec.args, vars)?);
        let pre = prepare_steps(&spec.pre_commands, vars)?;
        let init = prepare_steps(&spec.init_commands, vars)?;
        let container = spec
            .container
            .as_deref()
            .map(|template| render_template(template, vars))
            .transpose()?
            .filter(|name| !name.is_empty());

        Ok(Invocation {
            tool: spec.name.clone(),
            main,
            pre,
            init,
            container,
        })
    }
}

fn prepare_steps(steps: &[SetupStep], vars: &HashMap<String, String>) -> Result<Vec<PreparedStep>> {
    steps
        .iter()
        .map(|step| {
            Ok(PreparedStep {
                name: step.name.clone(),
                description: step.description.clone(),
                spec: ProcessSpec::new(&step.program, render_args(&step.args, vars)?),
            })
        })
        .collect()
}

fn render_args(templates: &[String], vars: &HashMap<String, String>) -> Result<Vec<String>> {
    let mut args = Vec::with_capacity(templates.len());
    for template in templates {
        let rendered = render_template(template, vars)?;
        // an argument made only of an absent optional variable disappears
        if rendered.is_empty() && !template.is_empty() {
            continue;
        }
        args.push(rendered);
    }
    Ok(args)
}

/// Substitute `{name}` / `{name?}` placeholders in a single template
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut missing = None;
    let rendered = PLACEHOLDER_REGEX.replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None if caps.get(2).is_some() => String::new(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(Error::InvalidInput(format!(
            "missing value for '{{{}}}' in '{}'",
            name, template
        ))),
        None => Ok(rendered.into_owned()),
    }
}
