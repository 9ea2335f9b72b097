//! `vanguard tools`: list the tool catalog

use std::fmt::Write as _;

use anyhow::Result;
use vanguard_tools::{SetupStep, ToolSpec};

use crate::server::AppConfig;

fn write_steps(out: &mut String, label: &str, steps: &[SetupStep]) {
    for step in steps {
        let _ = writeln!(
            out,
            "    {} {:<16} {} {}",
            label,
            step.name,
            step.program,
            step.args.join(" ")
        );
        if !step.description.is_empty() {
            let _ = writeln!(out, "         {}", step.description);
        }
    }
}

/// Human-readable catalog listing
pub fn render(tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return "No tools configured.\n".to_string();
    }

    let mut out = String::new();
    for tool in tools {
        let _ = writeln!(out, "{:<16} {}", tool.name, tool.description);
        let _ = writeln!(out, "    run  {} {}", tool.program, tool.args.join(" "));
        if let Some(container) = &tool.container {
            let _ = writeln!(out, "    container {}", container);
        }
        write_steps(&mut out, "pre ", &tool.pre_commands);
        write_steps(&mut out, "init", &tool.init_commands);
    }
    out
}

pub fn run(config: &AppConfig) -> Result<()> {
    print!("{}", render(&config.tools));
    Ok(())
}
