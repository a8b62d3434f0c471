//! The demo's CLI operations.
//!
//! Each operation takes its parsed input and writes its result to `out`, so
//! the same function backs both the subcommand and the MCP tool.

use clap::Args;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Input of `upper`.
#[derive(Debug, Clone, PartialEq, Args, Serialize, Deserialize, JsonSchema)]
pub struct UpperInput {
    /// Text to convert
    pub text: String,
}

/// Input of `count`.
#[derive(Debug, Clone, PartialEq, Args, Serialize, Deserialize, JsonSchema)]
pub struct CountInput {
    /// Text to count
    pub text: String,

    /// Only print the number of lines
    #[arg(long)]
    #[serde(default)]
    pub lines_only: bool,
}

pub fn upper(input: UpperInput, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "{}", input.text.to_uppercase())?;
    Ok(())
}

pub fn count(input: CountInput, out: &mut dyn Write) -> anyhow::Result<()> {
    if input.text.is_empty() {
        anyhow::bail!("nothing to count");
    }

    let lines = input.text.lines().count();
    if input.lines_only {
        writeln!(out, "{}", lines)?;
    } else {
        let words = input.text.split_whitespace().count();
        let chars = input.text.chars().count();
        writeln!(out, "{} {} {}", lines, words, chars)?;
    }
    Ok(())
}
