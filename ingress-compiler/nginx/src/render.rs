//! Serialization of the directive tree to configuration text. Two
//! backends produce token-identical output: the nested renderer the
//! proxy consumes, and the flat renderer kept for diffing against
//! configurations produced by the old text-template generator.

use crate::directive::Directive;
use std::fmt::Write;
use thiserror::Error;

/// The compiled directive tree for one configuration snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigTree {
    pub directives: Vec<Directive>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("directive has an empty name")]
    EmptyName,
    #[error("token contains a newline: {0:?}")]
    NewlineInToken(String),
}

/// A renderer backend. Both implementations must agree on the token
/// stream; they only differ in whitespace.
pub trait Render {
    fn render(&self, tree: &ConfigTree) -> Result<String, RenderError>;
}

/// Renders with 4-space indentation per nesting level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeRenderer;

/// Renders every directive flush-left, the way the old text-template
/// generator laid files out.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateRenderer;

// === impl TreeRenderer ===

impl Render for TreeRenderer {
    fn render(&self, tree: &ConfigTree) -> Result<String, RenderError> {
        let mut out = String::new();
        for directive in &tree.directives {
            write_directive(&mut out, directive, 0, true)?;
        }
        Ok(out)
    }
}

// === impl TemplateRenderer ===

impl Render for TemplateRenderer {
    fn render(&self, tree: &ConfigTree) -> Result<String, RenderError> {
        let mut out = String::new();
        for directive in &tree.directives {
            write_directive(&mut out, directive, 0, false)?;
        }
        Ok(out)
    }
}

fn write_directive(
    out: &mut String,
    directive: &Directive,
    depth: usize,
    indent: bool,
) -> Result<(), RenderError> {
    if directive.name.is_empty() {
        return Err(RenderError::EmptyName);
    }

    let pad = if indent { depth * 4 } else { 0 };

    if directive.is_comment() {
        let text = directive.comment.as_deref().unwrap_or("");
        check_token(text)?;
        let _ = writeln!(out, "{:pad$}# {text}", "");
        return Ok(());
    }

    let tokens = directive.arg_tokens();
    for token in &tokens {
        check_token(token)?;
    }

    if directive.name == "##" {
        let _ = writeln!(out, "{:pad$}## {}", "", tokens.join(" "));
        return Ok(());
    }

    if let Some(comment) = &directive.comment {
        check_token(comment)?;
        let _ = writeln!(out, "{:pad$}# {comment}", "");
    }

    let mut line = String::new();
    line.push_str(&directive.name);
    if !tokens.is_empty() {
        // `if` conditions are parenthesized; everywhere else the tokens
        // stand on their own.
        if directive.name == "if" {
            line.push_str(" (");
            line.push_str(&tokens.join(" "));
            line.push(')');
        } else {
            line.push(' ');
            line.push_str(&tokens.join(" "));
        }
    }

    match &directive.block {
        Some(children) => {
            let _ = writeln!(out, "{:pad$}{line} {{", "");
            for child in children {
                write_directive(out, child, depth + 1, indent)?;
            }
            let _ = writeln!(out, "{:pad$}}}", "");
        }
        None => {
            let _ = writeln!(out, "{:pad$}{line};", "");
        }
    }

    Ok(())
}

fn check_token(token: &str) -> Result<(), RenderError> {
    if token.contains('\n') {
        return Err(RenderError::NewlineInToken(token.to_string()));
    }
    Ok(())
}

/// Collapses runs of blank lines left behind by conditional sections.
/// Purely cosmetic; callers fall back to the raw text if they prefer.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
