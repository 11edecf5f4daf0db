#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Compiles a [`Configuration`] snapshot into an nginx directive tree.
//!
//! The compiler is a pure function of its input: one snapshot in, one
//! [`ConfigTree`] out, ready for any [`Render`] backend. The only state
//! carried across compiles is the deny-variable cache, which keeps
//! generated variable names stable between reloads.

mod authreq;
mod cors;
mod directive;
mod expr;
mod http;
mod location;
mod render;
mod server;

pub use self::{
    directive::{Arg, Directive},
    expr::DenyVariables,
    render::{
        collapse_blank_lines, ConfigTree, Render, RenderError, TemplateRenderer, TreeRenderer,
    },
};

use ingress_compiler_core::Configuration;

/// Turns configuration snapshots into directive trees.
#[derive(Debug, Default)]
pub struct Compiler {
    deny_vars: DenyVariables,
}

/// One compile pass over a snapshot; method impls live next to the part
/// of the tree they build.
pub(crate) struct Pass<'a> {
    pub(crate) cfg: &'a Configuration,
    pub(crate) deny: &'a DenyVariables,
}

// === impl Compiler ===

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, cfg: &Configuration) -> ConfigTree {
        let pass = Pass {
            cfg,
            deny: &self.deny_vars,
        };
        ConfigTree {
            directives: pass.compile(),
        }
    }
}
