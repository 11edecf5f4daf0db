#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Command-line front end for the nginx configuration compiler: reads a
//! JSON configuration snapshot, compiles it, and writes the rendered
//! configuration atomically.

use anyhow::{Context, Result};
use clap::Parser;
use ingress_compiler_core::Configuration;
use ingress_compiler_nginx::{
    collapse_blank_lines, Compiler, Render, TemplateRenderer, TreeRenderer,
};
use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};

/// Compile an ingress configuration snapshot to an nginx configuration.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    #[arg(
        long,
        env = "INGRESS_COMPILER_LOG",
        default_value = "ingress_compiler=info,warn"
    )]
    log_level: String,

    /// Path to the JSON snapshot, or `-` for stdin.
    #[arg(long, default_value = "-")]
    snapshot: String,

    /// Output path; the file is replaced atomically. Defaults to stdout.
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "tree")]
    renderer: RendererKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum RendererKind {
    /// Indented output.
    Tree,
    /// Flush-left output matching the old template generator.
    Template,
}

// === impl Args ===

impl Args {
    pub fn parse_and_run() -> Result<()> {
        Self::parse().run()
    }

    pub fn run(self) -> Result<()> {
        let filter = tracing_subscriber::EnvFilter::try_new(&self.log_level)
            .with_context(|| format!("invalid log level {}", self.log_level))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();

        let cfg = self.read_snapshot()?;
        tracing::debug!(
            servers = cfg.servers.len(),
            backends = cfg.backends.len(),
            "compiling snapshot",
        );

        let tree = Compiler::new().compile(&cfg);
        let text = match self.renderer {
            RendererKind::Tree => TreeRenderer.render(&tree),
            RendererKind::Template => TemplateRenderer.render(&tree),
        }
        .context("rendering failed")?;
        let text = collapse_blank_lines(&text);

        match &self.out {
            Some(path) => write_atomically(path, &text)
                .with_context(|| format!("failed to write {}", path.display()))?,
            None => std::io::stdout()
                .write_all(text.as_bytes())
                .context("failed to write to stdout")?,
        }
        Ok(())
    }

    fn read_snapshot(&self) -> Result<Configuration> {
        let raw = if self.snapshot == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read snapshot from stdin")?;
            buf
        } else {
            fs::read_to_string(&self.snapshot)
                .with_context(|| format!("failed to read {}", self.snapshot))?
        };
        serde_json::from_str(&raw).context("invalid configuration snapshot")
    }
}

/// Writes via a sibling temp file and rename so readers never observe a
/// partially-written configuration.
fn write_atomically(path: &Path, text: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
