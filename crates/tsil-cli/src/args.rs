//! CLI arguments for the `tsil` binary (`spec.md` §6's external CLI
//! surface, expanded with the ambient dev-tooling flags every compiler
//! CLI the teacher ships carries).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tsil", version, about = "tsil: AOT code generator and async-state-machine transformer")]
pub struct CliArgs {
    /// Source file to compile.
    #[arg(long = "compile")]
    pub compile: PathBuf,

    /// Output path for the serialized image. Defaults to the input path
    /// with its extension replaced by `.tsilimg`.
    #[arg(short = 'o', long = "out")]
    pub out: Option<PathBuf>,

    /// Tracing filter directive, e.g. `tsil_driver=debug,tsil_codegen=trace`.
    /// Falls back to `RUST_LOG` when unset, and to `warn` when neither is set.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Dump the emitted type/method/opcode metadata to stdout instead of
    /// (or alongside) writing the image — a debugging aid, not part of
    /// the external interface `spec.md` describes.
    #[arg(long = "emit-ir")]
    pub emit_ir: bool,
}

impl CliArgs {
    pub fn output_path(&self) -> PathBuf {
        match &self.out {
            Some(p) => p.clone(),
            None => self.compile.with_extension("tsilimg"),
        }
    }
}
