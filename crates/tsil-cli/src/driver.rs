//! Orchestrates one `tsil compile` invocation: logging init, loading the
//! compilation unit, running `tsil_driver::compile`, and reporting the
//! result the way `spec.md` §7 describes (`Compile Error: <message>` on
//! stderr, exit 1) plus the `--emit-ir` debug dump.

use tracing_subscriber::EnvFilter;

use tsil_driver::{CompileError, CompilerConfig};

use crate::args::CliArgs;
use crate::frontend;

pub fn init_tracing(args: &CliArgs) {
    let filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter)).init();
}

/// Runs one compile, returning the process exit code (`spec.md` §7:
/// `0` success, `1` compile error).
pub fn run(args: CliArgs) -> i32 {
    let unit = match frontend::load(&args.compile) {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("Compile Error: {e}");
            return 1;
        }
    };

    let config = CompilerConfig { output_path: Some(args.output_path()), ..CompilerConfig::default() };

    let result = tsil_driver::compile(&unit.arena, &unit.statements, &unit.interner, &unit.type_map, unit.dead_code_info.as_ref(), config);

    match result {
        Ok(image) => {
            if args.emit_ir {
                dump_ir(&image.metadata);
            }
            0
        }
        Err(err) => {
            eprintln!("Compile Error: {}", format_error(&err));
            1
        }
    }
}

fn format_error(err: &CompileError) -> String {
    match err {
        CompileError::Codegen(e) => e.diagnostic().message.clone(),
        CompileError::Diagnostic(d) => d.message.clone(),
    }
}

fn dump_ir(metadata: &tsil_image::MetadataBuilder) {
    for (i, t) in metadata.types().iter().enumerate() {
        println!("type[{i}] {} (base={:?}, kind={:?}, sealed={})", t.name, t.base, t.kind, t.sealed);
    }
    for (i, m) in metadata.methods().iter().enumerate() {
        println!(
            "method[{i}] {} static={} virtual={} params={} locals={}",
            m.name, m.is_static, m.is_virtual, m.param_count, m.locals_count
        );
        if let Some(body) = &m.body {
            for (pc, instr) in body.iter().enumerate() {
                println!("    {pc:>4}: {instr:?}");
            }
        }
    }
}
