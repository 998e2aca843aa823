use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use basalt::frontend::{self, Frontend};
use basalt::{compile_module, Context, Format, Target};

#[derive(Debug, Parser)]
#[command(name = "basalt", version, about = "A multi-frontend compiler with an x86-64 back end")]
struct Args {
    /// Path to the file that should be compiled.
    input: PathBuf,

    /// Path to the output file; text formats default to stdout.
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short = 'v')]
    verbose: bool,

    /// Print the AST and exit without generating code.
    #[arg(long)]
    ast: bool,

    /// Do not perform semantic analysis.
    #[arg(long = "syntax-only")]
    syntax_only: bool,

    /// That special something to spice up your compilation.
    #[arg(long, hide = true)]
    aluminium: bool,
}

/// The output format lives on the context, not the CLI surface; derive it
/// from the output path.
fn format_for(output: Option<&Path>) -> Format {
    match output.and_then(|p| p.extension()).and_then(|e| e.to_str()) {
        Some("o") | Some("obj") => Format::Object,
        Some("ll") => Format::LlvmIr,
        _ => Format::Assembly,
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    if args.aluminium {
        // Nothing happens. Nothing ever happens.
    }

    if args.verbose {
        println!("Input files:");
        println!("- {}", args.input.display());
    }

    let mut ctx = Context::new(Target::host());
    ctx.format = format_for(args.output.as_deref());

    let status = run(&mut ctx, &args);
    ctx.diagnostics.flush();

    match status {
        Ok(()) if !ctx.diagnostics.has_error() => ExitCode::SUCCESS,
        Ok(()) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("basalt: error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &mut Context, args: &Args) -> basalt::Result<()> {
    let file = args.input.display().to_string();
    let source = fs::read_to_string(&args.input)?;

    let ext = args
        .input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let fe = frontend::by_extension(ext).ok_or_else(|| {
        basalt::BasaltError::Unsupported(format!("unrecognised input file type '{}'", file))
    })?;

    if args.syntax_only {
        fe.check_syntax(ctx, &source, &file)?;
        if args.ast {
            print!("{}", fe.ast_text(ctx, &source, &file)?);
        }
        return Ok(());
    }
    if args.ast {
        print!("{}", fe.ast_text(ctx, &source, &file)?);
        return Ok(());
    }

    let mut module = fe.compile(ctx, &source, &file)?;
    let mut out: Vec<u8> = Vec::new();
    compile_module(ctx, &mut module, &mut out)?;

    match &args.output {
        Some(path) => fs::write(path, &out)?,
        None => std::io::stdout().write_all(&out)?,
    }
    Ok(())
}
