use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use gerbex::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use gerbex::{Compiler, CompilerOptions, Grammar, SyntaxSwitches, vm};

#[derive(Parser)]
#[command(name = "gerbex")]
#[command(version)]
#[command(about = "Parse, compile and render Gerber X3 files", long_about = None)]
struct Cli {
    /// Gerber file to read
    file: PathBuf,

    /// What to print on stdout
    #[arg(long, value_enum, default_value_t = Emit::Summary)]
    emit: Emit,

    /// Reject legacy forms (implicit D01, operation codes fused with G codes)
    #[arg(long)]
    strict: bool,

    /// Parse past errors, replacing bad statements with placeholders
    #[arg(long)]
    resilient: bool,

    /// Print diagnostics and the summary as JSON
    #[arg(long)]
    json: bool,

    /// Keep going past M00/M01
    #[arg(long)]
    ignore_program_stop: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Parsed statements
    Ast,
    /// Compiled render VM commands
    Rvmc,
    /// Rendered geometry overview
    Summary,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("GERBEX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading {}: {}", cli.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match run(&cli, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            report(&cli, d.with_source(source.as_str()));
            ExitCode::FAILURE
        }
    }
}

fn report(cli: &Cli, d: Diagnostic) {
    if cli.json {
        eprintln!("{}", json::render(&d));
    } else {
        let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
        eprint!("{}", renderer.render(&d));
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Diagnostic> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Diagnostic::error(format!("serialization error: {e}")))?;
    println!("{text}");
    Ok(())
}

fn run(cli: &Cli, source: &str) -> Result<(), Diagnostic> {
    let switches = if cli.strict { SyntaxSwitches::strict() } else { SyntaxSwitches::default() };
    let grammar = Grammar::new(switches);

    let program = if cli.resilient {
        let (program, errors) = grammar.parse_resilient(source);
        for e in &errors {
            report(cli, Diagnostic::from(e).as_warning().with_source(source));
        }
        program
    } else {
        grammar.parse(source).map_err(|e| Diagnostic::from(&e))?
    };
    if cli.emit == Emit::Ast {
        return print_json(&program);
    }

    let options = CompilerOptions { ignore_program_stop: cli.ignore_program_stop };
    let compilation = Compiler::new(options).compile(&program).map_err(|e| Diagnostic::from(&e))?;
    if cli.emit == Emit::Rvmc {
        return print_json(&compilation.rvmc);
    }

    let result = vm::run(&compilation.rvmc).map_err(|e| Diagnostic::from(&e))?;
    let rvmc = &compilation.rvmc;
    if cli.json {
        return print_json(&serde_json::json!({
            "statements": program.len(),
            "layers": rvmc.layers().count(),
            "shapes": rvmc.shape_count(),
            "polygons": result.polygons.len(),
            "area": result.area(),
            "bbox": result.bbox,
            "attributes": compilation.attributes.file,
        }));
    }

    println!("statements: {}", program.len());
    println!("layers: {}", rvmc.layers().count());
    println!("shapes: {}", rvmc.shape_count());
    println!("polygons: {}", result.polygons.len());
    println!("area: {:.4} mm2", result.area());
    match result.bbox {
        Some(b) => println!("bounds: ({:.4}, {:.4}) - ({:.4}, {:.4}) mm", b.min.x, b.min.y, b.max.x, b.max.y),
        None => println!("bounds: empty"),
    }
    for (name, values) in &compilation.attributes.file {
        println!("attribute {name}: {}", values.join(","));
    }
    Ok(())
}
