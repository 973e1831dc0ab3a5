use std::io::Write;

use lisc::{
    options::{Emit, Options, USAGE},
    Compiler,
};
use termcolor::{ColorChoice, NoColor, StandardStream, WriteColor};

fn main() {
    env_logger::init();

    let options = match Options::parse() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if options.help {
        println!("{}", USAGE);
        return;
    }

    if let Err(e) = run(&options) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run(options: &Options) -> Result<(), String> {
    let source = std::fs::read_to_string(&options.input)
        .map_err(|e| format!("{}: {}", options.input.display(), e))?;

    log::info!(
        "compiling {} (emit {})",
        options.input.display(),
        options.emit.as_ref()
    );

    let mut compiler = Compiler::new().with_optimization(options.optimize);
    let compilation = compiler.compile(&source).map_err(|e| e.to_string())?;

    let written = match &options.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            emit(options.emit, &compilation, NoColor::new(file))
        }
        None => emit(
            options.emit,
            &compilation,
            StandardStream::stdout(ColorChoice::Auto),
        ),
    };
    written.map_err(|e| e.to_string())
}

fn emit(kind: Emit, compilation: &lisc::Compilation, mut out: impl WriteColor) -> std::io::Result<()> {
    match kind {
        Emit::Asm => out.write_all(compilation.asm.as_bytes())?,
        Emit::Sexpr => {
            for form in &compilation.forms {
                form.pretty_print(&mut out)?;
                writeln!(out)?;
            }
        }
        Emit::Typed => {
            for expr in &compilation.typed {
                expr.pretty_print(&compilation.types, &mut out)?;
                writeln!(out)?;
            }
        }
        Emit::Ir => {
            for expr in &compilation.ir {
                expr.pretty_print(&mut out)?;
                writeln!(out)?;
            }
        }
        Emit::Canonical => {
            for block in &compilation.canonical {
                block.pretty_print(&mut out)?;
                writeln!(out)?;
            }
        }
    }
    out.reset()?;
    out.flush()
}
