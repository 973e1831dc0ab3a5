use std::{ffi::OsString, path::PathBuf, str::FromStr};

pub const USAGE: &str = "\
Usage: lisc [options] <input file>
Options:
  -h, --help: Print this help message
  --emit <kind>: What to print: asm, sexpr, typed, ir or canonical (default: asm)
  --no-opt: Skip copy propagation on canonical IR
  -o <file>: Write output to <file> instead of stdout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    Asm,
    Sexpr,
    Typed,
    Ir,
    Canonical,
}

impl AsRef<str> for Emit {
    fn as_ref(&self) -> &str {
        match self {
            Emit::Asm => "asm",
            Emit::Sexpr => "sexpr",
            Emit::Typed => "typed",
            Emit::Ir => "ir",
            Emit::Canonical => "canonical",
        }
    }
}

impl FromStr for Emit {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asm" => Ok(Emit::Asm),
            "sexpr" => Ok(Emit::Sexpr),
            "typed" => Ok(Emit::Typed),
            "ir" => Ok(Emit::Ir),
            "canonical" => Ok(Emit::Canonical),
            _ => Err("Invalid emit kind"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub help: bool,
    pub emit: Emit,
    pub optimize: bool,
    pub output: Option<PathBuf>,
    pub input: PathBuf,
}

impl Options {
    pub fn parse() -> Result<Self, String> {
        parse(pico_args::Arguments::from_env())
    }

    pub fn parse_from(args: Vec<OsString>) -> Result<Self, String> {
        parse(pico_args::Arguments::from_vec(args))
    }
}

fn parse(mut args: pico_args::Arguments) -> Result<Options, String> {
    if args.contains(["-h", "--help"]) {
        return Ok(Options {
            help: true,
            emit: Emit::Asm,
            optimize: true,
            output: None,
            input: PathBuf::new(),
        });
    }

    let emit = match args.opt_value_from_str::<_, Emit>("--emit") {
        Ok(Some(emit)) => emit,
        Ok(None) => Emit::Asm,
        Err(e) => return Err(e.to_string()),
    };

    let optimize = !args.contains("--no-opt");

    let output = match args.opt_value_from_str::<_, PathBuf>("-o") {
        Ok(output) => output,
        Err(e) => return Err(e.to_string()),
    };

    let input = args.free_from_str::<PathBuf>().map_err(|e| e.to_string())?;

    let rest = args.finish();
    if !rest.is_empty() {
        return Err(format!("unexpected arguments: {:?}", rest));
    }

    Ok(Options {
        help: false,
        emit,
        optimize,
        output,
        input,
    })
}
