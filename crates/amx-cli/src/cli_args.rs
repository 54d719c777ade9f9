use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "amx")]
#[command(about = "Action matrix compiler")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    /// Compile a matrix and emit the program.
    Compile(CompileArgs),
    /// Compile a matrix and report alerts only.
    Check(InputArgs),
}

#[derive(Debug, Args)]
pub(crate) struct InputArgs {
    #[arg(long = "matrix")]
    pub(crate) matrix: String,
    #[arg(long = "dictionary-dir")]
    pub(crate) dictionary_dir: Option<String>,
    #[arg(long = "registry")]
    pub(crate) registry: Option<String>,
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
}

#[derive(Debug, Args)]
pub(crate) struct CompileArgs {
    #[command(flatten)]
    pub(crate) input: InputArgs,
    #[arg(long = "emit", value_enum, default_value_t = EmitFormat::Json)]
    pub(crate) emit: EmitFormat,
    /// Write the program here instead of stdout.
    #[arg(long = "out")]
    pub(crate) out: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum EmitFormat {
    Json,
    Text,
}

impl EmitFormat {
    pub(crate) fn backend_name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}
