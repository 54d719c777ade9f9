use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;

use amx_api::{
    check_matrix_from_sources, compile_matrix_from_sources, load_compiler_options,
    CompileMatrixOptions,
};
use amx_compiler::{backend_for, CompilerOptions};
use amx_core::{Alert, MatrixError, Severity};
use clap::Parser;
use tracing::debug;

mod cli_args;
mod error_map;
mod logging;
mod source_loader;

pub(crate) use cli_args::{Cli, CompileArgs, InputArgs, Mode};
pub(crate) use error_map::{
    emit_error, map_cli_output_write, map_cli_source_path, map_cli_source_prefix,
    map_cli_source_read, map_cli_source_scan,
};
pub(crate) use source_loader::{read_dictionaries_from_dir, read_text_file, resolve_dictionary_dir};

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    logging::init_tracing();
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, MatrixError> {
    match cli.command {
        Mode::Compile(args) => run_compile(args),
        Mode::Check(args) => run_check(args),
    }
}

fn load_inputs(args: &InputArgs) -> Result<CompileMatrixOptions, MatrixError> {
    let dictionaries_xml = match &args.dictionary_dir {
        Some(dir) => read_dictionaries_from_dir(&resolve_dictionary_dir(dir)?)?,
        None => BTreeMap::new(),
    };
    let registry_json = args.registry.as_deref().map(read_text_file).transpose()?;
    let compiler = match &args.config {
        Some(path) => load_compiler_options(&read_text_file(path)?)?,
        None => CompilerOptions::default(),
    };
    debug!(
        matrix = %args.matrix,
        dictionaries = dictionaries_xml.len(),
        "inputs loaded"
    );

    Ok(CompileMatrixOptions {
        matrix_json: read_text_file(&args.matrix)?,
        dictionaries_xml,
        registry_json,
        compiler,
    })
}

fn run_compile(args: CompileArgs) -> Result<i32, MatrixError> {
    let options = load_inputs(&args.input)?;
    let compiled = compile_matrix_from_sources(&options)?;
    for alert in &compiled.alerts {
        eprintln!("ALERT:{}", alert);
    }

    let backend = backend_for(args.emit.backend_name()).ok_or_else(|| {
        MatrixError::new(
            "CLI_EMIT_UNKNOWN",
            format!("No back end named \"{}\".", args.emit.backend_name()),
        )
    })?;
    let rendered = backend.render(&compiled)?;

    match &args.out {
        Some(path) => {
            fs::write(path, &rendered).map_err(map_cli_output_write)?;
            println!("RESULT:OK");
            println!("OUTPUT:{}", path);
            println!("ACTIONS:{}", compiled.action_count());
        }
        None => print!("{}", ensure_trailing_newline(rendered)),
    }
    Ok(0)
}

fn run_check(args: InputArgs) -> Result<i32, MatrixError> {
    let options = load_inputs(&args)?;
    let report = check_matrix_from_sources(&options)?;

    println!(
        "RESULT:{}",
        if report.is_accepted() { "OK" } else { "REJECTED" }
    );
    println!("MATRIX:{}", report.matrix_name);
    if let Some(actions) = report.action_count {
        println!("ACTIONS:{}", actions);
    }
    println!("ERRORS:{}", report.error_count());
    println!("WARNINGS:{}", count(&report.alerts, Severity::Warning));
    for alert in &report.alerts {
        println!(
            "ALERT_JSON:{}",
            serde_json::to_string(alert).map_err(|error| MatrixError::new("CLI_ALERT_JSON", error.to_string()))?
        );
    }
    Ok(if report.is_accepted() { 0 } else { 1 })
}

fn count(alerts: &[Alert], severity: Severity) -> usize {
    alerts.iter().filter(|alert| alert.severity == severity).count()
}

fn ensure_trailing_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
