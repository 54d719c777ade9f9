use amx_core::MatrixError;
use std::fmt::Display;

fn map_error(code: &'static str, error: impl Display) -> MatrixError {
    MatrixError::new(code, error.to_string())
}

pub(crate) fn emit_error(error: MatrixError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).unwrap_or_else(|_| "\"\"".to_string())
    );
    1
}

pub(crate) fn map_cli_source_path(error: std::io::Error) -> MatrixError {
    map_error("CLI_SOURCE_PATH", error)
}

pub(crate) fn map_cli_source_scan(error: walkdir::Error) -> MatrixError {
    map_error("CLI_SOURCE_SCAN", error)
}

pub(crate) fn map_cli_source_prefix(error: std::path::StripPrefixError) -> MatrixError {
    map_error("CLI_SOURCE_SCAN", error)
}

pub(crate) fn map_cli_source_read(error: std::io::Error) -> MatrixError {
    map_error("CLI_SOURCE_READ", error)
}

pub(crate) fn map_cli_output_write(error: std::io::Error) -> MatrixError {
    map_error("CLI_OUTPUT_WRITE", error)
}
