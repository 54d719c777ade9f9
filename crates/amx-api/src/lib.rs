use std::collections::BTreeMap;

use amx_compiler::{compile_matrix, Collaborators, CompileFailure, CompilerOptions};
use amx_core::{Alert, CompiledMatrix, DictionarySet, MatrixError, Severity, StaticRegistry};
use amx_parser::{parse_dictionary_xml, parse_matrix_json, parse_registry_json};
use tracing::debug;

/// Alerts quoted inline in a `COMPILE_REJECTED` message.
const REJECTION_PREVIEW: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct CompileMatrixOptions {
    pub matrix_json: String,
    /// Dictionary XML keyed by source path, for error messages.
    pub dictionaries_xml: BTreeMap<String, String>,
    pub registry_json: Option<String>,
    pub compiler: CompilerOptions,
}

/// Everything one compile produced, including alerts of a rejected matrix.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub matrix_name: String,
    pub alerts: Vec<Alert>,
    pub action_count: Option<usize>,
}

impl CheckReport {
    pub fn error_count(&self) -> usize {
        self.alerts
            .iter()
            .filter(|alert| alert.severity == Severity::Error)
            .count()
    }

    pub fn is_accepted(&self) -> bool {
        self.action_count.is_some()
    }
}

pub fn load_dictionaries_from_xml_map(
    dictionaries_xml: &BTreeMap<String, String>,
) -> Result<DictionarySet, MatrixError> {
    let mut dictionaries = DictionarySet::new();
    let mut sources = BTreeMap::new();
    for (path, xml) in dictionaries_xml {
        let dictionary = parse_dictionary_xml(xml).map_err(|error| MatrixError {
            message: format!("{}: {}", path, error.message),
            ..error
        })?;
        if let Some(first) = sources.insert(dictionary.name.clone(), path.clone()) {
            return Err(MatrixError::new(
                "DICT_DUPLICATE",
                format!(
                    "Dictionary \"{}\" is defined in both \"{}\" and \"{}\".",
                    dictionary.name, first, path
                ),
            ));
        }
        debug!(path = %path, dictionary = %dictionary.name, "dictionary loaded");
        dictionaries.insert(dictionary);
    }
    Ok(dictionaries)
}

pub fn load_compiler_options(json: &str) -> Result<CompilerOptions, MatrixError> {
    serde_json::from_str(json)
        .map_err(|error| MatrixError::new("CONFIG_PARSE_ERROR", error.to_string()))
}

/// Compiles with the alerts of a rejection folded into the error message.
pub fn compile_matrix_from_sources(
    options: &CompileMatrixOptions,
) -> Result<CompiledMatrix, MatrixError> {
    run(options)?.1.map_err(|failure| map_compile_failure(&failure))
}

/// Like [`compile_matrix_from_sources`] but a rejected matrix is a report,
/// not an error. Only unreadable inputs fail.
pub fn check_matrix_from_sources(options: &CompileMatrixOptions) -> Result<CheckReport, MatrixError> {
    let (matrix_name, outcome) = run(options)?;
    match outcome {
        Ok(compiled) => Ok(CheckReport {
            matrix_name,
            action_count: Some(compiled.action_count()),
            alerts: compiled.alerts,
        }),
        Err(CompileFailure::Rejected { alerts }) => Ok(CheckReport {
            matrix_name,
            alerts,
            action_count: None,
        }),
        Err(failure) => Err(map_compile_failure(&failure)),
    }
}

type CompileOutcome = (String, Result<CompiledMatrix, CompileFailure>);

fn run(options: &CompileMatrixOptions) -> Result<CompileOutcome, MatrixError> {
    let dictionaries = load_dictionaries_from_xml_map(&options.dictionaries_xml)?;
    let registry = match &options.registry_json {
        Some(json) => parse_registry_json(json)?,
        None => StaticRegistry::default(),
    };
    let matrix = parse_matrix_json(&options.matrix_json)?;
    debug!(
        dictionaries = dictionaries.len(),
        actions = registry.action_count(),
        "compiling matrix"
    );

    let outcome = compile_matrix(
        &matrix,
        Collaborators {
            dictionaries: &dictionaries,
            actions: &registry,
            utilities: &registry,
        },
        &options.compiler,
    );
    Ok((matrix.name, outcome))
}

pub fn map_compile_failure(failure: &CompileFailure) -> MatrixError {
    match failure {
        CompileFailure::Rejected { alerts } => {
            let errors = alerts
                .iter()
                .filter(|alert| alert.severity == Severity::Error)
                .collect::<Vec<_>>();
            let mut message = format!("Matrix rejected with {} error(s).", errors.len());
            for alert in errors.iter().take(REJECTION_PREVIEW) {
                message.push('\n');
                message.push_str(&alert.to_string());
            }
            if errors.len() > REJECTION_PREVIEW {
                message.push_str(&format!("\n... and {} more", errors.len() - REJECTION_PREVIEW));
            }
            MatrixError::new("COMPILE_REJECTED", message)
        }
        CompileFailure::Interrupted { line } => MatrixError::new(
            "COMPILE_INTERRUPTED",
            format!("Compilation was interrupted before line {}.", line),
        ),
    }
}
