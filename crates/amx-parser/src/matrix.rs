use amx_core::{Matrix, MatrixError, RegistryDocument, SourceLocation, SourceSpan, StaticRegistry};
use tracing::debug;

/// Reads a matrix document and fills in implicit ordering: test cases get
/// their matrix position, rows without a line number get one counted from
/// the top of the matrix.
pub fn parse_matrix_json(source: &str) -> Result<Matrix, MatrixError> {
    let mut matrix: Matrix = serde_json::from_str(source).map_err(|error| {
        MatrixError::with_span(
            "MATRIX_PARSE_ERROR",
            error.to_string(),
            SourceSpan::at(SourceLocation {
                line: error.line(),
                column: error.column(),
            }),
        )
    })?;

    let explicit_execution_order = matrix
        .test_cases
        .iter()
        .any(|test_case| test_case.execution_order != 0);

    let mut line = 0usize;
    for (index, test_case) in matrix.test_cases.iter_mut().enumerate() {
        test_case.matrix_order = index;
        if !explicit_execution_order {
            test_case.execution_order = index;
        }
        line += 1;
        for action in &mut test_case.actions {
            line += 1;
            if action.line == 0 {
                action.line = line;
            } else {
                line = action.line;
            }
        }
    }

    debug!(
        matrix = %matrix.name,
        test_cases = matrix.test_cases.len(),
        "matrix loaded"
    );
    Ok(matrix)
}

pub fn parse_registry_json(source: &str) -> Result<StaticRegistry, MatrixError> {
    let document: RegistryDocument = serde_json::from_str(source)
        .map_err(|error| MatrixError::new("REGISTRY_PARSE_ERROR", error.to_string()))?;
    StaticRegistry::from_document(document)
}

#[cfg(test)]
mod matrix_tests {
    use super::*;
    use amx_core::{ActionRegistry, ControlKind};

    #[test]
    fn parse_matrix_assigns_order_and_lines() {
        let matrix = parse_matrix_json(
            r#"{
  "name": "demo",
  "test_cases": [
    {"id": "tc1", "actions": [
      {"action": "FIX:Client.SendOrder", "reference": "order", "fields": {"Price": "1.5", "Qty": "10"}},
      {"action": "begin loop", "count": "2"},
      {"action": "end loop"}
    ]},
    {"id": "tc2", "actions": [{"line": 20, "action": "send"}, {"action": "send"}]}
  ]
}"#,
        )
        .expect("matrix should parse");

        assert_eq!(matrix.test_cases.len(), 2);
        let first = &matrix.test_cases[0];
        assert_eq!(first.matrix_order, 0);
        assert_eq!(first.actions[0].line, 2);
        assert_eq!(first.actions[2].line, 4);
        assert_eq!(
            first.actions[0].fields.keys().cloned().collect::<Vec<_>>(),
            vec!["Price", "Qty"]
        );
        assert_eq!(first.actions[1].control_kind(), Some(ControlKind::BeginLoop));

        let second = &matrix.test_cases[1];
        assert_eq!(second.execution_order, 1);
        assert_eq!(second.actions[0].line, 20);
        assert_eq!(second.actions[1].line, 21);
    }

    #[test]
    fn parse_matrix_reports_json_position() {
        let error = parse_matrix_json("{\n  \"test_cases\": [\n}").expect_err("broken json");
        assert_eq!(error.code, "MATRIX_PARSE_ERROR");
        assert_eq!(error.span.expect("span").start.line, 3);
    }

    #[test]
    fn parse_registry_builds_static_registry() {
        let registry = parse_registry_json(
            r#"{"actions": [{"uri": "FIX:Client.SendOrder", "direction": "send"}]}"#,
        )
        .expect("registry should parse");
        assert!(registry.resolve_action("FIX:Client.SendOrder").is_some());

        let error = parse_registry_json("[]").expect_err("wrong shape");
        assert_eq!(error.code, "REGISTRY_PARSE_ERROR");
    }
}
