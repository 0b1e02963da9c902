use crate::domain::{Assertion, AssertionMetric, AssertionOperator, AssertionResult};
use serde_json::Value;

/// Evaluates every assertion in configured order; never short-circuits.
pub fn evaluate_all(
    assertions: &[Assertion],
    latency_ms: f64,
    body: Option<&str>,
) -> Vec<AssertionResult> {
    assertions
        .iter()
        .map(|assertion| evaluate(assertion, latency_ms, body))
        .collect()
}

pub fn evaluate(assertion: &Assertion, latency_ms: f64, body: Option<&str>) -> AssertionResult {
    match assertion.metric {
        AssertionMetric::Latency => evaluate_latency(assertion, latency_ms),
        AssertionMetric::ResponseBody => evaluate_body(assertion, body.unwrap_or_default()),
        AssertionMetric::Unsupported => failed(
            String::new(),
            expected_text(&assertion.value),
            "Unsupported assertion metric".to_string(),
        ),
    }
}

fn evaluate_latency(assertion: &Assertion, latency_ms: f64) -> AssertionResult {
    let actual = format!("{latency_ms:.0}ms");
    let Some(threshold) = numeric_threshold(&assertion.value) else {
        return failed(
            actual,
            expected_text(&assertion.value),
            format!(
                "Latency threshold `{}` is not a number",
                expected_text(&assertion.value)
            ),
        );
    };
    let expected = format!("{threshold}ms");

    let (passed, relation) = match assertion.operator {
        AssertionOperator::LessThan => (latency_ms < threshold, "less than"),
        AssertionOperator::GreaterThan => (latency_ms > threshold, "greater than"),
        other => {
            return failed(
                actual,
                expected,
                format!("Operator {other:?} is not supported for latency"),
            )
        }
    };

    AssertionResult {
        passed,
        description: format!("Latency {actual} should be {relation} {expected}"),
        actual,
        expected,
    }
}

fn evaluate_body(assertion: &Assertion, body: &str) -> AssertionResult {
    let needle = expected_text(&assertion.value);
    let actual = if body.chars().count() > 100 {
        format!("{}...", body.chars().take(100).collect::<String>())
    } else {
        body.to_string()
    };

    let (passed, relation) = match assertion.operator {
        AssertionOperator::Contains => (body.contains(&needle), "contain"),
        AssertionOperator::NotContains => (!body.contains(&needle), "not contain"),
        other => {
            return failed(
                actual,
                needle,
                format!("Operator {other:?} is not supported for response body"),
            )
        }
    };

    AssertionResult {
        passed,
        description: format!("Response body should {relation} \"{needle}\""),
        actual,
        expected: needle,
    }
}

fn numeric_threshold(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|threshold| threshold.is_finite())
}

fn expected_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn failed(actual: String, expected: String, description: String) -> AssertionResult {
    AssertionResult {
        passed: false,
        actual,
        expected,
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assertion(metric: AssertionMetric, operator: AssertionOperator, value: Value) -> Assertion {
        Assertion {
            metric,
            operator,
            value,
        }
    }

    #[test]
    fn latency_less_than_fails_for_slow_response() {
        let check = assertion(
            AssertionMetric::Latency,
            AssertionOperator::LessThan,
            json!(100),
        );
        let result = evaluate(&check, 150.0, Some("ok"));
        assert!(!result.passed);
        assert_eq!(result.actual, "150ms");
        assert_eq!(result.expected, "100ms");
    }

    #[test]
    fn latency_threshold_accepts_numeric_strings() {
        let check = assertion(
            AssertionMetric::Latency,
            AssertionOperator::GreaterThan,
            json!(" 5 "),
        );
        assert!(evaluate(&check, 10.0, None).passed);
    }

    #[test]
    fn malformed_threshold_degrades_to_failure() {
        let check = assertion(
            AssertionMetric::Latency,
            AssertionOperator::LessThan,
            json!("fast"),
        );
        let result = evaluate(&check, 1.0, None);
        assert!(!result.passed);
        assert!(result.description.contains("not a number"));
    }

    #[test]
    fn body_contains_and_not_contains() {
        let contains = assertion(
            AssertionMetric::ResponseBody,
            AssertionOperator::Contains,
            json!("\"status\":\"ok\""),
        );
        let not_contains = assertion(
            AssertionMetric::ResponseBody,
            AssertionOperator::NotContains,
            json!("error"),
        );
        let body = r#"{"status":"ok"}"#;
        assert!(evaluate(&contains, 1.0, Some(body)).passed);
        assert!(evaluate(&not_contains, 1.0, Some(body)).passed);
        assert!(!evaluate(&contains, 1.0, None).passed);
    }

    #[test]
    fn mismatched_operator_and_unknown_metric_fail() {
        let wrong_operator = assertion(
            AssertionMetric::ResponseBody,
            AssertionOperator::LessThan,
            json!(1),
        );
        let unknown_metric = assertion(
            AssertionMetric::Unsupported,
            AssertionOperator::Contains,
            json!("x"),
        );
        assert!(!evaluate(&wrong_operator, 1.0, Some("1")).passed);
        assert!(!evaluate(&unknown_metric, 1.0, Some("x")).passed);
    }

    #[test]
    fn all_assertions_are_reported_after_a_failure() {
        let checks = vec![
            assertion(
                AssertionMetric::Latency,
                AssertionOperator::LessThan,
                json!(1),
            ),
            assertion(
                AssertionMetric::ResponseBody,
                AssertionOperator::Contains,
                json!("ok"),
            ),
        ];
        let results = evaluate_all(&checks, 50.0, Some("ok"));
        assert_eq!(results.len(), 2);
        assert!(!results[0].passed);
        assert!(results[1].passed);
    }
}
