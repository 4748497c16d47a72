//! Integration tests for the control-plane liveness probe.

use tuner_infra::health::{check_health, exit_code, HealthResponse, CONTRACT_VERSION, EXIT_HEALTHY, EXIT_UNHEALTHY};

#[test]
fn health_response_includes_required_fields() {
    let response = check_health("abc123def");

    assert!(response.ok, "ok field must be true when healthy");
    assert_eq!(response.build_id, "abc123def");
    assert_eq!(response.contract_version, CONTRACT_VERSION);
    assert!(!response.contract_version.is_empty());
}

#[test]
fn healthy_response_exits_zero() {
    let response = check_health("test_build");
    assert_eq!(exit_code(&response), EXIT_HEALTHY);
}

#[test]
fn unhealthy_response_exits_one() {
    let response = HealthResponse::unhealthy("test_build");
    assert!(!response.ok);
    assert_eq!(exit_code(&response), EXIT_UNHEALTHY);
}

#[test]
fn serializes_to_json_with_expected_keys() {
    let response = check_health("build_a");
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["build_id"], "build_a");
    assert_eq!(json["contract_version"], CONTRACT_VERSION);
}
