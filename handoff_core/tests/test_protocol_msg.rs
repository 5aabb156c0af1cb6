//! Tests for the JSON bodies exchanged between peers.

use handoff_core::transaction::Stage;
use handoff_core::transfer::protocol::{
    ConfirmTransaction, RequestTransaction, StatusReply, start_route,
};
use handoff_core::transfer::response::ErrorBody;
use serde_json::json;

#[test]
fn test_request_transaction_minimal_body() {
    // Older peers send neither size nor folder suggestion
    let parsed: RequestTransaction = serde_json::from_value(json!({
        "hostname": "alpha",
        "username": "alice",
        "address": "192.168.1.5:56934",
        "file_name": "report.pdf",
    }))
    .expect("Should parse minimal request");

    assert_eq!(parsed.file_size, 0);
    assert!(parsed.suggested_save_folder.is_none());
}

#[test]
fn test_request_transaction_omits_empty_suggestion() {
    let request = RequestTransaction {
        hostname: "alpha".to_string(),
        username: "alice".to_string(),
        address: "192.168.1.5:56934".to_string(),
        file_name: "report.pdf".to_string(),
        file_size: 42,
        suggested_save_folder: None,
    };
    let value = serde_json::to_value(&request).expect("Should serialize");
    assert_eq!(value["file_size"], 42);
    assert!(value.get("suggested_save_folder").is_none());
}

#[test]
fn test_stage_is_upper_case_on_the_wire() {
    let reply = StatusReply {
        status: "ok".to_string(),
        stage: Stage::Transferring,
    };
    let value = serde_json::to_value(&reply).unwrap();
    assert_eq!(value, json!({"status": "ok", "stage": "TRANSFERRING"}));

    let parsed: StatusReply =
        serde_json::from_value(json!({"status": "ok", "stage": "CANCELLED"})).unwrap();
    assert_eq!(parsed.stage, Stage::Cancelled);
}

#[test]
fn test_confirm_without_folder_defaults_to_empty() {
    let parsed: ConfirmTransaction =
        serde_json::from_value(json!({"transaction_id": "abc"})).unwrap();
    assert_eq!(parsed.transaction_id, "abc");
    assert_eq!(parsed.save_folder, "");
}

#[test]
fn test_error_body_shape() {
    let body: ErrorBody = serde_json::from_value(json!({
        "error": "host_busy",
        "message": "host 10.0.0.2:56934 is busy with another transaction",
    }))
    .unwrap();
    assert_eq!(body.error, "host_busy");
}

#[test]
fn test_start_route_carries_id() {
    assert_eq!(start_route("1234"), "/start-transaction/1234");
}
