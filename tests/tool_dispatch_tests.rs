// Tests for mapping tool calls onto portal actions

mod common;

use common::{trigger, RecordedActions};
use kiosk_voice::live::FunctionCall;
use kiosk_voice::session::{action_tool_declaration, ActionGroup, ActionId, ToolDispatcher};
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_known_action_invokes_callback_and_acks() {
    let actions = RecordedActions::new();
    let dispatcher = ToolDispatcher::new(Arc::new(actions.clone()));

    let responses = dispatcher.handle(&[trigger("call-1", "select_priority")]);

    assert_eq!(actions.taken(), vec![ActionId::SelectPriority]);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, "call-1");
    assert_eq!(responses[0].name, "trigger_action");
    assert_eq!(
        responses[0].response,
        json!({ "result": "Action triggered successfully" })
    );
}

#[test]
fn test_batch_runs_in_order_with_one_response_each() {
    let actions = RecordedActions::new();
    let dispatcher = ToolDispatcher::new(Arc::new(actions.clone()));

    let responses = dispatcher.handle(&[
        trigger("a", "parcel_send"),
        trigger("b", "select_destination_ch"),
        trigger("c", "nav_next"),
    ]);

    assert_eq!(
        actions.taken(),
        vec![
            ActionId::ParcelSend,
            ActionId::SelectDestinationCh,
            ActionId::NavNext
        ]
    );
    let ids: Vec<&str> = responses.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn test_unknown_tool_is_ignored() {
    let actions = RecordedActions::new();
    let dispatcher = ToolDispatcher::new(Arc::new(actions.clone()));

    let responses = dispatcher.handle(&[FunctionCall {
        id: "x".to_string(),
        name: "open_door".to_string(),
        args: json!({}),
    }]);

    assert!(responses.is_empty());
    assert!(actions.taken().is_empty());
}

#[test]
fn test_unknown_action_id_acks_with_error() {
    let actions = RecordedActions::new();
    let dispatcher = ToolDispatcher::new(Arc::new(actions.clone()));

    let responses = dispatcher.handle(&[
        trigger("bad", "launch_rocket"),
        FunctionCall {
            id: "missing".to_string(),
            name: "trigger_action".to_string(),
            args: json!({}),
        },
    ]);

    assert!(actions.taken().is_empty());
    assert_eq!(responses.len(), 2);
    for response in &responses {
        let result = response.response["result"].as_str().unwrap();
        assert!(result.starts_with("Action not available"), "{}", result);
    }
}

#[test]
fn test_failing_callback_still_acks() {
    let dispatcher = ToolDispatcher::new(Arc::new(|action: ActionId| -> anyhow::Result<()> {
        anyhow::bail!("button {} is disabled", action)
    }));

    let responses = dispatcher.handle(&[trigger("1", "confirm_payment")]);

    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].response,
        json!({ "result": "Action confirm_payment failed" })
    );
}

#[test]
fn test_panicking_callback_does_not_escape() {
    let dispatcher = ToolDispatcher::new(Arc::new(|_action: ActionId| -> anyhow::Result<()> {
        panic!("ui thread gone")
    }));

    let responses = dispatcher.handle(&[trigger("1", "finish_process"), trigger("2", "nav_back")]);

    assert_eq!(responses.len(), 2);
    assert_eq!(
        responses[1].response,
        json!({ "result": "Action nav_back failed" })
    );
}

#[test]
fn test_abroad_destination_is_forwarded() {
    let actions = RecordedActions::new();
    let dispatcher = ToolDispatcher::new(Arc::new(actions.clone()));

    dispatcher.handle(&[trigger("1", "select_destination_abroad")]);

    assert_eq!(actions.taken(), vec![ActionId::SelectDestinationAbroad]);
}

#[test]
fn test_declaration_lists_every_action() {
    let declaration = action_tool_declaration();

    assert_eq!(declaration.name, "trigger_action");
    assert_eq!(declaration.parameters["required"], json!(["action_id"]));

    let ids = declaration.parameters["properties"]["action_id"]["enum"]
        .as_array()
        .unwrap();
    assert_eq!(ids.len(), 18);
    for action in ActionId::ALL {
        assert!(ids.contains(&json!(action.as_str())), "{} missing", action);
    }
}

#[test]
fn test_action_groups() {
    assert_eq!(ActionId::ParcelTrack.group(), ActionGroup::Dashboard);
    assert_eq!(ActionId::ToggleSignature.group(), ActionGroup::Workflow);
    assert_eq!(ActionId::NavBack.group(), ActionGroup::Navigation);
    assert_eq!("letter_send".parse::<ActionId>().unwrap(), ActionId::LetterSend);
    assert!("LETTER_SEND".parse::<ActionId>().is_err());
}
