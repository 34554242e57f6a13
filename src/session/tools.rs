use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::SessionError;
use crate::live::messages::{FunctionCall, FunctionDeclaration, FunctionResponse};

/// Name of the single tool declared to the model
pub const TOOL_NAME: &str = "trigger_action";

/// Result string the model receives for a handled call
pub const SUCCESS_RESULT: &str = "Action triggered successfully";

/// UI actions the assistant can trigger ("press a button")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionId {
    // Dashboard
    ParcelSend,
    LetterSend,
    Payment,
    ParcelTrack,
    VideoConsultation,
    // Step 1: destination
    SelectDestinationCh,
    SelectDestinationAbroad,
    // Step 2: address check
    AddressExistsYes,
    AddressExistsNo,
    // Step 3: address input
    SubmitAddress,
    // Step 4: options
    SelectEconomy,
    SelectPriority,
    ToggleSignature,
    ConfirmDetails,
    // Step 5: payment
    ConfirmPayment,
    // Step 6: finish
    FinishProcess,
    // Navigation
    NavBack,
    NavNext,
}

/// Which part of the portal an action belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionGroup {
    Dashboard,
    Workflow,
    Navigation,
}

impl ActionId {
    pub const ALL: [ActionId; 18] = [
        ActionId::ParcelSend,
        ActionId::LetterSend,
        ActionId::Payment,
        ActionId::ParcelTrack,
        ActionId::VideoConsultation,
        ActionId::SelectDestinationCh,
        ActionId::SelectDestinationAbroad,
        ActionId::AddressExistsYes,
        ActionId::AddressExistsNo,
        ActionId::SubmitAddress,
        ActionId::SelectEconomy,
        ActionId::SelectPriority,
        ActionId::ToggleSignature,
        ActionId::ConfirmDetails,
        ActionId::ConfirmPayment,
        ActionId::FinishProcess,
        ActionId::NavBack,
        ActionId::NavNext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::ParcelSend => "parcel_send",
            ActionId::LetterSend => "letter_send",
            ActionId::Payment => "payment",
            ActionId::ParcelTrack => "parcel_track",
            ActionId::VideoConsultation => "video_consultation",
            ActionId::SelectDestinationCh => "select_destination_ch",
            ActionId::SelectDestinationAbroad => "select_destination_abroad",
            ActionId::AddressExistsYes => "address_exists_yes",
            ActionId::AddressExistsNo => "address_exists_no",
            ActionId::SubmitAddress => "submit_address",
            ActionId::SelectEconomy => "select_economy",
            ActionId::SelectPriority => "select_priority",
            ActionId::ToggleSignature => "toggle_signature",
            ActionId::ConfirmDetails => "confirm_details",
            ActionId::ConfirmPayment => "confirm_payment",
            ActionId::FinishProcess => "finish_process",
            ActionId::NavBack => "nav_back",
            ActionId::NavNext => "nav_next",
        }
    }

    pub fn group(&self) -> ActionGroup {
        match self {
            ActionId::ParcelSend
            | ActionId::LetterSend
            | ActionId::Payment
            | ActionId::ParcelTrack
            | ActionId::VideoConsultation => ActionGroup::Dashboard,
            ActionId::NavBack | ActionId::NavNext => ActionGroup::Navigation,
            _ => ActionGroup::Workflow,
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionId::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown action_id: {}", s))
    }
}

/// Declaration of `trigger_action` sent with every session setup
pub fn action_tool_declaration() -> FunctionDeclaration {
    let ids: Vec<&str> = ActionId::ALL.iter().map(|a| a.as_str()).collect();

    FunctionDeclaration {
        name: TOOL_NAME.to_string(),
        description: "Triggers a click on a specific UI button on the self-service portal."
            .to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "action_id": {
                    "type": "STRING",
                    "enum": ids,
                    "description": "The specific ID of the action/button to trigger."
                }
            },
            "required": ["action_id"]
        }),
    }
}

/// Application callback invoked once per recognized tool call.
///
/// Runs synchronously on the controller task; keep it short.
pub trait ActionHandler: Send + Sync {
    fn on_action(&self, action: ActionId) -> anyhow::Result<()>;
}

impl<F> ActionHandler for F
where
    F: Fn(ActionId) -> anyhow::Result<()> + Send + Sync,
{
    fn on_action(&self, action: ActionId) -> anyhow::Result<()> {
        self(action)
    }
}

/// Maps tool-call batches onto the action callback and builds the
/// acknowledgements the remote turn is waiting for.
pub struct ToolDispatcher {
    handler: Arc<dyn ActionHandler>,
}

impl ToolDispatcher {
    pub fn new(handler: Arc<dyn ActionHandler>) -> Self {
        Self { handler }
    }

    /// Handle one batch, in order. Calls to unknown tools get no response.
    pub fn handle(&self, calls: &[FunctionCall]) -> Vec<FunctionResponse> {
        let mut responses = Vec::with_capacity(calls.len());

        for call in calls {
            if call.name != TOOL_NAME {
                warn!(
                    "Ignoring call to unknown tool '{}' (id={})",
                    call.name, call.id
                );
                continue;
            }

            let result = match parse_action(&call.args) {
                Ok(action) => {
                    info!("Assistant triggered action: {} (call={})", action, call.id);
                    match self.invoke(action) {
                        Ok(()) => SUCCESS_RESULT.to_string(),
                        Err(e) => {
                            error!("{}", e);
                            format!("Action {} failed", action)
                        }
                    }
                }
                Err(e) => {
                    warn!("Rejected tool call {}: {}", call.id, e);
                    format!("Action not available: {}", e)
                }
            };

            responses.push(FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: json!({ "result": result }),
            });
        }

        responses
    }

    fn invoke(&self, action: ActionId) -> Result<(), SessionError> {
        let handler = &self.handler;
        match catch_unwind(AssertUnwindSafe(|| handler.on_action(action))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::ToolDispatch(format!("{}: {:#}", action, e))),
            Err(_) => Err(SessionError::ToolDispatch(format!(
                "{}: action handler panicked",
                action
            ))),
        }
    }
}

fn parse_action(args: &Value) -> anyhow::Result<ActionId> {
    let raw = args
        .get("action_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing action_id argument"))?;
    raw.parse()
}
