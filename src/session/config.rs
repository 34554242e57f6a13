use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prebuilt voices offered by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Zephyr,
    Puck,
    Charon,
    Kore,
    Fenrir,
}

impl Voice {
    pub const ALL: [Voice; 5] = [
        Voice::Zephyr,
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Zephyr => "Zephyr",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown voice: {}", s))
    }
}

/// Portal UI language; decides the language the assistant speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    De,
    Fr,
    It,
    En,
    Es,
    Pt,
}

const BASE_INSTRUCTION: &str = r#"You are the Swiss Post assistant (PostAssistant). You are helpful, polite, and efficient.
Your primary goal is to help users navigate the self-service portal.

You have access to a tool called "trigger_action" that can control the buttons on the user's screen.
Always use the tool when the user indicates intent.

Context:
- Dashboard: User can choose send parcel, letter, payment, track, or video call.
- Parcel Flow Step 1 (Dest): Switzerland or Abroad.
- Parcel Flow Step 2 (Weight): The scale automatically weighs the item. Ask if the address is already attached.
- Parcel Flow Step 3 (Address): If no address, the user must enter it. You can fill this for them if they dictate it (simulate by clicking Next).
- Parcel Flow Step 4 (Options): Explain Economy (2 days) vs Priority (next day). Handle signature extras.
- Parcel Flow Step 5 (Payment): User must pay at the terminal.
- Parcel Flow Step 6 (Finish): Instruct to stick the label and drop the package. Ask for feedback (0-10).

Action Mapping:
- "Select Switzerland" -> trigger_action(action_id="select_destination_ch")
- "Address is there" / "Yes" -> trigger_action(action_id="address_exists_yes")
- "No address" / "No" -> trigger_action(action_id="address_exists_no")
- "Economy" / "Slow" -> trigger_action(action_id="select_economy")
- "Priority" / "Fast" -> trigger_action(action_id="select_priority")
- "Signature" / "Sign" -> trigger_action(action_id="toggle_signature")
- "Confirm" / "Next" -> trigger_action(action_id="confirm_details")
- "Pay" -> trigger_action(action_id="confirm_payment")
- "Finish" / "Close" -> trigger_action(action_id="finish_process")
"#;

impl Language {
    pub const ALL: [Language; 6] = [
        Language::De,
        Language::Fr,
        Language::It,
        Language::En,
        Language::Es,
        Language::Pt,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Language::De => "de",
            Language::Fr => "fr",
            Language::It => "it",
            Language::En => "en",
            Language::Es => "es",
            Language::Pt => "pt",
        }
    }

    /// Name used in the "speak this language" line of the prompt
    fn spoken_name(&self) -> &'static str {
        match self {
            Language::De => "German (Deutsch)",
            Language::Fr => "French (Français)",
            Language::It => "Italian (Italiano)",
            Language::En => "English",
            Language::Es => "Spanish (Español)",
            Language::Pt => "Portuguese (Português)",
        }
    }

    /// System instruction for a session in this language
    pub fn system_instruction(&self) -> String {
        format!(
            "{} \n IMPORTANT: Speak {}.",
            BASE_INSTRUCTION,
            self.spoken_name()
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .iter()
            .copied()
            .find(|l| l.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown language: {}", s))
    }
}

/// Configuration of one voice session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Prebuilt voice the model speaks with
    pub voice: Voice,

    /// Natural-language system prompt
    pub instruction: String,
}

impl SessionConfig {
    pub fn new(voice: Voice, instruction: impl Into<String>) -> Self {
        Self {
            voice,
            instruction: instruction.into(),
        }
    }

    /// Configuration for a portal showing `language`
    pub fn for_language(voice: Voice, language: Language) -> Self {
        Self::new(voice, language.system_instruction())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_language(Voice::default(), Language::default())
    }
}
