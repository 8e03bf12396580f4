use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a configuration bundle asks of a single hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintAction {
    Off,
    Warning,
    Error,
}

/// A bundle entry is either a bare action (`"off"`) or a tuple carrying
/// hint-specific options (`["off", {...}]`). The options are opaque to the
/// pipeline and are handed to the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HintConfig {
    Action(HintAction),
    WithOptions(HintAction, serde_json::Value),
}

impl HintConfig {
    pub fn action(&self) -> HintAction {
        match self {
            HintConfig::Action(action) => *action,
            HintConfig::WithOptions(action, _) => *action,
        }
    }
}

/// One configuration bundle of a job. A sub-job carries exactly one of
/// these; the engine consumes the whole bundle including the fields the
/// pipeline does not interpret (connector, browser options, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigBundle {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hints: BTreeMap<String, HintConfig>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConfigBundle {
    pub fn mentions(&self, hint: &str) -> bool {
        self.hints.contains_key(hint)
    }

    pub fn action_for(&self, hint: &str) -> Option<HintAction> {
        self.hints.get(hint).map(HintConfig::action)
    }

    /// True when the bundle switches the hint off, either with the literal
    /// `"off"` or with a tuple whose first element is `"off"`.
    pub fn is_off(&self, hint: &str) -> bool {
        self.action_for(hint) == Some(HintAction::Off)
    }
}
