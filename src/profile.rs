//! Read-only collaborator data: user profile, routine steps, completion
//! history. The desktop shell owns these files; the voice core only reads
//! them to assemble the session's system instruction.
//!
//! Files in the app data dir:
//! - `profile.json`: `{"skinType": "Oily", "skinGoals": [...], "isPro": false, "streak": 3}`
//! - `routine.json`: `[{"id": "1", "productName": "Gentle Cleanser", "time": "both", "completedToday": false}, ...]`
//! - `history.json`: `{"2025-08-25": ["1", "3"], ...}` (step ids done per day)

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::read_json_file;

/// User skin profile as written by the onboarding/settings UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub skin_type: String,
    #[serde(default)]
    pub skin_goals: Vec<String>,
    #[serde(default)]
    pub is_pro: bool,
    #[serde(default)]
    pub streak: u32,
}

/// When in the day a routine step applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutineTime {
    Morning,
    Night,
    Both,
}

impl std::fmt::Display for RoutineTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Morning => write!(f, "morning"),
            Self::Night => write!(f, "night"),
            Self::Both => write!(f, "morning & night"),
        }
    }
}

/// One product-application step of the user's routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineStep {
    pub id: String,
    pub product_name: String,
    pub time: RoutineTime,
    #[serde(default)]
    pub completed_today: bool,
}

/// Everything the session needs to brief the assistant.
#[derive(Debug, Clone, Default)]
pub struct AssistantContext {
    pub profile: UserProfile,
    pub routine: Vec<RoutineStep>,
    /// Step ids checked off today (from history.json, keyed by local date).
    pub completed_today: HashSet<String>,
}

impl AssistantContext {
    /// Load from the given data directory. Missing or garbled files fall
    /// back to defaults; a voice session starts regardless.
    pub fn load(data_dir: &Path) -> Self {
        let profile: UserProfile =
            read_json_file(&data_dir.join("profile.json")).unwrap_or_default();
        let routine: Vec<RoutineStep> =
            read_json_file(&data_dir.join("routine.json")).unwrap_or_default();
        let history: HashMap<String, Vec<String>> =
            read_json_file(&data_dir.join("history.json")).unwrap_or_default();

        let completed_today = history
            .get(&today_key())
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        Self {
            profile,
            routine,
            completed_today,
        }
    }

    /// Build the free-text persona/context string sent in the session setup.
    pub fn system_instruction(&self) -> String {
        let skin_type = if self.profile.skin_type.is_empty() {
            "Not specified"
        } else {
            &self.profile.skin_type
        };
        let goals = if self.profile.skin_goals.is_empty() {
            "General skin care".to_string()
        } else {
            self.profile.skin_goals.join(", ")
        };

        let mut instruction = format!(
            "You are Skin Routine Tracker Pro's voice assistant.\n\
             User Profile: Skin Type: {}, Goals: {}.\n",
            skin_type, goals,
        );

        if !self.routine.is_empty() {
            instruction.push_str("Today's routine:\n");
            for step in &self.routine {
                let state = if self.completed_today.contains(&step.id) {
                    "done"
                } else {
                    "pending"
                };
                instruction.push_str(&format!(
                    "- {} ({}): {}\n",
                    step.product_name, step.time, state
                ));
            }
        }

        instruction.push_str(
            "Keep responses short, helpful, and conversational.\n\
             If asked about the app, explain you can help track routines.",
        );
        instruction
    }
}

/// Local date key in the shell's history format (YYYY-MM-DD).
fn today_key() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
