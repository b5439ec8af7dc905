//! Examiner system-instruction assembly.
//!
//! The persona is fixed; the mode addendum depends on whether a Part 2
//! cue card is on the table when the session starts.

use crate::cue_card::CueCard;

const BASE_INSTRUCTION: &str = "You are an IELTS Speaking Examiner. Conduct a realistic \
     interview. Be strict, academic, and professional.";

/// Build the full system instruction for one session.
///
/// With a cue card the examiner runs the Part 2 monologue plus Part 3
/// follow-ups; without one it conducts a Part 1 interview.
pub fn build_system_instruction(cue_card: Option<&CueCard>) -> String {
    let mode = match cue_card {
        Some(card) => format!(
            "The user has just seen a Part 2 Cue Card: \"{}\". Instruct the user that they \
             should speak for 1 to 2 minutes on this topic. After they finish, ask follow-up \
             questions for Part 3 based on their talk.",
            card.topic
        ),
        None => "Conduct a Part 1 interview about the user's hometown or hobbies.".to_string(),
    };
    format!("{BASE_INSTRUCTION} {mode}")
}
