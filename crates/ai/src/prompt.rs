//! Prompt assembly for the three model calls of the pipeline.

use healthcast_core::{CityId, HistoryEntry};
use healthcast_forecast::PeriodReading;
use healthcast_forecast::interpret::interpret_day;

use crate::capability::GenerationRequest;

const CHAT_SYSTEM: &str = "You are a health assistant for people living with chronic \
conditions. Answer in the user's language, concisely, using the weather and air quality \
of the user's city when it is relevant.";

const SUMMARY_SYSTEM: &str = "Summarise the conversation below in about six sentences, in \
chronological order, keeping the facts a follow-up assistant needs. Return only the summary.";

const SUGGESTION_SYSTEM: &str = "You write short, practical daily health advice. Base the \
advice on the provided documents and the day's conditions; do not invent medical facts.";

/// Answer one chat message.
pub fn chat_request(city_id: CityId, user_input: &str, history_summary: &str) -> GenerationRequest {
    let request = GenerationRequest::new(
        CHAT_SYSTEM,
        format!("City id: {city_id}\nQuestion: {user_input}"),
    );
    if history_summary.trim().is_empty() {
        request
    } else {
        request.with_context([format!("Conversation so far: {history_summary}")])
    }
}

/// Summarise prior messages, oldest first. `None` when there is nothing to summarise.
pub fn summary_request(history: &[HistoryEntry]) -> Option<GenerationRequest> {
    if history.is_empty() {
        return None;
    }
    let transcript: String = history
        .iter()
        .map(|e| format!("{}: {}\n", e.role.as_str().to_uppercase(), e.content))
        .collect();
    Some(GenerationRequest::new(SUMMARY_SYSTEM, transcript))
}

/// Retrieval query describing how the day's conditions affect a disease.
pub fn suggestion_query(readings: &[PeriodReading], disease_name: &str, describe_disease: &str) -> String {
    let day = interpret_day(readings).join("\n");
    format!(
        "Based on the following weather, air quality and UV conditions for each period:\n\n\
         *** {day} ***\n\n\
         How would these conditions affect the disease '{disease_name}', described as: \
         '{describe_disease}'?"
    )
}

/// Final advice generation over the retrieved documents.
pub fn suggestion_request(query: &str, documents: Vec<String>) -> GenerationRequest {
    GenerationRequest::new(SUGGESTION_SYSTEM, query).with_context(documents)
}
