//! Job envelope and the payloads carried on each queue.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use healthcast_core::{CityId, JobId, UserId};
use healthcast_forecast::PeriodReading;

use super::QueueError;

/// A unit of deferred work. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Queue the producer targeted.
    pub queue: String,
    pub enqueued_at: DateTime<Utc>,
    /// Consumer-specific fields.
    pub payload: serde_json::Value,
}

impl Job {
    /// Wrap a typed payload under a fresh id.
    pub fn new<P: Serialize>(queue: impl Into<String>, payload: &P) -> Result<Self, QueueError> {
        Self::with_id(JobId::new(), queue, payload)
    }

    pub fn with_id<P: Serialize>(
        id: JobId,
        queue: impl Into<String>,
        payload: &P,
    ) -> Result<Self, QueueError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| QueueError::Serialization(format!("job payload: {e}")))?;
        Ok(Self {
            id,
            queue: queue.into(),
            enqueued_at: Utc::now(),
            payload,
        })
    }

    /// Decode the payload as the consumer's type.
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P, QueueError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| QueueError::Serialization(format!("job {} payload: {e}", self.id)))
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, QueueError> {
        serde_json::from_str(raw).map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Fetch and aggregate the forecasts of one city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectDataJob {
    pub city_id: CityId,
    pub longitude: f64,
    pub latitude: f64,
}

/// Answer one chat message; the answer is cached under the job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatJob {
    pub city_id: CityId,
    pub user_id: UserId,
    pub user_input: String,
    #[serde(default)]
    pub history_context: String,
}

/// Produce one user's daily advice for one city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionJob {
    pub user_id: UserId,
    pub city_id: CityId,
    pub disease_name: String,
    pub describe_disease: String,
    pub daily_data: Vec<PeriodReading>,
}

/// A job moved aside after its processing failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The job exactly as it was dequeued.
    pub payload: String,
    pub reason: String,
    /// Worker that gave up on it.
    pub consumer: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(payload: impl Into<String>, reason: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            reason: reason.into(),
            consumer: consumer.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_keeps_producer_id_and_payload() {
        let job = Job::with_id(
            JobId::from("abc"),
            "data",
            &json!({"id": "abc", "city": 5}),
        )
        .unwrap();

        let back = Job::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(back.id.as_str(), "abc");
        assert_eq!(back.queue, "data");
        assert_eq!(back.payload["city"], 5);
    }

    #[test]
    fn chat_payload_history_is_optional() {
        let job = Job::new(
            "queue_chatbot",
            &json!({"city_id": 1, "user_id": 2, "user_input": "Hôm nay trời thế nào?"}),
        )
        .unwrap();

        let chat: ChatJob = job.payload_as().unwrap();
        assert_eq!(chat.user_id, UserId::new(2));
        assert!(chat.history_context.is_empty());
    }

    #[test]
    fn dead_letter_entry_wire_fields() {
        let entry = DeadLetterEntry::new("{\"id\":\"abc\"}", "upstream rejected city", "w1");
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["payload"], "{\"id\":\"abc\"}");
        assert_eq!(value["reason"], "upstream rejected city");
        assert_eq!(value["consumer"], "w1");
        assert!(value["dead_lettered_at"].is_string());
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn wrong_payload_shape_is_a_serialization_error() {
        let job = Job::new("queue_data", &json!({"city_id": "not a number"})).unwrap();
        let err = job.payload_as::<CollectDataJob>().unwrap_err();
        assert!(matches!(err, QueueError::Serialization(_)));
    }
}
