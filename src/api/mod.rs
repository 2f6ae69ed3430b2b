use serde::{Deserialize, Serialize};

/// Body of `POST /api/patient/query`, sent by the chat client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub session_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
}

/// Body of `POST /generate-answer`, sent by the relay to the LLM service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateAnswerRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
}

impl From<QueryRequest> for GenerateAnswerRequest {
    fn from(query: QueryRequest) -> Self {
        Self {
            session_id: query.session_id,
            message: query.text,
            patient_id: query.patient_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrlResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_uses_camel_case_and_omits_missing_patient() {
        let query = QueryRequest {
            session_id: "s-1".into(),
            text: "hello".into(),
            patient_id: None,
        };
        let json = serde_json::to_value(&query).expect("serialize");
        assert_eq!(json, serde_json::json!({ "sessionId": "s-1", "text": "hello" }));
    }

    #[test]
    fn generate_answer_request_maps_query_fields() {
        let query: QueryRequest = serde_json::from_str(
            r#"{"sessionId":"abc","text":"I have a cough","patientId":"p-9"}"#,
        )
        .expect("parse");
        let forwarded = GenerateAnswerRequest::from(query);
        let json = serde_json::to_value(&forwarded).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "session_id": "abc",
                "message": "I have a cough",
                "patient_id": "p-9"
            })
        );
    }
}
