use uuid::Uuid;

/// Conversation identity passed unchanged with every request.
///
/// Assigned once per client session and patient context; the relay and the
/// LLM service use it to keep conversation memory together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    session_id: String,
    patient_id: String,
}

impl SessionIdentity {
    pub fn new(session_id: impl Into<String>, patient_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            patient_id: patient_id.into(),
        }
    }

    /// Fresh session id for the given patient.
    pub fn for_patient(patient_id: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), patient_id)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }
}
