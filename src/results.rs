use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::types::{
    newest_first, parse_timestamp, CallRecord, CallResult, CallStatus, CallSummary,
    TranscriptLine, UnknownCallStatus,
};

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("no call with id {0}")]
    NotFound(String),
    #[error("failed to export call: {0}")]
    Export(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Only(CallStatus),
}

impl StatusFilter {
    pub fn matches(&self, status: CallStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => *wanted == status,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = UnknownCallStatus;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.trim().eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        input.parse().map(StatusFilter::Only)
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::All => f.write_str("all"),
            StatusFilter::Only(status) => status.fmt(f),
        }
    }
}

/// Browses finished calls with their transcripts and summaries.
#[derive(Debug, Clone)]
pub struct ResultsViewer {
    calls: Vec<CallResult>,
    selected: Option<String>,
    show_transcript: bool,
}

impl ResultsViewer {
    pub fn new(calls: Vec<CallResult>) -> Self {
        Self {
            calls,
            selected: None,
            show_transcript: false,
        }
    }

    /// The viewer over the built-in sample calls.
    pub fn with_fixtures() -> Self {
        Self::new(fixture_calls())
    }

    pub fn calls(&self) -> &[CallResult] {
        &self.calls
    }

    pub fn filtered(&self, search: &str, status: StatusFilter) -> Vec<&CallResult> {
        let search = search.trim().to_lowercase();
        let mut matches: Vec<&CallResult> = self
            .calls
            .iter()
            .filter(|call| {
                let record = &call.record;
                search.is_empty()
                    || record.driver_name.to_lowercase().contains(&search)
                    || record.load_number.to_lowercase().contains(&search)
                    || record.call_id.to_lowercase().contains(&search)
            })
            .filter(|call| status.matches(call.record.status))
            .collect();
        matches.sort_by(|a, b| newest_first(a.record.created_at, b.record.created_at));
        matches
    }

    pub fn find(&self, call_id: &str) -> Option<&CallResult> {
        self.calls
            .iter()
            .find(|call| call.record.call_id.eq_ignore_ascii_case(call_id))
    }

    /// Selects a call; the transcript starts hidden.
    pub fn select(&mut self, call_id: &str) -> Option<&CallResult> {
        let found = self.find(call_id)?.record.call_id.clone();
        self.selected = Some(found);
        self.show_transcript = false;
        self.selected()
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.show_transcript = false;
    }

    pub fn selected(&self) -> Option<&CallResult> {
        self.find(self.selected.as_deref()?)
    }

    /// Flips transcript visibility for the selected call and returns the new
    /// state. Without a selection the transcript stays hidden.
    pub fn toggle_transcript(&mut self) -> bool {
        if self.selected.is_some() {
            self.show_transcript = !self.show_transcript;
        }
        self.show_transcript
    }

    pub fn transcript_visible(&self) -> bool {
        self.show_transcript
    }

    /// Pretty-printed JSON of one call, summary and transcript included.
    pub fn export(&self, call_id: &str) -> Result<String, ResultsError> {
        let call = self
            .find(call_id)
            .ok_or_else(|| ResultsError::NotFound(call_id.to_string()))?;
        Ok(serde_json::to_string_pretty(call)?)
    }
}

fn transcript(lines: &[(&str, &str)]) -> Vec<TranscriptLine> {
    lines
        .iter()
        .map(|(speaker, text)| TranscriptLine::new(*speaker, *text))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

pub fn fixture_calls() -> Vec<CallResult> {
    vec![
        CallResult {
            record: CallRecord {
                id: None,
                call_id: "CALL-20241201-001".into(),
                driver_name: "John Smith".into(),
                phone_number: "+1 (555) 123-4567".into(),
                load_number: "LOAD-2024-001".into(),
                delivery_address: Some("123 Main St, Anytown, USA".into()),
                status: CallStatus::Completed,
                duration_seconds: Some(225),
                agent_config_id: None,
                created_at: parse_timestamp("2024-12-01T10:30:00Z"),
            },
            agent: "Logistics Assistant".into(),
            summary: CallSummary {
                load_confirmed: true,
                address_verified: true,
                delivery_time: parse_timestamp("2024-12-01T14:00:00Z"),
                issues: strings(&["Driver mentioned traffic delay"]),
                next_steps: "Monitor delivery progress".into(),
                driver_satisfaction: "Satisfied".into(),
            },
            transcript: transcript(&[
                ("Agent", "Hello, this is your logistics assistant calling about your delivery. How are you today?"),
                ("Driver", "Hi, I'm doing well. I'm currently on my way with load LOAD-2024-001."),
                ("Agent", "Great! I can see you're delivering to 123 Main St in Anytown. Is that address correct?"),
                ("Driver", "Yes, that's correct. I have the right address."),
                ("Agent", "Perfect. What time do you expect to arrive at the delivery location?"),
                ("Driver", "I'm looking at about 2 PM, but there's some traffic so it might be closer to 2:30."),
                ("Agent", "I understand. Traffic can be unpredictable. Is there anything else I should know about this delivery?"),
                ("Driver", "No, everything looks good. The load is secure and I'm on schedule despite the traffic."),
                ("Agent", "Excellent. Thank you for the update. Is there anything else you need assistance with?"),
                ("Driver", "No, that covers it. Thanks for checking in."),
                ("Agent", "You're welcome. Have a safe trip and thank you for your service. Goodbye!"),
                ("Driver", "Goodbye!"),
            ]),
        },
        CallResult {
            record: CallRecord {
                id: None,
                call_id: "CALL-20241201-002".into(),
                driver_name: "Sarah Johnson".into(),
                phone_number: "+1 (555) 987-6543".into(),
                load_number: "LOAD-2024-002".into(),
                delivery_address: Some("456 Oak Ave, Somewhere, USA".into()),
                status: CallStatus::InProgress,
                duration_seconds: Some(83),
                agent_config_id: None,
                created_at: parse_timestamp("2024-12-01T11:15:00Z"),
            },
            agent: "Logistics Assistant".into(),
            summary: CallSummary {
                load_confirmed: true,
                address_verified: false,
                delivery_time: parse_timestamp("2024-12-01T16:00:00Z"),
                issues: strings(&[
                    "Address needs verification",
                    "Driver has questions about access",
                ]),
                next_steps: "Verify address with customer".into(),
                driver_satisfaction: "Neutral".into(),
            },
            transcript: transcript(&[
                ("Agent", "Hello, this is your logistics assistant calling about your delivery. How are you today?"),
                ("Driver", "Hi, I'm good. I'm calling about load LOAD-2024-002."),
                ("Agent", "Thank you. I can see you're delivering to 456 Oak Ave in Somewhere. Is that correct?"),
                ("Driver", "Actually, I have some questions about this address. The GPS is taking me to a residential area."),
                ("Agent", "I understand your concern. Let me check the delivery details for you."),
                ("Driver", "Also, is there a loading dock or should I call ahead for access?"),
                ("Agent", "Let me get that information for you. One moment please..."),
            ]),
        },
    ]
}
