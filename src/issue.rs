use chrono::{DateTime, FixedOffset};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum IssueState {
    Open,
    Closed,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub(crate) struct Label {
    pub name: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// An issue or pull request as returned by the GitHub issues endpoint.
///
/// Fields the tool does not look at are kept in `rest` so that a cached copy
/// is the complete remote record.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub(crate) struct IssueRecord {
    pub number: u64,
    pub state: IssueState,
    pub title: String,
    pub body: Option<String>,
    pub html_url: String,
    pub comments: u64,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub updated_at: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl IssueRecord {
    pub(crate) fn is_closed(&self) -> bool {
        self.state == IssueState::Closed
    }

    pub(crate) fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub(crate) fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }
}
