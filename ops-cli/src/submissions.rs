use anyhow::Context;
use batching_service::ClaimSubmission;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum SubmissionFile {
    Many(Vec<ClaimSubmission>),
    One(Box<ClaimSubmission>),
}

/// Parse a claim file holding either one submission or an array of them
pub fn parse_submissions(raw: &str) -> anyhow::Result<Vec<ClaimSubmission>> {
    let parsed: SubmissionFile = serde_json::from_str(raw).context("Invalid claim submission JSON")?;
    Ok(match parsed {
        SubmissionFile::Many(submissions) => submissions,
        SubmissionFile::One(submission) => vec![*submission],
    })
}
