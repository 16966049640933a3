//! Interactive terminal chat: the caller-owned clarification loop.
//!
//! Reads the opening message, then keeps answering clarification questions
//! until the controller returns advice or an error.

use anyhow::{bail, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::advisor::controller::{ConversationController, SessionOutcome};
use crate::advisor::schema::AdviceResult;
use crate::advisor::session::ConversationSession;

const OPENING_PROMPT: &str = "Enter your conversation: ";
const CLARIFICATION_PROMPT: &str = "Clarification: ";

/// Runs one session to completion. Returns the advice, or an error carrying
/// the controller's failure message verbatim.
pub async fn run_chat<R, W>(
    controller: &ConversationController,
    opening: Option<String>,
    input: &mut R,
    output: &mut W,
) -> Result<AdviceResult>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = ConversationSession::new();
    let mut text = match opening.filter(|t| !t.trim().is_empty()) {
        Some(text) => text,
        None => read_non_empty(OPENING_PROMPT, input, output).await?,
    };

    loop {
        match controller.submit(&mut session, &text).await {
            SessionOutcome::Done(result) => {
                let rendered = serde_json::to_string_pretty(&result)?;
                output.write_all(rendered.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
                return Ok(result);
            }
            SessionOutcome::Clarify(question) => {
                output.write_all(format!("{question}\n").as_bytes()).await?;
                text = read_non_empty(CLARIFICATION_PROMPT, input, output).await?;
            }
            SessionOutcome::Error(kind) => bail!(kind),
        }
    }
}

/// Prompts until a non-blank line arrives. Blank replies are rejected here,
/// on the caller side, and never reach the controller.
async fn read_non_empty<R, W>(prompt: &str, input: &mut R, output: &mut W) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        output.write_all(prompt.as_bytes()).await?;
        output.flush().await?;

        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            bail!("input closed before the conversation finished");
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.trim().is_empty() {
            return Ok(line.to_string());
        }
    }
}
