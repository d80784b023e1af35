//! One-shot helper: spawn a session, send one prompt, hand back both.

use tracing::debug;

use crate::config::SessionConfig;
use crate::session::tools::Tool;
use crate::session::Session;
use crate::turn::Turn;
use crate::wire::content::Content;
use crate::Result;

/// A session dedicated to a single turn.
#[derive(Debug)]
pub struct SingleTurn {
    session: Session,
    turn: Turn,
}

impl SingleTurn {
    /// The turn, for iteration.
    pub fn turn(&mut self) -> &mut Turn {
        &mut self.turn
    }

    /// The owning session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Cancel the turn if it is still running, then close the session.
    ///
    /// # Errors
    ///
    /// Returns the turn's [`crate::AppError::SubprocessExit`] if the agent
    /// died while the turn was running, otherwise the
    /// [`Session::close`] failure.
    pub async fn close(mut self) -> Result<()> {
        let outcome = if self.turn.is_finished() {
            match self.turn.err() {
                Some(err @ crate::AppError::SubprocessExit(_)) => Err(err),
                _ => Ok(()),
            }
        } else {
            self.turn.cancel().await
        };
        let closed = self.session.close().await;
        outcome.and(closed)
    }
}

/// Create a session from `config` and `tools`, then send `content`.
///
/// # Errors
///
/// Returns the [`Session::create`] or [`Session::prompt`] failure. The
/// session is closed before the error is returned.
pub async fn prompt_once(
    config: SessionConfig,
    tools: Vec<Tool>,
    content: impl Into<Content>,
) -> Result<SingleTurn> {
    let session = Session::create(config, tools).await?;
    match session.prompt(content).await {
        Ok(turn) => Ok(SingleTurn { session, turn }),
        Err(err) => {
            if let Err(close_err) = session.close().await {
                debug!(error = %close_err, "prompt_once: close after failed prompt");
            }
            Err(err)
        }
    }
}
