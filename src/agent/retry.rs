//! Retry controller
//!
//! Top-level turn policy. With a session id the first attempt resumes it;
//! if that fails the consumer is told the session was reset and one fresh
//! attempt follows. Every path ends with exactly one `done` line.
//!
//! ```text
//!   session id? ──no──► Fresh ──ok──► done
//!        │                 └─err──► error, done{""}
//!       yes
//!        ▼
//!    Resuming ──ok──► done
//!        └─err──► error("Session resume failed: ..."), session-reset
//!                   ▼
//!            FreshAfterReset ──ok──► done
//!                   └─err──► error, done{""}
//! ```

use crate::agent::emitter::LineEmitter;
use crate::agent::session::SessionDriver;
use crate::agent::types::OutputEvent;
use crate::agent::upstream::Upstream;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;

/// How a turn ended, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The first attempt succeeded
    Completed,
    /// Resume failed, the fresh session succeeded
    RecoveredAfterReset,
    /// No attempt succeeded; an empty `done` was emitted
    Failed,
}

/// Applies the resume-then-fresh policy around a session driver
pub struct RetryController<U> {
    driver: SessionDriver<U>,
}

impl<U: Upstream> RetryController<U> {
    pub fn new(driver: SessionDriver<U>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &SessionDriver<U> {
        &self.driver
    }

    /// Run a full turn, emitting the terminal `done`.
    ///
    /// Only output failures are returned; upstream failures are reported
    /// in-band.
    pub async fn run<W: Write>(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        cwd: Option<&Path>,
        emitter: &mut LineEmitter<W>,
    ) -> Result<TurnOutcome> {
        let Some(session_id) = session_id else {
            return match self.driver.run_turn(prompt, None, cwd, false, emitter).await {
                Ok(acc) => {
                    emitter.emit(&acc.into_done())?;
                    Ok(TurnOutcome::Completed)
                }
                Err(e) => give_up(e, emitter),
            };
        };

        match self
            .driver
            .run_turn(prompt, Some(session_id), cwd, true, emitter)
            .await
        {
            Ok(acc) => {
                emitter.emit(&acc.into_done())?;
                return Ok(TurnOutcome::Completed);
            }
            Err(e) if e.is_upstream() => {
                tracing::warn!(session_id, error = %e, "Session resume failed, starting fresh");
                emitter.emit(&OutputEvent::Error {
                    error: format!(
                        "Session resume failed: {}. Starting fresh session...",
                        e.wire_message()
                    ),
                })?;
                emitter.emit(&OutputEvent::SessionReset)?;
            }
            Err(e) => return Err(e),
        }

        match self.driver.run_turn(prompt, None, cwd, false, emitter).await {
            Ok(acc) => {
                tracing::info!(session_id = %acc.session_id, "Fresh session replaced failed resume");
                emitter.emit(&acc.into_done())?;
                Ok(TurnOutcome::RecoveredAfterReset)
            }
            Err(e) => give_up(e, emitter),
        }
    }
}

/// Report a final upstream failure and close the turn
fn give_up<W: Write>(e: Error, emitter: &mut LineEmitter<W>) -> Result<TurnOutcome> {
    if !e.is_upstream() {
        return Err(e);
    }
    tracing::error!(error = %e, "Agent turn failed");
    emitter.emit(&OutputEvent::Error {
        error: e.wire_message(),
    })?;
    emitter.emit(&OutputEvent::empty_done())?;
    Ok(TurnOutcome::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::*;
    use crate::agent::upstream::scripted::{Attempt, ScriptedUpstream};
    use crate::agent::upstream::UpstreamOptions;

    fn controller(attempts: Vec<Attempt>) -> RetryController<ScriptedUpstream> {
        RetryController::new(SessionDriver::new(
            ScriptedUpstream::new(attempts),
            UpstreamOptions::default(),
        ))
    }

    fn init(session_id: &str) -> UpstreamEvent {
        UpstreamEvent::new(UpstreamEventKind::SystemInit {
            session_id: session_id.to_string(),
        })
    }

    fn text(t: &str) -> UpstreamEvent {
        UpstreamEvent::new(UpstreamEventKind::AssistantMessage {
            blocks: vec![AssistantBlock::Text(t.to_string())],
        })
    }

    fn output(emitter: LineEmitter<Vec<u8>>) -> Vec<OutputEvent> {
        String::from_utf8(emitter.into_inner())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn done(session_id: &str, full_text: &str) -> OutputEvent {
        OutputEvent::Done {
            session_id: session_id.to_string(),
            full_text: full_text.to_string(),
            usage: None,
            cost_usd: None,
        }
    }

    #[tokio::test]
    async fn test_resume_success() {
        let rc = controller(vec![Attempt::ok(vec![init("s1"), text("hi")])]);
        let mut emitter = LineEmitter::new(Vec::new());

        let outcome = rc.run("p", Some("s1"), None, &mut emitter).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(rc.driver().upstream().requests().len(), 1);
        assert_eq!(
            output(emitter),
            vec![
                OutputEvent::SessionInit {
                    session_id: "s1".to_string()
                },
                done("s1", "hi"),
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_failure_then_fresh_success() {
        let rc = controller(vec![
            Attempt::OpenFails("stale session".to_string()),
            Attempt::ok(vec![init("s2"), text("fresh")]),
        ]);
        let mut emitter = LineEmitter::new(Vec::new());

        let outcome = rc.run("p", Some("s1"), None, &mut emitter).await.unwrap();
        assert_eq!(outcome, TurnOutcome::RecoveredAfterReset);

        let requests = rc.driver().upstream().requests();
        assert_eq!(requests[0].resume.as_deref(), Some("s1"));
        assert_eq!(requests[1].resume, None);

        assert_eq!(
            output(emitter),
            vec![
                OutputEvent::Error {
                    error: "Session resume failed: stale session. Starting fresh session..."
                        .to_string()
                },
                OutputEvent::SessionReset,
                OutputEvent::SessionInit {
                    session_id: "s2".to_string()
                },
                done("s2", "fresh"),
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_and_fresh_both_fail() {
        let rc = controller(vec![
            Attempt::fails_after(vec![init("s1")], "crashed"),
            Attempt::OpenFails("crashed again".to_string()),
        ]);
        let mut emitter = LineEmitter::new(Vec::new());

        let outcome = rc.run("p", Some("s1"), None, &mut emitter).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Failed);

        let events = output(emitter);
        let errors = events
            .iter()
            .filter(|e| matches!(e, OutputEvent::Error { .. }))
            .count();
        assert_eq!(errors, 2);
        assert_eq!(events.last(), Some(&OutputEvent::empty_done()));
        assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);
        assert_eq!(
            events[events.len() - 2],
            OutputEvent::Error {
                error: "crashed again".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_no_session_single_attempt() {
        let rc = controller(vec![
            Attempt::OpenFails("no binary".to_string()),
            Attempt::ok(vec![init("never")]),
        ]);
        let mut emitter = LineEmitter::new(Vec::new());

        let outcome = rc.run("p", None, None, &mut emitter).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(rc.driver().upstream().requests().len(), 1);
        assert_eq!(
            output(emitter),
            vec![
                OutputEvent::Error {
                    error: "no binary".to_string()
                },
                OutputEvent::empty_done(),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_session_success() {
        let rc = controller(vec![Attempt::ok(vec![init("s9"), text("ok")])]);
        let mut emitter = LineEmitter::new(Vec::new());

        let outcome = rc.run("p", None, None, &mut emitter).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(rc.driver().upstream().requests()[0].resume, None);
        assert_eq!(output(emitter).last(), Some(&done("s9", "ok")));
    }

    #[tokio::test]
    async fn test_in_band_error_is_not_retried() {
        let rc = controller(vec![Attempt::ok(vec![
            init("s1"),
            UpstreamEvent::new(UpstreamEventKind::Error {
                message: "over budget".to_string(),
            }),
        ])]);
        let mut emitter = LineEmitter::new(Vec::new());

        let outcome = rc.run("p", Some("s1"), None, &mut emitter).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(rc.driver().upstream().requests().len(), 1);
        let events = output(emitter);
        assert_eq!(events.len(), 3);
        assert!(!events.contains(&OutputEvent::SessionReset));
    }

    /// Sink that accepts a fixed number of writes, then breaks
    struct FailingSink {
        remaining: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
            }
            self.remaining -= 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_output_failure_is_not_retried() {
        let rc = controller(vec![
            Attempt::ok(vec![init("s1"), text("a")]),
            Attempt::ok(vec![init("s2")]),
        ]);
        let mut emitter = LineEmitter::new(FailingSink { remaining: 0 });

        let err = rc.run("p", Some("s1"), None, &mut emitter).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(rc.driver().upstream().requests().len(), 1);
    }
}
