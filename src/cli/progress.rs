//! Job Progress Display
//!
//! Follows a running job by re-reading its session record and redrawing a
//! single status line until the run reaches a terminal state.

use std::time::{Duration, Instant};

use console::{Term, style};
use tokio::task::JoinHandle;

use crate::service::CadService;
use crate::types::{Result, Session, SessionStatus};

const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Console renderer for one job's session record
pub struct ConsoleRenderer {
    show_spinner: bool,
    bar_width: usize,
    started: Instant,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            show_spinner: true,
            bar_width: 30,
            started: Instant::now(),
        }
    }

    pub fn with_spinner(mut self, show: bool) -> Self {
        self.show_spinner = show;
        self
    }

    /// Render one status line; `frame` advances the spinner
    pub fn render(&self, session: &Session, frame: usize) -> String {
        let spinner = if self.show_spinner && !session.status.is_terminal() {
            format!("{} ", SPINNER[frame % SPINNER.len()])
        } else {
            String::new()
        };

        format!(
            "{}{} {:>3}% {} ({})",
            spinner,
            render_progress_bar(session.progress, self.bar_width),
            session.progress,
            session.message,
            format_duration(self.started.elapsed().as_secs())
        )
    }

    /// Redraw until the run finishes, then return the final record.
    ///
    /// The run's handle is the completion signal; the record is re-read
    /// afterwards so the last write is always shown.
    pub async fn follow(
        &self,
        service: &CadService,
        job_id: &str,
        mut run: JoinHandle<()>,
        refresh: Duration,
    ) -> Result<Session> {
        let term = Term::stderr();
        let mut ticker = tokio::time::interval(refresh);
        let mut frame = 0usize;

        loop {
            tokio::select! {
                _ = &mut run => break,
                _ = ticker.tick() => {
                    let session = service.status(job_id).await?;
                    let _ = term.clear_line();
                    let _ = term.write_str(&self.render(&session, frame));
                    frame = frame.wrapping_add(1);
                }
            }
        }

        let session = service.status(job_id).await?;
        let _ = term.clear_line();
        let _ = term.write_line(&self.render(&session, frame));
        Ok(session)
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Styled one-word status label
pub fn status_label(status: SessionStatus) -> String {
    let text = status.to_string();
    match status {
        SessionStatus::Completed => style(text).green().to_string(),
        SessionStatus::Failed => style(text).red().to_string(),
        SessionStatus::Processing => style(text).cyan().to_string(),
        SessionStatus::Queued => style(text).dim().to_string(),
    }
}

/// Render a progress bar for a 0-100 value
fn render_progress_bar(progress: u8, width: usize) -> String {
    let filled = usize::from(progress.min(100)) * width / 100;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format duration as human-readable string
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_render() {
        assert_eq!(render_progress_bar(0, 10), "[░░░░░░░░░░]");
        assert_eq!(render_progress_bar(50, 10), "[█████░░░░░]");
        assert_eq!(render_progress_bar(100, 10), "[██████████]");
        assert_eq!(render_progress_bar(200, 10), "[██████████]");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3700), "1h 1m");
    }

    #[test]
    fn test_render_line() {
        let mut session = Session::new("job");
        session.status = SessionStatus::Processing;
        session.progress = 40;
        session.message = "Linking references".to_string();

        let renderer = ConsoleRenderer::new().with_spinner(false);
        let line = renderer.render(&session, 0);
        assert!(line.starts_with('['));
        assert!(line.contains(" 40% Linking references"));
    }

    #[test]
    fn test_spinner_hidden_once_terminal() {
        let mut session = Session::new("job");
        session.status = SessionStatus::Completed;
        session.progress = 100;

        let line = ConsoleRenderer::new().render(&session, 3);
        assert!(line.starts_with('['));
    }
}
