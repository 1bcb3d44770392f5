//! Live rendering of a run's event stream.

use colored::Colorize;
use events::{Event, RunSubscription};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Render events until the run finishes. Draws nothing when `quiet`.
pub fn spawn(mut subscription: RunSubscription, quiet: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = if quiet {
            ProgressBar::hidden()
        } else {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        };

        while let Some(envelope) = subscription.next().await {
            match &envelope.event {
                Event::RunStarted { .. } | Event::StateChanged { .. } => {
                    spinner.set_message(envelope.event.message());
                }
                Event::IterationCompleted {
                    passed, message, ..
                } => {
                    let line = if *passed {
                        format!("{} {}", "✓".green().bold(), message)
                    } else {
                        format!("{} {}", "✗".red().bold(), message)
                    };
                    spinner.println(line);
                }
                Event::RunFinished { .. } => break,
                Event::Error { message, .. } => {
                    spinner.println(format!("{} {}", "!".yellow().bold(), message));
                }
            }
        }
        spinner.finish_and_clear();
    })
}
