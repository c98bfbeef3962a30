//! Terminal rendering of channel events.

use colored::Colorize;
use restflow_stream::{
    ChannelEvent, ConnectionState, Delta, ToolCallRecord, ToolCallStatus, TurnOutcome,
};
use std::io::{self, Write};

#[derive(Debug, Default)]
pub struct Renderer {
    in_thinking: bool,
}

impl Renderer {
    pub fn render(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Delta { delta, .. } => self.render_delta(delta),
            ChannelEvent::Connection(state) => {
                let label = match state {
                    ConnectionState::Connected => "connected".green(),
                    ConnectionState::Connecting => "connecting...".dimmed(),
                    ConnectionState::Disconnected => "disconnected".red(),
                };
                eprintln!("{} {}", "[channel]".dimmed(), label);
            }
            ChannelEvent::GenerationFailed { error, .. } => {
                eprintln!("{} {}", "Error:".red().bold(), error);
            }
            ChannelEvent::IdleWarning { message } => {
                let message = message.as_deref().unwrap_or("Channel is idle");
                eprintln!("{} {}", "Warning:".yellow().bold(), message);
            }
            ChannelEvent::Unhandled { kind, .. } => {
                tracing::debug!(kind = %kind, "Unhandled event");
            }
            ChannelEvent::Generation(_) | ChannelEvent::Diagnostic(_) => {}
        }
    }

    fn render_delta(&mut self, delta: &Delta) {
        match delta {
            Delta::Thinking(text) => {
                if !self.in_thinking {
                    print!("{} ", "thinking:".dimmed());
                    self.in_thinking = true;
                }
                print!("{}", text.dimmed());
            }
            Delta::Content(text) => {
                self.end_thinking();
                print!("{}", text);
            }
            Delta::ToolCallAdded(call) | Delta::ToolCallUpdated(call) => {
                self.end_thinking();
                println!("{}", tool_line(call));
            }
            Delta::Finished(outcome) => {
                self.end_thinking();
                match outcome {
                    TurnOutcome::Completed => println!(),
                    TurnOutcome::Cancelled => println!("\n{}", "(cancelled)".yellow()),
                    TurnOutcome::Interrupted => println!("\n{}", "(interrupted)".red()),
                    TurnOutcome::Failed(_) => println!(),
                }
            }
        }
        let _ = io::stdout().flush();
    }

    fn end_thinking(&mut self) {
        if self.in_thinking {
            println!();
            self.in_thinking = false;
        }
    }
}

fn tool_line(call: &ToolCallRecord) -> String {
    let status = match call.status {
        ToolCallStatus::Pending => "pending".dimmed(),
        ToolCallStatus::Executing => "running".cyan(),
        ToolCallStatus::Completed => "done".green(),
        ToolCallStatus::Failed => "failed".red(),
    };
    format!("{} {} [{}]", "tool".blue().bold(), call.name, status)
}
