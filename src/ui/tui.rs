// Terminal user interface
// Thin rendering collaborator: consumes published snapshots, owns the
// terminal state, reports quit requests

use std::io;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::Span,
    widgets::{Block, Borders, Paragraph},
    Terminal,
};

use crate::config::Settings;
use crate::display::DisplaySnapshot;
use crate::ui::widgets::Spectrogram;

pub struct Tui {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
    should_quit: bool,
    settings: Settings,
}

impl Tui {
    pub fn new(settings: &Settings) -> Result<Self> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            should_quit: false,
            settings: settings.clone(),
        })
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn handle_events(&mut self) -> Result<()> {
        if event::poll(std::time::Duration::from_millis(10))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            self.should_quit = true;
                        }
                        // Raw mode swallows the usual SIGINT
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            self.should_quit = true;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    pub fn render(&mut self, snapshot: Option<&DisplaySnapshot>) -> Result<()> {
        let settings = self.settings.clone();
        self.terminal.draw(|f| {
            let size = f.size();

            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints(
                    [
                        Constraint::Length(3), // Title
                        Constraint::Min(10),   // Spectrogram
                        Constraint::Length(3), // Status bar
                    ]
                    .as_ref(),
                )
                .split(size);

            let title = Paragraph::new(format!(
                "specterm | {} Hz | nfft {} | hop {} samples",
                settings.rate,
                settings.nfft,
                settings.hop()
            ))
            .style(Style::default().fg(Color::Cyan))
            .block(Block::default().borders(Borders::ALL));
            f.render_widget(title, chunks[0]);

            match snapshot {
                Some(snap) => {
                    let nyquist = snap.freqs.last().copied().unwrap_or(0.0);
                    let spectrogram = Spectrogram::new(snap)
                        .scale(settings.log_floor, settings.log_ceil)
                        .block(
                            Block::default()
                                .title(format!("0 Hz (bottom) to {nyquist:.0} Hz (top)"))
                                .borders(Borders::ALL),
                        );
                    f.render_widget(spectrogram, chunks[1]);
                }
                None => {
                    let waiting = Paragraph::new("waiting for audio...")
                        .block(Block::default().borders(Borders::ALL));
                    f.render_widget(waiting, chunks[1]);
                }
            }

            let lagging = snapshot.map(|s| s.lagging).unwrap_or(false);
            let status_text = if lagging {
                "Running (lagging) | Press 'q' to quit"
            } else {
                "Running | Press 'q' to quit"
            };
            let status_style = if lagging {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::White)
            };
            let status = Paragraph::new(Span::raw(status_text))
                .style(status_style)
                .block(Block::default().borders(Borders::ALL));
            f.render_widget(status, chunks[2]);
        })?;

        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        // Restore terminal
        let _ = disable_raw_mode();
        let _ = self.terminal.backend_mut().execute(LeaveAlternateScreen);
    }
}
