//! Terminal chart surface: four stacked braille line charts, one per
//! channel, sharing an x axis of absolute sample indices.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    symbols,
    text::Span,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
};

use crate::{
    NUM_CHANNELS,
    buffer::ChannelBuffers,
    comm::Electrode,
    display::{ChartSurface, Interrupt},
    error::Result,
};

/// Line colour of each channel.
const COLORS: [Color; NUM_CHANNELS] = [Color::Cyan, Color::Yellow, Color::Green, Color::Magenta];

/// Colour of the background grid lines.
const GRID_COLOR: Color = Color::Rgb(60, 60, 60);

/// Fractions of the y range where grid lines are drawn.
const GRID_FRACTIONS: [f64; 3] = [0.25, 0.5, 0.75];

/// Chart surface rendered to the terminal's alternate screen.
///
/// Raw mode and the alternate screen are restored when the surface is
/// dropped.
pub struct TerminalChart {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    interrupt: Interrupt,
}

impl TerminalChart {
    /// Switches the terminal to the alternate screen in raw mode.
    pub fn open(interrupt: Interrupt) -> Result<TerminalChart> {
        enable_raw_mode()?;
        let terminal = or_restore(
            || {
                let mut stdout = io::stdout();
                execute!(stdout, EnterAlternateScreen)?;
                Terminal::new(CrosstermBackend::new(stdout))
            },
            restore_terminal,
        )?;
        Ok(TerminalChart {
            terminal,
            interrupt,
        })
    }

    /// Drains input, triggering the interrupt on Ctrl-C, `q` or Esc. In raw
    /// mode Ctrl-C arrives as a key event rather than a signal.
    fn handle_input(&mut self, wait: Duration) -> Result<()> {
        let mut wait = wait;
        while event::poll(wait)? {
            wait = Duration::ZERO;
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let ctrl_c =
                key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
            if ctrl_c || matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                self.interrupt.trigger();
            }
        }
        Ok(())
    }
}

impl ChartSurface for TerminalChart {
    fn redraw(&mut self, buffers: &ChannelBuffers) -> Result<()> {
        self.terminal.draw(|frame| draw(frame, buffers))?;
        Ok(())
    }

    fn pause(&mut self, duration: Duration) -> Result<()> {
        self.handle_input(duration)
    }

    fn poll_events(&mut self) -> Result<()> {
        self.handle_input(Duration::ZERO)
    }
}

impl Drop for TerminalChart {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Leaves raw mode and the alternate screen, ignoring failures.
fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen);
}

/// Runs `setup`, calling `restore` if it fails.
fn or_restore<T>(setup: impl FnOnce() -> io::Result<T>, restore: impl FnOnce()) -> io::Result<T> {
    setup().inspect_err(|_| restore())
}

/// Renders every channel into its own row.
fn draw(frame: &mut Frame, buffers: &ChannelBuffers) {
    let rows = Layout::vertical([Constraint::Ratio(1, NUM_CHANNELS as u32); NUM_CHANNELS])
        .split(frame.area());
    let x_bounds = x_bounds(buffers);
    for (channel, area) in rows.iter().enumerate() {
        draw_channel(frame, *area, channel, buffers, x_bounds);
    }
}

/// Renders one channel with its grid lines.
fn draw_channel(
    frame: &mut Frame,
    area: Rect,
    channel: usize,
    buffers: &ChannelBuffers,
    x_bounds: [f64; 2],
) {
    let points = channel_points(buffers, channel);
    let y_bounds = y_bounds(&points);
    let grid: Vec<Vec<(f64, f64)>> = GRID_FRACTIONS
        .iter()
        .map(|f| {
            let y = y_bounds[0] + f * (y_bounds[1] - y_bounds[0]);
            vec![(x_bounds[0], y), (x_bounds[1], y)]
        })
        .collect();

    let mut datasets: Vec<Dataset> = grid
        .iter()
        .map(|line| {
            Dataset::default()
                .marker(symbols::Marker::Dot)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(GRID_COLOR))
                .data(line)
        })
        .collect();
    datasets.push(
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(COLORS[channel]))
            .data(&points),
    );

    let electrode = Span::styled(
        format!(" {} ", Electrode::ALL[channel].label()),
        Style::default().fg(COLORS[channel]),
    );
    let y_title = Span::styled(
        format!("Channel {} (uV)", channel + 1),
        Style::default().fg(COLORS[channel]),
    );
    let chart = Chart::new(datasets)
        .block(Block::default().title(electrode).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .bounds(x_bounds)
                .labels(axis_labels(x_bounds, 0))
                .style(Style::default().fg(Color::DarkGray)),
        )
        .y_axis(
            Axis::default()
                .title(y_title)
                .bounds(y_bounds)
                .labels(axis_labels(y_bounds, 1))
                .style(Style::default().fg(Color::DarkGray)),
        );
    frame.render_widget(chart, area);
}

/// `(sample index, value)` pairs of one channel, oldest first.
fn channel_points(buffers: &ChannelBuffers, channel: usize) -> Vec<(f64, f64)> {
    let first = buffers.first_index();
    buffers
        .channel(channel)
        .iter()
        .enumerate()
        .map(|(i, &v)| ((first + i as u64) as f64, f64::from(v)))
        .collect()
}

/// The x axis spans the full window so the trace scrolls from the right.
fn x_bounds(buffers: &ChannelBuffers) -> [f64; 2] {
    let end = buffers.total().max(buffers.capacity() as u64) as f64;
    [end - buffers.capacity() as f64, end]
}

/// Fits the y axis to the data with a small margin.
fn y_bounds(points: &[(f64, f64)]) -> [f64; 2] {
    let (min, max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| {
            (lo.min(y), hi.max(y))
        });
    if !min.is_finite() || !max.is_finite() {
        return [-1.0, 1.0];
    }
    let margin = ((max - min) * 0.05).max(1.0);
    [min - margin, max + margin]
}

fn axis_labels(bounds: [f64; 2], precision: usize) -> Vec<String> {
    let mid = (bounds[0] + bounds[1]) / 2.0;
    [bounds[0], mid, bounds[1]]
        .iter()
        .map(|v| format!("{v:.precision$}"))
        .collect()
}
