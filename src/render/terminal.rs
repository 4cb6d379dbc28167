/// Top-down terminal view of the scene
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode};
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::widgets::canvas::{Canvas, Line as CanvasLine};
use ratatui::widgets::{Block, List, ListItem, Paragraph};
use ratatui::{DefaultTerminal, Frame};
use tracing::debug;

use crate::core::entity::EntityKind;
use crate::core::store::{ObjectStore, SceneObject};
use crate::core::topic::{Rgb, SceneDefaults};
use crate::render::{SceneRenderer, SceneSettings};

/// Redraw period of the terminal view.
pub const FRAME_PERIOD: Duration = Duration::from_millis(33);

pub struct TerminalRenderer {
    title: String,
    settings: RwLock<SceneSettings>,
}

impl TerminalRenderer {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            settings: RwLock::new(SceneSettings::default()),
        }
    }

    pub fn settings(&self) -> SceneSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Owns the terminal until Esc or `q`, drawing the store every frame.
    pub async fn run(self: Arc<Self>, store: Arc<ObjectStore>) -> anyhow::Result<()> {
        let mut terminal = ratatui::init();
        let result = self.draw_loop(&mut terminal, &store).await;
        ratatui::restore();
        result
    }

    async fn draw_loop(&self, terminal: &mut DefaultTerminal, store: &ObjectStore) -> anyhow::Result<()> {
        let mut render_timer = tokio::time::interval(FRAME_PERIOD);
        loop {
            render_timer.tick().await;
            let objects = store.snapshot();
            let settings = self.settings();
            terminal.draw(|f| draw_scene(f, &self.title, &settings, &objects))?;

            if event::poll(Duration::from_millis(0))? {
                if let Event::Key(key) = event::read()? {
                    if matches!(key.code, KeyCode::Esc | KeyCode::Char('q')) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl SceneRenderer for TerminalRenderer {
    fn apply_scene_defaults(&self, defaults: &SceneDefaults) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(defaults);
    }

    fn release(&self, object: &SceneObject) {
        // Nothing is cached per object; the next frame simply stops drawing it.
        debug!(name = %object.name, "released scene object");
    }
}

fn color(rgb: Rgb) -> Color {
    Color::Rgb(rgb.0, rgb.1, rgb.2)
}

fn describe(object: &SceneObject) -> String {
    let kind = match &object.entity.kind {
        EntityKind::Tag { id } => format!("tag {id}"),
        EntityKind::Image { width, height } => format!("image {width}x{height}"),
        EntityKind::Cube => "cube".to_string(),
    };
    let p = object.entity.position;
    format!(
        "{:<16} {:<14} ({:>6.2}, {:>6.2}, {:>6.2}) {:>5}ms",
        object.name,
        kind,
        p.x,
        p.y,
        p.z,
        object.age().as_millis()
    )
}

/// Draws one frame: the ground plane seen from above (x right, z up) and a list of objects.
pub fn draw_scene(frame: &mut Frame, title: &str, settings: &SceneSettings, objects: &[SceneObject]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    let header = Paragraph::new(format!("{title} - {} objects", objects.len()))
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(chunks[1]);

    let grid = &settings.grid;
    let axes = &settings.axes;
    let half = (grid.size as f64 * grid.spacing as f64 / 2.0).max(1.0);

    let canvas = Canvas::default()
        .block(Block::bordered().title(" scene "))
        .x_bounds([-half, half])
        .y_bounds([-half, half])
        .paint(|ctx| {
            if grid.show && grid.spacing > 0.0 {
                let step = grid.spacing as f64;
                let mut offset = -half;
                while offset <= half {
                    let line_color = color(grid.color);
                    ctx.draw(&CanvasLine { x1: offset, y1: -half, x2: offset, y2: half, color: line_color });
                    ctx.draw(&CanvasLine { x1: -half, y1: offset, x2: half, y2: offset, color: line_color });
                    offset += step;
                }
            }
            if axes.show {
                let length = axes.length as f64;
                ctx.draw(&CanvasLine { x1: 0.0, y1: 0.0, x2: length, y2: 0.0, color: Color::Red });
                ctx.draw(&CanvasLine { x1: 0.0, y1: 0.0, x2: 0.0, y2: length, color: Color::Blue });
            }
            ctx.layer();
            for object in objects {
                let p = object.entity.position;
                let label = object.entity.label.clone().unwrap_or_else(|| object.name.clone());
                ctx.print(p.x as f64, p.z as f64, label);
            }
        });
    frame.render_widget(canvas, body[0]);

    let items: Vec<ListItem> = objects
        .iter()
        .map(|object| ListItem::new(describe(object)).style(Style::default().fg(color(object.entity.color))))
        .collect();
    frame.render_widget(List::new(items).block(Block::bordered().title(" objects ")), body[1]);

    let footer = Paragraph::new("Esc or q to quit")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Gray));
    frame.render_widget(footer, chunks[2]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::{SceneEntity, Vec3};
    use crate::core::topic::AxesOptions;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    #[test]
    fn lists_every_object() {
        let store = ObjectStore::new(Arc::new(TerminalRenderer::new("test")));
        store.add("tag_7", SceneEntity::tag(7, 1.0).with_position(Vec3::new(1.0, 0.0, 2.0)));
        store.add("example_object", SceneEntity::cube(Rgb::BLUE));

        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal
            .draw(|f| draw_scene(f, "window 0", &SceneSettings::default(), &store.snapshot()))
            .unwrap();

        let rendered: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(rendered.contains("tag_7"));
        assert!(rendered.contains("example_object"));
        assert!(rendered.contains("2 objects"));
    }

    #[test]
    fn scene_defaults_update_settings() {
        let renderer = TerminalRenderer::new("test");
        renderer.apply_scene_defaults(&SceneDefaults {
            axes: Some(AxesOptions {
                show: false,
                ..AxesOptions::default()
            }),
            grid: None,
        });
        assert!(!renderer.settings().axes.show);
    }
}
