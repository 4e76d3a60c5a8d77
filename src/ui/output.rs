use crate::ui::Icons;
use owo_colors::{OwoColorize, Style};
use std::sync::OnceLock;

static PALETTE: OnceLock<Palette> = OnceLock::new();

/// Styles for CLI output, including the fields of a timeline row
#[derive(Debug, Clone)]
pub struct Palette {
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub label: Style,
    pub time: Style,
    pub kind: Style,
    pub action: Style,
    pub text: Style,
}

impl Palette {
    /// Colors on a terminal unless `NO_COLOR` is set
    pub fn detect() -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        if no_color || !console::Term::stdout().is_term() {
            Self::plain()
        } else {
            Self::colored()
        }
    }

    pub fn colored() -> Self {
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            label: Style::new().bright_black(),
            time: Style::new().blue(),
            kind: Style::new().magenta().bold(),
            action: Style::new().yellow(),
            text: Style::new().bold(),
        }
    }

    pub fn plain() -> Self {
        Self {
            header: Style::new(),
            success: Style::new(),
            error: Style::new(),
            label: Style::new(),
            time: Style::new(),
            kind: Style::new(),
            action: Style::new(),
            text: Style::new(),
        }
    }
}

pub fn palette() -> &'static Palette {
    PALETTE.get_or_init(Palette::detect)
}

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(palette().header));
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, label.style(palette().label), value);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(palette().success));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(palette().error));
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(palette().header));
}

/// The fields of one timeline row, one per line
pub fn row_fields(time: &str, kind: &str, action: &str, pid: u32, data64: u64, text: &str) {
    let p = palette();
    println!("  {:<7} {}", "time".style(p.label), time.trim().style(p.time));
    println!("  {:<7} {}", "type".style(p.label), kind.style(p.kind));
    println!("  {:<7} {}", "action".style(p.label), action.style(p.action));
    println!("  {:<7} {}", "pid".style(p.label), pid);
    println!("  {:<7} {:#018x}", "data".style(p.label), data64);
    println!("  {:<7} {}", "text".style(p.label), text.style(p.text));
}

/// Byte count with a binary unit, e.g. `1.5 KiB`
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
