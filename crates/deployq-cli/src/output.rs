use deployq_core::deploy::Deploy;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Left-aligned columns, two spaces apart, with a dashed rule under the
/// headers. Cells past the last header are dropped.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(headers[col].chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let mut out = line(&widths, headers.iter().copied());
    out.push_str(&line(&widths, rule.iter().map(String::as_str)));
    for row in rows {
        out.push_str(&line(&widths, row.iter().map(String::as_str)));
    }
    out
}

fn line<'a>(widths: &[usize], cells: impl Iterator<Item = &'a str>) -> String {
    let mut text = String::new();
    for (i, (cell, width)) in cells.zip(widths).enumerate() {
        if i > 0 {
            text.push_str("  ");
        }
        text.push_str(cell);
        let pad = width.saturating_sub(cell.chars().count());
        text.extend(std::iter::repeat(' ').take(pad));
    }
    let mut text = text.trim_end().to_string();
    text.push('\n');
    text
}

/// The result of one command, as printed with `--json`.
#[derive(Serialize)]
pub struct Outcome<'a> {
    pub outcome: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<&'a Deploy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<&'a Deploy>,
}

impl<'a> Outcome<'a> {
    pub fn new(outcome: &'static str, message: String) -> Self {
        Self {
            outcome,
            message,
            deploy: None,
            next: None,
        }
    }

    pub fn deploy(mut self, deploy: &'a Deploy) -> Self {
        self.deploy = Some(deploy);
        self
    }

    pub fn next(mut self, next: Option<&'a Deploy>) -> Self {
        self.next = next;
        self
    }

    /// Print the message, or the whole outcome as JSON.
    pub fn print(&self, json: bool) -> anyhow::Result<()> {
        if json {
            return print_json(self);
        }
        println!("{}", self.message);
        Ok(())
    }
}
